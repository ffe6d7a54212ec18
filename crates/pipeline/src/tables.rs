//! Table layouts of the stage outputs and their record mappings.
//!
//! | table         | owner                                   | key            |
//! |---------------|-----------------------------------------|----------------|
//! | `states`      | state builder (`_nrm`/`_dsc`/`key`: normalizer) | `idx`  |
//! | `ranges`      | range tracker                           | `(name, period, idx)` |
//! | `performance` | performance annotator                   | `(idx, period)` |
//! | `transitions` | transition extractor                    | `index_in`     |

use storage::{Column, Criteria, Record, RecordStore, Schema, Value};
use types::{
    ExtremumKind, FieldRole, PerformanceRecord, PipelineConfig, RangeExtremum, Representation,
    StateVector, Transition,
};

use crate::error::Result;

pub const STATES_TABLE: &str = "states";
pub const RANGES_TABLE: &str = "ranges";
pub const PERFORMANCE_TABLE: &str = "performance";
pub const TRANSITIONS_TABLE: &str = "transitions";

// ─────────────────────────────────────────────────────────────────────────────
// States
// ─────────────────────────────────────────────────────────────────────────────

pub fn states_schema(config: &PipelineConfig) -> Schema {
    let mut schema = Schema::new(STATES_TABLE)
        .column(Column::integer("idx").primary_key())
        .column(Column::integer("time").not_null())
        .column(Column::integer("valid").not_null())
        .column(Column::text("key").not_null().default_text(""));
    for field in config.fields() {
        schema = schema
            .column(Column::real(field.column(Representation::Raw)))
            .column(Column::real(field.column(Representation::Continuous)));
        if field.is_discretized() {
            schema = schema.column(Column::real(field.column(Representation::Discrete)));
        }
    }
    schema.index(&["key", "idx"])
}

/// Freshly built state: raw values and an empty key.
pub fn state_record(state: &StateVector) -> Record {
    let mut record = Record::new()
        .with("idx", state.index)
        .with("time", state.time)
        .with("valid", state.valid)
        .with("key", state.key.as_str());
    for (field, value) in &state.raw {
        record.set(field.column(Representation::Raw), *value);
    }
    record
}

/// Columns written by the normalizer stage.
pub fn normalized_record(state: &StateVector) -> Record {
    let mut record = Record::new();
    for (field, value) in &state.continuous {
        record.set(field.column(Representation::Continuous), *value);
    }
    for (field, value) in &state.discrete {
        record.set(field.column(Representation::Discrete), *value);
    }
    record.set("key", state.key.as_str());
    record
}

fn optional_real(record: &Record, column: &str) -> Option<f64> {
    match record.get(column) {
        Some(Value::Real(v)) => Some(*v),
        Some(Value::Integer(i)) => Some(*i as f64),
        _ => None,
    }
}

/// Read a state row. NULL normalized columns are left out of the maps.
pub fn state_from_record(record: &Record, fields: &[FieldRole]) -> Result<StateVector> {
    let mut state = StateVector {
        index: record.integer("idx")?,
        time: record.integer("time")?,
        valid: record.boolean("valid")?,
        key: record.text("key")?.to_string(),
        ..Default::default()
    };
    for &field in fields {
        state
            .raw
            .insert(field, record.real(&field.column(Representation::Raw))?);
        if let Some(v) = optional_real(record, &field.column(Representation::Continuous)) {
            state.continuous.insert(field, v);
        }
        if field.is_discretized()
            && let Some(v) = optional_real(record, &field.column(Representation::Discrete))
        {
            state.discrete.insert(field, v);
        }
    }
    Ok(state)
}

/// Criteria selecting states the normalizer has keyed.
pub fn keyed() -> Criteria {
    Criteria::all().gt("key", "")
}

/// Direct lookup of one state by index.
pub fn find_state(
    store: &dyn RecordStore,
    index: types::Index,
    fields: &[FieldRole],
) -> Result<Option<StateVector>> {
    let mut cursor = store.select(
        STATES_TABLE,
        &Criteria::all().eq("idx", index),
        &storage::Order::none(),
    )?;
    match cursor.next() {
        Some(record) => Ok(Some(state_from_record(&record?, fields)?)),
        None => Ok(None),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ranges
// ─────────────────────────────────────────────────────────────────────────────

pub fn ranges_schema() -> Schema {
    Schema::new(RANGES_TABLE)
        .column(Column::text("name").not_null())
        .column(Column::integer("period").not_null())
        .column(Column::text("kind").not_null())
        .column(Column::real("value"))
        .column(Column::integer("idx").not_null())
        .column(Column::integer("time").not_null())
        .index(&["name", "period", "idx"])
}

pub fn range_record(extremum: &RangeExtremum) -> Record {
    Record::new()
        .with("name", extremum.name.as_str())
        .with("period", extremum.period)
        .with("kind", extremum.kind.as_str())
        .with("value", extremum.value)
        .with("idx", extremum.index)
        .with("time", extremum.time)
}

pub fn range_from_record(record: &Record) -> Result<RangeExtremum> {
    let kind = match record.text("kind")? {
        "min" => ExtremumKind::Min,
        "max" => ExtremumKind::Max,
        _ => {
            return Err(storage::StoreError::TypeMismatch {
                column: "kind".to_string(),
                expected: "min or max",
                found: "text",
            }
            .into());
        }
    };
    Ok(RangeExtremum {
        name: record.text("name")?.to_string(),
        period: record.integer("period")? as i32,
        kind,
        value: record.real("value")?,
        index: record.integer("idx")?,
        time: record.integer("time")?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Performance
// ─────────────────────────────────────────────────────────────────────────────

pub fn performance_schema() -> Schema {
    Schema::new(PERFORMANCE_TABLE)
        .column(Column::integer("idx").not_null())
        .column(Column::integer("time").not_null())
        .column(Column::integer("period").not_null())
        .column(Column::real("maximum"))
        .column(Column::real("minimum"))
        .index(&["idx", "period"])
}

pub fn performance_record(perf: &PerformanceRecord) -> Record {
    Record::new()
        .with("idx", perf.index)
        .with("time", perf.time)
        .with("period", perf.period)
        .with("maximum", perf.maximum)
        .with("minimum", perf.minimum)
}

pub fn performance_from_record(record: &Record) -> Result<PerformanceRecord> {
    Ok(PerformanceRecord {
        index: record.integer("idx")?,
        time: record.integer("time")?,
        period: record.integer("period")? as i32,
        maximum: record.real("maximum")?,
        minimum: record.real("minimum")?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Transitions
// ─────────────────────────────────────────────────────────────────────────────

/// `group` is an SQL keyword, so the column is `group_id`.
pub fn transitions_schema() -> Schema {
    Schema::new(TRANSITIONS_TABLE)
        .column(Column::text("key_in").not_null())
        .column(Column::text("key_out").not_null())
        .column(Column::integer("index_in").not_null())
        .column(Column::integer("index_out").not_null())
        .column(Column::integer("group_id").not_null())
        .column(Column::real("value_high"))
        .column(Column::real("value_low"))
        .column(Column::real("value_close"))
        .column(Column::text("spread_in"))
        .column(Column::text("spread_out"))
        .column(Column::text("speed_in"))
        .column(Column::text("speed_out"))
        .index(&["key_in", "key_out"])
        .index(&["index_in"])
}

/// Array columns are JSON text; non-finite values become `null`.
pub fn transition_record(transition: &Transition) -> Result<Record> {
    Ok(Record::new()
        .with("key_in", transition.key_in.as_str())
        .with("key_out", transition.key_out.as_str())
        .with("index_in", transition.index_in)
        .with("index_out", transition.index_out)
        .with("group_id", transition.group)
        .with("value_high", transition.value_high)
        .with("value_low", transition.value_low)
        .with("value_close", transition.value_close)
        .with("spread_in", serde_json::to_string(&transition.spread_in)?)
        .with("spread_out", serde_json::to_string(&transition.spread_out)?)
        .with("speed_in", serde_json::to_string(&transition.speed_in)?)
        .with("speed_out", serde_json::to_string(&transition.speed_out)?))
}

fn json_values(record: &Record, column: &str) -> Result<Vec<f64>> {
    let values: Vec<Option<f64>> = serde_json::from_str(record.text(column)?)?;
    Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

pub fn transition_from_record(record: &Record) -> Result<Transition> {
    Ok(Transition {
        key_in: record.text("key_in")?.to_string(),
        key_out: record.text("key_out")?.to_string(),
        index_in: record.integer("index_in")?,
        index_out: record.integer("index_out")?,
        group: record.integer("group_id")?,
        value_high: record.real("value_high")?,
        value_low: record.real("value_low")?,
        value_close: record.real("value_close")?,
        spread_in: json_values(record, "spread_in")?,
        spread_out: json_values(record, "spread_out")?,
        speed_in: json_values(record, "speed_in")?,
        speed_out: json_values(record, "speed_out")?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Batched writes
// ─────────────────────────────────────────────────────────────────────────────

/// Buffers records and writes them one transaction per batch.
///
/// Callers must [`flush`](Self::flush) before returning, including on cancel.
pub struct BatchWriter<'a> {
    store: &'a dyn RecordStore,
    table: &'static str,
    buffer: Vec<Record>,
    capacity: usize,
    written: usize,
}

impl<'a> BatchWriter<'a> {
    pub fn new(store: &'a dyn RecordStore, table: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            store,
            table,
            buffer: Vec::with_capacity(capacity),
            capacity,
            written: 0,
        }
    }

    pub fn push(&mut self, record: Record) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.capacity {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<usize> {
        let n = self.store.insert_all(self.table, &self.buffer)?;
        self.buffer.clear();
        self.written += n;
        Ok(n)
    }

    /// Records written so far (excluding the unflushed buffer).
    pub fn written(&self) -> usize {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use storage::{Order, SqliteStore};
    use types::PriceKind;

    #[test]
    fn test_states_schema_columns() {
        let config = PipelineConfig::default();
        let schema = states_schema(&config);
        assert!(schema.has_column("delta_close_raw"));
        assert!(schema.has_column("delta_close_nrm"));
        assert!(!schema.has_column("delta_close_dsc"));
        assert!(schema.has_column("spread_5_10_dsc"));
        assert!(schema.has_column("speed_50_nrm"));
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_state_rows_keep_nan_flagged() {
        let config = PipelineConfig::default();
        let store = SqliteStore::open_in_memory().unwrap();
        store.rebuild(&states_schema(&config)).unwrap();

        let fields = config.fields();
        let raw: BTreeMap<FieldRole, f64> = fields
            .iter()
            .map(|&f| (f, if f == FieldRole::Speed(50) { f64::NAN } else { 0.01 }))
            .collect();
        let state = StateVector::new(7, 7_000, raw);
        store.insert(STATES_TABLE, &state_record(&state)).unwrap();

        let loaded = find_state(&store, 7, &fields).unwrap().unwrap();
        assert!(!loaded.valid);
        assert!(loaded.raw(FieldRole::Speed(50)).unwrap().is_nan());
        assert_eq!(loaded.raw(FieldRole::Delta(PriceKind::Open)), Some(0.01));
        assert!(loaded.continuous.is_empty());
        assert!(!loaded.is_keyed());
        assert!(find_state(&store, 8, &fields).unwrap().is_none());
    }

    #[test]
    fn test_transition_arrays_survive_nan() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.rebuild(&transitions_schema()).unwrap();
        let transition = Transition {
            key_in: "+05".into(),
            key_out: "-05".into(),
            index_in: 3,
            index_out: 4,
            group: 3,
            value_close: 0.2,
            spread_in: vec![0.5, f64::NAN],
            ..Default::default()
        };
        store
            .insert(TRANSITIONS_TABLE, &transition_record(&transition).unwrap())
            .unwrap();
        let record = store
            .select(TRANSITIONS_TABLE, &Criteria::all(), &Order::none())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let loaded = transition_from_record(&record).unwrap();
        assert_eq!(loaded.group, 3);
        assert_eq!(loaded.spread_in[0], 0.5);
        assert!(loaded.spread_in[1].is_nan());
        assert!(loaded.speed_out.is_empty());
    }

    #[test]
    fn test_batch_writer_flushes_in_batches() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.rebuild(&ranges_schema()).unwrap();
        let mut writer = BatchWriter::new(&store, RANGES_TABLE, 2);
        for i in 0..5 {
            writer
                .push(range_record(&RangeExtremum {
                    name: "spread_5_10".into(),
                    period: 5,
                    kind: ExtremumKind::Max,
                    value: 0.1,
                    index: i,
                    time: i,
                }))
                .unwrap();
        }
        assert_eq!(writer.written(), 4);
        writer.flush().unwrap();
        assert_eq!(store.count(RANGES_TABLE, &Criteria::all()).unwrap(), 5);
    }
}
