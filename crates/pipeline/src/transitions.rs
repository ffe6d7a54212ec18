//! Transition extractor: edges from each keyed state to its successor.
//!
//! One ascending pass over the keyed states visits every distinct key once.
//! For a key, its rows are read in index order; the successor of `index_in`
//! is the next row of the same selection when that row is exactly
//! `index_in + 1`, otherwise it is looked up directly. The last state of the
//! series has no successor and yields nothing.
//!
//! Within one key, `group` is the `index_in` at which the current run of
//! identical `key_out` values started.

use std::collections::HashSet;
use storage::{Criteria, Order, RecordStore};
use tracing::{debug, info};
use types::{FieldRole, Index, PipelineConfig, PriceKind, StateVector, Transition};

use crate::error::Result;
use crate::tables::{self, BatchWriter, STATES_TABLE, TRANSITIONS_TABLE};
use crate::task::{Task, TaskContext, TaskOutcome};

/// Writes the `transitions` table.
pub struct TransitionExtractor<'a> {
    config: &'a PipelineConfig,
    store: &'a dyn RecordStore,
    batch: usize,
    fields: Vec<FieldRole>,
    processed: HashSet<Index>,
}

/// Result of extracting one key.
enum KeyRun {
    Done,
    Cancelled,
}

impl<'a> TransitionExtractor<'a> {
    pub fn new(config: &'a PipelineConfig, store: &'a dyn RecordStore, batch: usize) -> Self {
        Self {
            config,
            store,
            batch,
            fields: config.fields(),
            processed: HashSet::new(),
        }
    }

    fn discrete_values(state: &StateVector, fields: &[FieldRole]) -> Vec<f64> {
        fields
            .iter()
            .map(|&f| state.discrete(f).unwrap_or(f64::NAN))
            .collect()
    }

    fn transition(&self, input: &StateVector, output: &StateVector, group: Index) -> Transition {
        let spreads = self.config.spread_fields();
        let speeds = self.config.speed_fields();
        let delta = |kind| {
            output
                .continuous(FieldRole::Delta(kind))
                .unwrap_or(f64::NAN)
        };
        Transition {
            key_in: input.key.clone(),
            key_out: output.key.clone(),
            index_in: input.index,
            index_out: output.index,
            group,
            value_high: delta(PriceKind::High),
            value_low: delta(PriceKind::Low),
            value_close: delta(PriceKind::Close),
            spread_in: Self::discrete_values(input, &spreads),
            spread_out: Self::discrete_values(output, &spreads),
            speed_in: Self::discrete_values(input, &speeds),
            speed_out: Self::discrete_values(output, &speeds),
        }
    }

    /// Emit the transitions of every state keyed `key`.
    fn transitions_for(
        &mut self,
        key: &str,
        ctx: &TaskContext<'_>,
        writer: &mut BatchWriter<'_>,
    ) -> Result<KeyRun> {
        let store = self.store;
        let mut rows = store
            .select(STATES_TABLE, &Criteria::all().eq("key", key), &Order::asc("idx"))?
            .peekable();
        let mut group: Index = 0;
        let mut previous_key_out: Option<String> = None;
        let mut emitted = 0usize;

        while let Some(row) = rows.next() {
            if ctx.control().checkpoint().is_break() {
                return Ok(KeyRun::Cancelled);
            }
            let input = tables::state_from_record(&row?, &self.fields)?;
            if !self.processed.insert(input.index) {
                continue;
            }

            let successor = input.index + 1;
            let adjacent = match rows.peek() {
                Some(Ok(next)) => next.integer("idx")? == successor,
                _ => false,
            };
            let output = if adjacent {
                match rows.peek() {
                    Some(Ok(next)) => Some(tables::state_from_record(next, &self.fields)?),
                    _ => None,
                }
            } else {
                tables::find_state(store, successor, &self.fields)?
            };
            let Some(output) = output else {
                continue;
            };

            if previous_key_out.as_deref() != Some(output.key.as_str()) {
                group = input.index;
                previous_key_out = Some(output.key.clone());
            }
            writer.push(tables::transition_record(&self.transition(&input, &output, group))?)?;
            emitted += 1;
        }
        debug!(key, transitions = emitted, "Key extracted");
        Ok(KeyRun::Done)
    }
}

impl Task for TransitionExtractor<'_> {
    fn name(&self) -> &'static str {
        "transitions"
    }

    fn count(&mut self) -> Result<u64> {
        self.config.validate()?;
        self.store.rebuild(&tables::transitions_schema())?;
        self.processed.clear();
        Ok(self.store.count(STATES_TABLE, &tables::keyed())? as u64)
    }

    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskOutcome> {
        let mut writer = BatchWriter::new(self.store, TRANSITIONS_TABLE, self.batch);
        let mut seen_keys: HashSet<String> = HashSet::new();

        let store = self.store;
        let rows = store.select(STATES_TABLE, &tables::keyed(), &Order::asc("idx"))?;
        for row in rows {
            let row = row?;
            let key = row.text("key")?;
            if ctx.checkpoint(format_args!("key {key}")).is_break() {
                writer.flush()?;
                return Ok(TaskOutcome::Cancelled);
            }
            if !seen_keys.contains(key) {
                seen_keys.insert(key.to_string());
                if let KeyRun::Cancelled = self.transitions_for(key, ctx, &mut writer)? {
                    writer.flush()?;
                    return Ok(TaskOutcome::Cancelled);
                }
            }
            ctx.advance();
        }
        writer.flush()?;
        info!(
            keys = seen_keys.len(),
            transitions = writer.written(),
            "Transitions extracted"
        );
        Ok(TaskOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::TaskControl;
    use crate::hooks::HookRunner;
    use crate::task::run_task;
    use storage::SqliteStore;

    fn seed(config: &PipelineConfig, keys: &[&str]) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.rebuild(&tables::states_schema(config)).unwrap();
        for (i, key) in keys.iter().enumerate() {
            let raw = config.fields().into_iter().map(|f| (f, 0.0)).collect();
            let mut state = StateVector::new(i as Index, i as i64 * 60, raw);
            state.key = key.to_string();
            for field in config.fields() {
                state.continuous.insert(field, i as f64 / 10.0);
                if field.is_discretized() {
                    state.discrete.insert(field, 0.5);
                }
            }
            store.insert(STATES_TABLE, &tables::state_record(&state)).unwrap();
            store
                .update(
                    STATES_TABLE,
                    &tables::normalized_record(&state),
                    &Criteria::all().eq("idx", i as Index),
                )
                .unwrap();
        }
        store
    }

    fn extract(config: &PipelineConfig, store: &SqliteStore) -> Vec<Transition> {
        let mut task = TransitionExtractor::new(config, store, 3);
        run_task(&mut task, &TaskControl::new(), &HookRunner::new()).unwrap();
        let mut found: Vec<Transition> = store
            .select(TRANSITIONS_TABLE, &Criteria::all(), &Order::asc("index_in"))
            .unwrap()
            .map(|r| tables::transition_from_record(&r.unwrap()).unwrap())
            .collect();
        found.sort_by_key(|t| t.index_in);
        found
    }

    #[test]
    fn test_groups_follow_key_out_runs() {
        let config = PipelineConfig::default();
        let store = seed(&config, &["A", "A", "B", "B", "A"]);
        let found = extract(&config, &store);

        let edges: Vec<(Index, Index, &str, &str, Index)> = found
            .iter()
            .map(|t| (t.index_in, t.index_out, t.key_in.as_str(), t.key_out.as_str(), t.group))
            .collect();
        assert_eq!(
            edges,
            vec![
                (0, 1, "A", "A", 0),
                (1, 2, "A", "B", 1),
                (2, 3, "B", "B", 2),
                (3, 4, "B", "A", 3),
            ]
        );
        // values come from the successor
        assert_eq!(found[0].value_close, 0.1);
        assert_eq!(found[0].spread_in, vec![0.5; config.spread_fields().len()]);
        assert_eq!(found[0].speed_out.len(), config.speeds.len());
    }

    #[test]
    fn test_repeated_key_out_shares_group() {
        let config = PipelineConfig::default();
        let store = seed(&config, &["A", "B", "A", "B", "A", "B"]);
        let found = extract(&config, &store);

        assert_eq!(found.len(), 5);
        let groups: Vec<(Index, Index)> = found.iter().map(|t| (t.index_in, t.group)).collect();
        // A -> B at 0, 2, 4 is one run; B -> A at 1, 3 is another
        assert_eq!(groups, vec![(0, 0), (1, 1), (2, 0), (3, 1), (4, 0)]);
    }

    #[test]
    fn test_unkeyed_states_are_ignored() {
        let config = PipelineConfig::default();
        let store = seed(&config, &["A", "", "A"]);
        let found = extract(&config, &store);
        // 0 -> 1 still exists as a lookup, 2 has no successor
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].index_in, found[0].key_out.as_str()), (0, ""));
    }
}
