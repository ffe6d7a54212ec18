//! Transition statistics read back from the stage outputs.

use serde::Serialize;
use storage::{Criteria, Order, RecordStore};
use types::Transition;

use crate::error::Result;
use crate::tables::{self, STATES_TABLE, TRANSITIONS_TABLE};

/// Aggregate over all transitions from `key_in` to `key_out`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairStats {
    pub key_in: String,
    pub key_out: String,
    pub count: usize,
    /// Runs of consecutive transitions sharing this pair.
    pub groups: usize,
    /// Mean of the successor's normalized close delta, ignoring NaN.
    pub mean_close: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransitionSummary {
    pub states: i64,
    pub keys: i64,
    pub transitions: i64,
    pub groups: i64,
    pub pairs: Vec<PairStats>,
}

impl TransitionSummary {
    /// Pairs sorted by descending count.
    pub fn top(&self, n: usize) -> Vec<&PairStats> {
        let mut pairs: Vec<&PairStats> = self.pairs.iter().collect();
        pairs.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key_in.cmp(&b.key_in)));
        pairs.truncate(n);
        pairs
    }
}

struct PairAccumulator {
    stats: PairStats,
    last_group: Option<i64>,
    close_sum: f64,
    close_count: usize,
}

impl PairAccumulator {
    fn new(t: &Transition) -> Self {
        Self {
            stats: PairStats {
                key_in: t.key_in.clone(),
                key_out: t.key_out.clone(),
                count: 0,
                groups: 0,
                mean_close: None,
            },
            last_group: None,
            close_sum: 0.0,
            close_count: 0,
        }
    }

    fn matches(&self, t: &Transition) -> bool {
        self.stats.key_in == t.key_in && self.stats.key_out == t.key_out
    }

    fn push(&mut self, t: &Transition) {
        self.stats.count += 1;
        if self.last_group != Some(t.group) {
            self.stats.groups += 1;
            self.last_group = Some(t.group);
        }
        if t.value_close.is_finite() {
            self.close_sum += t.value_close;
            self.close_count += 1;
        }
    }

    fn finish(mut self) -> PairStats {
        self.stats.mean_close =
            (self.close_count > 0).then(|| self.close_sum / self.close_count as f64);
        self.stats
    }
}

/// Stream the transitions table once, ordered by pair then `index_in`.
pub fn summarize(store: &dyn RecordStore) -> Result<TransitionSummary> {
    let mut summary = TransitionSummary {
        states: store.count(STATES_TABLE, &Criteria::all())?,
        keys: store.count_distinct(STATES_TABLE, "key", &tables::keyed())?,
        transitions: store.count(TRANSITIONS_TABLE, &Criteria::all())?,
        groups: store.count_distinct(TRANSITIONS_TABLE, "group_id", &Criteria::all())?,
        pairs: Vec::new(),
    };

    let order = Order::asc("key_in")
        .then_asc("key_out")
        .then_asc("index_in");
    let mut current: Option<PairAccumulator> = None;
    for row in store.select(TRANSITIONS_TABLE, &Criteria::all(), &order)? {
        let transition = tables::transition_from_record(&row?)?;
        match current.as_mut() {
            Some(acc) if acc.matches(&transition) => acc.push(&transition),
            _ => {
                if let Some(done) = current.take() {
                    summary.pairs.push(done.finish());
                }
                let mut acc = PairAccumulator::new(&transition);
                acc.push(&transition);
                current = Some(acc);
            }
        }
    }
    if let Some(done) = current {
        summary.pairs.push(done.finish());
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::SqliteStore;
    use types::PipelineConfig;

    fn transition(key_in: &str, key_out: &str, index_in: i64, group: i64, close: f64) -> Transition {
        Transition {
            key_in: key_in.into(),
            key_out: key_out.into(),
            index_in,
            index_out: index_in + 1,
            group,
            value_close: close,
            ..Default::default()
        }
    }

    #[test]
    fn test_pairs_counted_with_groups() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .rebuild(&tables::states_schema(&PipelineConfig::default()))
            .unwrap();
        store.rebuild(&tables::transitions_schema()).unwrap();
        let rows = [
            transition("A", "B", 0, 0, 0.2),
            transition("A", "B", 2, 0, f64::NAN),
            transition("A", "A", 4, 4, -0.1),
            transition("A", "B", 5, 5, 0.4),
            transition("B", "A", 1, 1, 0.0),
        ];
        let records: Vec<_> = rows
            .iter()
            .map(|t| tables::transition_record(t).unwrap())
            .collect();
        store.insert_all(TRANSITIONS_TABLE, &records).unwrap();

        let summary = summarize(&store).unwrap();
        assert_eq!(summary.transitions, 5);
        assert_eq!(summary.groups, 4);
        assert_eq!(summary.pairs.len(), 3);

        let ab = summary
            .pairs
            .iter()
            .find(|p| p.key_in == "A" && p.key_out == "B")
            .unwrap();
        assert_eq!((ab.count, ab.groups), (3, 2));
        assert!((ab.mean_close.unwrap() - 0.3).abs() < 1e-12);
        assert_eq!(summary.top(1)[0], ab);
    }

    #[test]
    fn test_empty_tables() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .rebuild(&tables::states_schema(&PipelineConfig::default()))
            .unwrap();
        store.rebuild(&tables::transitions_schema()).unwrap();
        assert_eq!(summarize(&store).unwrap(), TransitionSummary::default());
    }
}
