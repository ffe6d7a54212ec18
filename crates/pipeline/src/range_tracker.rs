//! Range tracker: local extrema of state fields over symmetric windows.
//!
//! For every index and every configured `(field, period)` pair, a negative
//! value is tested as a local minimum and a positive value as a local
//! maximum over `[index - period, index + period]`. Zero and non-finite
//! values are skipped. Windows are truncated at both ends of the series.
//!
//! States stream through a sliding window. The candidate at `i` is decided
//! as soon as `i + P` has been read (P = largest period), so the window
//! never needs more than `2P + 1` rows; it is trimmed once it grows past
//! `10 × P`.

use quant::{is_local_maximum, is_local_minimum};
use std::collections::VecDeque;
use storage::{Order, RecordStore};
use tracing::info;
use types::{
    ExtremumKind, Index, PipelineConfig, RangeExtremum, RangeSpec, Representation, Timestamp,
};

use crate::error::Result;
use crate::tables::{self, BatchWriter, RANGES_TABLE, STATES_TABLE};
use crate::task::{Task, TaskContext, TaskOutcome};

/// Multiple of the largest period the window may grow to before trimming.
const WINDOW_FACTOR: usize = 10;

/// Sliding window over the tracked fields.
pub(crate) struct RangeWindow {
    specs: Vec<RangeSpec>,
    max_period: Index,
    positions: VecDeque<(Index, Timestamp)>,
    columns: Vec<VecDeque<f64>>,
    next_candidate: Index,
}

impl RangeWindow {
    pub(crate) fn new(specs: &[RangeSpec]) -> Self {
        let max_period = specs.iter().map(|s| s.period).max().unwrap_or(0);
        let capacity = WINDOW_FACTOR * max_period.max(1);
        Self {
            specs: specs.to_vec(),
            max_period: max_period as Index,
            positions: VecDeque::with_capacity(capacity),
            columns: specs.iter().map(|_| VecDeque::with_capacity(capacity)).collect(),
            next_candidate: 0,
        }
    }

    fn capacity(&self) -> usize {
        WINDOW_FACTOR * (self.max_period as usize).max(1)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.positions.len()
    }

    fn first_index(&self) -> Option<Index> {
        self.positions.front().map(|(i, _)| *i)
    }

    fn last_index(&self) -> Option<Index> {
        self.positions.back().map(|(i, _)| *i)
    }

    /// Append the next row (ascending, contiguous) and emit every candidate
    /// whose window is now complete.
    pub(crate) fn push(
        &mut self,
        index: Index,
        time: Timestamp,
        values: Vec<f64>,
        emit: &mut dyn FnMut(RangeExtremum) -> Result<()>,
    ) -> Result<()> {
        self.positions.push_back((index, time));
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.push_back(value);
        }
        while self.next_candidate + self.max_period <= index {
            self.decide(self.next_candidate, emit)?;
            self.next_candidate += 1;
        }
        if self.positions.len() > self.capacity() {
            self.trim();
        }
        Ok(())
    }

    /// Decide the remaining candidates, whose windows are truncated at the tail.
    pub(crate) fn finish(&mut self, emit: &mut dyn FnMut(RangeExtremum) -> Result<()>) -> Result<()> {
        while let Some(last) = self.last_index()
            && self.next_candidate <= last
        {
            self.decide(self.next_candidate, emit)?;
            self.next_candidate += 1;
        }
        Ok(())
    }

    /// Drop rows no pending candidate can see.
    fn trim(&mut self) {
        let keep_from = self.next_candidate - self.max_period;
        while let Some(first) = self.first_index()
            && first < keep_from
        {
            self.positions.pop_front();
            for column in &mut self.columns {
                column.pop_front();
            }
        }
    }

    fn decide(
        &mut self,
        index: Index,
        emit: &mut dyn FnMut(RangeExtremum) -> Result<()>,
    ) -> Result<()> {
        let Some(base) = self.first_index() else {
            return Ok(());
        };
        let position = (index - base) as usize;
        let Some(&(_, time)) = self.positions.get(position) else {
            return Ok(());
        };
        for (spec, column) in self.specs.iter().zip(self.columns.iter_mut()) {
            let values = column.make_contiguous();
            let value = values[position];
            let kind = if value < 0.0 && is_local_minimum(values, position, spec.period) {
                ExtremumKind::Min
            } else if value > 0.0 && is_local_maximum(values, position, spec.period) {
                ExtremumKind::Max
            } else {
                continue;
            };
            emit(RangeExtremum {
                name: spec.field.to_string(),
                period: spec.period as i32,
                kind,
                value,
                index,
                time,
            })?;
        }
        Ok(())
    }
}

/// Writes the `ranges` table from the raw state fields.
pub struct RangeTracker<'a> {
    config: &'a PipelineConfig,
    store: &'a dyn RecordStore,
    batch: usize,
}

impl<'a> RangeTracker<'a> {
    pub fn new(config: &'a PipelineConfig, store: &'a dyn RecordStore, batch: usize) -> Self {
        Self {
            config,
            store,
            batch,
        }
    }
}

impl Task for RangeTracker<'_> {
    fn name(&self) -> &'static str {
        "ranges"
    }

    fn count(&mut self) -> Result<u64> {
        self.config.validate()?;
        self.store.rebuild(&tables::ranges_schema())?;
        Ok(self.store.count(STATES_TABLE, &storage::Criteria::all())? as u64)
    }

    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskOutcome> {
        let mut writer = BatchWriter::new(self.store, RANGES_TABLE, self.batch);
        let mut window = RangeWindow::new(&self.config.ranges);
        let columns: Vec<String> = self
            .config
            .ranges
            .iter()
            .map(|r| r.field.column(Representation::Raw))
            .collect();
        let mut emit = |extremum: RangeExtremum| writer.push(tables::range_record(&extremum));

        let rows = self
            .store
            .select(STATES_TABLE, &storage::Criteria::all(), &Order::asc("idx"))?;
        for row in rows {
            let row = row?;
            let index = row.integer("idx")?;
            if ctx.checkpoint(format_args!("state {index}")).is_break() {
                drop(emit);
                writer.flush()?;
                return Ok(TaskOutcome::Cancelled);
            }
            let values = columns
                .iter()
                .map(|c| row.real(c))
                .collect::<storage::Result<Vec<f64>>>()?;
            window.push(index, row.integer("time")?, values, &mut emit)?;
            ctx.advance();
        }
        window.finish(&mut emit)?;
        drop(emit);
        writer.flush()?;
        info!(extrema = writer.written(), "Ranges tracked");
        Ok(TaskOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::FieldRole;

    fn spec(period: usize) -> RangeSpec {
        RangeSpec {
            field: FieldRole::Speed(20),
            period,
        }
    }

    fn run(values: &[f64], specs: &[RangeSpec]) -> (Vec<RangeExtremum>, usize) {
        let mut window = RangeWindow::new(specs);
        let mut found = Vec::new();
        let mut longest = 0;
        let mut emit = |e: RangeExtremum| -> Result<()> {
            found.push(e);
            Ok(())
        };
        for (i, &v) in values.iter().enumerate() {
            window
                .push(i as Index, 1_000 * i as Timestamp, vec![v; specs.len()], &mut emit)
                .unwrap();
            longest = longest.max(window.len());
        }
        window.finish(&mut emit).unwrap();
        (found, longest)
    }

    #[test]
    fn test_single_spike_extrema() {
        let mut values = vec![0.0; 21];
        values[10] = -2.0;
        let (found, _) = run(&values, &[spec(3)]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].index, 10);
        assert_eq!(found[0].kind, ExtremumKind::Min);
        assert_eq!(found[0].time, 10_000);
        assert_eq!(found[0].name, "speed_20");

        values[10] = 2.0;
        let (found, _) = run(&values, &[spec(3)]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ExtremumKind::Max);
        assert_eq!(found[0].value, 2.0);
    }

    #[test]
    fn test_truncated_windows_at_both_ends() {
        // head and tail extremes only see a partial window
        let values = [3.0, 1.0, 0.5, 1.0, 0.5, 1.0, 4.0];
        let (found, _) = run(&values, &[spec(2)]);
        let indices: Vec<Index> = found.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 6]);
    }

    #[test]
    fn test_window_stays_bounded() {
        let values: Vec<f64> = (0..500).map(|i| (i as f64 * 0.7).sin()).collect();
        let (found, longest) = run(&values, &[spec(2), spec(4)]);
        assert!(longest <= WINDOW_FACTOR * 4 + 1);
        assert!(found.iter().any(|e| e.period == 2));
        assert!(found.iter().all(|e| e.index >= 0 && e.index < 500));
    }

    #[test]
    fn test_multiple_periods_agree_with_direct_test() {
        let values: Vec<f64> = (0..60).map(|i| ((i * 7919) % 23) as f64 - 11.0).collect();
        let specs = [spec(2), spec(5)];
        let (found, _) = run(&values, &specs);
        for s in &specs {
            let expected: Vec<Index> = (0..values.len())
                .filter(|&i| {
                    let v = values[i];
                    (v < 0.0 && is_local_minimum(&values, i, s.period))
                        || (v > 0.0 && is_local_maximum(&values, i, s.period))
                })
                .map(|i| i as Index)
                .collect();
            let got: Vec<Index> = found
                .iter()
                .filter(|e| e.period == s.period as i32)
                .map(|e| e.index)
                .collect();
            assert_eq!(got, expected);
        }
    }
}
