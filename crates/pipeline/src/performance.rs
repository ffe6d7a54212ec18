//! Performance annotator: forward High/Low excursion per keyed state.
//!
//! For each candidate index the bars `index + 1 ..= index + max_horizon` are
//! walked once, keeping a running maximum of High and minimum of Low. A
//! record is emitted whenever the walk reaches a configured horizon, so each
//! record covers the whole window from `index + 1` up to its horizon. The
//! walk stops at the end of the series; horizons past it get no record.

use storage::{BarSource, RecordStore};
use tracing::info;
use types::{Index, PerformanceRecord, Period, PipelineConfig};

use crate::error::Result;
use crate::tables::{self, BatchWriter, PERFORMANCE_TABLE, STATES_TABLE};
use crate::task::{Task, TaskContext, TaskOutcome};

/// Walk the horizons of one candidate, emitting a record per reached horizon.
pub(crate) fn annotate(
    bars: &mut dyn BarSource,
    index: Index,
    horizons: &[Period],
    emit: &mut dyn FnMut(PerformanceRecord) -> Result<()>,
) -> Result<()> {
    let Some(&max_period) = horizons.last() else {
        return Ok(());
    };
    let size = bars.size();
    let time = bars.get(index)?.time;
    let mut maximum = f64::NEG_INFINITY;
    let mut minimum = f64::INFINITY;
    let mut next_horizon = horizons.iter().peekable();

    for period in 1..=max_period {
        let target = index + period as Index;
        if target >= size {
            break;
        }
        let bar = bars.get(target)?;
        maximum = maximum.max(bar.high);
        minimum = minimum.min(bar.low);
        if next_horizon.next_if(|&&h| h == period).is_some() {
            emit(PerformanceRecord {
                index,
                time,
                period: period as i32,
                maximum,
                minimum,
            })?;
        }
    }
    Ok(())
}

/// Writes the `performance` table for every keyed state.
pub struct PerformanceAnnotator<'a> {
    config: &'a PipelineConfig,
    store: &'a dyn RecordStore,
    bars: &'a mut dyn BarSource,
    batch: usize,
}

impl<'a> PerformanceAnnotator<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        store: &'a dyn RecordStore,
        bars: &'a mut dyn BarSource,
        batch: usize,
    ) -> Self {
        Self {
            config,
            store,
            bars,
            batch,
        }
    }
}

impl Task for PerformanceAnnotator<'_> {
    fn name(&self) -> &'static str {
        "performance"
    }

    fn count(&mut self) -> Result<u64> {
        self.config.validate()?;
        self.store.rebuild(&tables::performance_schema())?;
        Ok(self
            .store
            .count_distinct(STATES_TABLE, "idx", &tables::keyed())? as u64)
    }

    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskOutcome> {
        let mut writer = BatchWriter::new(self.store, PERFORMANCE_TABLE, self.batch);
        let mut emit = |record: PerformanceRecord| writer.push(tables::performance_record(&record));
        let horizons = &self.config.horizons;

        let candidates = self
            .store
            .select_distinct(STATES_TABLE, "idx", &tables::keyed())?;
        for candidate in candidates {
            let index = candidate?.integer("idx")?;
            if ctx.checkpoint(format_args!("state {index}")).is_break() {
                drop(emit);
                writer.flush()?;
                return Ok(TaskOutcome::Cancelled);
            }
            annotate(&mut *self.bars, index, horizons, &mut emit)?;
            // later candidates only look forward
            self.bars.remove(index);
            ctx.advance();
        }
        drop(emit);
        writer.flush()?;
        info!(records = writer.written(), "Performance annotated");
        Ok(TaskOutcome::Completed)
    }
}
