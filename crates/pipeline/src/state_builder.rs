//! State builder: one raw state vector per bar.
//!
//! The indicator chain is `bars → closes → one list per moving average →
//! composite state`. Every list is an [`IndexedCache`]; after index `i` is
//! built, entries at `i - L` and below (L = largest lookback of the chain)
//! are evicted from every list and released from the bar source.
//!
//! Composite fields:
//!
//! ```text
//! delta_<price>  = (price[i] - close[i-1]) / close[i-1]     close[-1] = open[0]
//! spread_<f>_<s> = (avg_f[i] - avg_s[i]) / avg_s[i]
//! speed_<p>      = (avg_p[i] - avg_p[i-1]) / avg_p[i-1]     NaN at i = 0
//! ```

use quant::{Indicator, IndexedCache, create_indicator};
use std::collections::BTreeMap;
use storage::{BarSource, RecordStore};
use tracing::{debug, info};
use types::{Bar, FieldRole, Index, Period, PipelineConfig, StateVector};

use crate::error::Result;
use crate::tables::{self, BatchWriter, STATES_TABLE};
use crate::task::{Task, TaskContext, TaskOutcome};

/// Deltas and speeds read one index back.
const COMPOSITE_LOOK_BACKWARD: usize = 1;

struct AverageList {
    period: Period,
    indicator: Box<dyn Indicator>,
    values: IndexedCache<f64>,
}

/// Indicator chain evaluated one index at a time.
pub(crate) struct StateChain<'c> {
    config: &'c PipelineConfig,
    closes: IndexedCache<f64>,
    averages: Vec<AverageList>,
    look_backward: usize,
    evicted_through: Option<Index>,
    evict: bool,
}

impl<'c> StateChain<'c> {
    pub(crate) fn new(config: &'c PipelineConfig) -> Self {
        let averages: Vec<AverageList> = config
            .averages
            .iter()
            .map(|&spec| AverageList {
                period: spec.period,
                indicator: create_indicator(spec),
                values: IndexedCache::new(),
            })
            .collect();
        let look_backward = averages
            .iter()
            .map(|a| a.indicator.look_backward())
            .chain(std::iter::once(COMPOSITE_LOOK_BACKWARD))
            .max()
            .unwrap_or(COMPOSITE_LOOK_BACKWARD);
        Self {
            config,
            closes: IndexedCache::new(),
            averages,
            look_backward,
            evicted_through: None,
            evict: true,
        }
    }

    /// Keep every cached entry (reference mode for comparisons).
    #[cfg(test)]
    pub(crate) fn unbounded(mut self) -> Self {
        self.evict = false;
        self
    }

    pub(crate) fn look_backward(&self) -> usize {
        self.look_backward
    }

    /// Oldest index still held by any list.
    #[cfg(test)]
    pub(crate) fn oldest_cached(&self) -> Option<Index> {
        self.averages
            .iter()
            .filter_map(|a| a.values.first_index())
            .chain(self.closes.first_index())
            .min()
    }

    fn average(&self, period: Period, index: Index) -> f64 {
        self.averages
            .iter()
            .find(|a| a.period == period)
            .and_then(|a| a.values.value(index))
            .unwrap_or(f64::NAN)
    }

    /// Evaluate the chain at `index`. Indices must be fed in ascending order.
    pub(crate) fn evaluate(&mut self, bar: &Bar) -> StateVector {
        let index = bar.index;
        let previous_close = self.closes.value(index - 1).unwrap_or(bar.open);
        self.closes.insert(index, bar.close);

        for list in &mut self.averages {
            let previous = list.values.value(index - 1);
            let value = list
                .indicator
                .calculate(index, &self.closes, previous)
                .unwrap_or(f64::NAN);
            list.values.insert(index, value);
        }

        let mut raw = BTreeMap::new();
        for field in FieldRole::deltas() {
            if let FieldRole::Delta(kind) = field {
                raw.insert(field, (bar.price(kind) - previous_close) / previous_close);
            }
        }
        for spread in &self.config.spreads {
            let fast = self.average(spread.fast, index);
            let slow = self.average(spread.slow, index);
            raw.insert(
                FieldRole::Spread {
                    fast: spread.fast,
                    slow: spread.slow,
                },
                (fast - slow) / slow,
            );
        }
        for &period in &self.config.speeds {
            let current = self.average(period, index);
            let previous = self.average(period, index - 1);
            raw.insert(FieldRole::Speed(period), (current - previous) / previous);
        }
        StateVector::new(index, bar.time, raw)
    }

    /// Evict everything at or below `index - L` once `index > L`.
    pub(crate) fn evict(&mut self, index: Index, bars: &mut dyn BarSource) {
        let look_backward = self.look_backward as Index;
        if !self.evict || index <= look_backward {
            return;
        }
        let through = index - look_backward;
        self.closes.evict_through(through);
        for list in &mut self.averages {
            list.values.evict_through(through);
        }
        let from = self.evicted_through.map_or(0, |i| i + 1);
        for released in from..=through {
            bars.remove(released);
        }
        self.evicted_through = Some(through);
    }
}

/// Builds the `states` table from a bar source.
pub struct StateBuilder<'a> {
    config: &'a PipelineConfig,
    store: &'a dyn RecordStore,
    bars: &'a mut dyn BarSource,
    batch: usize,
}

impl<'a> StateBuilder<'a> {
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

impl Task for StateBuilder<'_> {
    fn name(&self) -> &'static str {
        "states"
    }

    fn count(&mut self) -> Result<u64> {
        self.config.validate()?;
        self.store.rebuild(&tables::states_schema(self.config))?;
        Ok(self.bars.size().max(0) as u64)
    }

    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskOutcome> {
        let mut chain = StateChain::new(self.config);
        let mut writer = BatchWriter::new(self.store, STATES_TABLE, self.batch);
        debug!(look_backward = chain.look_backward(), "State chain ready");

        let size = self.bars.size();
        for index in 0..size {
            if ctx.checkpoint(format_args!("bar {index}")).is_break() {
                writer.flush()?;
                return Ok(TaskOutcome::Cancelled);
            }
            let bar = self.bars.get(index)?;
            let state = chain.evaluate(&bar);
            writer.push(tables::state_record(&state))?;
            chain.evict(index, &mut *self.bars);
            ctx.advance();
        }
        writer.flush()?;
        info!(states = writer.written(), "States built");
        Ok(TaskOutcome::Completed)
    }
}
