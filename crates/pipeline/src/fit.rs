//! Normalizer fitting from the raw columns of the states table.
//!
//! Each raw field gets `center = mean` and `slope = 1 / std_dev`; the decimal
//! scale of the configured normalizer is kept. Fields whose observations
//! have no spread keep their configured parameters.

use quant::{Normalizer, RunningStats};
use std::collections::BTreeMap;
use storage::{Criteria, Order, RecordStore};
use tracing::{info, warn};
use types::{FieldRole, NormalizerParams, PipelineConfig, Representation};

use crate::error::Result;
use crate::tables::STATES_TABLE;
use crate::task::{Task, TaskContext, TaskOutcome};

/// Decimal scale used for fields without a configured normalizer.
const DEFAULT_DECIMALS: u32 = 4;

/// Streams the states once, accumulating statistics per raw field.
pub struct NormalizerFit<'a> {
    config: &'a PipelineConfig,
    store: &'a dyn RecordStore,
    stats: BTreeMap<FieldRole, RunningStats>,
}

impl<'a> NormalizerFit<'a> {
    pub fn new(config: &'a PipelineConfig, store: &'a dyn RecordStore) -> Self {
        Self {
            config,
            store,
            stats: BTreeMap::new(),
        }
    }

    /// Statistics gathered by the last run.
    pub fn stats(&self) -> &BTreeMap<FieldRole, RunningStats> {
        &self.stats
    }

    /// Fitted parameters for every field, falling back to the configured ones.
    pub fn params(&self) -> BTreeMap<FieldRole, NormalizerParams> {
        self.config
            .fields()
            .into_iter()
            .filter_map(|field| {
                let configured = self.config.normalizers.get(&field).copied();
                let decimals = configured.map_or(DEFAULT_DECIMALS, |p| p.decimals);
                let fitted = self
                    .stats
                    .get(&field)
                    .and_then(|stats| Normalizer::fit(stats, decimals, None));
                if fitted.is_none() {
                    warn!(field = %field, "No spread observed, keeping configured normalizer");
                }
                fitted.or(configured).map(|params| (field, params))
            })
            .collect()
    }
}

impl Task for NormalizerFit<'_> {
    fn name(&self) -> &'static str {
        "fit"
    }

    fn count(&mut self) -> Result<u64> {
        self.config.validate()?;
        self.stats.clear();
        Ok(self.store.count(STATES_TABLE, &Criteria::all())? as u64)
    }

    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskOutcome> {
        let columns: Vec<(FieldRole, String)> = self
            .config
            .fields()
            .into_iter()
            .map(|f| (f, f.column(Representation::Raw)))
            .collect();

        let store = self.store;
        let rows = store.select(STATES_TABLE, &Criteria::all(), &Order::asc("idx"))?;
        for row in rows {
            let row = row?;
            let index = row.integer("idx")?;
            if ctx.checkpoint(format_args!("state {index}")).is_break() {
                return Ok(TaskOutcome::Cancelled);
            }
            for (field, column) in &columns {
                self.stats.entry(*field).or_default().push(row.real(column)?);
            }
            ctx.advance();
        }
        info!(fields = self.stats.len(), states = ctx.done(), "Normalizers fitted");
        Ok(TaskOutcome::Completed)
    }
}
