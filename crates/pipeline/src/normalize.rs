//! Normalizer stage: continuous and discrete values plus the state key.
//!
//! Only rows with an empty key are selected, so the stage can be re-run
//! (after a cancel, or on fully keyed data) without redoing work. Each row
//! is read, normalized block by block (deltas, spreads, speeds), keyed, and
//! written back before the next row is read.

use quant::Normalizer;
use std::collections::BTreeMap;
use storage::{Criteria, Order, RecordStore};
use tracing::info;
use types::{ConfigError, FieldRole, PipelineConfig, StateVector};

use crate::error::{PipelineError, Result};
use crate::key::KeyCodec;
use crate::tables::{self, STATES_TABLE};
use crate::task::{Task, TaskContext, TaskOutcome};

/// Normalizers resolved from the configuration, in canonical field order.
pub struct StateNormalizer<'a> {
    continuous: Vec<(FieldRole, Normalizer)>,
    discrete: BTreeMap<FieldRole, Normalizer>,
    codec: KeyCodec<'a>,
}

impl<'a> StateNormalizer<'a> {
    pub fn new(config: &'a PipelineConfig) -> Result<Self> {
        let mut continuous = Vec::new();
        let mut discrete = BTreeMap::new();
        for field in config.fields() {
            let params = config
                .normalizers
                .get(&field)
                .ok_or(ConfigError::MissingNormalizer(field))?;
            continuous.push((field, Normalizer::new(*params)));
            if field.is_discretized() {
                let params = config
                    .discretizers
                    .get(&field)
                    .ok_or(ConfigError::MissingDiscretizer(field))?;
                discrete.insert(field, Normalizer::new(*params));
            }
        }
        Ok(Self {
            continuous,
            discrete,
            codec: KeyCodec::new(&config.key),
        })
    }

    /// Fill the continuous, discrete and key parts of a state from its raw values.
    pub fn apply(&self, state: &mut StateVector) {
        state.continuous.clear();
        state.discrete.clear();
        for (field, normalizer) in &self.continuous {
            let raw = state.raw(*field).unwrap_or(f64::NAN);
            let value = normalizer.normalize(raw);
            state.continuous.insert(*field, value);
            if let Some(discretizer) = self.discrete.get(field) {
                state.discrete.insert(*field, discretizer.normalize(value));
            }
        }
        state.key = self.codec.compose(state);
    }
}

/// Fills `_nrm`, `_dsc` and `key` of every unkeyed state.
pub struct NormalizerStage<'a> {
    config: &'a PipelineConfig,
    store: &'a dyn RecordStore,
}

impl<'a> NormalizerStage<'a> {
    pub fn new(config: &'a PipelineConfig, store: &'a dyn RecordStore) -> Self {
        Self { config, store }
    }

    fn unkeyed() -> Criteria {
        Criteria::all().eq("key", "")
    }
}

impl Task for NormalizerStage<'_> {
    fn name(&self) -> &'static str {
        "normalize"
    }

    fn count(&mut self) -> Result<u64> {
        self.config.validate()?;
        Ok(self.store.count(STATES_TABLE, &Self::unkeyed())? as u64)
    }

    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskOutcome> {
        let normalizer = StateNormalizer::new(self.config)?;
        let fields = self.config.fields();
        let mut updated = 0usize;

        let rows = self
            .store
            .select(STATES_TABLE, &Self::unkeyed(), &Order::asc("idx"))?;
        for row in rows {
            let row = row?;
            let index = row.integer("idx")?;
            if ctx.checkpoint(format_args!("state {index}")).is_break() {
                return Ok(TaskOutcome::Cancelled);
            }
            let mut state = tables::state_from_record(&row, &fields)?;
            normalizer.apply(&mut state);
            let changed = self.store.update(
                STATES_TABLE,
                &tables::normalized_record(&state),
                &Criteria::all().eq("idx", state.index),
            )?;
            if changed != 1 {
                return Err(PipelineError::MissingState(state.index));
            }
            updated += 1;
            ctx.advance();
        }
        info!(states = updated, "States normalized");
        Ok(TaskOutcome::Completed)
    }
}
