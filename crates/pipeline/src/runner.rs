//! Runs the stages in dependency order on the caller's thread.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use storage::{BarSource, RecordStore};
use tracing::{info, warn};
use types::PipelineConfig;

use crate::control::TaskControl;
use crate::error::Result;
use crate::hooks::HookRunner;
use crate::normalize::NormalizerStage;
use crate::performance::PerformanceAnnotator;
use crate::range_tracker::RangeTracker;
use crate::state_builder::StateBuilder;
use crate::task::{Task, TaskReport, TaskState, run_task};
use crate::transitions::TransitionExtractor;

/// Default number of records written per transaction.
pub const DEFAULT_BATCH: usize = 1_000;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    States,
    Ranges,
    Normalize,
    Performance,
    Transitions,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Self::States,
        Self::Ranges,
        Self::Normalize,
        Self::Performance,
        Self::Transitions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::States => "states",
            Self::Ranges => "ranges",
            Self::Normalize => "normalize",
            Self::Performance => "performance",
            Self::Transitions => "transitions",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage '{0}' (expected one of: states, ranges, normalize, performance, transitions)")]
pub struct ParseStageError(pub String);

impl FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStageError(s.to_string()))
    }
}

/// Reports of the stages that ran, in order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub stages: Vec<TaskReport>,
}

impl PipelineReport {
    pub fn is_cancelled(&self) -> bool {
        self.stages
            .last()
            .is_some_and(|r| r.state == TaskState::Cancelled)
    }

    pub fn get(&self, task: &str) -> Option<&TaskReport> {
        self.stages.iter().find(|r| r.task == task)
    }
}

/// Stage driver over one configuration and one record store.
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    store: &'a dyn RecordStore,
    control: TaskControl,
    hooks: HookRunner,
    batch: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig, store: &'a dyn RecordStore) -> Self {
        Self {
            config,
            store,
            control: TaskControl::new(),
            hooks: HookRunner::new(),
            batch: DEFAULT_BATCH,
        }
    }

    pub fn with_control(mut self, control: TaskControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_hooks(mut self, hooks: HookRunner) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    /// Handle for pausing or cancelling from another thread.
    pub fn control(&self) -> &TaskControl {
        &self.control
    }

    /// Run one stage.
    pub fn run_stage(&self, stage: Stage, bars: &mut dyn BarSource) -> Result<TaskReport> {
        let mut task: Box<dyn Task + '_> = match stage {
            Stage::States => Box::new(StateBuilder::new(self.config, self.store, bars, self.batch)),
            Stage::Ranges => Box::new(RangeTracker::new(self.config, self.store, self.batch)),
            Stage::Normalize => Box::new(NormalizerStage::new(self.config, self.store)),
            Stage::Performance => Box::new(PerformanceAnnotator::new(
                self.config,
                self.store,
                bars,
                self.batch,
            )),
            Stage::Transitions => {
                Box::new(TransitionExtractor::new(self.config, self.store, self.batch))
            }
        };
        run_task(task.as_mut(), &self.control, &self.hooks)
    }

    /// Run `from` and every later stage. Configuration is checked before
    /// anything is counted; a cancelled stage stops the run and later
    /// stages are not started.
    pub fn run(&self, bars: &mut dyn BarSource, from: Stage) -> Result<PipelineReport> {
        self.config.validate()?;
        let mut report = PipelineReport::default();
        for stage in Stage::ALL.into_iter().filter(|s| *s >= from) {
            let stage_report = self.run_stage(stage, bars)?;
            let cancelled = stage_report.state == TaskState::Cancelled;
            report.stages.push(stage_report);
            if cancelled {
                warn!(stage = %stage, "Pipeline cancelled");
                return Ok(report);
            }
        }
        info!(stages = report.stages.len(), "Pipeline completed");
        Ok(report)
    }
}
