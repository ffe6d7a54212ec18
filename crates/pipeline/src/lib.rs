//! Resumable batch stages turning a bar series into transition statistics.
//!
//! # Stages
//!
//! ```text
//! bars ──► states ──► ranges
//!            │
//!            └──► normalize ──► performance
//!                     │
//!                     └──► transitions
//! ```
//!
//! - [`StateBuilder`] - raw deltas, spreads and speeds per bar
//! - [`RangeTracker`] - local extrema of state fields
//! - [`NormalizerStage`] - continuous/discrete values and the state key
//! - [`PerformanceAnnotator`] - forward High/Low excursion per horizon
//! - [`TransitionExtractor`] - edges between consecutive state keys
//!
//! Every stage is a [`Task`]: it counts its work, rebuilds its output table,
//! then executes unit by unit, checking a [`TaskControl`] before each unit and
//! reporting to [`ProgressHook`]s after it. [`Pipeline`] runs them in order.

pub mod control;
pub mod error;
pub mod fit;
pub mod hooks;
pub mod key;
pub mod normalize;
pub mod performance;
pub mod range_tracker;
pub mod runner;
pub mod state_builder;
pub mod summary;
pub mod tables;
pub mod task;
pub mod transitions;

pub use control::TaskControl;
pub use error::{PipelineError, Result};
pub use fit::NormalizerFit;
pub use hooks::{ChannelHook, HookRunner, LoggingHook, NoOpHook, ProgressEvent, ProgressHook};
pub use key::{INVALID_KEY, KeyCodec};
pub use normalize::{NormalizerStage, StateNormalizer};
pub use performance::PerformanceAnnotator;
pub use range_tracker::RangeTracker;
pub use runner::{DEFAULT_BATCH, ParseStageError, Pipeline, PipelineReport, Stage};
pub use state_builder::StateBuilder;
pub use summary::{PairStats, TransitionSummary, summarize};
pub use task::{Task, TaskContext, TaskOutcome, TaskReport, TaskState, run_task};
pub use transitions::TransitionExtractor;
