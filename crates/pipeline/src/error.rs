//! Error types for pipeline stages.

use storage::StoreError;
use thiserror::Error;
use types::ConfigError;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that abort a stage.
///
/// Data problems local to one unit of work (no successor at the tail, a
/// truncated window) are not errors; the unit just emits nothing.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state row {0} not found")]
    MissingState(i64),

    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("stage {stage} failed at step {step}: {source}")]
    StageFailed {
        stage: String,
        step: u64,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// The innermost error, unwrapping stage context.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }
}
