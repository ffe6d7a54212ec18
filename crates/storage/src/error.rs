//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by record stores and bar sources.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("column '{column}' missing from record")]
    MissingColumn { column: String },

    #[error("column '{column}' has type {found}, expected {expected}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("bar index {index} out of range (size {size})")]
    IndexOutOfRange { index: i64, size: i64 },

    #[error("bar {0} is not available")]
    BarUnavailable(i64),

    #[error("empty record for table '{0}'")]
    EmptyRecord(String),
}
