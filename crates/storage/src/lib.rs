//! Storage layer for the transition-stats pipeline.
//!
//! **Philosophy:** Declarative, Modular, SoC
//! - Declarative: tables are described by a [`Schema`] upfront
//! - Modular: stages only see the [`RecordStore`] and [`BarSource`] traits
//! - SoC: this crate ONLY handles persistence, no pipeline logic
//!
//! Every stage output is a flat, index/time-stamped table. Stages drop and
//! rebuild their tables on each full run; nothing is patched incrementally.
//!
//! The bundled implementation is [`SqliteStore`], a single SQLite connection
//! shared behind a mutex. Cursors page through results with keyset seeks, so
//! no statement stays open between pages.

mod bars;
mod criteria;
mod error;
mod schema;
mod store;
mod value;

pub use bars::{BARS_TABLE, BarSource, MemoryBarSource, SqliteBarSource, bars_schema, import_bars};
pub use criteria::{Criteria, Operator, Order};
pub use error::{Result, StoreError};
pub use schema::{Column, ColumnType, Schema, StorageConfig, validate_identifier};
pub use store::{RecordCursor, RecordStore, SqliteStore};
pub use value::{Record, Value};
