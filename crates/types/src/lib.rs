//! Core types for the transition-stats pipeline.
//!
//! This crate provides the data model shared by every stage: source bars,
//! the typed field roles that replace string field lookups, the records each
//! stage persists, and the static pipeline configuration.

mod config;
mod fields;
mod ids;
mod indicators;
mod market_data;
mod records;

pub use config::{
    ConfigError, KeyConfig, NormalizerParams, PipelineConfig, RangeSpec, SpreadSpec,
};
pub use fields::{FieldBlock, FieldRole, ParseFieldError, PriceKind, Representation};
pub use ids::{Index, Period, Timestamp};
pub use indicators::{AverageKind, AverageSpec};
pub use market_data::Bar;
pub use records::{ExtremumKind, PerformanceRecord, RangeExtremum, StateVector, Transition};
