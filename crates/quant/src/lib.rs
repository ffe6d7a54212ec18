//! Quantitative primitives for the transition-stats pipeline.
//!
//! # Modules
//!
//! - [`cache`] - Index-keyed caches with bounded lookback eviction
//! - [`indicators`] - Incremental moving averages (SMA, EMA)
//! - [`normalizer`] - Continuous and discretizing normalizers
//! - [`extrema`] - Symmetric window extremum tests
//! - [`stats`] - Statistical utilities
//!
//! # Design Notes
//!
//! - All calculations use `f64`
//! - Indicators are evaluated one index at a time and declare how far back
//!   they need to look, so callers can evict everything older
//! - Normalizers are pure functions of their fitted parameters

pub mod cache;
pub mod extrema;
pub mod indicators;
pub mod normalizer;
pub mod stats;

pub use cache::IndexedCache;
pub use extrema::{is_local_maximum, is_local_minimum};
pub use indicators::{Ema, Indicator, Sma, create_indicator};
pub use normalizer::Normalizer;
pub use stats::RunningStats;
