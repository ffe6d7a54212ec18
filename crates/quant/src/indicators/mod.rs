//! Incremental moving averages.
//!
//! Indicators are evaluated one index at a time against a cache of closing
//! prices. Each indicator declares its `look_backward`: the largest distance
//! behind the current index it will ever read, from the close cache or from
//! its own previous output. Anything older can be evicted by the caller
//! without changing the computed values.
//!
//! # Supported Indicators
//! - **SMA** - Simple Moving Average
//! - **EMA** - Exponential Moving Average
//!
//! # Example
//! ```
//! use quant::cache::IndexedCache;
//! use quant::indicators::{Indicator, Sma};
//!
//! let mut closes = IndexedCache::new();
//! for (i, c) in [10.0, 11.0, 12.0].into_iter().enumerate() {
//!     closes.insert(i as i64, c);
//! }
//! let sma = Sma::new(3);
//! assert_eq!(sma.calculate(2, &closes, None), Some(11.0));
//! ```

use crate::cache::IndexedCache;
use types::{AverageKind, AverageSpec, Index};

mod ema;
mod sma;

pub use ema::Ema;
pub use sma::Sma;

// =============================================================================
// Indicator Trait
// =============================================================================

/// Trait for incrementally evaluated indicators over closing prices.
pub trait Indicator: Send + Sync {
    /// The specification this indicator was built from.
    fn spec(&self) -> AverageSpec;

    /// Maximum distance behind the current index this indicator reads.
    fn look_backward(&self) -> usize;

    /// Calculate the value at `index`.
    ///
    /// `closes` must hold the closes from `index - look_backward()` to `index`
    /// (or from 0 near the head of the series). `previous` is this
    /// indicator's own value at `index - 1`, if any.
    ///
    /// Returns `None` if a required close is missing from the cache.
    fn calculate(
        &self,
        index: Index,
        closes: &IndexedCache<f64>,
        previous: Option<f64>,
    ) -> Option<f64>;
}

// =============================================================================
// Factory Function
// =============================================================================

/// Create an indicator from its specification.
pub fn create_indicator(spec: AverageSpec) -> Box<dyn Indicator> {
    match spec.kind {
        AverageKind::Sma => Box::new(Sma::new(spec.period)),
        AverageKind::Ema => Box::new(Ema::new(spec.period)),
    }
}

// =============================================================================
// Tests
// =============================================================================
