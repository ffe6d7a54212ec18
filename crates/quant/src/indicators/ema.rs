//! Exponential Moving Average (EMA) indicator.

use super::Indicator;
use crate::cache::IndexedCache;
use types::{AverageSpec, Index, Period};

/// Exponential Moving Average indicator.
///
/// Gives more weight to recent prices using exponential smoothing.
/// Multiplier = 2 / (period + 1). The first value is the first close.
#[derive(Debug, Clone)]
pub struct Ema {
    period: Period,
    multiplier: f64,
}

impl Ema {
    /// Create a new EMA indicator with the given period.
    ///
    /// # Panics
    /// Panics if period is 0.
    pub fn new(period: Period) -> Self {
        assert!(period > 0, "EMA period must be > 0");
        Self {
            period,
            multiplier: 2.0 / (period as f64 + 1.0),
        }
    }
}

impl Indicator for Ema {
    fn spec(&self) -> AverageSpec {
        AverageSpec::ema(self.period)
    }

    /// Only the previous EMA value is needed.
    fn look_backward(&self) -> usize {
        1
    }

    fn calculate(
        &self,
        index: Index,
        closes: &IndexedCache<f64>,
        previous: Option<f64>,
    ) -> Option<f64> {
        let close = closes.value(index)?;
        Some(match previous {
            Some(prev) => (close - prev) * self.multiplier + prev,
            None => close,
        })
    }
}
