//! Simple Moving Average (SMA) indicator.

use super::Indicator;
use crate::cache::IndexedCache;
use types::{AverageSpec, Index, Period};

/// Simple Moving Average indicator.
///
/// Computes the arithmetic mean of the closing prices over a specified period.
/// Near the head of the series the mean covers the closes available so far.
#[derive(Debug, Clone)]
pub struct Sma {
    period: Period,
}

impl Sma {
    /// Create a new SMA indicator with the given period.
    ///
    /// # Panics
    /// Panics if period is 0.
    pub fn new(period: Period) -> Self {
        assert!(period > 0, "SMA period must be > 0");
        Self { period }
    }
}

impl Indicator for Sma {
    fn spec(&self) -> AverageSpec {
        AverageSpec::sma(self.period)
    }

    fn look_backward(&self) -> usize {
        self.period - 1
    }

    fn calculate(
        &self,
        index: Index,
        closes: &IndexedCache<f64>,
        _previous: Option<f64>,
    ) -> Option<f64> {
        let start = (index - self.look_backward() as Index).max(0);
        let mut sum = 0.0;
        for i in start..=index {
            sum += closes.value(i)?;
        }
        Some(sum / (index - start + 1) as f64)
    }
}
