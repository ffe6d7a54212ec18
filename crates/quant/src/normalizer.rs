//! Continuous and discretizing normalizers.
//!
//! A normalizer maps an unbounded raw value into `(-1, 1)`:
//!
//! ```text
//! continuous = round(tanh(slope * (x - center)), decimals)
//! discrete   = round(round(tanh(slope * (x - center)) * steps) / steps, decimals)
//! ```
//!
//! The discretizing form (`steps = Some(n)`) produces the bounded alphabet
//! `{-n, ..., n} / n`. Non-finite input yields `NaN` (or `±1` for infinities).

use crate::stats::RunningStats;
use types::NormalizerParams;

/// A fitted normalization function. Stateless and cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalizer {
    params: NormalizerParams,
}

impl Normalizer {
    pub fn new(params: NormalizerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &NormalizerParams {
        &self.params
    }

    /// Whether the output is quantized.
    pub fn is_discrete(&self) -> bool {
        self.params.steps.is_some()
    }

    /// Map a raw value into the normalized range.
    pub fn normalize(&self, value: f64) -> f64 {
        let mapped = (self.params.slope * (value - self.params.center)).tanh();
        let mapped = match self.params.steps {
            Some(steps) => {
                let steps = f64::from(steps);
                (mapped * steps).round() / steps
            }
            None => mapped,
        };
        round_to(mapped, self.params.decimals)
    }

    /// Fit parameters from observed statistics: the mean becomes the center
    /// and one standard deviation maps to `tanh(1)`.
    ///
    /// Returns `None` when the statistics have no spread.
    pub fn fit(stats: &RunningStats, decimals: u32, steps: Option<u32>) -> Option<NormalizerParams> {
        let center = stats.mean()?;
        let std = stats.std_dev()?;
        if std.is_nan() || std <= 0.0 {
            return None;
        }
        Some(NormalizerParams {
            center,
            slope: 1.0 / std,
            decimals,
            steps,
        })
    }
}

/// Round to a number of decimal places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
