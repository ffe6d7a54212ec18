//! Moving average specifications used by the state builder.

use crate::ids::Period;
use serde::{Deserialize, Serialize};

/// Kind of moving average applied to closing prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AverageKind {
    /// Simple Moving Average.
    #[default]
    Sma,
    /// Exponential Moving Average.
    Ema,
}

/// A configured moving average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AverageSpec {
    #[serde(default)]
    pub kind: AverageKind,
    pub period: Period,
}

impl AverageSpec {
    pub fn sma(period: Period) -> Self {
        Self {
            kind: AverageKind::Sma,
            period,
        }
    }

    pub fn ema(period: Period) -> Self {
        Self {
            kind: AverageKind::Ema,
            period,
        }
    }
}
