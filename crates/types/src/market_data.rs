//! Market data types.
//!
//! The pipeline consumes a contiguous, index-addressable sequence of bars.

use crate::fields::PriceKind;
use crate::ids::{Index, Timestamp};
use serde::{Deserialize, Serialize};

// =============================================================================
// OHLCV Bar
// =============================================================================

/// OHLCV bar for a single time period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Position in the source sequence (zero-based, contiguous).
    pub index: Index,
    /// Bar open time in epoch millis.
    pub time: Timestamp,
    /// Opening price.
    pub open: f64,
    /// Highest price during the period.
    pub high: f64,
    /// Lowest price during the period.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Traded volume during the period.
    pub volume: f64,
}

impl Bar {
    /// Create a new bar.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: Index,
        time: Timestamp,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            index,
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Get one of the four prices of the bar.
    pub fn price(&self, kind: PriceKind) -> f64 {
        match kind {
            PriceKind::Open => self.open,
            PriceKind::High => self.high,
            PriceKind::Low => self.low,
            PriceKind::Close => self.close,
        }
    }
}
