//! Records produced by the pipeline stages.

use crate::fields::FieldRole;
use crate::ids::{Index, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// State Vector
// =============================================================================

/// Feature vector derived from one bar index.
///
/// `raw` is written once by the state builder; `continuous`, `discrete` and
/// `key` are filled in by the normalizer stage. An empty `key` marks a state
/// that has not been normalized yet.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateVector {
    pub index: Index,
    pub time: Timestamp,
    /// False when any raw value is not finite. Such states are still stored.
    pub valid: bool,
    pub raw: BTreeMap<FieldRole, f64>,
    pub continuous: BTreeMap<FieldRole, f64>,
    pub discrete: BTreeMap<FieldRole, f64>,
    pub key: String,
}

impl StateVector {
    /// Create a state from its raw values, flagging non-finite values.
    pub fn new(index: Index, time: Timestamp, raw: BTreeMap<FieldRole, f64>) -> Self {
        let valid = raw.values().all(|v| v.is_finite());
        Self {
            index,
            time,
            valid,
            raw,
            ..Default::default()
        }
    }

    pub fn raw(&self, field: FieldRole) -> Option<f64> {
        self.raw.get(&field).copied()
    }

    pub fn continuous(&self, field: FieldRole) -> Option<f64> {
        self.continuous.get(&field).copied()
    }

    pub fn discrete(&self, field: FieldRole) -> Option<f64> {
        self.discrete.get(&field).copied()
    }

    /// Whether the normalizer stage has assigned a key.
    pub fn is_keyed(&self) -> bool {
        !self.key.is_empty()
    }
}

// =============================================================================
// Range Extremum
// =============================================================================

/// Kind of a local extremum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtremumKind {
    Min,
    Max,
}

impl ExtremumKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl fmt::Display for ExtremumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local minimum or maximum of a field over a symmetric window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeExtremum {
    /// Field name (see [`FieldRole`]'s `Display`).
    pub name: String,
    /// Window half-width.
    pub period: i32,
    pub kind: ExtremumKind,
    pub value: f64,
    pub index: Index,
    pub time: Timestamp,
}

// =============================================================================
// Performance Record
// =============================================================================

/// Forward excursion of a bar over one horizon.
///
/// `maximum`/`minimum` are the running High/Low extrema over the bars
/// `index + 1 ..= index + period`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub index: Index,
    pub time: Timestamp,
    pub period: i32,
    pub maximum: f64,
    pub minimum: f64,
}

// =============================================================================
// Transition
// =============================================================================

/// Directed edge from the state at `index_in` to its successor at `index_out`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transition {
    pub key_in: String,
    pub key_out: String,
    pub index_in: Index,
    pub index_out: Index,
    /// Start index of the current run of identical `key_out` values.
    pub group: Index,
    pub value_high: f64,
    pub value_low: f64,
    pub value_close: f64,
    pub spread_in: Vec<f64>,
    pub spread_out: Vec<f64>,
    pub speed_in: Vec<f64>,
    pub speed_out: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::PriceKind;

    #[test]
    fn test_state_validity_flag() {
        let mut raw = BTreeMap::new();
        raw.insert(FieldRole::Delta(PriceKind::Close), 0.01);
        assert!(StateVector::new(0, 0, raw.clone()).valid);

        raw.insert(FieldRole::Speed(5), f64::NAN);
        let state = StateVector::new(1, 0, raw);
        assert!(!state.valid);
        assert!(state.raw(FieldRole::Speed(5)).unwrap().is_nan());
        assert!(!state.is_keyed());
    }
}
