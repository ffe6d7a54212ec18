//! Typed field roles of a state vector.
//!
//! Every numeric field of a state is identified by a [`FieldRole`]. The
//! mapping from role to storage column is fixed here, so string names only
//! appear at the configuration and storage boundaries.
//!
//! | role                      | name          | columns                                   |
//! |---------------------------|---------------|-------------------------------------------|
//! | `Delta(Close)`            | `delta_close` | `delta_close_raw`, `delta_close_nrm`      |
//! | `Spread { fast, slow }`   | `spread_5_20` | `spread_5_20_raw`, `_nrm`, `_dsc`         |
//! | `Speed(period)`           | `speed_50`    | `speed_50_raw`, `_nrm`, `_dsc`            |

use crate::ids::Period;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the four bar prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriceKind {
    Open,
    High,
    Low,
    Close,
}

impl PriceKind {
    /// All prices in their canonical order.
    pub const ALL: [PriceKind; 4] = [Self::Open, Self::High, Self::Low, Self::Close];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::High => "high",
            Self::Low => "low",
            Self::Close => "close",
        }
    }
}

/// Block a field belongs to. Blocks are processed in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldBlock {
    Delta,
    Spread,
    Speed,
}

/// Role of a numeric field within a state vector.
///
/// The derived ordering (deltas, then spreads, then speeds) is the
/// canonical field order of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldRole {
    /// Relative change of a bar price versus the previous close.
    Delta(PriceKind),
    /// Relative spread between a fast and a slow moving average.
    Spread { fast: Period, slow: Period },
    /// Rate of change of a moving average.
    Speed(Period),
}

impl FieldRole {
    /// The four delta fields in canonical order.
    pub fn deltas() -> [FieldRole; 4] {
        PriceKind::ALL.map(FieldRole::Delta)
    }

    pub fn block(&self) -> FieldBlock {
        match self {
            Self::Delta(_) => FieldBlock::Delta,
            Self::Spread { .. } => FieldBlock::Spread,
            Self::Speed(_) => FieldBlock::Speed,
        }
    }

    /// Whether the field carries a discretized representation.
    pub fn is_discretized(&self) -> bool {
        !matches!(self, Self::Delta(_))
    }

    /// Storage column holding this field in the given representation.
    pub fn column(&self, repr: Representation) -> String {
        format!("{}_{}", self, repr.suffix())
    }
}

impl fmt::Display for FieldRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delta(kind) => write!(f, "delta_{}", kind.as_str()),
            Self::Spread { fast, slow } => write!(f, "spread_{}_{}", fast, slow),
            Self::Speed(period) => write!(f, "speed_{}", period),
        }
    }
}

/// Error returned when a field name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown field name: {0}")]
pub struct ParseFieldError(pub String);

impl FromStr for FieldRole {
    type Err = ParseFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseFieldError(s.to_string());
        let parse_period = |p: &str| -> Result<Period, ParseFieldError> {
            match p.parse::<Period>() {
                Ok(v) if v > 0 => Ok(v),
                _ => Err(err()),
            }
        };

        if let Some(price) = s.strip_prefix("delta_") {
            return PriceKind::ALL
                .into_iter()
                .find(|k| k.as_str() == price)
                .map(FieldRole::Delta)
                .ok_or_else(err);
        }
        if let Some(rest) = s.strip_prefix("spread_") {
            let (fast, slow) = rest.split_once('_').ok_or_else(err)?;
            return Ok(FieldRole::Spread {
                fast: parse_period(fast)?,
                slow: parse_period(slow)?,
            });
        }
        if let Some(period) = s.strip_prefix("speed_") {
            return Ok(FieldRole::Speed(parse_period(period)?));
        }
        Err(err())
    }
}

impl TryFrom<String> for FieldRole {
    type Error = ParseFieldError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldRole> for String {
    fn from(role: FieldRole) -> Self {
        role.to_string()
    }
}

/// Representation of a field value as it moves through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Representation {
    /// Value computed by the state builder.
    Raw,
    /// Output of the continuous normalizer.
    Continuous,
    /// Output of the discretizing normalizer.
    Discrete,
}

impl Representation {
    fn suffix(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Continuous => "nrm",
            Self::Discrete => "dsc",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_name_roundtrip() {
        for name in ["delta_open", "delta_close", "spread_5_20", "speed_50"] {
            let role: FieldRole = name.parse().unwrap();
            assert_eq!(role.to_string(), name);
        }
    }

    #[test]
    fn test_field_name_rejects_garbage() {
        assert!("delta_volume".parse::<FieldRole>().is_err());
        assert!("spread_5".parse::<FieldRole>().is_err());
        assert!("speed_0".parse::<FieldRole>().is_err());
        assert!("close".parse::<FieldRole>().is_err());
    }

    #[test]
    fn test_column_mapping() {
        let role = FieldRole::Spread { fast: 5, slow: 20 };
        assert_eq!(role.column(Representation::Raw), "spread_5_20_raw");
        assert_eq!(role.column(Representation::Continuous), "spread_5_20_nrm");
        assert_eq!(role.column(Representation::Discrete), "spread_5_20_dsc");
    }

    #[test]
    fn test_canonical_order() {
        let mut roles = vec![
            FieldRole::Speed(50),
            FieldRole::Spread { fast: 5, slow: 20 },
            FieldRole::Delta(PriceKind::Close),
            FieldRole::Delta(PriceKind::Open),
        ];
        roles.sort();
        assert_eq!(roles[0], FieldRole::Delta(PriceKind::Open));
        assert_eq!(roles[1], FieldRole::Delta(PriceKind::Close));
        assert_eq!(roles[2].block(), FieldBlock::Spread);
        assert_eq!(roles[3].block(), FieldBlock::Speed);
    }

    #[test]
    fn test_only_deltas_are_continuous_only() {
        assert!(!FieldRole::Delta(PriceKind::High).is_discretized());
        assert!(FieldRole::Speed(10).is_discretized());
    }
}
