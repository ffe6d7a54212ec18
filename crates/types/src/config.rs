//! Static pipeline configuration.
//!
//! Loaded once per run and passed by reference into every stage. Nothing in
//! here changes while a run is in progress.

use crate::fields::FieldRole;
use crate::ids::Period;
use crate::indicators::AverageSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// =============================================================================
// Parameter Types
// =============================================================================

/// Fitted parameters of a normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizerParams {
    /// Value mapped to zero.
    pub center: f64,
    /// Steepness of the mapping around the center.
    pub slope: f64,
    /// Decimal places kept in the output.
    pub decimals: u32,
    /// Number of positive discretization steps. `None` keeps the output continuous.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
}

impl NormalizerParams {
    pub fn continuous(center: f64, slope: f64, decimals: u32) -> Self {
        Self {
            center,
            slope,
            decimals,
            steps: None,
        }
    }

    pub fn discrete(center: f64, slope: f64, decimals: u32, steps: u32) -> Self {
        Self {
            center,
            slope,
            decimals,
            steps: Some(steps),
        }
    }
}

/// Spread between a fast and a slow average, both referenced by period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpreadSpec {
    pub fast: Period,
    pub slow: Period,
}

/// A `(field, period)` pair tracked for local extrema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeSpec {
    pub field: FieldRole,
    pub period: Period,
}

/// Composition of the discrete state key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Ordered fields concatenated into the key.
    pub fields: Vec<FieldRole>,
    /// Decimal scale each value is encoded at.
    pub scale: u32,
}

// =============================================================================
// Errors
// =============================================================================

/// Configuration problems, all detected before a stage starts counting.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one moving average must be configured")]
    NoAverages,

    #[error("period must be > 0 ({0})")]
    ZeroPeriod(String),

    #[error("moving average period {0} configured more than once")]
    DuplicateAverage(Period),

    #[error("field {field} references unknown average period {period}")]
    UnknownAverage { field: FieldRole, period: Period },

    #[error("missing normalizer for field {0}")]
    MissingNormalizer(FieldRole),

    #[error("missing discretizer for field {0}")]
    MissingDiscretizer(FieldRole),

    #[error("invalid normalizer for field {field}: {reason}")]
    InvalidNormalizer { field: FieldRole, reason: String },

    #[error("key field list is empty")]
    EmptyKey,

    #[error("key scale {0} is too large")]
    KeyScale(u32),

    #[error("field {0} is not produced by the state builder")]
    UnknownField(FieldRole),

    #[error("performance horizons must be a non-empty ascending list")]
    InvalidHorizons,
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Master configuration for a pipeline run.
///
/// Sections left out of a configuration file take their default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Moving averages of the close, referenced by period.
    pub averages: Vec<AverageSpec>,
    /// Spreads between pairs of averages.
    pub spreads: Vec<SpreadSpec>,
    /// Averages whose rate of change is tracked.
    pub speeds: Vec<Period>,
    /// Continuous normalizer per raw field.
    pub normalizers: BTreeMap<FieldRole, NormalizerParams>,
    /// Discretizing normalizer per spread/speed field.
    pub discretizers: BTreeMap<FieldRole, NormalizerParams>,
    pub key: KeyConfig,
    /// Local extrema tracked by the range tracker.
    pub ranges: Vec<RangeSpec>,
    /// Ascending forward horizons of the performance annotator.
    pub horizons: Vec<Period>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let averages = vec![
            AverageSpec::sma(5),
            AverageSpec::sma(10),
            AverageSpec::sma(20),
            AverageSpec::sma(50),
        ];
        let spreads = vec![
            SpreadSpec { fast: 5, slow: 10 },
            SpreadSpec { fast: 10, slow: 20 },
            SpreadSpec { fast: 20, slow: 50 },
        ];
        let speeds = vec![20, 50];

        let mut config = Self {
            averages,
            spreads,
            speeds,
            normalizers: BTreeMap::new(),
            discretizers: BTreeMap::new(),
            key: KeyConfig {
                fields: Vec::new(),
                scale: 1,
            },
            ranges: Vec::new(),
            horizons: vec![1, 5, 10, 20],
        };

        for field in FieldRole::deltas() {
            config
                .normalizers
                .insert(field, NormalizerParams::continuous(0.0, 100.0, 4));
        }
        for field in config.spread_fields() {
            config
                .normalizers
                .insert(field, NormalizerParams::continuous(0.0, 50.0, 4));
            config
                .discretizers
                .insert(field, NormalizerParams::discrete(0.0, 2.0, 2, 2));
        }
        for field in config.speed_fields() {
            config
                .normalizers
                .insert(field, NormalizerParams::continuous(0.0, 200.0, 4));
            config
                .discretizers
                .insert(field, NormalizerParams::discrete(0.0, 2.0, 2, 2));
        }

        config.key.fields = config.discretized_fields();
        config.ranges = vec![
            RangeSpec {
                field: FieldRole::Spread { fast: 5, slow: 10 },
                period: 5,
            },
            RangeSpec {
                field: FieldRole::Spread { fast: 20, slow: 50 },
                period: 20,
            },
        ];
        config
    }
}

impl PipelineConfig {
    pub fn spread_fields(&self) -> Vec<FieldRole> {
        self.spreads
            .iter()
            .map(|s| FieldRole::Spread {
                fast: s.fast,
                slow: s.slow,
            })
            .collect()
    }

    pub fn speed_fields(&self) -> Vec<FieldRole> {
        self.speeds.iter().map(|&p| FieldRole::Speed(p)).collect()
    }

    /// Spread fields followed by speed fields.
    pub fn discretized_fields(&self) -> Vec<FieldRole> {
        let mut fields = self.spread_fields();
        fields.extend(self.speed_fields());
        fields
    }

    /// Every field of a state vector in canonical order.
    pub fn fields(&self) -> Vec<FieldRole> {
        let mut fields = FieldRole::deltas().to_vec();
        fields.extend(self.discretized_fields());
        fields
    }

    /// Largest configured performance horizon.
    pub fn max_horizon(&self) -> Period {
        self.horizons.last().copied().unwrap_or(0)
    }

    /// Largest configured range tracking period.
    pub fn max_range_period(&self) -> Period {
        self.ranges.iter().map(|r| r.period).max().unwrap_or(0)
    }

    pub fn has_average(&self, period: Period) -> bool {
        self.averages.iter().any(|a| a.period == period)
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.averages.is_empty() {
            return Err(ConfigError::NoAverages);
        }
        let mut seen = HashSet::new();
        for avg in &self.averages {
            if avg.period == 0 {
                return Err(ConfigError::ZeroPeriod("average".into()));
            }
            if !seen.insert(avg.period) {
                return Err(ConfigError::DuplicateAverage(avg.period));
            }
        }

        for field in self.discretized_fields() {
            let periods: Vec<Period> = match field {
                FieldRole::Spread { fast, slow } => vec![fast, slow],
                FieldRole::Speed(p) => vec![p],
                FieldRole::Delta(_) => vec![],
            };
            for period in periods {
                if !self.has_average(period) {
                    return Err(ConfigError::UnknownAverage { field, period });
                }
            }
        }

        for field in self.fields() {
            let params = self
                .normalizers
                .get(&field)
                .ok_or(ConfigError::MissingNormalizer(field))?;
            check_params(field, params)?;
            if field.is_discretized() {
                let params = self
                    .discretizers
                    .get(&field)
                    .ok_or(ConfigError::MissingDiscretizer(field))?;
                check_params(field, params)?;
            }
        }

        if self.key.fields.is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        if self.key.scale > 9 {
            return Err(ConfigError::KeyScale(self.key.scale));
        }
        let known = self.fields();
        if let Some(field) = self
            .key
            .fields
            .iter()
            .chain(self.ranges.iter().map(|r| &r.field))
            .find(|f| !known.contains(f))
        {
            return Err(ConfigError::UnknownField(*field));
        }
        if self.ranges.iter().any(|r| r.period == 0) {
            return Err(ConfigError::ZeroPeriod("range".into()));
        }

        if self.horizons.is_empty()
            || self.horizons[0] == 0
            || self.horizons.windows(2).any(|w| w[0] >= w[1])
        {
            return Err(ConfigError::InvalidHorizons);
        }
        Ok(())
    }
}

fn check_params(field: FieldRole, params: &NormalizerParams) -> Result<(), ConfigError> {
    let reason = if !params.center.is_finite() {
        Some("center is not finite")
    } else if !params.slope.is_finite() || params.slope <= 0.0 {
        Some("slope must be positive")
    } else if params.decimals > 12 {
        Some("too many decimals")
    } else if params.steps == Some(0) {
        Some("steps must be > 0")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ConfigError::InvalidNormalizer {
            field,
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
