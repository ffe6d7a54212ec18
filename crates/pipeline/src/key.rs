//! Discrete state key codec.
//!
//! A key concatenates the values of the configured key fields, in order.
//! Each value is clamped to `[-1, 1]`, scaled by `10^scale`, rounded, and
//! written with an explicit sign and `scale + 1` zero-padded digits:
//!
//! ```text
//! scale 1:  [0.5, -0.3, 1.0]  ->  "+05-03+10"
//! ```
//!
//! States with a non-finite key value get [`INVALID_KEY`].

use types::{FieldRole, KeyConfig, StateVector};

use crate::error::{PipelineError, Result};

/// Key of a state whose key fields are not all finite.
pub const INVALID_KEY: &str = "invalid";

/// Encoder/decoder for one key configuration.
#[derive(Debug, Clone, Copy)]
pub struct KeyCodec<'a> {
    config: &'a KeyConfig,
}

impl<'a> KeyCodec<'a> {
    pub fn new(config: &'a KeyConfig) -> Self {
        Self { config }
    }

    fn digits(&self) -> usize {
        self.config.scale as usize + 1
    }

    fn factor(&self) -> f64 {
        10f64.powi(self.config.scale as i32)
    }

    /// Value used for a key field: the discrete value of a discretized
    /// field, the continuous value otherwise.
    pub fn key_value(state: &StateVector, field: FieldRole) -> Option<f64> {
        if field.is_discretized() {
            state.discrete(field)
        } else {
            state.continuous(field)
        }
    }

    /// Compose the key of a normalized state.
    pub fn compose(&self, state: &StateVector) -> String {
        let values: Option<Vec<f64>> = self
            .config
            .fields
            .iter()
            .map(|&field| Self::key_value(state, field))
            .collect();
        match values {
            Some(values) => self.encode(&values),
            None => INVALID_KEY.to_string(),
        }
    }

    /// Encode values in key field order.
    pub fn encode(&self, values: &[f64]) -> String {
        if values.iter().any(|v| !v.is_finite()) {
            return INVALID_KEY.to_string();
        }
        let factor = self.factor();
        let digits = self.digits();
        let mut key = String::with_capacity(values.len() * (digits + 1));
        for value in values {
            let scaled = (value.clamp(-1.0, 1.0) * factor).round() as i64;
            let sign = if scaled < 0 { '-' } else { '+' };
            key.push(sign);
            key.push_str(&format!("{:0width$}", scaled.abs(), width = digits));
        }
        key
    }

    /// Decode a key back into `(field, value)` pairs.
    pub fn decode(&self, key: &str) -> Result<Vec<(FieldRole, f64)>> {
        let invalid = |reason| PipelineError::InvalidKey {
            key: key.to_string(),
            reason,
        };
        if key == INVALID_KEY {
            return Err(invalid("key marks a state with non-finite values"));
        }
        let chunk = self.digits() + 1;
        if !key.is_ascii() || key.len() != chunk * self.config.fields.len() {
            return Err(invalid("length does not match key fields"));
        }
        let factor = self.factor();
        self.config
            .fields
            .iter()
            .enumerate()
            .map(|(i, &field)| {
                let part = &key[i * chunk..(i + 1) * chunk];
                let sign = match part.as_bytes()[0] {
                    b'+' => 1.0,
                    b'-' => -1.0,
                    _ => return Err(invalid("missing sign")),
                };
                let magnitude: u64 = part[1..]
                    .parse()
                    .map_err(|_| invalid("non-numeric digits"))?;
                Ok((field, sign * magnitude as f64 / factor))
            })
            .collect()
    }
}
