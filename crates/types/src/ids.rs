//! Index and time aliases used throughout the pipeline.

/// Zero-based position of a bar (and of its state) in the source sequence.
pub type Index = i64;

/// Wall clock timestamp in milliseconds since epoch.
pub type Timestamp = i64;

/// A distance in bars (moving average period, window half-width, horizon).
pub type Period = usize;
