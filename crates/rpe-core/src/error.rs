//! # Error Types
//!
//! Errors raised by the foundational types. Component crates define their
//! own `thiserror` enums and wrap these where they surface.

use thiserror::Error;

/// Errors from constructing core values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpeError {
    /// A timestamp string is not RFC 3339.
    #[error("invalid timestamp {input:?}: {reason}")]
    InvalidTimestamp { input: String, reason: String },
}

/// Error during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// Float values are not permitted in canonical representations.
    #[error("float values are not permitted in canonical representations: {0}")]
    FloatRejected(f64),

    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}
