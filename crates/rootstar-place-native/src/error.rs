//! Error types for place-field decoding
//!
//! Error types for field construction, partitioning, decoding and model
//! persistence using `thiserror`.

use rootstar_place_core::CoreError;
use thiserror::Error;

/// Decoding pipeline error types
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Invalid configuration or input geometry
    #[error("Configuration error: {0}")]
    Configuration(#[from] CoreError),

    /// Invalid range or parameter given to a pipeline stage
    #[error("Invalid {parameter}: {reason}")]
    InvalidRange {
        /// Parameter name
        parameter: &'static str,
        /// Reason for rejection
        reason: String,
    },

    /// Decode requested before `fit`
    #[error("Decoder model not fitted: call fit before decoding")]
    NotFitted,

    /// Input dimensions do not match the fitted model
    #[error("Shape mismatch for {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        /// What was being matched
        what: &'static str,
        /// Expected size
        expected: usize,
        /// Received size
        got: usize,
    },

    /// Input data cannot support the requested estimate
    #[error("Degenerate data: {reason}")]
    DegenerateData {
        /// Reason
        reason: String,
    },

    /// Model file could not be read or written
    #[error("Model persistence failed: {0}")]
    Io(#[from] std::io::Error),

    /// Model file could not be encoded or decoded
    #[error("Model serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DecodeError {
    /// Shorthand for [`DecodeError::InvalidRange`]
    pub fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            parameter,
            reason: reason.into(),
        }
    }

    /// True for errors a caller can fix by changing configuration
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::InvalidRange { .. })
    }
}

/// Result type for decoding pipeline operations
pub type DecodeResult<T> = Result<T, DecodeError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_grouped() {
        assert!(DecodeError::invalid("t_window", "must be positive").is_configuration());
        assert!(DecodeError::from(CoreError::invalid("bin_size", "too large")).is_configuration());
        assert!(!DecodeError::NotFitted.is_configuration());
        let mismatch = DecodeError::ShapeMismatch {
            what: "count columns",
            expected: 3,
            got: 2,
        };
        assert!(!mismatch.is_configuration());
        assert!(!DecodeError::DegenerateData { reason: "empty".into() }.is_configuration());
    }
}
