//! Error types for Rootstar Place Core
//!
//! Errors raised while validating geometry, spike trains and numeric inputs.

use thiserror::Error;

/// Errors from core types and numerics
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A parameter is outside its valid domain
    #[error("Invalid parameter {parameter}: {reason}")]
    InvalidParameter {
        /// Parameter name
        parameter: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// Two inputs that must be aligned have different lengths
    #[error("Length mismatch for {what}: expected {expected}, got {got}")]
    LengthMismatch {
        /// What was being compared
        what: &'static str,
        /// Expected length
        expected: usize,
        /// Actual length
        got: usize,
    },

    /// An input that must contain data is empty
    #[error("Empty input: {what}")]
    EmptyInput {
        /// Which input was empty
        what: &'static str,
    },
}

impl CoreError {
    /// Shorthand for [`CoreError::InvalidParameter`]
    pub fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter,
            reason: reason.into(),
        }
    }
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
