//! Validation errors for job models.

use thiserror::Error;

/// Result type for model validation.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while validating or parsing job models.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid sequence: {0}")]
    InvalidSequence(String),
}

impl ModelError {
    /// Create an invalid parameter error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }
}
