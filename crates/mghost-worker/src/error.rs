//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("No free key left in range")]
    KeySpaceExhausted,

    #[error("Media error: {0}")]
    Media(#[from] mghost_media::MediaError),

    #[error("Model error: {0}")]
    Model(#[from] mghost_models::ModelError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }

    /// Errors caused by the caller's input rather than the environment.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            WorkerError::InvalidArguments(_)
                | WorkerError::RecordNotFound(_)
                | WorkerError::Json(_)
                | WorkerError::Model(_)
        )
    }
}
