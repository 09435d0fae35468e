//! Error types for watermark orchestration.

use std::path::PathBuf;
use thiserror::Error;

use mghost_models::ModelError;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while embedding or extracting watermarks.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Could not open a video writer (tried {attempted:?}): {message}")]
    CodecOpenFailure {
        attempted: Vec<String>,
        message: String,
    },

    #[error("Output file is empty: {0}")]
    EmptyOutput(PathBuf),

    #[error("Output file too small ({size} bytes, need more than {min_bytes}) - writer likely failed to initialise its codec: {path}")]
    TruncatedOutput {
        path: PathBuf,
        size: u64,
        min_bytes: u64,
    },

    #[error("Output is an unmodified copy of the source: {0}")]
    UnmodifiedOutput(PathBuf),

    #[error("Audio merge failed: {0}")]
    AudioMergeFailure(String),

    #[error("FFmpeg not found: {0}")]
    FfmpegNotFound(String),

    #[error("FFprobe not found: {0}")]
    FfprobeNotFound(String),

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Watermark embedding failed on fragment {fragment}: {message}")]
    EmbedFailed { fragment: usize, message: String },

    #[error("Watermark decode failed: {0}")]
    DecodeFailed(String),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ModelError> for MediaError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::InvalidParameter(m) | ModelError::InvalidSequence(m) => {
                Self::InvalidParameter(m)
            }
        }
    }
}

impl MediaError {
    /// Create an invalid parameter error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Errors that leave a corrupt artifact behind which must be removed.
    pub fn is_corrupt_output(&self) -> bool {
        matches!(
            self,
            MediaError::EmptyOutput(_)
                | MediaError::TruncatedOutput { .. }
                | MediaError::UnmodifiedOutput(_)
        )
    }

    /// Errors that abort a job regardless of which step raised them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MediaError::InvalidParameter(_)
                | MediaError::FileNotFound(_)
                | MediaError::CodecOpenFailure { .. }
                | MediaError::EmbedFailed { .. }
                | MediaError::FfmpegNotFound(_)
                | MediaError::FfprobeNotFound(_)
                | MediaError::Internal(_)
        ) || self.is_corrupt_output()
    }

    /// Errors a component may absorb and convert into a fallback.
    ///
    /// Only meaningful for the audio merge and metadata probe steps; the
    /// same error elsewhere is still fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MediaError::AudioMergeFailure(_)
                | MediaError::Timeout(_)
                | MediaError::FfmpegFailed { .. }
                | MediaError::FfprobeFailed { .. }
                | MediaError::InvalidVideo(_)
                | MediaError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_maps_to_invalid_parameter() {
        let e: MediaError = ModelError::invalid("keys list cannot be empty").into();
        assert!(matches!(e, MediaError::InvalidParameter(_)));
    }

    #[test]
    fn test_corrupt_output_classification() {
        assert!(MediaError::EmptyOutput("a".into()).is_corrupt_output());
        assert!(MediaError::TruncatedOutput {
            path: "a".into(),
            size: 10,
            min_bytes: 256
        }
        .is_corrupt_output());
        assert!(!MediaError::Timeout(5).is_corrupt_output());
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(MediaError::AudioMergeFailure("x".into()).is_recoverable());
        assert!(MediaError::Timeout(300).is_recoverable());
        assert!(!MediaError::invalid("x").is_recoverable());
        assert!(!MediaError::FileNotFound("x".into()).is_recoverable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(MediaError::invalid("x").is_fatal());
        assert!(MediaError::UnmodifiedOutput("a".into()).is_fatal());
        assert!(!MediaError::AudioMergeFailure("x".into()).is_fatal());
    }
}
