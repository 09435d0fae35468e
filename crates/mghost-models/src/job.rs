//! Watermark job definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::sequence::KeySequence;

/// Default requested output codec (fourcc).
pub const DEFAULT_CODEC: &str = "mp4v";
/// Default fragment length in seconds.
pub const DEFAULT_FRAGMENT_LENGTH_SECS: f64 = 1.0;
/// Default worker pool size.
pub const DEFAULT_PARALLELISM: usize = 8;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a sequence whose length differs from the fragment count is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SequencePolicy {
    /// Repeat the sequence cyclically (longer sequences are truncated).
    /// A length mismatch is reported as a warning.
    #[default]
    Cyclic,
    /// Reject sequences whose length differs from the fragment count.
    Exact,
}

fn default_fragment_length() -> f64 {
    DEFAULT_FRAGMENT_LENGTH_SECS
}
fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

/// A key-based embedding job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WatermarkJob {
    /// Unique job ID
    #[serde(default)]
    pub id: JobId,

    /// Source video
    pub video_path: PathBuf,

    /// Destination video (overwritten if present)
    pub output_path: PathBuf,

    /// Candidate keys
    pub keys: Vec<i64>,

    /// Key selector per fragment
    pub sequence: KeySequence,

    /// Fragment length in seconds
    #[serde(default = "default_fragment_length", alias = "frag_length")]
    pub fragment_length_secs: f64,

    /// Worker pool size
    #[serde(default = "default_parallelism", alias = "threads")]
    pub parallelism: usize,

    /// Requested output codec (fourcc); defaults to `mp4v`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,

    /// Sequence length policy
    #[serde(default)]
    pub sequence_policy: SequencePolicy,
}

impl WatermarkJob {
    /// Create a job with default fragment length, parallelism and codec.
    pub fn new(
        video_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        keys: Vec<i64>,
        sequence: KeySequence,
    ) -> Self {
        Self {
            id: JobId::new(),
            video_path: video_path.into(),
            output_path: output_path.into(),
            keys,
            sequence,
            fragment_length_secs: DEFAULT_FRAGMENT_LENGTH_SECS,
            parallelism: DEFAULT_PARALLELISM,
            codec: None,
            sequence_policy: SequencePolicy::default(),
        }
    }

    pub fn with_fragment_length(mut self, secs: f64) -> Self {
        self.fragment_length_secs = secs;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    pub fn with_sequence_policy(mut self, policy: SequencePolicy) -> Self {
        self.sequence_policy = policy;
        self
    }

    /// Requested codec, falling back to the default.
    pub fn requested_codec(&self) -> &str {
        self.codec.as_deref().unwrap_or(DEFAULT_CODEC)
    }

    /// Sequence resolved to `(key index, key)` pairs.
    pub fn resolved_keys(&self) -> ModelResult<Vec<(usize, i64)>> {
        self.sequence.resolve(&self.keys)
    }

    /// Validate job shape. Does not touch the filesystem.
    pub fn validate(&self) -> ModelResult<()> {
        validate_common(&self.keys, self.fragment_length_secs, self.parallelism)?;
        self.sequence.resolve(&self.keys)?;
        if self.video_path == self.output_path {
            return Err(ModelError::invalid(
                "output_path must differ from video_path",
            ));
        }
        Ok(())
    }
}

/// A key-based extraction job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionJob {
    /// Unique job ID
    #[serde(default)]
    pub id: JobId,

    /// Video to analyse
    pub video_path: PathBuf,

    /// Candidate keys
    pub keys: Vec<i64>,

    /// Fragment length in seconds (must match the embedding job)
    #[serde(default = "default_fragment_length", alias = "frag_length")]
    pub fragment_length_secs: f64,

    /// Worker pool size
    #[serde(default = "default_parallelism", alias = "threads")]
    pub parallelism: usize,
}

impl ExtractionJob {
    pub fn new(video_path: impl Into<PathBuf>, keys: Vec<i64>) -> Self {
        Self {
            id: JobId::new(),
            video_path: video_path.into(),
            keys,
            fragment_length_secs: DEFAULT_FRAGMENT_LENGTH_SECS,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    pub fn with_fragment_length(mut self, secs: f64) -> Self {
        self.fragment_length_secs = secs;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn validate(&self) -> ModelResult<()> {
        validate_common(&self.keys, self.fragment_length_secs, self.parallelism)
    }
}

fn validate_common(keys: &[i64], fragment_length_secs: f64, parallelism: usize) -> ModelResult<()> {
    if keys.is_empty() {
        return Err(ModelError::invalid("keys list cannot be empty"));
    }
    if !fragment_length_secs.is_finite() || fragment_length_secs <= 0.0 {
        return Err(ModelError::invalid(format!(
            "fragment length must be positive, got {}",
            fragment_length_secs
        )));
    }
    if parallelism == 0 {
        return Err(ModelError::invalid("parallelism must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> WatermarkJob {
        WatermarkJob::new(
            "in.mp4",
            "out.mp4",
            vec![10, 11, 12, 13],
            KeySequence::from_indices([0, 2, 3, 1]),
        )
    }

    #[test]
    fn test_valid_job() {
        assert!(job().validate().is_ok());
        assert_eq!(job().requested_codec(), DEFAULT_CODEC);
    }

    #[test]
    fn test_rejects_empty_keys_and_sequence() {
        let mut j = job();
        j.keys.clear();
        assert!(j.validate().is_err());

        let mut j = job();
        j.sequence = KeySequence::default();
        assert!(j.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_numbers() {
        assert!(job().with_fragment_length(0.0).validate().is_err());
        assert!(job().with_fragment_length(-1.0).validate().is_err());
        assert!(job().with_fragment_length(f64::NAN).validate().is_err());
        assert!(job().with_parallelism(0).validate().is_err());
    }

    #[test]
    fn test_rejects_same_input_and_output() {
        let mut j = job();
        j.output_path = j.video_path.clone();
        assert!(j.validate().is_err());
    }

    #[test]
    fn test_deserialize_original_field_names() {
        let j: WatermarkJob = serde_json::from_str(
            r#"{"video_path":"a.mp4","output_path":"b.mp4","keys":[10,11],"sequence":[0,1],"frag_length":2,"threads":4}"#,
        )
        .unwrap();
        assert_eq!(j.fragment_length_secs, 2.0);
        assert_eq!(j.parallelism, 4);
        assert_eq!(j.sequence_policy, SequencePolicy::Cyclic);
    }

    #[test]
    fn test_extraction_job_validation() {
        assert!(ExtractionJob::new("a.mp4", vec![1]).validate().is_ok());
        assert!(ExtractionJob::new("a.mp4", vec![]).validate().is_err());
    }
}
