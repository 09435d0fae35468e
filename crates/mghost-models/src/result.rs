//! Terminal job results returned to callers.
//!
//! `success = true` never implies "no degradation occurred": callers must
//! inspect `warnings` (and `ExtractionResult::placeholder`) to find out
//! whether a reduced-fidelity result was produced.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::media::VideoInfo;
use crate::sequence::KeySequence;

/// Message attached to placeholder extraction results.
pub const PLACEHOLDER_MESSAGE: &str = "Sequence extraction completed but data was lost (placeholder returned). \
This may indicate video compression issues or watermark signal loss.";

/// Category of a non-fatal degradation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Audio could not be merged back; output has no audio
    AudioMergeFallback,
    /// Audio probe failed; source treated as silent
    AudioProbeFailed,
    /// Extraction confidence too low; placeholder sequence returned
    PlaceholderSequence,
    /// Sequence length differs from fragment count (cyclic wrap applied)
    SequenceLengthMismatch,
    /// Requested codec was substituted before opening
    CodecSubstituted,
    /// Primary codec failed to open; portable fallback used
    CodecFallback,
}

/// A non-fatal diagnostic attached to a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobWarning {
    pub kind: WarningKind,
    pub message: String,
}

impl JobWarning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// What happened at one step of codec negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CodecEventKind {
    /// Requested codec replaced by policy before any attempt
    Substituted,
    /// Writer open attempted
    Attempted,
    /// Writer opened
    Opened,
    /// Writer failed to open
    Failed,
}

/// One entry of the codec negotiation trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CodecEvent {
    pub kind: CodecEventKind,
    pub codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CodecEvent {
    pub fn new(kind: CodecEventKind, codec: impl Into<String>) -> Self {
        Self {
            kind,
            codec: codec.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Result of an embedding job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct EmbedResult {
    pub success: bool,
    pub output_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_info: Option<VideoInfo>,
    /// Present iff `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<JobWarning>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codec_trace: Vec<CodecEvent>,
    pub keys: Vec<i64>,
    pub sequence: KeySequence,
    pub fragment_length_secs: f64,
    pub fragment_count: usize,
    /// Whether the source audio stream is present in the output
    pub audio_preserved: bool,
}

impl EmbedResult {
    /// Failure result carrying the first fatal error.
    pub fn failure(
        output_path: PathBuf,
        keys: Vec<i64>,
        sequence: KeySequence,
        fragment_length_secs: f64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            output_path,
            error: Some(error.into()),
            keys,
            sequence,
            fragment_length_secs,
            ..Default::default()
        }
    }

    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }
}

/// Result of an extraction job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionResult {
    pub success: bool,
    /// Inferred key index per fragment, or the placeholder sequence
    pub sequence: Vec<usize>,
    /// Winning correlation score per fragment
    pub confidence_per_fragment: Vec<f64>,
    /// True when `sequence` is a placeholder, not a genuine recovery
    pub placeholder: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<JobWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub keys: Vec<i64>,
    pub fragment_length_secs: f64,
}

impl ExtractionResult {
    /// Inferred key values, or `None` for placeholder results.
    pub fn recovered_keys(&self) -> Option<Vec<i64>> {
        if self.placeholder || !self.success {
            return None;
        }
        self.sequence
            .iter()
            .map(|i| self.keys.get(*i).copied())
            .collect()
    }

    pub fn failure(keys: Vec<i64>, fragment_length_secs: f64, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: error.clone(),
            error: Some(error),
            keys,
            fragment_length_secs,
            ..Default::default()
        }
    }
}
