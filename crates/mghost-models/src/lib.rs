//! Shared data models for MGhost watermark jobs.
//!
//! This crate provides Serde-serializable types for:
//! - Embedding and extraction jobs
//! - Key selectors and key sequences
//! - Video fragments
//! - Audio stream and video metadata
//! - Job results and warnings

pub mod error;
pub mod fragment;
pub mod job;
pub mod media;
pub mod result;
pub mod sequence;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use fragment::VideoFragment;
pub use job::{ExtractionJob, JobId, SequencePolicy, WatermarkJob, DEFAULT_CODEC};
pub use media::{AudioStreamInfo, VideoInfo};
pub use result::{
    CodecEvent, CodecEventKind, EmbedResult, ExtractionResult, JobWarning, WarningKind,
    PLACEHOLDER_MESSAGE,
};
pub use sequence::{KeySelector, KeySequence};
