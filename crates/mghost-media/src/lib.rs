#![deny(unreachable_patterns)]
//! Blind video watermark orchestration.
//!
//! This crate provides:
//! - Fragment scheduling and cyclic key assignment
//! - Codec negotiation with a portable fallback
//! - Video access through FFmpeg rawvideo pipes or the raw `.mgr` container
//! - Ordered parallel embedding and extraction around a pluggable primitive
//! - Audio preservation via lossless FFmpeg remux
//! - Output integrity checks

pub mod codec;
pub mod command;
pub mod config;
pub mod embed;
pub mod error;
pub mod extract;
pub mod frame;
pub mod fs_utils;
pub mod mux;
pub mod pool;
pub mod primitive;
pub mod probe;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod verify;
pub mod video;

pub use codec::{negotiate, open_negotiated, CodecPlan, CodecPolicy, NegotiatedWriter, Platform};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use config::EngineConfig;
pub use embed::{EmbedOutcome, Embedder};
pub use error::{MediaError, MediaResult};
pub use extract::{Extractor, FragmentScore};
pub use frame::Frame;
pub use mux::{FfmpegMuxer, MediaMuxer};
pub use pool::{OrderedPool, ReorderBuffer};
pub use primitive::{LumaSpreadPrimitive, Pattern, WatermarkPrimitive};
pub use progress::{JobDiagnostics, JobEvent, JobStage, ProgressCallback};
pub use retry::{retry_async, RetryConfig, RetryResult};
pub use scheduler::{plan_fragments, FragmentPlan};
pub use verify::{ensure_modified, probe_metadata, verify_output};
pub use video::{
    AutoBackend, FfmpegBackend, RawBackend, StreamMetadata, VideoBackend, VideoSink, VideoSource,
    WriterTarget,
};
