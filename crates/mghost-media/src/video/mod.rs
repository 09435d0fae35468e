//! Video access boundary.
//!
//! Orchestrators never decode or encode video themselves: they read frames
//! from a [`VideoSource`] and write frames into a [`VideoSink`], both opened
//! through a [`VideoBackend`].

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::MediaResult;
use crate::frame::Frame;

pub mod ffmpeg;
pub mod raw;

pub use ffmpeg::FfmpegBackend;
pub use raw::{RawBackend, RAW_EXTENSION};

/// Stream properties reported when a video is opened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
}

/// Geometry and rate of a video to be written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriterTarget {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl From<&StreamMetadata> for WriterTarget {
    fn from(m: &StreamMetadata) -> Self {
        Self {
            width: m.width,
            height: m.height,
            fps: m.fps,
        }
    }
}

/// Sequential frame reader.
#[async_trait]
pub trait VideoSource: Send {
    fn metadata(&self) -> &StreamMetadata;

    /// Next frame, or `None` at end of stream.
    async fn read_frame(&mut self) -> MediaResult<Option<Frame>>;
}

/// Sequential frame writer.
#[async_trait]
pub trait VideoSink: Send {
    async fn write_frame(&mut self, frame: &Frame) -> MediaResult<()>;

    /// Flush and finalise the container. Must be called exactly once.
    async fn close(&mut self) -> MediaResult<()>;
}

/// Opens readers and writers.
#[async_trait]
pub trait VideoBackend: Send + Sync {
    async fn open_reader(&self, path: &Path) -> MediaResult<Box<dyn VideoSource>>;

    /// Open a writer with the given codec (fourcc). Fails if the codec
    /// cannot be initialised.
    async fn open_writer(
        &self,
        path: &Path,
        target: &WriterTarget,
        codec: &str,
    ) -> MediaResult<Box<dyn VideoSink>>;
}

/// Routes `.mgr` files to the raw container and everything else to FFmpeg.
pub struct AutoBackend {
    raw: RawBackend,
    ffmpeg: FfmpegBackend,
}

impl AutoBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            raw: RawBackend::new(),
            ffmpeg: FfmpegBackend::new(config),
        }
    }

    /// Shared handle for orchestrators.
    pub fn shared(config: &EngineConfig) -> Arc<dyn VideoBackend> {
        Arc::new(Self::new(config))
    }

    fn is_raw(path: &Path) -> bool {
        path.extension()
            .map(|e| e.eq_ignore_ascii_case(RAW_EXTENSION))
            .unwrap_or(false)
    }
}

#[async_trait]
impl VideoBackend for AutoBackend {
    async fn open_reader(&self, path: &Path) -> MediaResult<Box<dyn VideoSource>> {
        if Self::is_raw(path) {
            self.raw.open_reader(path).await
        } else {
            self.ffmpeg.open_reader(path).await
        }
    }

    async fn open_writer(
        &self,
        path: &Path,
        target: &WriterTarget,
        codec: &str,
    ) -> MediaResult<Box<dyn VideoSink>> {
        if Self::is_raw(path) {
            self.raw.open_writer(path, target, codec).await
        } else {
            self.ffmpeg.open_writer(path, target, codec).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_routing_by_extension() {
        assert!(AutoBackend::is_raw(Path::new("clip.mgr")));
        assert!(AutoBackend::is_raw(Path::new("CLIP.MGR")));
        assert!(!AutoBackend::is_raw(Path::new("clip.mp4")));
        assert!(!AutoBackend::is_raw(Path::new("clip")));
    }
}
