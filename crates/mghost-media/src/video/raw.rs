//! Raw frame container (`.mgr`).
//!
//! Uncompressed RGB24 frames behind a fixed 36-byte header:
//!
//! | bytes | field |
//! |---|---|
//! | 0..8 | magic `MGRAW\x01\0\0` |
//! | 8..12 | codec fourcc (ASCII, space padded) |
//! | 12..16 | width (u32 LE) |
//! | 16..20 | height (u32 LE) |
//! | 20..28 | fps (f64 LE) |
//! | 28..36 | frame count (u64 LE, patched on close) |
//!
//! Lossless, so it is used for intermediates and deterministic tests.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

use super::{StreamMetadata, VideoBackend, VideoSink, VideoSource, WriterTarget};
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;

/// File extension of the raw container.
pub const RAW_EXTENSION: &str = "mgr";

const MAGIC: &[u8; 8] = b"MGRAW\x01\0\0";
const HEADER_LEN: u64 = 36;
const COUNT_OFFSET: u64 = 28;

/// Largest accepted frame edge, in pixels.
pub const MAX_DIMENSION: u32 = 8192;

/// Backend for the raw container. Optionally restricted to a codec list so
/// callers can model platforms where some codecs fail to open.
#[derive(Debug, Clone, Default)]
pub struct RawBackend {
    accepted_codecs: Option<Vec<String>>,
}

impl RawBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept the listed codecs (case-insensitive).
    pub fn with_codecs<I, S>(codecs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted_codecs: Some(
                codecs
                    .into_iter()
                    .map(|c| c.into().to_ascii_lowercase())
                    .collect(),
            ),
        }
    }

    fn accepts(&self, codec: &str) -> bool {
        match &self.accepted_codecs {
            None => true,
            Some(list) => list.iter().any(|c| c.eq_ignore_ascii_case(codec)),
        }
    }
}

#[async_trait]
impl VideoBackend for RawBackend {
    async fn open_reader(&self, path: &Path) -> MediaResult<Box<dyn VideoSource>> {
        Ok(Box::new(RawReader::open(path).await?))
    }

    async fn open_writer(
        &self,
        path: &Path,
        target: &WriterTarget,
        codec: &str,
    ) -> MediaResult<Box<dyn VideoSink>> {
        if !self.accepts(codec) {
            return Err(MediaError::InvalidVideo(format!(
                "codec '{}' is not available for raw output",
                codec
            )));
        }
        Ok(Box::new(RawWriter::create(path, target, codec).await?))
    }
}

fn fourcc_bytes(codec: &str) -> [u8; 4] {
    let mut out = [b' '; 4];
    for (slot, b) in out.iter_mut().zip(codec.bytes()) {
        *slot = b;
    }
    out
}

/// Reader for `.mgr` files.
pub struct RawReader {
    reader: BufReader<File>,
    metadata: StreamMetadata,
    codec: String,
    frames_read: u64,
}

impl RawReader {
    pub async fn open(path: &Path) -> MediaResult<Self> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let file = File::open(path).await?;
        let file_len = file.metadata().await?.len();
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER_LEN as usize];
        reader.read_exact(&mut header).await.map_err(|_| {
            MediaError::InvalidVideo(format!("{} is too short for a raw header", path.display()))
        })?;

        if &header[0..8] != MAGIC {
            return Err(MediaError::InvalidVideo(format!(
                "{} is not a raw frame container",
                path.display()
            )));
        }

        let codec = String::from_utf8_lossy(&header[8..12]).trim().to_string();
        let width = u32::from_le_bytes(slice4(&header[12..16]));
        let height = u32::from_le_bytes(slice4(&header[16..20]));
        let fps = f64::from_le_bytes(slice8(&header[20..28]));
        let mut frame_count = u64::from_le_bytes(slice8(&header[28..36]));

        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(MediaError::InvalidVideo(format!(
                "{} has unsupported frame dimensions {}x{}",
                path.display(),
                width,
                height
            )));
        }

        // A count of zero means the writer never closed. Either way the
        // payload bounds how many frames can actually be read.
        let frame_len = Frame::rgb24_len(width, height) as u64;
        let stored = file_len.saturating_sub(HEADER_LEN) / frame_len;
        frame_count = if frame_count == 0 {
            stored
        } else {
            frame_count.min(stored)
        };

        debug!(
            path = %path.display(),
            width, height, fps, frame_count, codec = %codec,
            "Opened raw container"
        );

        Ok(Self {
            reader,
            metadata: StreamMetadata {
                width,
                height,
                fps,
                frame_count,
            },
            codec,
            frames_read: 0,
        })
    }

    /// Codec fourcc recorded by the writer.
    pub fn codec(&self) -> &str {
        &self.codec
    }
}

fn slice4(b: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(b);
    out
}

fn slice8(b: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(b);
    out
}

#[async_trait]
impl VideoSource for RawReader {
    fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    async fn read_frame(&mut self) -> MediaResult<Option<Frame>> {
        if self.frames_read >= self.metadata.frame_count {
            return Ok(None);
        }

        let mut buf = vec![0u8; Frame::rgb24_len(self.metadata.width, self.metadata.height)];
        match self.reader.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        self.frames_read += 1;
        Frame::from_rgb24(self.metadata.width, self.metadata.height, &buf).map(Some)
    }
}

/// Writer for `.mgr` files.
pub struct RawWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    target: WriterTarget,
    frames_written: u64,
}

impl RawWriter {
    pub async fn create(path: &Path, target: &WriterTarget, codec: &str) -> MediaResult<Self> {
        if target.width == 0 || target.height == 0 {
            return Err(MediaError::invalid("writer dimensions must be non-zero"));
        }
        if target.width > MAX_DIMENSION || target.height > MAX_DIMENSION {
            return Err(MediaError::invalid(format!(
                "writer dimensions {}x{} exceed {}",
                target.width, target.height, MAX_DIMENSION
            )));
        }

        let mut writer = BufWriter::new(File::create(path).await?);
        writer.write_all(MAGIC).await?;
        writer.write_all(&fourcc_bytes(codec)).await?;
        writer.write_all(&target.width.to_le_bytes()).await?;
        writer.write_all(&target.height.to_le_bytes()).await?;
        writer.write_all(&target.fps.to_le_bytes()).await?;
        writer.write_all(&0u64.to_le_bytes()).await?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            target: *target,
            frames_written: 0,
        })
    }
}

#[async_trait]
impl VideoSink for RawWriter {
    async fn write_frame(&mut self, frame: &Frame) -> MediaResult<()> {
        if frame.width() != self.target.width || frame.height() != self.target.height {
            return Err(MediaError::InvalidVideo(format!(
                "frame is {}x{}, writer expects {}x{}",
                frame.width(),
                frame.height(),
                self.target.width,
                self.target.height
            )));
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| MediaError::internal("write after close"))?;
        writer.write_all(&frame.to_rgb24()).await?;
        self.frames_written += 1;
        Ok(())
    }

    async fn close(&mut self) -> MediaResult<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        writer.flush().await?;
        writer.seek(SeekFrom::Start(COUNT_OFFSET)).await?;
        writer.write_all(&self.frames_written.to_le_bytes()).await?;
        writer.flush().await?;
        writer.get_mut().sync_all().await?;

        debug!(
            path = %self.path.display(),
            frames = self.frames_written,
            "Closed raw container"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target() -> WriterTarget {
        WriterTarget {
            width: 4,
            height: 2,
            fps: 20.0,
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mgr");

        let mut writer = RawWriter::create(&path, &target(), "mp4v").await.unwrap();
        for luma in [10.0, 20.0, 30.0] {
            writer.write_frame(&Frame::filled(4, 2, luma)).await.unwrap();
        }
        writer.close().await.unwrap();

        let size = std::fs::metadata(&path).unwrap().len();
        assert_eq!(size, HEADER_LEN + 3 * 24);

        let mut reader = RawReader::open(&path).await.unwrap();
        assert_eq!(reader.codec(), "mp4v");
        assert_eq!(reader.metadata().frame_count, 3);
        assert_eq!(reader.metadata().fps, 20.0);

        let mut lumas = Vec::new();
        while let Some(frame) = reader.read_frame().await.unwrap() {
            lumas.push(frame.mean_luma().round());
        }
        assert_eq!(lumas, vec![10.0, 20.0, 30.0]);
    }

    #[tokio::test]
    async fn test_unclosed_writer_count_recovered() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.mgr");

        let mut writer = RawWriter::create(&path, &target(), "mp4v").await.unwrap();
        writer.write_frame(&Frame::filled(4, 2, 1.0)).await.unwrap();
        writer.write_frame(&Frame::filled(4, 2, 2.0)).await.unwrap();
        if let Some(w) = writer.writer.as_mut() {
            w.flush().await.unwrap();
        }

        let reader = RawReader::open(&path).await.unwrap();
        assert_eq!(reader.metadata().frame_count, 2);
    }

    fn header(width: u32, height: u32, frames: u64) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(b"mp4v");
        bytes.extend_from_slice(&width.to_le_bytes());
        bytes.extend_from_slice(&height.to_le_bytes());
        bytes.extend_from_slice(&20.0f64.to_le_bytes());
        bytes.extend_from_slice(&frames.to_le_bytes());
        bytes
    }

    #[tokio::test]
    async fn test_oversized_header_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.mgr");
        std::fs::write(&path, header(u32::MAX, 65_535, 1)).unwrap();
        assert!(matches!(
            RawReader::open(&path).await,
            Err(MediaError::InvalidVideo(_))
        ));
    }

    #[tokio::test]
    async fn test_frame_count_bounded_by_payload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.mgr");
        let mut bytes = header(4, 2, 1_000);
        bytes.extend_from_slice(&[50u8; 24]);
        std::fs::write(&path, bytes).unwrap();

        let mut reader = RawReader::open(&path).await.unwrap();
        assert_eq!(reader.metadata().frame_count, 1);
        assert!(reader.read_frame().await.unwrap().is_some());
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_mismatched_frame() {
        let dir = TempDir::new().unwrap();
        let mut writer = RawWriter::create(&dir.path().join("x.mgr"), &target(), "mp4v")
            .await
            .unwrap();
        assert!(writer.write_frame(&Frame::filled(2, 2, 0.0)).await.is_err());
    }

    #[tokio::test]
    async fn test_codec_restriction() {
        let dir = TempDir::new().unwrap();
        let backend = RawBackend::with_codecs(["MP4V"]);
        assert!(backend
            .open_writer(&dir.path().join("a.mgr"), &target(), "avc1")
            .await
            .is_err());
        assert!(backend
            .open_writer(&dir.path().join("b.mgr"), &target(), "mp4v")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_open_missing_and_garbage() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            RawReader::open(&dir.path().join("missing.mgr")).await,
            Err(MediaError::FileNotFound(_))
        ));

        let garbage = dir.path().join("garbage.mgr");
        std::fs::write(&garbage, vec![7u8; 64]).unwrap();
        assert!(matches!(
            RawReader::open(&garbage).await,
            Err(MediaError::InvalidVideo(_))
        ));
    }
}
