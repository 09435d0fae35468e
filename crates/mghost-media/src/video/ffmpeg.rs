//! FFmpeg rawvideo pipe backend.
//!
//! Frames travel as packed RGB24 over stdin/stdout of an `ffmpeg` child
//! process; stream geometry comes from `ffprobe`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{StreamMetadata, VideoBackend, VideoSink, VideoSource, WriterTarget};
use crate::codec::ffmpeg_encoder;
use crate::command::{run_with_timeout, stderr_tail, FfmpegCommand, FfmpegRunner};
use crate::config::EngineConfig;
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::probe::probe_video_stream;

/// Backend that shells out to FFmpeg/FFprobe.
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    open_timeout: Duration,
    close_timeout: Duration,
    encoders: OnceCell<Vec<String>>,
}

impl FfmpegBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            open_timeout: config.open_timeout,
            close_timeout: config.mux_timeout,
            encoders: OnceCell::new(),
        }
    }

    /// Encoder names compiled into the FFmpeg binary.
    async fn available_encoders(&self) -> MediaResult<&[String]> {
        let list = self
            .encoders
            .get_or_try_init(|| async {
                let mut cmd = Command::new(&self.ffmpeg);
                cmd.args(["-hide_banner", "-encoders"]);
                let output = run_with_timeout(cmd, Some(self.open_timeout)).await?;
                if !output.status.success() {
                    return Err(MediaError::ffmpeg_failed(
                        "Could not list FFmpeg encoders",
                        Some(stderr_tail(&output.stderr)),
                        output.status.code(),
                    ));
                }
                Ok(parse_encoder_list(&String::from_utf8_lossy(&output.stdout)))
            })
            .await?;
        Ok(list.as_slice())
    }
}

/// Parse `ffmpeg -encoders` output into encoder names.
fn parse_encoder_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip_while(|l| !l.trim_start().starts_with("------"))
        .skip(1)
        .filter_map(|l| {
            let mut parts = l.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            flags.starts_with('V').then(|| name.to_string())
        })
        .collect()
}

/// Pixel format handed to the encoder.
fn encoder_pix_fmt(encoder: &str) -> &'static str {
    match encoder {
        "mjpeg" => "yuvj420p",
        "rawvideo" | "png" => "rgb24",
        _ => "yuv420p",
    }
}

/// One-frame encode of a synthetic source at the writer's geometry.
/// FFmpeg only initialises an encoder once the first frame arrives.
fn trial_encode_command(encoder: &str, target: &WriterTarget) -> FfmpegCommand {
    FfmpegCommand::new(
        format!(
            "color=c=gray:s={}x{}:r={}",
            target.width, target.height, target.fps
        ),
        "-",
    )
    .input_arg("-f")
    .input_arg("lavfi")
    .output_args(["-frames:v", "1"])
    .video_codec(encoder)
    .output_args(["-pix_fmt", encoder_pix_fmt(encoder), "-f", "null"])
}

/// Drain a child's stderr in the background so it never blocks on a full pipe.
fn drain_stderr(child: &mut Child) -> Option<JoinHandle<Vec<u8>>> {
    child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        })
    })
}

async fn collect_stderr(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    match handle {
        Some(h) => h.await.map(|b| stderr_tail(&b)).unwrap_or_default(),
        None => String::new(),
    }
}

#[async_trait]
impl VideoBackend for FfmpegBackend {
    async fn open_reader(&self, path: &Path) -> MediaResult<Box<dyn VideoSource>> {
        let metadata = probe_video_stream(&self.ffprobe, path, self.open_timeout).await?;

        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-v", "error", "-i"])
            .arg(path)
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::FfmpegNotFound(format!("{}: {}", self.ffmpeg.display(), e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stdout not captured"))?;
        let stderr = drain_stderr(&mut child);

        debug!(
            path = %path.display(),
            width = metadata.width,
            height = metadata.height,
            fps = metadata.fps,
            frames = metadata.frame_count,
            "Opened FFmpeg reader"
        );

        Ok(Box::new(FfmpegReader {
            child,
            stdout,
            stderr,
            metadata,
        }))
    }

    async fn open_writer(
        &self,
        path: &Path,
        target: &WriterTarget,
        codec: &str,
    ) -> MediaResult<Box<dyn VideoSink>> {
        let encoder = ffmpeg_encoder(codec);
        let available = self.available_encoders().await?;
        if !available.iter().any(|e| e == &encoder) {
            return Err(MediaError::ffmpeg_failed(
                format!("Encoder '{}' (codec '{}') is not available", encoder, codec),
                None,
                None,
            ));
        }

        FfmpegRunner::new(&self.ffmpeg)
            .with_timeout(self.open_timeout)
            .run(&trial_encode_command(&encoder, target))
            .await
            .map_err(|e| match e {
                MediaError::FfmpegFailed {
                    stderr, exit_code, ..
                } => MediaError::ffmpeg_failed(
                    format!(
                        "Encoder '{}' cannot encode {}x{} at {} fps: {}",
                        encoder,
                        target.width,
                        target.height,
                        target.fps,
                        stderr.as_deref().unwrap_or("no output")
                    ),
                    stderr,
                    exit_code,
                ),
                other => other,
            })?;

        let size = format!("{}x{}", target.width, target.height);
        let rate = format!("{}", target.fps);

        let mut child = Command::new(&self.ffmpeg)
            .args(["-y", "-hide_banner", "-v", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-s", &size, "-r", &rate])
            .args(["-i", "-", "-an", "-c:v", &encoder])
            .args(["-pix_fmt", encoder_pix_fmt(&encoder)])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::FfmpegNotFound(format!("{}: {}", self.ffmpeg.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stdin not captured"))?;
        let stderr = drain_stderr(&mut child);

        // An encoder that rejects its parameters exits immediately.
        tokio::time::sleep(Duration::from_millis(20)).await;
        if let Some(status) = child.try_wait()? {
            let stderr = collect_stderr(stderr).await;
            return Err(MediaError::ffmpeg_failed(
                format!("Encoder '{}' exited during open", encoder),
                Some(stderr),
                status.code(),
            ));
        }

        Ok(Box::new(FfmpegWriter {
            child,
            stdin: Some(stdin),
            stderr,
            target: *target,
            close_timeout: self.close_timeout,
        }))
    }
}

struct FfmpegReader {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<Vec<u8>>>,
    metadata: StreamMetadata,
}

#[async_trait]
impl VideoSource for FfmpegReader {
    fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    async fn read_frame(&mut self) -> MediaResult<Option<Frame>> {
        let mut buf = vec![0u8; Frame::rgb24_len(self.metadata.width, self.metadata.height)];
        match self.stdout.read_exact(&mut buf).await {
            Ok(_) => Frame::from_rgb24(self.metadata.width, self.metadata.height, &buf).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                let status = self.child.wait().await?;
                if !status.success() {
                    let stderr = collect_stderr(self.stderr.take()).await;
                    return Err(MediaError::ffmpeg_failed(
                        "FFmpeg decoder exited with non-zero status",
                        Some(stderr),
                        status.code(),
                    ));
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

struct FfmpegWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    target: WriterTarget,
    close_timeout: Duration,
}

#[async_trait]
impl VideoSink for FfmpegWriter {
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

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::internal("write after close"))?;

        if let Err(e) = stdin.write_all(&frame.to_rgb24()).await {
            let stderr = collect_stderr(self.stderr.take()).await;
            return Err(MediaError::ffmpeg_failed(
                format!("FFmpeg encoder rejected frame: {}", e),
                Some(stderr),
                None,
            ));
        }
        Ok(())
    }

    async fn close(&mut self) -> MediaResult<()> {
        let Some(mut stdin) = self.stdin.take() else {
            return Ok(());
        };
        stdin.flush().await?;
        drop(stdin);

        let status = match tokio::time::timeout(self.close_timeout, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!("FFmpeg encoder did not finish in {:?}, killing", self.close_timeout);
                let _ = self.child.kill().await;
                return Err(MediaError::Timeout(self.close_timeout.as_secs()));
            }
        };

        let stderr = collect_stderr(self.stderr.take()).await;
        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg encoder exited with non-zero status",
                Some(stderr),
                status.code(),
            ))
        }
    }
}
