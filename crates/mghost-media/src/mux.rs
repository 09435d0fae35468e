//! Audio probing and lossless remuxing.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use mghost_models::AudioStreamInfo;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::config::EngineConfig;
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_audio_stream;

/// Audio side of the pipeline: find out whether a source has audio, and
/// copy it next to a freshly encoded video stream.
#[async_trait]
pub trait MediaMuxer: Send + Sync {
    /// First audio stream of `path`, or `None` when there is none.
    async fn probe_audio(&self, path: &Path) -> MediaResult<Option<AudioStreamInfo>>;

    /// Write `output` with the video of `video` and the audio of
    /// `audio_source`, both stream-copied, trimmed to the shorter stream.
    async fn remux(&self, video: &Path, audio_source: &Path, output: &Path) -> MediaResult<()>;
}

/// FFmpeg/FFprobe subprocess muxer.
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    mux_timeout: Duration,
    probe_timeout: Duration,
}

impl FfmpegMuxer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            mux_timeout: config.mux_timeout,
            probe_timeout: config.probe_timeout,
        }
    }

    /// The remux command line.
    pub fn remux_command(video: &Path, audio_source: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(video, output)
            .add_input(audio_source)
            .stream_copy()
            .map("0:v:0")
            .map("1:a:0")
            .shortest()
    }
}

#[async_trait]
impl MediaMuxer for FfmpegMuxer {
    async fn probe_audio(&self, path: &Path) -> MediaResult<Option<AudioStreamInfo>> {
        probe_audio_stream(&self.ffprobe, path, self.probe_timeout).await
    }

    async fn remux(&self, video: &Path, audio_source: &Path, output: &Path) -> MediaResult<()> {
        let cmd = Self::remux_command(video, audio_source, output);
        debug!(
            video = %video.display(),
            audio = %audio_source.display(),
            output = %output.display(),
            "Merging audio"
        );

        FfmpegRunner::new(&self.ffmpeg)
            .with_timeout(self.mux_timeout)
            .run(&cmd)
            .await
            .map_err(|e| match e {
                MediaError::FfmpegFailed {
                    message, stderr, ..
                } => MediaError::AudioMergeFailure(match stderr {
                    Some(stderr) if !stderr.is_empty() => format!("{}: {}", message, stderr),
                    _ => message,
                }),
                other => other,
            })?;

        info!(output = %output.display(), "Audio merged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remux_command_shape() {
        let args = FfmpegMuxer::remux_command(
            Path::new("v_temp_no_audio.mp4"),
            Path::new("source.mp4"),
            Path::new("v.mp4"),
        )
        .build_args();

        let joined = args.join(" ");
        assert!(joined.starts_with("-y "));
        assert!(joined.contains("-i v_temp_no_audio.mp4 -i source.mp4"));
        assert!(joined.contains("-c copy"));
        assert!(joined.contains("-map 0:v:0 -map 1:a:0"));
        assert!(joined.contains("-shortest"));
        assert_eq!(args.last().unwrap(), "v.mp4");
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_is_an_error() {
        let config = EngineConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            ..Default::default()
        };
        let muxer = FfmpegMuxer::new(&config);
        let result = muxer
            .remux(Path::new("a.mp4"), Path::new("b.mp4"), Path::new("c.mp4"))
            .await;
        assert!(result.is_err());
    }
}
