//! FFprobe stream information.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use mghost_models::AudioStreamInfo;

use crate::command::{run_with_timeout, stderr_tail};
use crate::error::{MediaError, MediaResult};
use crate::video::StreamMetadata;

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
    duration: Option<String>,
}

/// Probe the first video stream of a file.
///
/// Frame count comes from the container's `nb_frames`, then a packet count,
/// then `duration * fps`.
pub async fn probe_video_stream(
    ffprobe: &Path,
    path: &Path,
    timeout: Duration,
) -> MediaResult<StreamMetadata> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let mut cmd = Command::new(ffprobe);
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-count_packets",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ])
    .arg(path);

    let output = run_with_timeout(cmd, Some(timeout)).await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe failed on {}", path.display()),
            stderr: Some(stderr_tail(&output.stderr)),
        });
    }

    parse_video_stream(&output.stdout)
}

fn parse_video_stream(stdout: &[u8]) -> MediaResult<StreamMetadata> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(MediaError::InvalidVideo(
            "Video stream has no dimensions".to_string(),
        ));
    }

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(30.0);

    let duration = stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok());

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .or_else(|| {
            stream
                .nb_read_packets
                .as_deref()
                .and_then(|n| n.parse::<u64>().ok())
        })
        .or_else(|| duration.map(|d| (d * fps).round() as u64))
        .unwrap_or(0);

    Ok(StreamMetadata {
        width,
        height,
        fps,
        frame_count,
    })
}

/// Probe the first audio stream in the fixed line-delimited format.
///
/// Non-zero exit or empty stdout means "no audio stream".
pub async fn probe_audio_stream(
    ffprobe: &Path,
    path: &Path,
    timeout: Duration,
) -> MediaResult<Option<AudioStreamInfo>> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let mut cmd = Command::new(ffprobe);
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "a:0",
        "-show_entries",
        "stream=codec_name,sample_rate,channels,bit_rate",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ])
    .arg(path);

    let output = run_with_timeout(cmd, Some(timeout)).await?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    debug!(
        path = %path.display(),
        status = ?output.status.code(),
        stdout = %stdout.trim(),
        "Audio probe finished"
    );

    if !output.status.success() {
        return Ok(None);
    }

    Ok(AudioStreamInfo::from_probe_lines(&stdout))
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|v: &f64| *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_parse_video_stream_nb_frames() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio"},
                {"codec_type": "video", "width": 64, "height": 48,
                 "avg_frame_rate": "20/1", "nb_frames": "100"}
            ],
            "format": {"duration": "5.0"}
        }"#;
        let meta = parse_video_stream(json).unwrap();
        assert_eq!((meta.width, meta.height, meta.frame_count), (64, 48, 100));
        assert_eq!(meta.fps, 20.0);
    }

    #[test]
    fn test_parse_video_stream_falls_back_to_duration() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 64, "height": 48,
                         "avg_frame_rate": "0/0", "r_frame_rate": "25/1"}],
            "format": {"duration": "2.0"}
        }"#;
        let meta = parse_video_stream(json).unwrap();
        assert_eq!(meta.fps, 25.0);
        assert_eq!(meta.frame_count, 50);
    }

    #[test]
    fn test_parse_video_stream_requires_video() {
        let json = br#"{"streams": [{"codec_type": "audio"}]}"#;
        assert!(matches!(
            parse_video_stream(json),
            Err(MediaError::InvalidVideo(_))
        ));
    }
}
