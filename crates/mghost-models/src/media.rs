//! Audio stream and video metadata models.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Audio stream information probed from a source video.
///
/// Each field is `None` when the probe did not report it. The absence of
/// an audio stream is modelled as `Option<AudioStreamInfo>::None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AudioStreamInfo {
    /// Codec name (e.g., "aac")
    pub codec: Option<String>,
    /// Sample rate in Hz, as reported
    pub sample_rate: Option<String>,
    /// Channel count, as reported
    pub channels: Option<String>,
    /// Bitrate in bits/second, as reported
    pub bitrate: Option<String>,
}

impl AudioStreamInfo {
    /// Parse the line-delimited probe output:
    /// `codec_name`, `sample_rate`, `channels`, `bit_rate`, one per line.
    ///
    /// Returns `None` when the output is empty (no audio stream).
    pub fn from_probe_lines(stdout: &str) -> Option<Self> {
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return None;
        }

        let mut lines = trimmed.lines().map(|l| {
            let l = l.trim();
            if l.is_empty() || l == "N/A" || l == "unknown" {
                None
            } else {
                Some(l.to_string())
            }
        });

        let codec = lines.next().flatten();
        codec.as_ref()?;

        Some(Self {
            codec,
            sample_rate: lines.next().flatten(),
            channels: lines.next().flatten(),
            bitrate: lines.next().flatten(),
        })
    }

    /// Sample rate as a number, if known.
    pub fn sample_rate_hz(&self) -> Option<u32> {
        self.sample_rate.as_deref().and_then(|s| s.parse().ok())
    }

    /// Channel count as a number, if known.
    pub fn channel_count(&self) -> Option<u32> {
        self.channels.as_deref().and_then(|s| s.parse().ok())
    }
}

/// Video metadata. Fields are optional so that partial metadata (file size
/// only) can be reported when the container cannot be opened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// File size in bytes
    pub size_bytes: u64,
    /// Set when only partial metadata could be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl VideoInfo {
    /// Full metadata from an opened container.
    pub fn complete(width: u32, height: u32, fps: f64, frame_count: u64, size_bytes: u64) -> Self {
        let duration_secs = if fps > 0.0 {
            Some(frame_count as f64 / fps)
        } else {
            Some(0.0)
        };
        Self {
            width: Some(width),
            height: Some(height),
            fps: Some(fps),
            frame_count: Some(frame_count),
            duration_secs,
            size_bytes,
            note: None,
        }
    }

    /// Size-only metadata when the container could not be opened.
    pub fn partial(size_bytes: u64, note: impl Into<String>) -> Self {
        Self {
            size_bytes,
            note: Some(note.into()),
            ..Default::default()
        }
    }

    pub fn is_partial(&self) -> bool {
        self.note.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_lines_full() {
        let info = AudioStreamInfo::from_probe_lines("aac\n44100\n2\n128000\n").unwrap();
        assert_eq!(info.codec.as_deref(), Some("aac"));
        assert_eq!(info.sample_rate_hz(), Some(44100));
        assert_eq!(info.channel_count(), Some(2));
        assert_eq!(info.bitrate.as_deref(), Some("128000"));
    }

    #[test]
    fn test_probe_lines_unknown_bitrate() {
        let info = AudioStreamInfo::from_probe_lines("opus\n48000\n2\nN/A").unwrap();
        assert_eq!(info.bitrate, None);
    }

    #[test]
    fn test_probe_lines_empty_means_no_audio() {
        assert!(AudioStreamInfo::from_probe_lines("").is_none());
        assert!(AudioStreamInfo::from_probe_lines("  \n ").is_none());
    }

    #[test]
    fn test_video_info_duration() {
        let info = VideoInfo::complete(64, 48, 20.0, 100, 1024);
        assert_eq!(info.duration_secs, Some(5.0));
        assert!(!info.is_partial());
        assert!(VideoInfo::partial(10, "could not open").is_partial());
    }
}
