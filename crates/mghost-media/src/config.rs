//! Engine configuration shared by the orchestrators.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mghost_models::job::DEFAULT_PARALLELISM;

use crate::codec::{CodecPolicy, Platform};
use crate::command::resolve_binary;
use crate::error::{MediaError, MediaResult};
use crate::retry::RetryConfig;

/// Outputs at or below this size are treated as a failed writer.
pub const DEFAULT_MIN_OUTPUT_BYTES: u64 = 256;

/// Minimum per-fragment correlation for a trusted extraction.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.35;

/// Process-wide engine settings. Immutable once built; share via `Arc`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// FFmpeg binary
    pub ffmpeg_path: PathBuf,
    /// FFprobe binary
    pub ffprobe_path: PathBuf,
    /// Worker pool size used when a job does not specify one
    pub default_parallelism: usize,
    /// Integrity threshold for written outputs
    pub min_output_bytes: u64,
    /// Every fragment must score strictly above this to be trusted
    pub min_confidence: f64,
    /// Audio remux timeout
    pub mux_timeout: Duration,
    /// Audio/metadata probe timeout
    pub probe_timeout: Duration,
    /// Reader/writer open timeout
    pub open_timeout: Duration,
    /// Attempts for the final metadata probe
    pub metadata_retry_attempts: u32,
    /// Fixed delay between metadata probe attempts
    pub metadata_retry_delay: Duration,
    pub codec_policy: CodecPolicy,
    pub platform: Platform,
    /// Watermark strength multiplier
    pub strength: f32,
    /// Watermark quantisation step
    pub step: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            default_parallelism: DEFAULT_PARALLELISM,
            min_output_bytes: DEFAULT_MIN_OUTPUT_BYTES,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            mux_timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(10),
            open_timeout: Duration::from_secs(30),
            metadata_retry_attempts: 3,
            metadata_retry_delay: Duration::from_millis(500),
            codec_policy: CodecPolicy::default(),
            platform: Platform::current(),
            strength: 1.0,
            step: 5.0,
        }
    }
}

impl EngineConfig {
    /// Create config from `MGHOST_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset or unparsable values
    /// keep their defaults.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            var(key)
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            ffmpeg_path: var("MGHOST_FFMPEG")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: var("MGHOST_FFPROBE")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffprobe_path),
            default_parallelism: var("MGHOST_THREADS")
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.default_parallelism),
            min_output_bytes: var("MGHOST_MIN_OUTPUT_BYTES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_output_bytes),
            min_confidence: var("MGHOST_MIN_CONFIDENCE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_confidence),
            mux_timeout: secs("MGHOST_MUX_TIMEOUT_SECS", defaults.mux_timeout),
            probe_timeout: secs("MGHOST_PROBE_TIMEOUT_SECS", defaults.probe_timeout),
            open_timeout: secs("MGHOST_OPEN_TIMEOUT_SECS", defaults.open_timeout),
            strength: var("MGHOST_STRENGTH")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.strength),
            step: var("MGHOST_STEP")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.step),
            ..defaults
        }
    }

    /// Resolve FFmpeg/FFprobe to absolute paths (`PATH`, then bundled dirs).
    pub fn resolve_binaries(mut self) -> MediaResult<Self> {
        let ffmpeg = self.ffmpeg_path.to_string_lossy().into_owned();
        self.ffmpeg_path = resolve_binary(&ffmpeg, explicit_path(&self.ffmpeg_path))
            .ok_or(MediaError::FfmpegNotFound(ffmpeg))?;
        let ffprobe = self.ffprobe_path.to_string_lossy().into_owned();
        self.ffprobe_path = resolve_binary(&ffprobe, explicit_path(&self.ffprobe_path))
            .ok_or(MediaError::FfprobeNotFound(ffprobe))?;
        Ok(self)
    }

    /// Retry settings for the final metadata probe.
    pub fn metadata_retry(&self) -> RetryConfig {
        RetryConfig::new("probe_metadata")
            .with_max_attempts(self.metadata_retry_attempts)
            .with_fixed_delay(self.metadata_retry_delay)
    }
}

/// A bare program name is looked up; anything with a directory is used as is.
fn explicit_path(path: &Path) -> Option<&Path> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|_| path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.min_output_bytes, 256);
        assert_eq!(config.mux_timeout, Duration::from_secs(300));
        assert_eq!(config.probe_timeout, Duration::from_secs(10));
        assert_eq!(config.open_timeout, Duration::from_secs(30));
        assert_eq!(config.metadata_retry().max_attempts, 3);
    }

    #[test]
    fn test_from_vars() {
        let vars: std::collections::HashMap<&str, &str> = [
            ("MGHOST_FFMPEG", "/opt/ffmpeg/bin/ffmpeg"),
            ("MGHOST_THREADS", "3"),
            ("MGHOST_MIN_CONFIDENCE", "0.5"),
            ("MGHOST_MUX_TIMEOUT_SECS", "60"),
            ("MGHOST_STEP", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_vars(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.ffprobe_path, PathBuf::from("ffprobe"));
        assert_eq!(config.default_parallelism, 3);
        assert_eq!(config.min_confidence, 0.5);
        assert_eq!(config.mux_timeout, Duration::from_secs(60));
        assert_eq!(config.step, 5.0);
    }

    #[test]
    fn test_zero_threads_keeps_default() {
        let config = EngineConfig::from_vars(|k| (k == "MGHOST_THREADS").then(|| "0".to_string()));
        assert_eq!(config.default_parallelism, DEFAULT_PARALLELISM);
    }

    #[test]
    fn test_explicit_path() {
        assert!(explicit_path(Path::new("ffmpeg")).is_none());
        assert!(explicit_path(Path::new("/opt/ffmpeg/bin/ffmpeg")).is_some());
        assert!(explicit_path(Path::new("./ffmpeg")).is_some());
    }
}
