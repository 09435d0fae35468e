//! Codec negotiation.
//!
//! Which codec a writer opens with is explicit configuration: a
//! [`CodecPolicy`] lists per-platform substitutions and one portable
//! fallback. [`negotiate`] turns a requested codec into an ordered plan and
//! [`open_negotiated`] walks that plan against a [`VideoBackend`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use mghost_models::{CodecEvent, CodecEventKind};

use crate::error::{MediaError, MediaResult};
use crate::video::{VideoBackend, VideoSink, WriterTarget};

/// Codec used when nothing else can be opened.
pub const PORTABLE_CODEC: &str = "mp4v";

/// H.264-family identifiers that fail to open on stock Windows builds.
pub const H264_FAMILY: &[&str] = &["avc1", "h264", "x264", "davc", "fmp4"];

/// Host platform, as far as codec availability is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
    Other,
}

impl Platform {
    /// Platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Other
        }
    }
}

/// Replace any codec in `from` with `to`, optionally only on one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstitutionRule {
    /// `None` applies everywhere
    pub platform: Option<Platform>,
    pub from: Vec<String>,
    pub to: String,
}

impl SubstitutionRule {
    fn applies(&self, codec: &str, platform: Platform) -> bool {
        self.platform.map_or(true, |p| p == platform)
            && self.from.iter().any(|c| c.eq_ignore_ascii_case(codec))
    }
}

/// Codec substitutions plus the single portable fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecPolicy {
    pub substitutions: Vec<SubstitutionRule>,
    pub portable_fallback: Option<String>,
}

impl Default for CodecPolicy {
    fn default() -> Self {
        Self {
            substitutions: vec![SubstitutionRule {
                platform: Some(Platform::Windows),
                from: H264_FAMILY.iter().map(|c| c.to_string()).collect(),
                to: PORTABLE_CODEC.to_string(),
            }],
            portable_fallback: Some(PORTABLE_CODEC.to_string()),
        }
    }
}

impl CodecPolicy {
    /// Policy with no substitutions and no fallback.
    pub fn strict() -> Self {
        Self {
            substitutions: Vec::new(),
            portable_fallback: None,
        }
    }
}

/// Ordered codecs to try, with the substitutions that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecPlan {
    pub requested: String,
    pub attempts: Vec<String>,
    pub trace: Vec<CodecEvent>,
}

impl CodecPlan {
    pub fn primary(&self) -> &str {
        self.attempts.first().map(String::as_str).unwrap_or(&self.requested)
    }
}

/// Build the attempt list for `requested`. Pure.
pub fn negotiate(requested: &str, platform: Platform, policy: &CodecPolicy) -> CodecPlan {
    let requested = requested.trim().to_ascii_lowercase();
    let mut trace = Vec::new();

    let primary = match policy
        .substitutions
        .iter()
        .find(|rule| rule.applies(&requested, platform))
    {
        Some(rule) => {
            let to = rule.to.to_ascii_lowercase();
            trace.push(
                CodecEvent::new(CodecEventKind::Substituted, to.clone())
                    .with_detail(format!("{} is unavailable on {:?}", requested, platform)),
            );
            to
        }
        None => requested.clone(),
    };

    let mut attempts = vec![primary];
    if let Some(fallback) = &policy.portable_fallback {
        let fallback = fallback.to_ascii_lowercase();
        if !attempts.contains(&fallback) {
            attempts.push(fallback);
        }
    }

    CodecPlan {
        requested,
        attempts,
        trace,
    }
}

/// A writer opened through negotiation.
pub struct NegotiatedWriter {
    pub sink: Box<dyn VideoSink>,
    /// Codec the writer actually opened with
    pub codec: String,
    pub trace: Vec<CodecEvent>,
}

impl NegotiatedWriter {
    /// Whether the portable fallback had to be used.
    pub fn used_fallback(&self) -> bool {
        self.trace
            .iter()
            .any(|e| e.kind == CodecEventKind::Failed)
    }

    /// Whether a policy substitution changed the requested codec.
    pub fn substituted(&self) -> bool {
        self.trace
            .iter()
            .any(|e| e.kind == CodecEventKind::Substituted)
    }
}

/// Try each planned codec in order until one opens.
pub async fn open_negotiated(
    backend: &dyn VideoBackend,
    path: &Path,
    target: &WriterTarget,
    plan: CodecPlan,
) -> MediaResult<NegotiatedWriter> {
    let CodecPlan {
        requested,
        attempts,
        mut trace,
    } = plan;

    for event in &trace {
        warn!(
            requested = %requested,
            codec = %event.codec,
            detail = event.detail.as_deref().unwrap_or(""),
            "Codec substituted"
        );
    }

    let mut last_error = String::from("no codecs to try");
    for codec in &attempts {
        trace.push(CodecEvent::new(CodecEventKind::Attempted, codec.clone()));
        match backend.open_writer(path, target, codec).await {
            Ok(sink) => {
                info!(codec = %codec, path = %path.display(), "Video writer opened");
                trace.push(CodecEvent::new(CodecEventKind::Opened, codec.clone()));
                return Ok(NegotiatedWriter {
                    sink,
                    codec: codec.clone(),
                    trace,
                });
            }
            Err(e) => {
                warn!(codec = %codec, error = %e, "Video writer failed to open");
                last_error = e.to_string();
                trace.push(
                    CodecEvent::new(CodecEventKind::Failed, codec.clone()).with_detail(&last_error),
                );
            }
        }
    }

    Err(MediaError::CodecOpenFailure {
        attempted: attempts,
        message: last_error,
    })
}

/// FFmpeg encoder name for a fourcc. Unknown identifiers are passed through
/// as encoder names.
pub fn ffmpeg_encoder(codec: &str) -> String {
    let codec = codec.trim().to_ascii_lowercase();
    let encoder = match codec.as_str() {
        "mp4v" | "fmp4" | "xvid" | "divx" => "mpeg4",
        "avc1" | "h264" | "x264" | "davc" => "libx264",
        "hev1" | "hvc1" | "h265" | "x265" => "libx265",
        "mjpg" => "mjpeg",
        "vp80" => "libvpx",
        "vp90" => "libvpx-vp9",
        "ffv1" => "ffv1",
        "raw" | "rgb" => "rawvideo",
        _ => return codec,
    };
    encoder.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::RawBackend;
    use tempfile::TempDir;

    #[test]
    fn test_windows_substitutes_h264_family() {
        let policy = CodecPolicy::default();
        for codec in ["AVC1", "h264", "X264", "davc", "FMP4"] {
            let plan = negotiate(codec, Platform::Windows, &policy);
            assert_eq!(plan.attempts, vec!["mp4v".to_string()]);
            assert_eq!(plan.trace.len(), 1);
            assert_eq!(plan.trace[0].kind, CodecEventKind::Substituted);
        }
    }

    #[test]
    fn test_linux_keeps_requested_and_adds_fallback() {
        let plan = negotiate("avc1", Platform::Linux, &CodecPolicy::default());
        assert_eq!(plan.attempts, vec!["avc1".to_string(), "mp4v".to_string()]);
        assert!(plan.trace.is_empty());
    }

    #[test]
    fn test_fallback_skipped_when_identical() {
        let plan = negotiate("MP4V", Platform::Linux, &CodecPolicy::default());
        assert_eq!(plan.attempts, vec!["mp4v".to_string()]);
    }

    #[test]
    fn test_negotiate_is_deterministic() {
        let policy = CodecPolicy::default();
        assert_eq!(
            negotiate("h264", Platform::Windows, &policy),
            negotiate("h264", Platform::Windows, &policy)
        );
    }

    #[test]
    fn test_strict_policy() {
        let plan = negotiate("ffv1", Platform::Windows, &CodecPolicy::strict());
        assert_eq!(plan.attempts, vec!["ffv1".to_string()]);
    }

    #[test]
    fn test_ffmpeg_encoder_mapping() {
        assert_eq!(ffmpeg_encoder("mp4v"), "mpeg4");
        assert_eq!(ffmpeg_encoder("AVC1"), "libx264");
        assert_eq!(ffmpeg_encoder("davc"), "libx264");
        assert_eq!(ffmpeg_encoder("fmp4"), "mpeg4");
        assert_eq!(ffmpeg_encoder("MJPG"), "mjpeg");
        assert_eq!(ffmpeg_encoder("ffv1"), "ffv1");
        assert_eq!(ffmpeg_encoder("raw"), "rawvideo");
        assert_eq!(ffmpeg_encoder("libvpx-vp9"), "libvpx-vp9");
    }

    fn target() -> WriterTarget {
        WriterTarget {
            width: 4,
            height: 4,
            fps: 10.0,
        }
    }

    #[tokio::test]
    async fn test_open_falls_back_once() {
        let dir = TempDir::new().unwrap();
        let backend = RawBackend::with_codecs(["mp4v"]);
        let plan = negotiate("avc1", Platform::Linux, &CodecPolicy::default());

        let writer = open_negotiated(&backend, &dir.path().join("o.mgr"), &target(), plan)
            .await
            .unwrap();
        assert_eq!(writer.codec, "mp4v");
        assert!(writer.used_fallback());
        assert!(!writer.substituted());

        let kinds: Vec<_> = writer.trace.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                CodecEventKind::Attempted,
                CodecEventKind::Failed,
                CodecEventKind::Attempted,
                CodecEventKind::Opened
            ]
        );
    }

    #[tokio::test]
    async fn test_open_exhaustion_reports_attempts() {
        let dir = TempDir::new().unwrap();
        let backend = RawBackend::with_codecs(["ffv1"]);
        let plan = negotiate("avc1", Platform::Linux, &CodecPolicy::default());

        let result = open_negotiated(&backend, &dir.path().join("o.mgr"), &target(), plan).await;
        match result {
            Err(MediaError::CodecOpenFailure { attempted, .. }) => {
                assert_eq!(attempted, vec!["avc1".to_string(), "mp4v".to_string()]);
            }
            _ => panic!("expected CodecOpenFailure"),
        }
    }
}
