//! End-to-end embedding through real FFmpeg binaries.
//!
//! Skipped at runtime when ffmpeg or ffprobe are not on PATH.

use std::path::Path;
use std::sync::Arc;

use mghost_media::codec::{negotiate, open_negotiated, CodecPolicy, Platform};
use mghost_media::{
    check_ffmpeg, check_ffprobe, EngineConfig, Embedder, Extractor, FfmpegBackend, Frame,
    VideoSink, WriterTarget,
};
use mghost_models::{ExtractionJob, KeySequence, WatermarkJob};
use tempfile::TempDir;
use tokio::process::Command;

fn ffmpeg_available() -> bool {
    check_ffmpeg().is_ok() && check_ffprobe().is_ok()
}

/// Five seconds of flat gray video at 20 fps, optionally with a tone.
async fn make_source(path: &Path, with_audio: bool) {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-hide_banner", "-v", "error"])
        .args(["-f", "lavfi", "-i", "color=c=gray:size=128x96:rate=20"]);
    if with_audio {
        cmd.args(["-f", "lavfi", "-i", "sine=frequency=440:sample_rate=44100"]);
    }
    cmd.args(["-t", "5", "-c:v", "ffv1"]);
    if with_audio {
        cmd.args(["-c:a", "flac"]);
    }
    cmd.arg(path);

    let status = cmd.status().await.unwrap();
    assert!(status.success(), "ffmpeg could not generate the test source");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ffv1_round_trip_keeps_audio() {
    if !ffmpeg_available() {
        eprintln!("ffmpeg not available, skipping");
        return;
    }

    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.mkv");
    let output = dir.path().join("marked.mkv");
    make_source(&source, true).await;

    let config = Arc::new(EngineConfig::default());
    let embedder = Embedder::from_config(config.clone());
    let keys = vec![501, 502, 503, 504];
    let job = WatermarkJob::new(
        &source,
        &output,
        keys.clone(),
        KeySequence::from_indices([0, 2, 3, 1]),
    )
    .with_codec("ffv1")
    .with_parallelism(4);

    let embedded = embedder.embed(&job).await;
    assert!(embedded.success, "{:?}", embedded.error);
    assert!(embedded.audio_preserved);
    assert_eq!(embedded.fragment_count, 5);
    assert!(!dir.path().join("marked_temp_no_audio.mkv").exists());

    let info = embedded.video_info.unwrap();
    assert_eq!(info.width, Some(128));
    assert_eq!(info.height, Some(96));

    let extractor = Extractor::from_config(config);
    let result = extractor
        .extract(&ExtractionJob::new(&output, keys).with_parallelism(2))
        .await;
    assert!(result.success, "{:?}", result.error);
    assert!(!result.placeholder, "{}", result.message);
    assert_eq!(result.sequence, vec![0, 2, 3, 1, 0]);
}

#[tokio::test]
async fn test_silent_source_is_moved_into_place() {
    if !ffmpeg_available() {
        eprintln!("ffmpeg not available, skipping");
        return;
    }

    let dir = TempDir::new().unwrap();
    let source = dir.path().join("silent.mkv");
    let output = dir.path().join("out/marked.mkv");
    make_source(&source, false).await;

    let embedder = Embedder::from_config(Arc::new(EngineConfig::default()));
    let job = WatermarkJob::new(&source, &output, vec![7], KeySequence::from_indices([0]))
        .with_codec("ffv1");

    let embedded = embedder.embed(&job).await;
    assert!(embedded.success, "{:?}", embedded.error);
    assert!(!embedded.audio_preserved);
    assert!(output.exists());
    assert!(source.exists());
}

#[tokio::test]
async fn test_encoder_rejecting_geometry_falls_back() {
    if !ffmpeg_available() {
        eprintln!("ffmpeg not available, skipping");
        return;
    }

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("odd.nut");
    let backend = FfmpegBackend::new(&EngineConfig::default());
    let policy = CodecPolicy {
        substitutions: Vec::new(),
        portable_fallback: Some("raw".to_string()),
    };
    // 4:2:0 H.264 needs even dimensions, and may not be built in at all.
    let target = WriterTarget {
        width: 127,
        height: 95,
        fps: 20.0,
    };

    let mut writer = open_negotiated(
        &backend,
        &path,
        &target,
        negotiate("avc1", Platform::Linux, &policy),
    )
    .await
    .unwrap();

    assert_eq!(writer.codec, "raw");
    assert!(writer.used_fallback());

    writer
        .sink
        .write_frame(&Frame::filled(127, 95, 80.0))
        .await
        .unwrap();
    writer.sink.close().await.unwrap();
    assert!(path.exists());
}
