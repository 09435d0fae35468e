//! Embed then extract through the raw container backend.

use std::path::Path;
use std::sync::{Arc, Mutex};

use mghost_media::{
    EngineConfig, Embedder, Extractor, Frame, JobEvent, JobStage, LumaSpreadPrimitive,
    MediaMuxer, MediaResult, RawBackend, VideoBackend, WriterTarget,
};
use mghost_models::{AudioStreamInfo, ExtractionJob, KeySequence, WarningKind, WatermarkJob};
use tempfile::TempDir;

struct SilentMuxer;

#[async_trait::async_trait]
impl MediaMuxer for SilentMuxer {
    async fn probe_audio(&self, _path: &Path) -> MediaResult<Option<AudioStreamInfo>> {
        Ok(None)
    }

    async fn remux(&self, _video: &Path, _audio: &Path, _output: &Path) -> MediaResult<()> {
        panic!("remux must not be called for a silent source");
    }
}

async fn write_source(path: &Path, frames: u64, fps: f64) {
    let target = WriterTarget {
        width: 64,
        height: 48,
        fps,
    };
    let mut sink = RawBackend::new()
        .open_writer(path, &target, "mp4v")
        .await
        .unwrap();
    for i in 0..frames {
        // Brightness drift must not disturb decoding.
        let luma = 90.0 + (i % 25) as f32 * 2.0;
        sink.write_frame(&Frame::filled(64, 48, luma)).await.unwrap();
    }
    sink.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_embed_extract_round_trip() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.mgr");
    let marked = dir.path().join("marked.mgr");
    write_source(&source, 100, 20.0).await;

    let config = Arc::new(EngineConfig::default());
    let backend: Arc<dyn VideoBackend> = Arc::new(RawBackend::new());
    let primitive = Arc::new(LumaSpreadPrimitive::from_config(&config));

    let events = Arc::new(Mutex::new(Vec::<JobEvent>::new()));
    let sink = events.clone();
    let embedder = Embedder::new(
        config.clone(),
        backend.clone(),
        Arc::new(SilentMuxer),
        primitive.clone(),
    )
    .with_progress(Arc::new(move |e: &JobEvent| sink.lock().unwrap().push(e.clone())));

    let keys = vec![10, 11, 12, 13];
    let job = WatermarkJob::new(
        &source,
        &marked,
        keys.clone(),
        KeySequence::from_indices([0, 2, 3, 1]),
    )
    .with_fragment_length(1.0)
    .with_parallelism(4);

    let embedded = embedder.embed(&job).await;
    assert!(embedded.success, "{:?}", embedded.error);
    assert_eq!(embedded.fragment_count, 5);
    assert!(!embedded.audio_preserved);
    assert!(embedded.has_warning(WarningKind::SequenceLengthMismatch));
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.stage == JobStage::Done));

    let extractor = Extractor::new(config, backend, primitive);
    let extraction = ExtractionJob::new(&marked, keys.clone())
        .with_fragment_length(1.0)
        .with_parallelism(3);
    let result = extractor.extract(&extraction).await;

    assert!(result.success, "{:?}", result.error);
    assert!(!result.placeholder, "{}", result.message);
    assert_eq!(result.sequence, vec![0, 2, 3, 1, 0]);
    assert_eq!(result.confidence_per_fragment.len(), 5);
    assert!(result.confidence_per_fragment.iter().all(|c| *c > 0.9));
    assert_eq!(result.recovered_keys(), Some(vec![10, 12, 13, 11, 10]));
}

#[tokio::test]
async fn test_parallelism_does_not_change_output() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.mgr");
    write_source(&source, 70, 20.0).await;

    let config = Arc::new(EngineConfig::default());
    let embedder = Embedder::new(
        config.clone(),
        Arc::new(RawBackend::new()),
        Arc::new(SilentMuxer),
        Arc::new(LumaSpreadPrimitive::from_config(&config)),
    );

    let mut outputs = Vec::new();
    for (name, parallelism) in [("serial.mgr", 1), ("parallel.mgr", 8)] {
        let out = dir.path().join(name);
        let job = WatermarkJob::new(
            &source,
            &out,
            vec![1, 2, 3],
            KeySequence::from_indices([2, 0, 1]),
        )
        .with_parallelism(parallelism);
        assert!(embedder.embed(&job).await.success);
        outputs.push(std::fs::read(&out).unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
}
