//! Embedding orchestrator.
//!
//! Drives one [`WatermarkJob`] end to end:
//!
//! 1. validate the job and probe the source for audio,
//! 2. plan fragments and open a writer through codec negotiation,
//! 3. watermark fragments on the worker pool, writing them in order to an
//!    audio-less intermediate next to the output,
//! 4. verify the intermediate, then remux the source audio back in (or fall
//!    back to the silent video),
//! 5. probe the final file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use mghost_models::{
    AudioStreamInfo, CodecEvent, CodecEventKind, EmbedResult, JobWarning, VideoFragment,
    VideoInfo, WarningKind, WatermarkJob,
};

use crate::codec::{negotiate, open_negotiated, NegotiatedWriter};
use crate::config::EngineConfig;
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::fs_utils::{check_output_paths, intermediate_path, move_file, remove_if_exists};
use crate::mux::{FfmpegMuxer, MediaMuxer};
use crate::pool::OrderedPool;
use crate::primitive::{LumaSpreadPrimitive, WatermarkPrimitive};
use crate::progress::{percent, JobDiagnostics, JobStage, ProgressCallback};
use crate::scheduler::plan_fragments;
use crate::verify::{discard_corrupt, ensure_modified, probe_metadata, verify_output};
use crate::video::{AutoBackend, VideoBackend, VideoSink, VideoSource, WriterTarget};

/// Successful embedding, before it is folded into an [`EmbedResult`].
#[derive(Debug, Clone)]
pub struct EmbedOutcome {
    pub output_path: PathBuf,
    pub video_info: VideoInfo,
    /// Codec the output was written with
    pub codec: String,
    pub codec_trace: Vec<CodecEvent>,
    pub fragment_count: usize,
    pub audio_preserved: bool,
    pub warnings: Vec<JobWarning>,
}

/// Runs embedding jobs against a video backend, muxer and primitive.
#[derive(Clone)]
pub struct Embedder {
    config: Arc<EngineConfig>,
    backend: Arc<dyn VideoBackend>,
    muxer: Arc<dyn MediaMuxer>,
    primitive: Arc<dyn WatermarkPrimitive>,
    progress: Option<ProgressCallback>,
}

impl Embedder {
    pub fn new(
        config: Arc<EngineConfig>,
        backend: Arc<dyn VideoBackend>,
        muxer: Arc<dyn MediaMuxer>,
        primitive: Arc<dyn WatermarkPrimitive>,
    ) -> Self {
        Self {
            config,
            backend,
            muxer,
            primitive,
            progress: None,
        }
    }

    /// Production wiring: FFmpeg-backed video access and muxing with the
    /// luma spread primitive.
    pub fn from_config(config: Arc<EngineConfig>) -> Self {
        let backend = AutoBackend::shared(&config);
        let muxer = Arc::new(FfmpegMuxer::new(&config));
        let primitive = Arc::new(LumaSpreadPrimitive::from_config(&config));
        Self::new(config, backend, muxer, primitive)
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Run a job. Never fails: errors are reported in the result.
    pub async fn embed(&self, job: &WatermarkJob) -> EmbedResult {
        let diagnostics = JobDiagnostics::new(self.progress.clone());
        let mut trace = Vec::new();

        match self.run(job, &diagnostics, &mut trace).await {
            Ok(outcome) => EmbedResult {
                success: true,
                output_path: outcome.output_path,
                video_info: Some(outcome.video_info),
                error: None,
                warnings: outcome.warnings,
                codec_trace: outcome.codec_trace,
                keys: job.keys.clone(),
                sequence: job.sequence.clone(),
                fragment_length_secs: job.fragment_length_secs,
                fragment_count: outcome.fragment_count,
                audio_preserved: outcome.audio_preserved,
            },
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Embedding failed");
                let mut result = EmbedResult::failure(
                    job.output_path.clone(),
                    job.keys.clone(),
                    job.sequence.clone(),
                    job.fragment_length_secs,
                    e.to_string(),
                );
                result.warnings = diagnostics.warnings();
                result.codec_trace = trace;
                result
            }
        }
    }

    /// Run a job, returning the first fatal error.
    pub async fn try_embed(&self, job: &WatermarkJob) -> MediaResult<EmbedOutcome> {
        let diagnostics = JobDiagnostics::new(self.progress.clone());
        self.run(job, &diagnostics, &mut Vec::new()).await
    }

    #[instrument(skip_all, fields(job_id = %job.id, video = %job.video_path.display()))]
    async fn run(
        &self,
        job: &WatermarkJob,
        diagnostics: &JobDiagnostics,
        trace: &mut Vec<CodecEvent>,
    ) -> MediaResult<EmbedOutcome> {
        diagnostics.progress(JobStage::Validate, Some(0), "Validating job");
        job.validate()?;
        if !job.video_path.exists() {
            return Err(MediaError::FileNotFound(job.video_path.clone()));
        }
        check_output_paths(&job.video_path, &job.output_path)?;

        let audio = self.probe_audio(&job.video_path, diagnostics).await;

        let mut reader = tokio::time::timeout(
            self.config.open_timeout,
            self.backend.open_reader(&job.video_path),
        )
        .await
        .map_err(|_| MediaError::Timeout(self.config.open_timeout.as_secs()))??;
        let metadata = *reader.metadata();

        let plan = plan_fragments(
            metadata.frame_count,
            metadata.fps,
            job.fragment_length_secs,
            &job.keys,
            &job.sequence,
            job.sequence_policy,
        )?;
        for warning in &plan.warnings {
            diagnostics.warn(JobStage::Plan, warning.kind, warning.message.clone());
        }
        diagnostics.progress(
            JobStage::Plan,
            Some(5),
            format!(
                "{} frames at {:.3} fps in {} fragments of {} frames",
                metadata.frame_count,
                metadata.fps,
                plan.len(),
                plan.span
            ),
        );

        if let Some(parent) = job.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let intermediate = intermediate_path(&job.output_path);
        remove_if_exists(&intermediate).await?;

        let codec_plan = negotiate(
            job.requested_codec(),
            self.config.platform,
            &self.config.codec_policy,
        );
        let NegotiatedWriter {
            mut sink,
            codec,
            trace: codec_trace,
        } = match open_negotiated(
            self.backend.as_ref(),
            &intermediate,
            &WriterTarget::from(&metadata),
            codec_plan,
        )
        .await
        {
            Ok(writer) => writer,
            Err(e) => {
                discard_corrupt(&intermediate).await;
                return Err(e);
            }
        };
        *trace = codec_trace.clone();
        self.report_codec(&codec_trace, &codec, diagnostics);

        let written = self
            .write_fragments(
                &mut *reader,
                &mut *sink,
                &plan.fragments,
                job.parallelism,
                diagnostics,
            )
            .await;
        let closed = sink.close().await;
        drop(reader);

        if let Err(e) = written.and(closed) {
            discard_corrupt(&intermediate).await;
            return Err(e);
        }

        diagnostics.progress(JobStage::Verify, Some(90), "Verifying output");
        if let Err(e) = self.verify(&job.video_path, &intermediate).await {
            discard_corrupt(&intermediate).await;
            return Err(e);
        }

        let audio_preserved = self
            .finalize_output(
                &job.video_path,
                &intermediate,
                &job.output_path,
                audio.as_ref(),
                diagnostics,
            )
            .await?;

        diagnostics.progress(JobStage::Metadata, Some(95), "Reading output metadata");
        let video_info = probe_metadata(
            self.backend.as_ref(),
            &job.output_path,
            &self.config.metadata_retry(),
        )
        .await;

        info!(
            output = %job.output_path.display(),
            fragments = plan.len(),
            codec = %codec,
            audio_preserved,
            "Embedding complete"
        );
        diagnostics.progress(JobStage::Done, Some(100), "Embedding complete");

        Ok(EmbedOutcome {
            output_path: job.output_path.clone(),
            video_info,
            codec,
            codec_trace,
            fragment_count: plan.len(),
            audio_preserved,
            warnings: diagnostics.warnings(),
        })
    }

    async fn probe_audio(
        &self,
        video: &Path,
        diagnostics: &JobDiagnostics,
    ) -> Option<AudioStreamInfo> {
        match self.muxer.probe_audio(video).await {
            Ok(audio) => {
                diagnostics.progress(
                    JobStage::ProbeAudio,
                    Some(2),
                    match &audio {
                        Some(a) => format!(
                            "Audio stream: {}",
                            a.codec.as_deref().unwrap_or("unknown codec")
                        ),
                        None => "No audio stream".to_string(),
                    },
                );
                audio
            }
            Err(e) => {
                diagnostics.warn(
                    JobStage::ProbeAudio,
                    WarningKind::AudioProbeFailed,
                    format!("Audio probe failed, treating source as silent: {}", e),
                );
                None
            }
        }
    }

    fn report_codec(&self, trace: &[CodecEvent], codec: &str, diagnostics: &JobDiagnostics) {
        for event in trace {
            match event.kind {
                CodecEventKind::Substituted => diagnostics.warn(
                    JobStage::OpenWriter,
                    WarningKind::CodecSubstituted,
                    format!(
                        "Codec substituted with {}: {}",
                        event.codec,
                        event.detail.as_deref().unwrap_or("")
                    ),
                ),
                CodecEventKind::Failed => diagnostics.warn(
                    JobStage::OpenWriter,
                    WarningKind::CodecFallback,
                    format!(
                        "Codec {} failed to open: {}",
                        event.codec,
                        event.detail.as_deref().unwrap_or("")
                    ),
                ),
                CodecEventKind::Attempted | CodecEventKind::Opened => {}
            }
        }
        diagnostics.progress(
            JobStage::OpenWriter,
            Some(8),
            format!("Writer opened with codec {}", codec),
        );
    }

    /// Read each fragment, watermark it on the pool and write the results in
    /// fragment order.
    async fn write_fragments(
        &self,
        reader: &mut dyn VideoSource,
        sink: &mut dyn VideoSink,
        fragments: &[VideoFragment],
        parallelism: usize,
        diagnostics: &JobDiagnostics,
    ) -> MediaResult<()> {
        let mut pool = OrderedPool::new(parallelism);
        let total = fragments.len();
        let mut written = 0usize;

        for fragment in fragments {
            let frames = read_fragment(reader, fragment).await?;
            if frames.is_empty() {
                warn!(
                    fragment = fragment.index,
                    "Source ended before the declared frame count"
                );
                break;
            }

            let primitive = self.primitive.clone();
            let (index, key) = (fragment.index, fragment.assigned_key);
            let ready = pool
                .submit(move || embed_fragment(primitive.as_ref(), index, key, &frames))
                .await?;
            written += write_ready(sink, ready).await?;
            self.report_fragments(written, total, diagnostics);
        }

        written += write_ready(sink, pool.finish().await?).await?;
        self.report_fragments(written, total, diagnostics);
        Ok(())
    }

    fn report_fragments(&self, written: usize, total: usize, diagnostics: &JobDiagnostics) {
        if total == 0 {
            return;
        }
        let progress = 10 + (percent(written, total) as u32 * 80 / 100) as u8;
        diagnostics.progress(
            JobStage::Fragments,
            Some(progress),
            format!("{}/{} fragments written", written, total),
        );
    }

    async fn verify(&self, source: &Path, intermediate: &Path) -> MediaResult<()> {
        verify_output(intermediate, self.config.min_output_bytes).await?;
        ensure_modified(source, intermediate).await
    }

    /// Put the verified intermediate in place, merging audio when the source
    /// has some. Returns whether audio made it into the output.
    async fn finalize_output(
        &self,
        source: &Path,
        intermediate: &Path,
        output: &Path,
        audio: Option<&AudioStreamInfo>,
        diagnostics: &JobDiagnostics,
    ) -> MediaResult<bool> {
        if audio.is_none() {
            move_file(intermediate, output).await?;
            return Ok(false);
        }

        diagnostics.progress(JobStage::Remux, Some(92), "Merging source audio");
        let merged = match self.muxer.remux(intermediate, source, output).await {
            Ok(()) => verify_output(output, self.config.min_output_bytes)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        match merged {
            Ok(()) => {
                remove_if_exists(intermediate).await?;
                Ok(true)
            }
            Err(e) => {
                diagnostics.warn(
                    JobStage::Remux,
                    WarningKind::AudioMergeFallback,
                    format!("Audio merge failed, output has no audio: {}", e),
                );
                remove_if_exists(output).await?;
                move_file(intermediate, output).await?;
                Ok(false)
            }
        }
    }
}

/// Read up to `fragment.frame_count()` frames. Fewer are returned at early EOF.
pub(crate) async fn read_fragment(
    reader: &mut dyn VideoSource,
    fragment: &VideoFragment,
) -> MediaResult<Vec<Frame>> {
    let mut frames = Vec::with_capacity(fragment.frame_count() as usize);
    for _ in 0..fragment.frame_count() {
        match reader.read_frame().await? {
            Some(frame) => frames.push(frame),
            None => break,
        }
    }
    Ok(frames)
}

fn embed_fragment(
    primitive: &dyn WatermarkPrimitive,
    index: usize,
    key: i64,
    frames: &[Frame],
) -> MediaResult<Vec<Frame>> {
    frames
        .iter()
        .map(|frame| {
            primitive
                .embed(frame, key)
                .map_err(|e| MediaError::EmbedFailed {
                    fragment: index,
                    message: e.to_string(),
                })
        })
        .collect()
}

async fn write_ready(sink: &mut dyn VideoSink, ready: Vec<Vec<Frame>>) -> MediaResult<usize> {
    let count = ready.len();
    for frames in ready {
        for frame in &frames {
            sink.write_frame(frame).await?;
        }
    }
    Ok(count)
}
