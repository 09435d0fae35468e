//! Extraction orchestrator.
//!
//! Splits the target video into fragments of the same length used at
//! embedding time, decodes every frame, and picks for each fragment the
//! candidate key whose reference pattern correlates best with the averaged
//! decode. When any fragment is unreadable or below the confidence
//! threshold, a placeholder sequence is returned instead of a guess.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use mghost_models::{
    ExtractionJob, ExtractionResult, VideoFragment, WarningKind, PLACEHOLDER_MESSAGE,
};

use crate::config::EngineConfig;
use crate::embed::read_fragment;
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::pool::OrderedPool;
use crate::primitive::{LumaSpreadPrimitive, Pattern, WatermarkPrimitive};
use crate::progress::{percent, JobDiagnostics, JobStage, ProgressCallback};
use crate::scheduler::plan_extraction;
use crate::video::{AutoBackend, VideoBackend, VideoSource};

/// Decode verdict for one fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentScore {
    pub index: usize,
    /// Index into the job's key list with the highest correlation
    pub key_index: usize,
    /// Winning correlation; 0 for invalid fragments
    pub confidence: f64,
    /// False when the fragment had no frames, a decode error, or a
    /// degenerate pattern
    pub valid: bool,
    pub frames_decoded: usize,
}

impl FragmentScore {
    fn invalid(index: usize, frames_decoded: usize) -> Self {
        Self {
            index,
            key_index: 0,
            confidence: 0.0,
            valid: false,
            frames_decoded,
        }
    }
}

/// Runs extraction jobs against a video backend and primitive.
#[derive(Clone)]
pub struct Extractor {
    config: Arc<EngineConfig>,
    backend: Arc<dyn VideoBackend>,
    primitive: Arc<dyn WatermarkPrimitive>,
    progress: Option<ProgressCallback>,
}

impl Extractor {
    pub fn new(
        config: Arc<EngineConfig>,
        backend: Arc<dyn VideoBackend>,
        primitive: Arc<dyn WatermarkPrimitive>,
    ) -> Self {
        Self {
            config,
            backend,
            primitive,
            progress: None,
        }
    }

    pub fn from_config(config: Arc<EngineConfig>) -> Self {
        let backend = AutoBackend::shared(&config);
        let primitive = Arc::new(LumaSpreadPrimitive::from_config(&config));
        Self::new(config, backend, primitive)
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Run a job. Never fails: errors are reported in the result.
    pub async fn extract(&self, job: &ExtractionJob) -> ExtractionResult {
        match self.try_extract(job).await {
            Ok(result) => result,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Extraction failed");
                ExtractionResult::failure(job.keys.clone(), job.fragment_length_secs, e.to_string())
            }
        }
    }

    /// Run a job, returning fatal errors. Low confidence is not an error.
    #[instrument(skip_all, fields(job_id = %job.id, video = %job.video_path.display()))]
    pub async fn try_extract(&self, job: &ExtractionJob) -> MediaResult<ExtractionResult> {
        let diagnostics = JobDiagnostics::new(self.progress.clone());

        diagnostics.progress(JobStage::Validate, Some(0), "Validating job");
        job.validate()?;
        if !job.video_path.exists() {
            return Err(MediaError::FileNotFound(job.video_path.clone()));
        }

        let mut reader = tokio::time::timeout(
            self.config.open_timeout,
            self.backend.open_reader(&job.video_path),
        )
        .await
        .map_err(|_| MediaError::Timeout(self.config.open_timeout.as_secs()))??;
        let metadata = *reader.metadata();

        let fragments = plan_extraction(
            metadata.frame_count,
            metadata.fps,
            job.fragment_length_secs,
            &job.keys,
        )?;
        diagnostics.progress(
            JobStage::Plan,
            Some(5),
            format!(
                "{} frames at {:.3} fps in {} fragments",
                metadata.frame_count,
                metadata.fps,
                fragments.len()
            ),
        );

        let references: Arc<Vec<Pattern>> = Arc::new(
            job.keys
                .iter()
                .map(|k| self.primitive.key_pattern(*k))
                .collect(),
        );

        let scores = self
            .score_fragments(
                &mut *reader,
                &fragments,
                references,
                job.parallelism,
                &diagnostics,
            )
            .await?;
        drop(reader);

        diagnostics.progress(JobStage::Assemble, Some(95), "Assembling sequence");
        let result = assemble(job, &scores, self.config.min_confidence, &diagnostics);

        info!(
            fragments = scores.len(),
            placeholder = result.placeholder,
            sequence = ?result.sequence,
            "Extraction complete"
        );
        diagnostics.progress(JobStage::Done, Some(100), "Extraction complete");
        Ok(result)
    }

    async fn score_fragments(
        &self,
        reader: &mut dyn VideoSource,
        fragments: &[VideoFragment],
        references: Arc<Vec<Pattern>>,
        parallelism: usize,
        diagnostics: &JobDiagnostics,
    ) -> MediaResult<Vec<FragmentScore>> {
        let mut pool = OrderedPool::new(parallelism);
        let mut scores = Vec::with_capacity(fragments.len());

        for fragment in fragments {
            let frames = read_fragment(reader, fragment).await?;
            if (frames.len() as u64) < fragment.frame_count() {
                debug!(
                    fragment = fragment.index,
                    expected = fragment.frame_count(),
                    got = frames.len(),
                    "Short fragment"
                );
            }

            let primitive = self.primitive.clone();
            let references = references.clone();
            let index = fragment.index;
            scores.extend(
                pool.submit(move || {
                    Ok(score_fragment(
                        primitive.as_ref(),
                        index,
                        &frames,
                        &references,
                    ))
                })
                .await?,
            );
            diagnostics.progress(
                JobStage::Decode,
                Some(5 + (percent(scores.len(), fragments.len()) as u32 * 9 / 10) as u8),
                format!("{}/{} fragments decoded", scores.len(), fragments.len()),
            );
        }

        scores.extend(pool.finish().await?);
        Ok(scores)
    }
}

/// Decode a fragment's frames and correlate the averaged pattern against
/// every reference. Decode errors make the fragment invalid, not the job.
pub fn score_fragment(
    primitive: &dyn WatermarkPrimitive,
    index: usize,
    frames: &[Frame],
    references: &[Pattern],
) -> FragmentScore {
    let mut decoded = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        match primitive.decode(frame) {
            Ok(pattern) => decoded.push(pattern),
            Err(e) => {
                debug!(fragment = index, frame = i, error = %e, "Frame decode failed");
                return FragmentScore::invalid(index, decoded.len());
            }
        }
    }

    let Some(average) = Pattern::average(&decoded).filter(Pattern::is_valid) else {
        return FragmentScore::invalid(index, decoded.len());
    };

    let best = references
        .iter()
        .enumerate()
        .map(|(i, reference)| (i, average.correlation(reference)))
        .max_by(|a, b| a.1.total_cmp(&b.1));

    match best {
        Some((key_index, confidence)) => FragmentScore {
            index,
            key_index,
            confidence,
            valid: true,
            frames_decoded: decoded.len(),
        },
        None => FragmentScore::invalid(index, decoded.len()),
    }
}

/// Turn ordered fragment scores into the job result.
pub fn assemble(
    job: &ExtractionJob,
    scores: &[FragmentScore],
    min_confidence: f64,
    diagnostics: &JobDiagnostics,
) -> ExtractionResult {
    let confidence_per_fragment: Vec<f64> = scores.iter().map(|s| s.confidence).collect();

    let trusted = !scores.is_empty()
        && scores
            .iter()
            .all(|s| s.valid && s.confidence > min_confidence);

    if trusted {
        return ExtractionResult {
            success: true,
            sequence: scores.iter().map(|s| s.key_index).collect(),
            confidence_per_fragment,
            placeholder: false,
            message: format!("Recovered {} fragment keys", scores.len()),
            warnings: diagnostics.warnings(),
            error: None,
            keys: job.keys.clone(),
            fragment_length_secs: job.fragment_length_secs,
        };
    }

    let reason = if scores.is_empty() {
        "video has no frames".to_string()
    } else {
        let invalid = scores.iter().filter(|s| !s.valid).count();
        let weak = scores
            .iter()
            .filter(|s| s.valid && s.confidence < min_confidence)
            .count();
        format!(
            "{} invalid and {} low-confidence fragment(s) out of {} (threshold {:.2})",
            invalid,
            weak,
            scores.len(),
            min_confidence
        )
    };
    diagnostics.warn(
        JobStage::Assemble,
        WarningKind::PlaceholderSequence,
        format!("Placeholder sequence returned: {}", reason),
    );

    ExtractionResult {
        success: true,
        sequence: vec![0; job.keys.len()],
        confidence_per_fragment,
        placeholder: true,
        message: PLACEHOLDER_MESSAGE.to_string(),
        warnings: diagnostics.warnings(),
        error: None,
        keys: job.keys.clone(),
        fragment_length_secs: job.fragment_length_secs,
    }
}
