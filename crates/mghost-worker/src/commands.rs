//! Job commands behind the CLI.
//!
//! Every job command takes its arguments as one JSON object, the shape
//! accepted by `embed-key` and `extract-key`:
//!
//! ```json
//! {"video_path": "in.mp4", "output_path": "out.mp4",
//!  "keys": [10, 11, 12, 13], "sequence": "0231",
//!  "frag_length": 1, "threads": 8, "strength": 1.0, "step": 5.0}
//! ```
//!
//! `sequence` may be a digit string, a comma separated index list or a JSON
//! array of selectors.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;

use mghost_media::{EngineConfig, Embedder, Extractor, MediaError, ProgressCallback};
use mghost_models::{
    EmbedResult, ExtractionJob, ExtractionResult, JobId, KeySequence, WatermarkJob,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::ledger::{derive_keys, EmbedRecord, KeyLedger, NewRecord};
use crate::logging::JobLogger;

/// Per-invocation overrides of the watermark transform.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct Tuning {
    #[serde(default)]
    pub strength: Option<f32>,
    #[serde(default)]
    pub step: Option<f32>,
}

impl Tuning {
    pub fn apply(self, mut engine: EngineConfig) -> EngineConfig {
        if let Some(strength) = self.strength {
            engine.strength = strength;
        }
        if let Some(step) = self.step {
            engine.step = step;
        }
        engine
    }
}

#[derive(Debug, Deserialize)]
struct UserEmbedArgs {
    video_path: PathBuf,
    output_path: PathBuf,
    user_email: String,
    user_name: String,
    #[serde(default, alias = "frag_length")]
    fragment_length_secs: Option<f64>,
    #[serde(default, alias = "threads")]
    parallelism: Option<usize>,
    #[serde(default)]
    codec: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdentifyArgs {
    video_path: PathBuf,
    #[serde(default, alias = "threads")]
    parallelism: Option<usize>,
}

/// Result of a ledger-backed embed.
#[derive(Debug, Clone, Serialize)]
pub struct UserEmbedOutcome {
    pub success: bool,
    pub unique_key: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub embed: EmbedResult,
}

/// Result of matching a video against the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyOutcome {
    pub success: bool,
    pub message: String,
    pub candidates_tried: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<EmbedRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionResult>,
    /// Whether the recovered order matches the recorded sequence
    pub sequence_matches: bool,
}

/// Runs jobs with a fixed worker configuration.
#[derive(Clone)]
pub struct Runner {
    config: WorkerConfig,
    progress: Option<ProgressCallback>,
}

impl Runner {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn embedder(&self, tuning: Tuning) -> Embedder {
        let embedder = Embedder::from_config(Arc::new(tuning.apply(self.config.engine.clone())));
        match &self.progress {
            Some(cb) => embedder.with_progress(cb.clone()),
            None => embedder,
        }
    }

    fn extractor(&self, tuning: Tuning) -> Extractor {
        let extractor =
            Extractor::from_config(Arc::new(tuning.apply(self.config.engine.clone())));
        match &self.progress {
            Some(cb) => extractor.with_progress(cb.clone()),
            None => extractor,
        }
    }

    /// Embed with caller-chosen keys and sequence.
    pub async fn embed_key(&self, raw: &str) -> WorkerResult<EmbedResult> {
        let value = parse_args(raw, self.config.engine.default_parallelism)?;
        let tuning: Tuning = from_args(value.clone())?;
        let job: WatermarkJob = from_args(value)?;

        let logger = JobLogger::new(&job.id, "embed_key");
        logger.log_start(format!(
            "{} -> {} ({} keys, sequence {})",
            job.video_path.display(),
            job.output_path.display(),
            job.keys.len(),
            job.sequence
        ));

        let result = self
            .embedder(tuning)
            .embed(&job)
            .instrument(logger.create_span())
            .await;
        log_embed(&logger, &result);
        Ok(result)
    }

    /// Recover the key order from a watermarked video.
    pub async fn extract_key(&self, raw: &str) -> WorkerResult<ExtractionResult> {
        let value = parse_args(raw, self.config.engine.default_parallelism)?;
        let tuning: Tuning = from_args(value.clone())?;
        let job: ExtractionJob = from_args(value)?;

        let logger = JobLogger::new(&job.id, "extract_key");
        logger.log_start(format!(
            "{} ({} candidate keys)",
            job.video_path.display(),
            job.keys.len()
        ));

        let result = self
            .extractor(tuning)
            .extract(&job)
            .instrument(logger.create_span())
            .await;
        log_extraction(&logger, &result);
        Ok(result)
    }

    /// Issue a fresh unique key to a user, embed its derived keys and
    /// record the issue in the ledger.
    pub async fn embed_for_user(&self, raw: &str) -> WorkerResult<UserEmbedOutcome> {
        let value = parse_args(raw, self.config.engine.default_parallelism)?;
        let tuning: Tuning = from_args(value.clone())?;
        let args: UserEmbedArgs = from_args(value)?;
        if args.user_email.trim().is_empty() || args.user_name.trim().is_empty() {
            return Err(WorkerError::invalid_arguments(
                "user_email and user_name are required",
            ));
        }

        let mut ledger = KeyLedger::open(&self.config.ledger_path).await?;
        let unique_key = ledger.generate_unique_key().await?;
        let (keys, sequence) = derive_keys(unique_key);

        let mut job = WatermarkJob::new(
            &args.video_path,
            &args.output_path,
            keys.clone(),
            sequence.clone(),
        )
        .with_fragment_length(
            args.fragment_length_secs
                .unwrap_or(self.config.user_fragment_secs),
        )
        .with_parallelism(
            args.parallelism
                .unwrap_or(self.config.engine.default_parallelism),
        );
        if let Some(codec) = args.codec {
            job = job.with_codec(codec);
        }

        let logger = JobLogger::new(&job.id, "embed_for_user");
        logger.log_start(format!(
            "key {} for {} <{}>",
            unique_key, args.user_name, args.user_email
        ));

        let embed = self
            .embedder(tuning)
            .embed(&job)
            .instrument(logger.create_span())
            .await;
        log_embed(&logger, &embed);
        if !embed.success {
            return Ok(UserEmbedOutcome {
                success: false,
                unique_key,
                record_id: None,
                embed,
            });
        }

        let record = ledger
            .save_record(NewRecord {
                key: unique_key,
                keys,
                sequence,
                fragment_length_secs: job.fragment_length_secs,
                video_path: job.video_path.clone(),
                output_path: embed.output_path.clone(),
                user_email: Some(args.user_email),
                user_name: Some(args.user_name),
                video_info: embed.video_info.clone(),
            })
            .await?;

        Ok(UserEmbedOutcome {
            success: true,
            unique_key,
            record_id: Some(record.id),
            embed,
        })
    }

    /// Try every ledger record, newest first, until one extracts cleanly.
    pub async fn identify(&self, raw: &str) -> WorkerResult<IdentifyOutcome> {
        let value = parse_args(raw, self.config.engine.default_parallelism)?;
        let tuning: Tuning = from_args(value.clone())?;
        let args: IdentifyArgs = from_args(value)?;
        if !args.video_path.exists() {
            return Err(MediaError::FileNotFound(args.video_path).into());
        }

        let ledger = KeyLedger::open(&self.config.ledger_path).await?;
        let candidates: Vec<&EmbedRecord> = ledger
            .all_records()
            .into_iter()
            .filter(|r| !r.keys.is_empty() && !r.sequence.is_empty())
            .collect();

        let logger = JobLogger::new(&JobId::new(), "identify");
        logger.log_start(format!(
            "{} against {} record(s)",
            args.video_path.display(),
            candidates.len()
        ));

        if candidates.is_empty() {
            logger.log_warning("Ledger has no usable records");
            return Ok(IdentifyOutcome {
                success: false,
                message: "The ledger has no records to match against".to_string(),
                candidates_tried: 0,
                record: None,
                extraction: None,
                sequence_matches: false,
            });
        }

        let extractor = self.extractor(tuning);
        let parallelism = args
            .parallelism
            .unwrap_or(self.config.engine.default_parallelism);

        for (tried, record) in candidates.iter().enumerate() {
            let job = ExtractionJob::new(&args.video_path, record.keys.clone())
                .with_fragment_length(record.fragment_length_secs)
                .with_parallelism(parallelism);
            let result = extractor
                .extract(&job)
                .instrument(logger.create_span())
                .await;

            if !result.success || result.placeholder {
                logger.log_progress(format!(
                    "record {} (key {}) did not match",
                    record.id, record.key
                ));
                continue;
            }

            let sequence_matches = matches_recorded_order(record, &result.sequence);
            if !sequence_matches {
                logger.log_warning(format!(
                    "key {} matched but the recovered order differs from the record",
                    record.key
                ));
            }
            logger.log_completion(format!("matched key {}", record.key));
            return Ok(IdentifyOutcome {
                success: true,
                message: format!(
                    "Video belongs to {}",
                    record.user_name.as_deref().unwrap_or("an unnamed user")
                ),
                candidates_tried: tried + 1,
                record: Some((*record).clone()),
                extraction: Some(result),
                sequence_matches,
            });
        }

        logger.log_completion("no record matched");
        Ok(IdentifyOutcome {
            success: false,
            message: "No ledger record matched this video".to_string(),
            candidates_tried: candidates.len(),
            record: None,
            extraction: None,
            sequence_matches: false,
        })
    }

    pub async fn records(&self) -> WorkerResult<Vec<EmbedRecord>> {
        let ledger = KeyLedger::open(&self.config.ledger_path).await?;
        Ok(ledger.all_records().into_iter().cloned().collect())
    }

    pub async fn lookup(&self, key: i64) -> WorkerResult<EmbedRecord> {
        let ledger = KeyLedger::open(&self.config.ledger_path).await?;
        ledger
            .find_by_key(key)
            .cloned()
            .ok_or_else(|| WorkerError::RecordNotFound(format!("key {}", key)))
    }

    pub async fn delete_record(&self, id: &str) -> WorkerResult<EmbedRecord> {
        let mut ledger = KeyLedger::open(&self.config.ledger_path).await?;
        ledger.delete_record(id).await
    }

    pub async fn next_key(&self) -> WorkerResult<i64> {
        let ledger = KeyLedger::open(&self.config.ledger_path).await?;
        Ok(ledger.next_key())
    }
}

/// Parse a JSON argument object, normalising `sequence` strings and
/// filling in the configured parallelism.
pub fn parse_args(raw: &str, default_parallelism: usize) -> WorkerResult<Value> {
    let mut value: Value = serde_json::from_str(raw)
        .map_err(|e| WorkerError::invalid_arguments(format!("Invalid JSON arguments: {}", e)))?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| WorkerError::invalid_arguments("arguments must be a JSON object"))?;

    let sequence = object
        .get("sequence")
        .and_then(Value::as_str)
        .map(str::to_owned);
    if let Some(sequence) = sequence {
        let parsed: KeySequence = sequence.parse()?;
        object.insert("sequence".to_string(), serde_json::to_value(parsed)?);
    }

    if !object.contains_key("threads") && !object.contains_key("parallelism") {
        object.insert("parallelism".to_string(), Value::from(default_parallelism));
    }
    Ok(value)
}

fn from_args<T: DeserializeOwned>(value: Value) -> WorkerResult<T> {
    serde_json::from_value(value).map_err(|e| WorkerError::invalid_arguments(e.to_string()))
}

/// Whether `recovered` is the cyclic expansion of the record's sequence.
fn matches_recorded_order(record: &EmbedRecord, recovered: &[usize]) -> bool {
    let Ok(resolved) = record.sequence.resolve(&record.keys) else {
        return false;
    };
    recovered
        .iter()
        .enumerate()
        .all(|(i, index)| resolved[i % resolved.len()].0 == *index)
}

fn log_embed(logger: &JobLogger, result: &EmbedResult) {
    logger.log_job_warnings(&result.warnings);
    match &result.error {
        None => logger.log_completion(format!(
            "{} fragments written to {}",
            result.fragment_count,
            result.output_path.display()
        )),
        Some(error) => logger.log_error(error),
    }
}

fn log_extraction(logger: &JobLogger, result: &ExtractionResult) {
    match &result.error {
        None if result.placeholder => logger.log_job_warnings(&result.warnings),
        None => logger.log_completion(format!("sequence {:?}", result.sequence)),
        Some(error) => logger.log_error(error),
    }
}
