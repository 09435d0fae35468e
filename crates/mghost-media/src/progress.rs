//! Job progress events and diagnostics.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use mghost_models::{JobWarning, WarningKind};

/// Stage of a job an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Validate,
    ProbeAudio,
    Plan,
    OpenWriter,
    Fragments,
    Verify,
    Remux,
    Metadata,
    Decode,
    Assemble,
    Done,
}

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
}

/// A progress or diagnostic event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub stage: JobStage,
    pub message: String,
    /// Percentage complete, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    pub level: EventLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<WarningKind>,
}

/// Callback type for job events.
pub type ProgressCallback = Arc<dyn Fn(&JobEvent) + Send + Sync>;

/// Collects warnings for a single job and forwards events to an optional
/// callback. Every warning is also logged.
#[derive(Clone, Default)]
pub struct JobDiagnostics {
    callback: Option<ProgressCallback>,
    warnings: Arc<Mutex<Vec<JobWarning>>>,
}

impl JobDiagnostics {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            warnings: Arc::default(),
        }
    }

    fn emit(&self, event: JobEvent) {
        if let Some(cb) = &self.callback {
            cb(&event);
        }
    }

    /// Report progress through a stage.
    pub fn progress(&self, stage: JobStage, progress: Option<u8>, message: impl Into<String>) {
        let message = message.into();
        info!(stage = ?stage, progress = ?progress, "{}", message);
        self.emit(JobEvent {
            stage,
            message,
            progress,
            level: EventLevel::Info,
            warning: None,
        });
    }

    /// Record a non-fatal degradation.
    pub fn warn(&self, stage: JobStage, kind: WarningKind, message: impl Into<String>) {
        let message = message.into();
        warn!(stage = ?stage, kind = ?kind, "{}", message);
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(JobWarning::new(kind, message.clone()));
        }
        self.emit(JobEvent {
            stage,
            message,
            progress: None,
            level: EventLevel::Warning,
            warning: Some(kind),
        });
    }

    /// Warnings recorded so far.
    pub fn warnings(&self) -> Vec<JobWarning> {
        self.warnings
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}

/// Percentage of `done` out of `total`, clamped to 0..=100.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}
