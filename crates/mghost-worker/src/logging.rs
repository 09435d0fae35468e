//! Structured job logging.
//!
//! Every line carries the job ID and the command that produced it, so a
//! single `job_id` filter shows one job's whole lifecycle.

use std::fmt::Display;
use tracing::{error, info, warn, Span};

use mghost_models::{JobId, JobWarning};

/// Logs job lifecycle events with the job ID and command attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    command: &'static str,
}

impl JobLogger {
    pub fn new(job_id: &JobId, command: &'static str) -> Self {
        Self {
            job_id: job_id.to_string(),
            command,
        }
    }

    pub fn log_start(&self, message: impl Display) {
        info!(job_id = %self.job_id, command = self.command, "Job started: {}", message);
    }

    pub fn log_progress(&self, message: impl Display) {
        info!(job_id = %self.job_id, command = self.command, "{}", message);
    }

    pub fn log_warning(&self, message: impl Display) {
        warn!(job_id = %self.job_id, command = self.command, "{}", message);
    }

    /// Log each degradation reported in a job result.
    pub fn log_job_warnings(&self, warnings: &[JobWarning]) {
        for warning in warnings {
            warn!(
                job_id = %self.job_id,
                command = self.command,
                kind = ?warning.kind,
                "{}", warning.message
            );
        }
    }

    pub fn log_error(&self, message: impl Display) {
        error!(job_id = %self.job_id, command = self.command, "Job failed: {}", message);
    }

    pub fn log_completion(&self, message: impl Display) {
        info!(job_id = %self.job_id, command = self.command, "Job completed: {}", message);
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn command(&self) -> &'static str {
        self.command
    }

    /// Span for instrumenting the engine call, so engine logs inherit the
    /// job ID.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, command = self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mghost_models::WarningKind;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::from_string("job-7");
        let logger = JobLogger::new(&job_id, "embed_key");
        assert_eq!(logger.job_id(), "job-7");
        assert_eq!(logger.command(), "embed_key");
    }

    #[test]
    fn test_logging_without_subscriber_is_harmless() {
        let logger = JobLogger::new(&JobId::new(), "identify");
        let _guard = logger.create_span().entered();
        logger.log_start("start");
        logger.log_job_warnings(&[JobWarning::new(
            WarningKind::AudioMergeFallback,
            "audio dropped",
        )]);
        logger.log_completion(format_args!("{} fragments", 3));
    }
}
