//! Structured submission logging utilities.
//!
//! Provides consistent, structured logging for submission processing with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};

use memalerts_models::SubmissionId;

/// Submission logger for structured logging with consistent formatting.
///
/// Every line carries the submission id and the worker instance, so all
/// records of one attempt can be correlated across instances.
#[derive(Debug, Clone)]
pub struct SubmissionLogger {
    submission_id: String,
    instance_id: String,
}

impl SubmissionLogger {
    pub fn new(submission_id: &SubmissionId, instance_id: &str) -> Self {
        Self {
            submission_id: submission_id.to_string(),
            instance_id: instance_id.to_string(),
        }
    }

    /// Log the start of an attempt.
    pub fn log_start(&self, retry_count: i32) {
        info!(
            submission_id = %self.submission_id,
            instance = %self.instance_id,
            retry_count,
            "Submission claimed"
        );
    }

    /// Log a pipeline stage.
    pub fn log_stage(&self, stage: &str, message: &str) {
        info!(
            submission_id = %self.submission_id,
            instance = %self.instance_id,
            stage,
            "{}", message
        );
    }

    pub fn log_warning(&self, stage: &str, message: &str) {
        warn!(
            submission_id = %self.submission_id,
            instance = %self.instance_id,
            stage,
            "{}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            submission_id = %self.submission_id,
            instance = %self.instance_id,
            "Submission error: {}", message
        );
    }

    /// Log a finished attempt.
    pub fn log_completion(&self, outcome: &str, elapsed_ms: u128) {
        info!(
            submission_id = %self.submission_id,
            instance = %self.instance_id,
            outcome,
            elapsed_ms = elapsed_ms as u64,
            "Submission finished"
        );
    }

    pub fn submission_id(&self) -> &str {
        &self.submission_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Create a tracing span for this submission.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "submission",
            submission_id = %self.submission_id,
            instance = %self.instance_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_logger_creation() {
        let id = SubmissionId::new();
        let logger = SubmissionLogger::new(&id, "worker-a");

        assert_eq!(logger.submission_id(), id.to_string());
        assert_eq!(logger.instance_id(), "worker-a");
    }
}
