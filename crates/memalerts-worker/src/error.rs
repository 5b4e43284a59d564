//! Worker error types.

use thiserror::Error;

use memalerts_db::DbError;
use memalerts_media::MediaError;
use memalerts_ml_client::MlError;
use memalerts_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Maximum length of the error text stored on a submission.
const STORED_ERROR_MAX_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    #[error("Hashing failed: {0}")]
    HashFailed(String),

    #[error("Processing timed out after {0} seconds")]
    Timeout(u64),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Analysis backend error: {0}")]
    Ml(#[from] MlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a failed attempt is treated by the retry bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network, timeouts, 5xx; backoff and retry
    Transient,
    /// Backend refuses service; handled by the heuristic fallback
    PolicyBlocked,
    /// Retrying the same input will not help; still counted against the
    /// retry budget so the row ends up `failed_final`
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::PolicyBlocked => "policy_blocked",
            ErrorClass::Fatal => "fatal",
        }
    }
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn media_unavailable(msg: impl Into<String>) -> Self {
        Self::MediaUnavailable(msg.into())
    }

    pub fn hash_failed(msg: impl Into<String>) -> Self {
        Self::HashFailed(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    /// Classify the error for retry bookkeeping.
    pub fn class(&self) -> ErrorClass {
        match self {
            WorkerError::Ml(e) if e.is_policy_block() => ErrorClass::PolicyBlocked,
            WorkerError::Ml(MlError::InvalidResponse(_)) => ErrorClass::Fatal,
            WorkerError::Ml(_) => ErrorClass::Transient,
            WorkerError::Storage(e) if e.is_permanent() => ErrorClass::Fatal,
            WorkerError::Storage(StorageError::NotFound(_)) => ErrorClass::Fatal,
            WorkerError::Storage(_) => ErrorClass::Transient,
            WorkerError::Db(e) if e.is_retryable() => ErrorClass::Transient,
            WorkerError::Db(_) => ErrorClass::Fatal,
            WorkerError::Media(MediaError::Timeout(_)) => ErrorClass::Transient,
            WorkerError::Media(MediaError::Io(_)) => ErrorClass::Transient,
            WorkerError::Media(_) => ErrorClass::Fatal,
            WorkerError::Timeout(_) | WorkerError::HashFailed(_) | WorkerError::Io(_) => {
                ErrorClass::Transient
            }
            WorkerError::MediaUnavailable(_)
            | WorkerError::ConfigError(_)
            | WorkerError::ProcessingFailed(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Error text persisted on the submission.
    pub fn stored_message(&self) -> String {
        let text = format!("{}: {}", self.class().as_str(), self);
        memalerts_models::text::truncate_chars(&text, STORED_ERROR_MAX_CHARS)
    }
}
