//! Content hash resolution.
//!
//! Hashing reads the whole file, so concurrent computations are bounded by
//! a semaphore and each one runs under a deadline.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use memalerts_media::{is_content_hash, MediaToolkit};
use memalerts_models::Submission;
use memalerts_storage::hash_from_storage_path;

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Where a content hash came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashSource {
    /// Already stored on the submission
    Stored,
    /// Recovered from a content-addressed storage path
    Locator,
    /// Computed from the bytes
    Computed,
}

impl HashSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashSource::Stored => "stored",
            HashSource::Locator => "locator",
            HashSource::Computed => "computed",
        }
    }
}

/// Bounded content hasher.
#[derive(Clone)]
pub struct ContentHasher {
    media: Arc<dyn MediaToolkit>,
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    timeout: Duration,
}

impl ContentHasher {
    pub fn new(media: Arc<dyn MediaToolkit>, concurrency: usize, timeout: Duration) -> Self {
        Self {
            media,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            in_flight: Arc::new(AtomicUsize::new(0)),
            timeout,
        }
    }

    /// Hash known without reading the bytes: the stored value, then one
    /// recovered from the file or source locator.
    pub fn known_hash(submission: &Submission) -> Option<(String, HashSource)> {
        let stored = submission
            .file_hash
            .as_deref()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| is_content_hash(h));
        if let Some(hash) = stored {
            return Some((hash, HashSource::Stored));
        }

        [submission.file_url.as_deref(), submission.source_url.as_deref()]
            .into_iter()
            .flatten()
            .find_map(hash_from_storage_path)
            .map(|hash| (hash, HashSource::Locator))
    }

    /// Compute the hash of a local file.
    pub async fn compute(&self, path: &Path) -> WorkerResult<String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| WorkerError::hash_failed("hasher closed"))?;

        let started = Instant::now();
        metrics::set_hash_in_flight(self.in_flight.fetch_add(1, Ordering::SeqCst) + 1);
        let result = tokio::time::timeout(self.timeout, self.media.hash_file(path)).await;
        metrics::set_hash_in_flight(self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1);
        metrics::record_hash_duration(started.elapsed().as_secs_f64());

        match result {
            Ok(hash) => Ok(hash?),
            Err(_) => Err(WorkerError::hash_failed(format!(
                "hashing {} timed out after {}s",
                path.display(),
                self.timeout.as_secs()
            ))),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
