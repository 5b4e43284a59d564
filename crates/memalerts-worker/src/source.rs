//! Locating the media bytes of a submission on this host.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use memalerts_models::Submission;
use memalerts_storage::ContentStore;

use crate::error::{WorkerError, WorkerResult};

/// Resolves a local copy of a submission's media, downloading if needed.
#[derive(Clone)]
pub struct MediaResolver {
    store: Arc<dyn ContentStore>,
    max_download_bytes: u64,
}

impl MediaResolver {
    pub fn new(store: Arc<dyn ContentStore>, max_download_bytes: u64) -> Self {
        Self {
            store,
            max_download_bytes,
        }
    }

    /// Local path of the media.
    ///
    /// Tries the locator on local disk, then the file stored under the
    /// content hash, then a bounded download into `work_dir`.
    pub async fn resolve(
        &self,
        submission: &Submission,
        known_hash: Option<&str>,
        work_dir: &Path,
    ) -> WorkerResult<PathBuf> {
        let locator = submission.media_locator();

        if let Some(locator) = locator {
            if let Some(path) = self.store.resolve_local_path(locator).await? {
                return Ok(path);
            }
        }

        if let Some(hash) = known_hash {
            if let Some(path) = self.store.resolve_hash(hash).await? {
                debug!("Resolved media by hash {}", hash);
                return Ok(path);
            }
        }

        match locator {
            Some(locator) => Ok(self
                .store
                .download(locator, work_dir, self.max_download_bytes)
                .await?),
            None => Err(WorkerError::media_unavailable(format!(
                "submission {} has no media locator",
                submission.id
            ))),
        }
    }
}
