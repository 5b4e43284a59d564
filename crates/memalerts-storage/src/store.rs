//! Content store seam consumed by the moderation pipeline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::client::{R2Client, R2Config};
use crate::error::{StorageError, StorageResult};
use crate::http::download_url;
use crate::local::LocalStore;
use crate::locator::is_remote_url;

/// Access to stored media bytes.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Local file behind a locator, if it is reachable on this host.
    async fn resolve_local_path(&self, locator: &str) -> StorageResult<Option<PathBuf>>;

    /// Local file stored under a content hash, if any.
    async fn resolve_hash(&self, hash: &str) -> StorageResult<Option<PathBuf>>;

    /// Fetch a remote locator into `dest_dir`, bounded by `max_bytes`.
    async fn download(
        &self,
        locator: &str,
        dest_dir: &Path,
        max_bytes: u64,
    ) -> StorageResult<PathBuf>;

    /// Whether the bytes behind a locator still exist.
    async fn exists(&self, locator: &str) -> StorageResult<bool>;
}

/// Local uploads first, then the object store, then plain HTTP.
#[derive(Clone)]
pub struct MediaStore {
    local: LocalStore,
    r2: Option<R2Client>,
    http: reqwest::Client,
}

impl MediaStore {
    pub fn new(
        local: LocalStore,
        r2: Option<R2Client>,
        download_timeout: Duration,
    ) -> StorageResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(download_timeout)
            .build()
            .map_err(|e| StorageError::config_error(e.to_string()))?;
        Ok(Self { local, r2, http })
    }

    /// Build from environment; R2 is attached only when configured.
    pub async fn from_env(download_timeout: Duration) -> StorageResult<Self> {
        let r2 = if R2Config::is_configured() {
            Some(R2Client::from_env().await?)
        } else {
            None
        };
        Self::new(LocalStore::from_env(), r2, download_timeout)
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    fn object_key(&self, locator: &str) -> Option<String> {
        self.r2.as_ref().and_then(|r2| r2.key_for(locator))
    }
}

#[async_trait]
impl ContentStore for MediaStore {
    async fn resolve_local_path(&self, locator: &str) -> StorageResult<Option<PathBuf>> {
        self.local.resolve(locator).await
    }

    async fn resolve_hash(&self, hash: &str) -> StorageResult<Option<PathBuf>> {
        self.local.find_by_hash(hash).await
    }

    async fn download(
        &self,
        locator: &str,
        dest_dir: &Path,
        max_bytes: u64,
    ) -> StorageResult<PathBuf> {
        let dest = dest_dir.join(format!("source.{}", LocalStore::extension_for(locator)));

        if let (Some(r2), Some(key)) = (self.r2.as_ref(), self.object_key(locator)) {
            debug!("Fetching {} from object store", key);
            r2.download_file(&key, &dest, max_bytes).await?;
            return Ok(dest);
        }

        if is_remote_url(locator) {
            download_url(&self.http, locator, &dest, max_bytes).await?;
            return Ok(dest);
        }

        Err(StorageError::InvalidLocator(locator.to_string()))
    }

    async fn exists(&self, locator: &str) -> StorageResult<bool> {
        if self.local.path_for_locator(locator).is_some() {
            return Ok(self.local.resolve(locator).await?.is_some());
        }

        if let (Some(r2), Some(key)) = (self.r2.as_ref(), self.object_key(locator)) {
            return r2.exists(&key).await;
        }

        if is_remote_url(locator) {
            let response = self.http.head(locator).send().await?;
            return Ok(response.status().is_success());
        }

        Ok(false)
    }
}
