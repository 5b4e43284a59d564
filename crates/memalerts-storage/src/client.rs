//! R2 client implementation.

use std::path::Path;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
    /// Public base URL that maps onto bucket keys (e.g. the CDN domain)
    pub public_base_url: Option<String>,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("R2_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("R2_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("R2_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("R2_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("R2_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("R2_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("R2_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("R2_BUCKET_NAME not set"))?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
            public_base_url: std::env::var("R2_PUBLIC_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        })
    }

    /// Whether any R2 settings are present in the environment.
    pub fn is_configured() -> bool {
        std::env::var("R2_ENDPOINT_URL").is_ok() && std::env::var("R2_BUCKET_NAME").is_ok()
    }
}

/// Map a public locator onto a bucket key.
///
/// Accepts `r2://<key>` locators and URLs under the configured public base.
pub fn object_key_for(public_base_url: Option<&str>, locator: &str) -> Option<String> {
    if let Some(key) = locator.strip_prefix("r2://") {
        return (!key.is_empty()).then(|| key.to_string());
    }

    let base = public_base_url?.trim_end_matches('/');
    let rest = locator.strip_prefix(base)?;
    let key = rest.trim_start_matches('/');
    let key = key.split(['?', '#']).next().unwrap_or_default();
    (!key.is_empty()).then(|| key.to_string())
}

/// Cloudflare R2 storage client.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
    public_base_url: Option<String>,
}

impl R2Client {
    /// Create a new R2 client from configuration.
    pub async fn new(config: R2Config) -> StorageResult<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let client = Client::from_conf(sdk_config);

        Ok(Self {
            client,
            bucket: config.bucket_name,
            public_base_url: config.public_base_url,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        let config = R2Config::from_env()?;
        Self::new(config).await
    }

    /// Bucket key for a locator, if the locator points into this bucket.
    pub fn key_for(&self, locator: &str) -> Option<String> {
        object_key_for(self.public_base_url.as_deref(), locator)
    }

    /// Stream an object to `path`, refusing objects larger than `max_bytes`.
    ///
    /// A partially written file is removed on failure.
    pub async fn download_file(
        &self,
        key: &str,
        path: impl AsRef<Path>,
        max_bytes: u64,
    ) -> StorageResult<u64> {
        let path = path.as_ref();
        debug!("Downloading {} to {}", key, path.display());

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::not_found(key)
                } else {
                    StorageError::DownloadFailed(e.to_string())
                }
            })?;

        if let Some(len) = response.content_length() {
            if len > 0 && len as u64 > max_bytes {
                return Err(StorageError::TooLarge { limit: max_bytes });
            }
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut body = response.body;
        let mut file = tokio::fs::File::create(path).await?;
        let mut written: u64 = 0;

        let result: StorageResult<()> = async {
            while let Some(chunk) = body
                .try_next()
                .await
                .map_err(|e| StorageError::download_failed(e.to_string()))?
            {
                written += chunk.len() as u64;
                if written > max_bytes {
                    return Err(StorageError::TooLarge { limit: max_bytes });
                }
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            drop(file);
            let _ = tokio::fs::remove_file(path).await;
            return Err(e);
        }

        info!("Downloaded {} ({} bytes) to {}", key, written, path.display());
        Ok(written)
    }

    /// Check if an object exists.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.to_string().contains("NotFound") || e.to_string().contains("NoSuchKey") {
                    Ok(false)
                } else {
                    Err(StorageError::AwsSdk(e.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_from_r2_scheme() {
        assert_eq!(
            object_key_for(None, "r2://memes/abc.mp4").as_deref(),
            Some("memes/abc.mp4")
        );
        assert_eq!(object_key_for(None, "r2://"), None);
    }

    #[test]
    fn test_object_key_from_public_url() {
        let base = Some("https://cdn.memalerts.test/");
        assert_eq!(
            object_key_for(base, "https://cdn.memalerts.test/memes/abc.mp4?v=2").as_deref(),
            Some("memes/abc.mp4")
        );
        assert_eq!(object_key_for(base, "https://other.test/memes/abc.mp4"), None);
        assert_eq!(object_key_for(None, "https://cdn.memalerts.test/memes/abc.mp4"), None);
    }
}
