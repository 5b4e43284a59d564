//! ML service HTTP client.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{MlError, MlResult};
use crate::types::{
    encode_file_base64, HealthResponse, MetadataHints, MetadataSuggestion, ModerateRequest,
    ModerationResult, TranscribeRequest, Transcription,
};

/// Analysis operations the moderation pipeline depends on.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Transcribe an audio file.
    async fn transcribe(&self, audio: &Path) -> MlResult<Transcription>;

    /// Score text for policy risk.
    async fn moderate_text(&self, text: &str) -> MlResult<ModerationResult>;

    /// Suggest title, tags and description from everything known so far.
    async fn synthesize_metadata(&self, hints: &MetadataHints) -> MlResult<MetadataSuggestion>;
}

/// Configuration for ML client.
#[derive(Debug, Clone)]
pub struct MlClientConfig {
    /// Base URL of ML service
    pub base_url: String,
    /// Bearer token; calls fail with `MissingCredentials` without one
    pub token: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries
    pub max_retries: u32,
}

impl Default for MlClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            token: None,
            timeout: Duration::from_secs(120),
            max_retries: 2,
        }
    }
}

impl MlClientConfig {
    /// Create config from environment variables.
    ///
    /// Returns `None` when `ML_SERVICE_URL` is unset, meaning the backend
    /// is disabled for this deployment.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("ML_SERVICE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())?;

        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: std::env::var("ML_SERVICE_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            timeout: Duration::from_secs(
                std::env::var("ML_SERVICE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            max_retries: std::env::var("ML_SERVICE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        })
    }
}

/// Client for the analysis service.
pub struct MlClient {
    http: Client,
    config: MlClientConfig,
}

impl MlClient {
    /// Create a new ML client.
    pub fn new(config: MlClientConfig) -> MlResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(MlError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables, if a service is configured.
    pub fn from_env() -> MlResult<Option<Self>> {
        MlClientConfig::from_env().map(Self::new).transpose()
    }

    /// Check if ML service is healthy.
    pub async fn health_check(&self) -> MlResult<bool> {
        let url = format!("{}/health", self.config.base_url);

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("ML service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("ML service health check error: {}", e);
                Ok(false)
            }
        }
    }

    fn map_transport(&self, e: reqwest::Error) -> MlError {
        if e.is_timeout() {
            MlError::Timeout(self.config.timeout.as_secs())
        } else {
            MlError::Network(e)
        }
    }

    /// POST a JSON body and decode a JSON response.
    async fn post_json<B, R>(&self, path: &str, body: &B) -> MlResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let token = self
            .config
            .token
            .as_deref()
            .ok_or_else(|| MlError::MissingCredentials("ML_SERVICE_TOKEN not set".to_string()))?;
        let url = format!("{}{}", self.config.base_url, path);

        debug!("Sending analysis request to {}", url);

        self.with_retry(|| async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(token)
                .json(body)
                .send()
                .await
                .map_err(|e| self.map_transport(e))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(MlError::from_status(status, &body));
            }

            let text = response.text().await.map_err(|e| self.map_transport(e))?;
            serde_json::from_str::<R>(&text)
                .map_err(|e| MlError::InvalidResponse(format!("{} ({})", e, url)))
        })
        .await
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> MlResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = MlResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "ML request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(MlError::RequestFailed("Unknown error".to_string())))
    }
}

#[async_trait]
impl AnalysisBackend for MlClient {
    async fn transcribe(&self, audio: &Path) -> MlResult<Transcription> {
        let request = TranscribeRequest {
            filename: audio
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "audio.mp3".to_string()),
            audio_base64: encode_file_base64(audio).await?,
        };
        self.post_json("/v1/transcribe", &request).await
    }

    async fn moderate_text(&self, text: &str) -> MlResult<ModerationResult> {
        let result: ModerationResult = self
            .post_json("/v1/moderate", &ModerateRequest { text })
            .await?;
        Ok(result.normalized())
    }

    async fn synthesize_metadata(&self, hints: &MetadataHints) -> MlResult<MetadataSuggestion> {
        self.post_json("/v1/metadata", hints).await
    }
}
