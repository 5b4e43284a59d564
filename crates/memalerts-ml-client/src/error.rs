//! ML client error types.

use reqwest::StatusCode;
use thiserror::Error;

pub type MlResult<T> = Result<T, MlError>;

#[derive(Debug, Error)]
pub enum MlError {
    #[error("ML service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Backend not available in this region: {0}")]
    RegionBlocked(String),

    #[error("Missing or rejected credentials: {0}")]
    MissingCredentials(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MlError {
    /// Errors worth retrying inside a single call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MlError::ServiceUnavailable(_)
                | MlError::RateLimited(_)
                | MlError::Timeout(_)
                | MlError::Network(_)
        )
    }

    /// Backend refuses service for policy reasons; retrying will not help.
    pub fn is_policy_block(&self) -> bool {
        matches!(
            self,
            MlError::QuotaExceeded(_) | MlError::RegionBlocked(_) | MlError::MissingCredentials(_)
        )
    }

    /// Map a non-success response onto an error.
    ///
    /// Policy blocks are recognized by status plus the provider's error code
    /// in the body; everything else keeps its transient/permanent meaning.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = format!("{}: {}", status, truncate(body, 300));
        let lower = body.to_ascii_lowercase();

        match status {
            StatusCode::TOO_MANY_REQUESTS if lower.contains("insufficient_quota") => {
                MlError::QuotaExceeded(detail)
            }
            StatusCode::TOO_MANY_REQUESTS => MlError::RateLimited(detail),
            StatusCode::FORBIDDEN if lower.contains("unsupported_country_region_territory") => {
                MlError::RegionBlocked(detail)
            }
            StatusCode::UNAUTHORIZED => MlError::MissingCredentials(detail),
            s if s.is_server_error() => MlError::ServiceUnavailable(detail),
            _ => MlError::RequestFailed(detail),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_is_policy_block() {
        let err = MlError::from_status(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"code":"insufficient_quota"}}"#,
        );
        assert!(matches!(err, MlError::QuotaExceeded(_)));
        assert!(err.is_policy_block());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_plain_rate_limit_is_retryable() {
        let err = MlError::from_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(err.is_retryable());
        assert!(!err.is_policy_block());
    }

    #[test]
    fn test_region_block() {
        let err = MlError::from_status(
            StatusCode::FORBIDDEN,
            r#"{"error":{"code":"unsupported_country_region_territory"}}"#,
        );
        assert!(matches!(err, MlError::RegionBlocked(_)));

        let other = MlError::from_status(StatusCode::FORBIDDEN, "nope");
        assert!(matches!(other, MlError::RequestFailed(_)));
    }

    #[test]
    fn test_unauthorized_is_missing_credentials() {
        let err = MlError::from_status(StatusCode::UNAUTHORIZED, "");
        assert!(err.is_policy_block());
    }

    #[test]
    fn test_server_error_is_transient() {
        let err = MlError::from_status(StatusCode::BAD_GATEWAY, "upstream");
        assert!(matches!(err, MlError::ServiceUnavailable(_)));
        assert!(err.is_retryable());
    }
}
