//! ML service request/response types.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::MlResult;

/// Transcription request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct TranscribeRequest {
    pub filename: String,
    pub audio_base64: String,
}

/// Transcription result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Text moderation request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ModerateRequest<'a> {
    pub text: &'a str,
}

/// Text moderation result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModerationResult {
    /// Risk in [0, 1]
    pub risk_score: f64,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl ModerationResult {
    /// Clamp the score into [0, 1]; NaN counts as zero risk.
    pub fn normalized(mut self) -> Self {
        self.risk_score = if self.risk_score.is_nan() {
            0.0
        } else {
            self.risk_score.clamp(0.0, 1.0)
        };
        self
    }
}

/// Everything known about a meme before metadata synthesis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataHints {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Sampled JPEG frames, base64 encoded
    #[serde(default)]
    pub frames: Vec<String>,
    pub max_tags: usize,
}

/// Suggested metadata for a meme.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataSuggestion {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct HealthResponse {
    pub status: String,
}

/// Read a file and encode it as standard base64.
pub async fn encode_file_base64(path: &Path) -> MlResult<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moderation_score_is_clamped() {
        let r = ModerationResult {
            risk_score: 1.7,
            ..Default::default()
        };
        assert_eq!(r.normalized().risk_score, 1.0);

        let r = ModerationResult {
            risk_score: f64::NAN,
            ..Default::default()
        };
        assert_eq!(r.normalized().risk_score, 0.0);
    }

    #[test]
    fn test_suggestion_tolerates_missing_fields() {
        let s: MetadataSuggestion = serde_json::from_str(r#"{"tags":["cat"]}"#).unwrap();
        assert_eq!(s.tags, vec!["cat"]);
        assert!(s.title.is_none());
    }

    #[tokio::test]
    async fn test_encode_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.jpg");
        tokio::fs::write(&path, b"abc").await.unwrap();
        assert_eq!(encode_file_base64(&path).await.unwrap(), "YWJj");
    }
}
