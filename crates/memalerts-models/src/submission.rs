//! Meme submission models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::ai::{AiDecision, AiStatus, ParseEnumError};

/// Unique identifier for a submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SubmissionId(pub String);

impl SubmissionId {
    /// Generate a new random submission ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubmissionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Human moderation status of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for SubmissionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "approved" => Ok(SubmissionStatus::Approved),
            "rejected" => Ok(SubmissionStatus::Rejected),
            other => Err(ParseEnumError::new("submission_status", other)),
        }
    }
}

/// How the media entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// File uploaded by the viewer
    #[default]
    Upload,
    /// Imported from a public URL
    Url,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Upload => "upload",
            SourceKind::Url => "url",
        }
    }
}

impl FromStr for SourceKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(SourceKind::Upload),
            "url" => Ok(SourceKind::Url),
            other => Err(ParseEnumError::new("source_kind", other)),
        }
    }
}

/// A viewer's request to add a meme to a channel catalog.
///
/// Only the fields read or written by the moderation pipeline are modelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: SubmissionId,
    pub channel_id: String,
    pub submitter_id: String,
    /// Role of the submitter (`viewer`, `streamer`, `admin`, ...)
    #[serde(default)]
    pub submitter_role: Option<String>,
    /// Linked content asset, set once the intake flow resolved it
    #[serde(default)]
    pub meme_asset_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub source_kind: SourceKind,
    pub status: SubmissionStatus,
    /// Storage locator of the uploaded/imported file
    #[serde(default)]
    pub file_url: Option<String>,
    /// Original public URL for `url` submissions
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<i64>,

    pub ai_status: AiStatus,
    pub ai_retry_count: i32,
    #[serde(default)]
    pub ai_last_tried_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ai_next_retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ai_decision: Option<AiDecision>,
    #[serde(default)]
    pub ai_risk_score: Option<f64>,
    #[serde(default)]
    pub ai_labels: Vec<String>,
    #[serde(default)]
    pub ai_transcript: Option<String>,
    #[serde(default)]
    pub ai_auto_tags: Vec<String>,
    #[serde(default)]
    pub ai_auto_description: Option<String>,
    #[serde(default)]
    pub ai_model_versions: Option<serde_json::Value>,
    #[serde(default)]
    pub ai_error: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// Create a fresh pending submission (used by intake and tests).
    pub fn new(
        channel_id: impl Into<String>,
        submitter_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: SubmissionId::new(),
            channel_id: channel_id.into(),
            submitter_id: submitter_id.into(),
            submitter_role: None,
            meme_asset_id: None,
            title: title.into(),
            notes: None,
            source_kind: SourceKind::Upload,
            status: SubmissionStatus::Pending,
            file_url: None,
            source_url: None,
            file_hash: None,
            duration_ms: None,
            ai_status: AiStatus::Pending,
            ai_retry_count: 0,
            ai_last_tried_at: None,
            ai_next_retry_at: None,
            ai_decision: None,
            ai_risk_score: None,
            ai_labels: Vec::new(),
            ai_transcript: None,
            ai_auto_tags: Vec::new(),
            ai_auto_description: None,
            ai_model_versions: None,
            ai_error: None,
            created_at: Utc::now(),
        }
    }

    /// Eligibility predicate shared by every store implementation.
    ///
    /// A submission may be claimed when it is `pending`, when it is `failed`
    /// and its retry time has passed (or was never set), or when it is stuck
    /// in `processing` with a claim older than `stuck_before`.
    pub fn is_claimable(&self, now: DateTime<Utc>, stuck_before: DateTime<Utc>) -> bool {
        match self.ai_status {
            AiStatus::Pending => true,
            AiStatus::Failed => self.ai_next_retry_at.map_or(true, |at| at <= now),
            AiStatus::Processing => self.ai_last_tried_at.map_or(true, |at| at < stuck_before),
            AiStatus::Done | AiStatus::FailedFinal => false,
        }
    }

    /// Whether a processing claim has gone stale.
    pub fn is_stuck(&self, stuck_before: DateTime<Utc>) -> bool {
        self.ai_status == AiStatus::Processing
            && self.ai_last_tried_at.map_or(true, |at| at < stuck_before)
    }

    /// Best locator for the media bytes.
    pub fn media_locator(&self) -> Option<&str> {
        self.file_url
            .as_deref()
            .or(self.source_url.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_pending_is_claimable() {
        let s = Submission::new("ch", "u", "title");
        let now = Utc::now();
        assert!(s.is_claimable(now, now - Duration::minutes(10)));
    }

    #[test]
    fn test_failed_waits_for_retry_time() {
        let now = Utc::now();
        let mut s = Submission::new("ch", "u", "title");
        s.ai_status = AiStatus::Failed;
        s.ai_next_retry_at = Some(now + Duration::seconds(5));
        assert!(!s.is_claimable(now, now - Duration::minutes(10)));
        s.ai_next_retry_at = Some(now - Duration::seconds(1));
        assert!(s.is_claimable(now, now - Duration::minutes(10)));
    }

    #[test]
    fn test_processing_only_claimable_when_stuck() {
        let now = Utc::now();
        let stuck_before = now - Duration::minutes(10);
        let mut s = Submission::new("ch", "u", "title");
        s.ai_status = AiStatus::Processing;
        s.ai_last_tried_at = Some(now - Duration::minutes(1));
        assert!(!s.is_claimable(now, stuck_before));
        s.ai_last_tried_at = Some(now - Duration::minutes(30));
        assert!(s.is_claimable(now, stuck_before));
        assert!(s.is_stuck(stuck_before));
    }

    #[test]
    fn test_terminal_never_claimable() {
        let now = Utc::now();
        let mut s = Submission::new("ch", "u", "title");
        s.ai_status = AiStatus::Done;
        assert!(!s.is_claimable(now, now));
        s.ai_status = AiStatus::FailedFinal;
        assert!(!s.is_claimable(now, now));
    }

    #[test]
    fn test_media_locator_prefers_file_url() {
        let mut s = Submission::new("ch", "u", "title");
        assert_eq!(s.media_locator(), None);
        s.source_url = Some("https://example.com/a.mp4".into());
        assert_eq!(s.media_locator(), Some("https://example.com/a.mp4"));
        s.file_url = Some("/uploads/memes/a.mp4".into());
        assert_eq!(s.media_locator(), Some("/uploads/memes/a.mp4"));
    }
}
