//! AI analysis state shared by submissions and assets.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Pipeline version recorded for a full backend analysis.
pub const PIPELINE_VERSION: &str = "v3";

/// Pipeline version recorded when moderation fell back to the keyword heuristic.
pub const PIPELINE_VERSION_HEURISTIC: &str = "v3-heuristic";

/// Pipeline version recorded when a prior analysis was reused by content hash.
pub const PIPELINE_VERSION_REUSE: &str = "v3-reuse";

/// Error returned when a stored enum string is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// AI processing status of a submission or asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AiStatus {
    /// Waiting for the first analysis attempt
    #[default]
    Pending,
    /// Claimed by a worker
    Processing,
    /// Analysis finished (backend, heuristic, or reused)
    Done,
    /// Last attempt failed, eligible again after `ai_next_retry_at`
    Failed,
    /// Retry budget exhausted, needs manual intervention
    FailedFinal,
}

impl AiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiStatus::Pending => "pending",
            AiStatus::Processing => "processing",
            AiStatus::Done => "done",
            AiStatus::Failed => "failed",
            AiStatus::FailedFinal => "failed_final",
        }
    }

    /// Terminal states are never picked up by the claimer again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AiStatus::Done | AiStatus::FailedFinal)
    }
}

impl fmt::Display for AiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AiStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AiStatus::Pending),
            "processing" => Ok(AiStatus::Processing),
            "done" => Ok(AiStatus::Done),
            "failed" => Ok(AiStatus::Failed),
            "failed_final" => Ok(AiStatus::FailedFinal),
            other => Err(ParseEnumError::new("ai_status", other)),
        }
    }
}

/// Risk decision derived from the moderation score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AiDecision {
    Low,
    Medium,
    High,
}

impl AiDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiDecision::Low => "low",
            AiDecision::Medium => "medium",
            AiDecision::High => "high",
        }
    }

    /// Map a risk score onto a decision.
    ///
    /// `score >= high` is high, `score >= medium` is medium, anything else low.
    pub fn from_risk(score: f64, medium_threshold: f64, high_threshold: f64) -> Self {
        if score >= high_threshold {
            AiDecision::High
        } else if score >= medium_threshold {
            AiDecision::Medium
        } else {
            AiDecision::Low
        }
    }

    /// Whether this decision hides the asset from the shared pool.
    pub fn restricts_pool(&self) -> bool {
        matches!(self, AiDecision::Medium | AiDecision::High)
    }
}

impl fmt::Display for AiDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AiDecision {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(AiDecision::Low),
            "medium" => Ok(AiDecision::Medium),
            "high" => Ok(AiDecision::High),
            other => Err(ParseEnumError::new("ai_decision", other)),
        }
    }
}

/// Why the pipeline completed without the full backend analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Media has no audio stream, so there is nothing to transcribe
    NoAudio,
    /// Backend rejected the call for quota reasons
    Quota,
    /// Backend is not available in the deployment region
    RegionBlocked,
    /// Backend credentials are missing or rejected
    MissingCredentials,
    /// No analysis backend is configured
    BackendDisabled,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::NoAudio => "no_audio",
            FallbackReason::Quota => "quota",
            FallbackReason::RegionBlocked => "region_blocked",
            FallbackReason::MissingCredentials => "missing_credentials",
            FallbackReason::BackendDisabled => "backend_disabled",
        }
    }

    /// Label stored alongside the moderation labels.
    pub fn label(&self) -> String {
        format!("fallback:{}", self.as_str())
    }

    /// Whether the backend itself was unreachable for policy reasons.
    pub fn is_backend_unavailable(&self) -> bool {
        !matches!(self, FallbackReason::NoAudio)
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Models and pipeline variant that produced an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelVersions {
    pub pipeline_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderation_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
}

impl ModelVersions {
    pub fn pipeline(version: impl Into<String>) -> Self {
        Self {
            pipeline_version: version.into(),
            transcription_model: None,
            moderation_model: None,
            metadata_model: None,
            fallback_reason: None,
        }
    }

    pub fn is_heuristic(&self) -> bool {
        self.pipeline_version == PIPELINE_VERSION_HEURISTIC
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Final result of analysing one piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub decision: AiDecision,
    pub risk_score: f64,
    pub labels: Vec<String>,
    pub transcript: Option<String>,
    pub auto_title: Option<String>,
    pub auto_tags: Vec<String>,
    pub auto_description: Option<String>,
    pub search_text: Option<String>,
    pub model_versions: ModelVersions,
}

impl AnalysisOutcome {
    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        self.model_versions.fallback_reason
    }
}
