//! Content-addressed meme asset models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ai::{AiDecision, AiStatus, ParseEnumError};

/// Prefix marking hide/purge reasons written by the automated pipeline.
///
/// Any other reason (or a reason with an actor attached) belongs to a human
/// moderator and is never overwritten.
pub const AI_REASON_PREFIX: &str = "ai:";

/// Visibility of an asset in the shared meme pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoolVisibility {
    #[default]
    Visible,
    Hidden,
}

impl PoolVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolVisibility::Visible => "visible",
            PoolVisibility::Hidden => "hidden",
        }
    }
}

impl FromStr for PoolVisibility {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "visible" => Ok(PoolVisibility::Visible),
            "hidden" => Ok(PoolVisibility::Hidden),
            other => Err(ParseEnumError::new("pool_visibility", other)),
        }
    }
}

/// True when a hide/purge reason was written by the pipeline.
pub fn is_ai_reason(reason: &str) -> bool {
    reason.starts_with(AI_REASON_PREFIX)
}

/// Hide/purge state of an asset, the part guarded by the ownership rule.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetModeration {
    pub pool_visibility: PoolVisibility,
    #[serde(default)]
    pub pool_hidden_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pool_hidden_reason: Option<String>,
    #[serde(default)]
    pub pool_hidden_by_user_id: Option<String>,
    #[serde(default)]
    pub purge_requested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub purge_not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub purge_reason: Option<String>,
    #[serde(default)]
    pub purge_by_user_id: Option<String>,
    #[serde(default)]
    pub purged_at: Option<DateTime<Utc>>,
}

impl AssetModeration {
    /// Whether a human moderator has made a decision on this asset.
    ///
    /// Hidden without a reason, a non-AI reason, or any attached actor all
    /// count as human decisions. A physically purged asset is also treated
    /// as settled.
    pub fn has_human_decision(&self) -> bool {
        if self.purged_at.is_some() {
            return true;
        }

        let hidden_by_human = match self.pool_hidden_reason.as_deref() {
            Some(reason) => !is_ai_reason(reason) || self.pool_hidden_by_user_id.is_some(),
            None => {
                self.pool_visibility == PoolVisibility::Hidden
                    || self.pool_hidden_by_user_id.is_some()
            }
        };

        let purge_by_human = match self.purge_reason.as_deref() {
            Some(reason) => !is_ai_reason(reason) || self.purge_by_user_id.is_some(),
            None => self.purge_requested_at.is_some() || self.purge_by_user_id.is_some(),
        };

        hidden_by_human || purge_by_human
    }

    /// Whether the pipeline may mutate the hide/purge fields.
    pub fn is_ai_owned(&self) -> bool {
        !self.has_human_decision()
    }

    /// Whether the asset is hidden or scheduled for purge.
    pub fn is_restricted(&self) -> bool {
        self.pool_visibility == PoolVisibility::Hidden
            || self.purge_requested_at.is_some()
            || self.purged_at.is_some()
    }
}

/// Canonical record for one unique piece of media, keyed by content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContentAsset {
    pub id: String,
    pub file_hash: String,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(flatten)]
    pub moderation: AssetModeration,

    pub ai_status: AiStatus,
    #[serde(default)]
    pub ai_decision: Option<AiDecision>,
    #[serde(default)]
    pub ai_risk_score: Option<f64>,
    #[serde(default)]
    pub ai_auto_title: Option<String>,
    #[serde(default)]
    pub ai_auto_description: Option<String>,
    #[serde(default)]
    pub ai_auto_tags: Vec<String>,
    #[serde(default)]
    pub ai_search_text: Option<String>,
    #[serde(default)]
    pub ai_model_versions: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
