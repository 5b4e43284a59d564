//! Row types for the moderation tables.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use memalerts_models::{AiDecision, AssetModeration, ContentAsset, Submission, SubmissionId};

use crate::error::{DbError, DbResult};

/// Column list for `meme_submissions` queries (table alias `s`, users alias `u`).
pub(crate) const SUBMISSION_COLUMNS: &str = "\
    s.id, s.channel_id, s.submitter_id, u.role AS submitter_role, s.meme_asset_id, \
    s.title, s.notes, s.source_kind, s.status, s.file_url, s.source_url, s.file_hash, \
    s.duration_ms, s.ai_status, s.ai_retry_count, s.ai_last_tried_at, s.ai_next_retry_at, \
    s.ai_decision, s.ai_risk_score, s.ai_labels, s.ai_transcript, s.ai_auto_tags, \
    s.ai_auto_description, s.ai_model_versions, s.ai_error, s.created_at";

/// Column list for `meme_assets` queries.
pub(crate) const ASSET_COLUMNS: &str = "\
    id, file_hash, file_url, duration_ms, pool_visibility, pool_hidden_at, \
    pool_hidden_reason, pool_hidden_by_user_id, purge_requested_at, purge_not_before, \
    purge_reason, purge_by_user_id, purged_at, ai_status, ai_decision, ai_risk_score, \
    ai_auto_title, ai_auto_description, ai_auto_tags, ai_search_text, ai_model_versions, \
    created_at, updated_at";

/// Column list for `channel_memes` queries.
pub(crate) const LISTING_COLUMNS: &str = "\
    id, channel_id, meme_asset_id, title, ai_auto_description, ai_auto_tags, search_text";

/// A row from `meme_submissions` joined with the submitter's role.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct SubmissionRow {
    pub id: String,
    pub channel_id: String,
    pub submitter_id: String,
    pub submitter_role: Option<String>,
    pub meme_asset_id: Option<String>,
    pub title: String,
    pub notes: Option<String>,
    pub source_kind: String,
    pub status: String,
    pub file_url: Option<String>,
    pub source_url: Option<String>,
    pub file_hash: Option<String>,
    pub duration_ms: Option<i64>,
    pub ai_status: String,
    pub ai_retry_count: i32,
    pub ai_last_tried_at: Option<DateTime<Utc>>,
    pub ai_next_retry_at: Option<DateTime<Utc>>,
    pub ai_decision: Option<String>,
    pub ai_risk_score: Option<f64>,
    pub ai_labels: Vec<String>,
    pub ai_transcript: Option<String>,
    pub ai_auto_tags: Vec<String>,
    pub ai_auto_description: Option<String>,
    pub ai_model_versions: Option<serde_json::Value>,
    pub ai_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn parse_decision(value: Option<String>) -> DbResult<Option<AiDecision>> {
    value.map(|d| d.parse::<AiDecision>()).transpose().map_err(DbError::from)
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = DbError;

    fn try_from(row: SubmissionRow) -> DbResult<Self> {
        Ok(Submission {
            id: SubmissionId(row.id),
            channel_id: row.channel_id,
            submitter_id: row.submitter_id,
            submitter_role: row.submitter_role,
            meme_asset_id: row.meme_asset_id,
            title: row.title,
            notes: row.notes,
            source_kind: row.source_kind.parse()?,
            status: row.status.parse()?,
            file_url: row.file_url,
            source_url: row.source_url,
            file_hash: row.file_hash,
            duration_ms: row.duration_ms,
            ai_status: row.ai_status.parse()?,
            ai_retry_count: row.ai_retry_count,
            ai_last_tried_at: row.ai_last_tried_at,
            ai_next_retry_at: row.ai_next_retry_at,
            ai_decision: parse_decision(row.ai_decision)?,
            ai_risk_score: row.ai_risk_score,
            ai_labels: row.ai_labels,
            ai_transcript: row.ai_transcript,
            ai_auto_tags: row.ai_auto_tags,
            ai_auto_description: row.ai_auto_description,
            ai_model_versions: row.ai_model_versions,
            ai_error: row.ai_error,
            created_at: row.created_at,
        })
    }
}

/// A row from `meme_assets`.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct AssetRow {
    pub id: String,
    pub file_hash: String,
    pub file_url: Option<String>,
    pub duration_ms: Option<i64>,
    pub pool_visibility: String,
    pub pool_hidden_at: Option<DateTime<Utc>>,
    pub pool_hidden_reason: Option<String>,
    pub pool_hidden_by_user_id: Option<String>,
    pub purge_requested_at: Option<DateTime<Utc>>,
    pub purge_not_before: Option<DateTime<Utc>>,
    pub purge_reason: Option<String>,
    pub purge_by_user_id: Option<String>,
    pub purged_at: Option<DateTime<Utc>>,
    pub ai_status: String,
    pub ai_decision: Option<String>,
    pub ai_risk_score: Option<f64>,
    pub ai_auto_title: Option<String>,
    pub ai_auto_description: Option<String>,
    pub ai_auto_tags: Vec<String>,
    pub ai_search_text: Option<String>,
    pub ai_model_versions: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AssetRow> for ContentAsset {
    type Error = DbError;

    fn try_from(row: AssetRow) -> DbResult<Self> {
        Ok(ContentAsset {
            id: row.id,
            file_hash: row.file_hash,
            file_url: row.file_url,
            duration_ms: row.duration_ms,
            moderation: AssetModeration {
                pool_visibility: row.pool_visibility.parse()?,
                pool_hidden_at: row.pool_hidden_at,
                pool_hidden_reason: row.pool_hidden_reason,
                pool_hidden_by_user_id: row.pool_hidden_by_user_id,
                purge_requested_at: row.purge_requested_at,
                purge_not_before: row.purge_not_before,
                purge_reason: row.purge_reason,
                purge_by_user_id: row.purge_by_user_id,
                purged_at: row.purged_at,
            },
            ai_status: row.ai_status.parse()?,
            ai_decision: parse_decision(row.ai_decision)?,
            ai_risk_score: row.ai_risk_score,
            ai_auto_title: row.ai_auto_title,
            ai_auto_description: row.ai_auto_description,
            ai_auto_tags: row.ai_auto_tags,
            ai_search_text: row.ai_search_text,
            ai_model_versions: row.ai_model_versions,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
