//! Persistence seam for the moderation pipeline.
//!
//! Every write that races with other workers is expressed as a conditional
//! update (claim, failure bookkeeping) or as a single transaction
//! (quarantine, auto-approval). Implementations must preserve those
//! guarantees; the in-memory store does so with one lock per call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use memalerts_models::{
    AiDecision, AiStatus, AssetModeration, ChannelListing, ContentAsset, Submission, SubmissionId,
};

use crate::error::DbResult;

/// Proof of a successful claim.
///
/// Follow-up writes are fenced on `claimed_at`, so a worker whose claim was
/// taken over after going stale cannot overwrite the new owner's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimToken {
    pub submission_id: SubmissionId,
    pub claimed_at: DateTime<Utc>,
}

/// A submission this worker now owns.
#[derive(Debug, Clone)]
pub struct Claimed {
    pub submission: Submission,
    pub token: ClaimToken,
}

/// Failure bookkeeping written after an unsuccessful attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureUpdate {
    /// `Failed` or `FailedFinal`
    pub status: AiStatus,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error: String,
}

/// A completed analysis of the same content found elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorAnalysis {
    /// Where the analysis was found (`asset:<id>` or `submission:<id>`)
    pub source: String,
    /// Title of the submission that produced it, when known
    pub source_title: Option<String>,
    pub decision: Option<AiDecision>,
    pub risk_score: Option<f64>,
    pub labels: Vec<String>,
    pub transcript: Option<String>,
    pub auto_title: Option<String>,
    pub auto_tags: Vec<String>,
    pub auto_description: Option<String>,
    pub search_text: Option<String>,
    pub model_versions: Option<serde_json::Value>,
}

/// Values used when a content asset row has to be created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetSeed {
    pub file_hash: String,
    pub file_url: Option<String>,
    pub duration_ms: Option<i64>,
}

/// Outcome of the quarantine transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineWrite {
    /// Asset did not exist and was created with the planned state
    Created,
    /// Existing asset moderation fields were replaced
    Updated,
    /// Plan declined to mutate (human-owned, or nothing to do)
    Unchanged,
}

/// Decides the new moderation state from the current one (`None` = no asset yet).
///
/// Returning `None` means "write nothing".
pub type QuarantinePlan = dyn Fn(Option<&AssetModeration>) -> Option<AssetModeration> + Send + Sync;

/// AI fields written to a submission when analysis completes.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionAiUpdate {
    pub decision: AiDecision,
    pub risk_score: f64,
    pub labels: Vec<String>,
    pub transcript: Option<String>,
    pub auto_tags: Vec<String>,
    pub auto_description: Option<String>,
    pub model_versions: serde_json::Value,
    pub file_hash: String,
    pub meme_asset_id: Option<String>,
}

/// AI fields written to the shared content asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetAiUpdate {
    pub decision: AiDecision,
    pub risk_score: f64,
    pub auto_title: Option<String>,
    pub auto_description: Option<String>,
    pub auto_tags: Vec<String>,
    pub search_text: Option<String>,
    pub model_versions: serde_json::Value,
}

/// Denormalized copy pushed to channel listings of an asset.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingUpdate {
    /// Replaces listings still titled `original_title`
    pub title: Option<String>,
    pub original_title: String,
    pub auto_description: Option<String>,
    pub auto_tags: Vec<String>,
    pub search_text: Option<String>,
}

/// Audit record written alongside auto-approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// `None` for system actions
    pub actor_id: Option<String>,
    pub channel_id: Option<String>,
    pub action: String,
    pub target_id: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Persistence operations used by the moderation worker.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    /// Eligible submissions, oldest first.
    async fn find_candidates(
        &self,
        now: DateTime<Utc>,
        stuck_before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Submission>>;

    /// Compare-and-set claim of one candidate.
    ///
    /// Succeeds only if the row is still eligible and its retry count is
    /// unchanged since `candidate` was read. Reclaiming a stuck row counts
    /// as a retry.
    async fn try_claim(
        &self,
        candidate: &Submission,
        now: DateTime<Utc>,
        stuck_before: DateTime<Utc>,
    ) -> DbResult<Option<Claimed>>;

    /// Move an exhausted candidate to `failed_final` under the same
    /// compare-and-set condition as a claim.
    async fn mark_exhausted(
        &self,
        candidate: &Submission,
        now: DateTime<Utc>,
        stuck_before: DateTime<Utc>,
        marker: &str,
    ) -> DbResult<bool>;

    /// Record a failed attempt. Returns `false` if the claim was lost.
    async fn record_failure(&self, token: &ClaimToken, update: &FailureUpdate) -> DbResult<bool>;

    /// Persist a resolved content hash on the submission.
    async fn set_file_hash(&self, token: &ClaimToken, file_hash: &str) -> DbResult<()>;

    /// Completed analyses of the same content, asset first, then other
    /// submissions newest first.
    async fn find_prior_analyses(
        &self,
        file_hash: &str,
        exclude: &SubmissionId,
    ) -> DbResult<Vec<PriorAnalysis>>;

    async fn find_asset_by_hash(&self, file_hash: &str) -> DbResult<Option<ContentAsset>>;

    /// Ownership-checked read-modify-write of an asset's moderation state,
    /// in one transaction. A missing asset is created directly in the
    /// planned state.
    async fn apply_quarantine(
        &self,
        seed: &AssetSeed,
        plan: &QuarantinePlan,
        now: DateTime<Utc>,
    ) -> DbResult<QuarantineWrite>;

    /// Upsert the asset's AI fields, leaving moderation fields untouched.
    /// Returns the asset id, or `None` without writing if the claim was lost.
    async fn upsert_asset_ai(
        &self,
        token: &ClaimToken,
        seed: &AssetSeed,
        update: &AssetAiUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<Option<String>>;

    /// Mark the submission `done` with its results. Returns `false` if the
    /// claim was lost.
    async fn save_submission_ai(
        &self,
        token: &ClaimToken,
        update: &SubmissionAiUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<bool>;

    /// Push AI metadata to every listing of an asset. Returns rows touched.
    async fn sync_listings(
        &self,
        meme_asset_id: &str,
        update: &ListingUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<u64>;

    /// Approve a pending submission, create its channel listing and write
    /// the audit row, all in one transaction. Returns `false` if the
    /// submission was no longer pending.
    async fn approve_submission(
        &self,
        submission: &Submission,
        listing: &ChannelListing,
        audit: &AuditEntry,
    ) -> DbResult<bool>;

    async fn get_submission(&self, id: &SubmissionId) -> DbResult<Option<Submission>>;
}
