//! PostgreSQL implementation of [`ModerationStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use memalerts_models::{AssetModeration, ChannelListing, ContentAsset, Submission, SubmissionId};

use crate::error::{DbError, DbResult};
use crate::rows::{AssetRow, SubmissionRow, ASSET_COLUMNS, LISTING_COLUMNS, SUBMISSION_COLUMNS};
use crate::store::{
    AssetAiUpdate, AssetSeed, AuditEntry, ClaimToken, Claimed, FailureUpdate, ListingUpdate,
    ModerationStore, PriorAnalysis, QuarantinePlan, QuarantineWrite, SubmissionAiUpdate,
};

/// Maximum number of sibling submissions inspected for reuse.
const PRIOR_SUBMISSION_LIMIT: i64 = 5;

/// Eligibility predicate over alias `s`, with `now` and `stuck_before`
/// bound at the given positions.
fn eligible(now: usize, stuck_before: usize) -> String {
    format!(
        "(s.ai_status = 'pending' \
          OR (s.ai_status = 'failed' AND (s.ai_next_retry_at IS NULL OR s.ai_next_retry_at <= ${now})) \
          OR (s.ai_status = 'processing' AND (s.ai_last_tried_at IS NULL OR s.ai_last_tried_at < ${stuck_before})))"
    )
}

/// Moderation store backed by a Postgres pool.
#[derive(Clone)]
pub struct PgModerationStore {
    pool: PgPool,
}

impl PgModerationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn select_asset_for_update(
        conn: &mut PgConnection,
        file_hash: &str,
    ) -> DbResult<Option<ContentAsset>> {
        let query = format!("SELECT {ASSET_COLUMNS} FROM meme_assets WHERE file_hash = $1 FOR UPDATE");
        sqlx::query_as::<_, AssetRow>(&query)
            .bind(file_hash)
            .fetch_optional(conn)
            .await?
            .map(ContentAsset::try_from)
            .transpose()
    }

    async fn write_moderation(
        conn: &mut PgConnection,
        asset_id: &str,
        m: &AssetModeration,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE meme_assets SET \
                pool_visibility = $2, pool_hidden_at = $3, pool_hidden_reason = $4, \
                pool_hidden_by_user_id = $5, purge_requested_at = $6, purge_not_before = $7, \
                purge_reason = $8, purge_by_user_id = $9, purged_at = $10, updated_at = $11 \
             WHERE id = $1",
        )
        .bind(asset_id)
        .bind(m.pool_visibility.as_str())
        .bind(m.pool_hidden_at)
        .bind(&m.pool_hidden_reason)
        .bind(&m.pool_hidden_by_user_id)
        .bind(m.purge_requested_at)
        .bind(m.purge_not_before)
        .bind(&m.purge_reason)
        .bind(&m.purge_by_user_id)
        .bind(m.purged_at)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Apply the plan to an existing (locked) asset.
    async fn replan_existing(
        conn: &mut PgConnection,
        asset: &ContentAsset,
        plan: &QuarantinePlan,
        now: DateTime<Utc>,
    ) -> DbResult<QuarantineWrite> {
        match plan(Some(&asset.moderation)) {
            Some(next) if next != asset.moderation => {
                Self::write_moderation(conn, &asset.id, &next, now).await?;
                Ok(QuarantineWrite::Updated)
            }
            _ => Ok(QuarantineWrite::Unchanged),
        }
    }
}

fn prior_from_asset(asset: ContentAsset) -> PriorAnalysis {
    PriorAnalysis {
        source: format!("asset:{}", asset.id),
        source_title: None,
        decision: asset.ai_decision,
        risk_score: asset.ai_risk_score,
        labels: Vec::new(),
        transcript: None,
        auto_title: asset.ai_auto_title,
        auto_tags: asset.ai_auto_tags,
        auto_description: asset.ai_auto_description,
        search_text: asset.ai_search_text,
        model_versions: asset.ai_model_versions,
    }
}

fn prior_from_submission(s: Submission) -> PriorAnalysis {
    PriorAnalysis {
        source: format!("submission:{}", s.id),
        source_title: Some(s.title),
        decision: s.ai_decision,
        risk_score: s.ai_risk_score,
        labels: s.ai_labels,
        transcript: s.ai_transcript,
        auto_title: None,
        auto_tags: s.ai_auto_tags,
        auto_description: s.ai_auto_description,
        search_text: None,
        model_versions: s.ai_model_versions,
    }
}

#[async_trait]
impl ModerationStore for PgModerationStore {
    async fn find_candidates(
        &self,
        now: DateTime<Utc>,
        stuck_before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Submission>> {
        let query = format!(
            "SELECT {SUBMISSION_COLUMNS} \
             FROM meme_submissions s LEFT JOIN users u ON u.id = s.submitter_id \
             WHERE {} \
             ORDER BY s.created_at ASC \
             LIMIT $3",
            eligible(1, 2)
        );
        sqlx::query_as::<_, SubmissionRow>(&query)
            .bind(now)
            .bind(stuck_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Submission::try_from)
            .collect()
    }

    async fn try_claim(
        &self,
        candidate: &Submission,
        now: DateTime<Utc>,
        stuck_before: DateTime<Utc>,
    ) -> DbResult<Option<Claimed>> {
        let query = format!(
            "WITH claimed AS ( \
                 UPDATE meme_submissions s \
                 SET ai_status = 'processing', ai_last_tried_at = $2, ai_next_retry_at = NULL, \
                     ai_retry_count = CASE WHEN s.ai_status = 'processing' \
                                           THEN s.ai_retry_count + 1 ELSE s.ai_retry_count END, \
                     updated_at = $2 \
                 WHERE s.id = $1 AND s.ai_retry_count = $4 AND {} \
                 RETURNING s.* \
             ) \
             SELECT {SUBMISSION_COLUMNS} FROM claimed s LEFT JOIN users u ON u.id = s.submitter_id",
            eligible(2, 3)
        );
        let row = sqlx::query_as::<_, SubmissionRow>(&query)
            .bind(candidate.id.as_str())
            .bind(now)
            .bind(stuck_before)
            .bind(candidate.ai_retry_count)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            debug!(submission_id = %candidate.id, "Claim lost to another worker");
            return Ok(None);
        };

        let submission = Submission::try_from(row)?;
        let claimed_at = submission
            .ai_last_tried_at
            .ok_or_else(|| DbError::Internal("claimed row without ai_last_tried_at".into()))?;

        Ok(Some(Claimed {
            token: ClaimToken {
                submission_id: submission.id.clone(),
                claimed_at,
            },
            submission,
        }))
    }

    async fn mark_exhausted(
        &self,
        candidate: &Submission,
        now: DateTime<Utc>,
        stuck_before: DateTime<Utc>,
        marker: &str,
    ) -> DbResult<bool> {
        let query = format!(
            "UPDATE meme_submissions s \
             SET ai_status = 'failed_final', ai_error = $4, ai_next_retry_at = NULL, updated_at = $2 \
             WHERE s.id = $1 AND s.ai_retry_count = $5 AND {}",
            eligible(2, 3)
        );
        let result = sqlx::query(&query)
            .bind(candidate.id.as_str())
            .bind(now)
            .bind(stuck_before)
            .bind(marker)
            .bind(candidate.ai_retry_count)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(&self, token: &ClaimToken, update: &FailureUpdate) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE meme_submissions \
             SET ai_status = $3, ai_retry_count = $4, ai_next_retry_at = $5, ai_error = $6, \
                 updated_at = NOW() \
             WHERE id = $1 AND ai_status = 'processing' AND ai_last_tried_at = $2",
        )
        .bind(token.submission_id.as_str())
        .bind(token.claimed_at)
        .bind(update.status.as_str())
        .bind(update.retry_count)
        .bind(update.next_retry_at)
        .bind(&update.error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_file_hash(&self, token: &ClaimToken, file_hash: &str) -> DbResult<()> {
        sqlx::query(
            "UPDATE meme_submissions SET file_hash = $3, updated_at = NOW() \
             WHERE id = $1 AND ai_last_tried_at = $2",
        )
        .bind(token.submission_id.as_str())
        .bind(token.claimed_at)
        .bind(file_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_prior_analyses(
        &self,
        file_hash: &str,
        exclude: &SubmissionId,
    ) -> DbResult<Vec<PriorAnalysis>> {
        let mut priors = Vec::new();

        let asset_query =
            format!("SELECT {ASSET_COLUMNS} FROM meme_assets WHERE file_hash = $1 AND ai_status = 'done'");
        if let Some(row) = sqlx::query_as::<_, AssetRow>(&asset_query)
            .bind(file_hash)
            .fetch_optional(&self.pool)
            .await?
        {
            priors.push(prior_from_asset(ContentAsset::try_from(row)?));
        }

        let submission_query = format!(
            "SELECT {SUBMISSION_COLUMNS} \
             FROM meme_submissions s LEFT JOIN users u ON u.id = s.submitter_id \
             WHERE s.file_hash = $1 AND s.id <> $2 AND s.ai_status = 'done' \
             ORDER BY s.updated_at DESC \
             LIMIT $3"
        );
        for row in sqlx::query_as::<_, SubmissionRow>(&submission_query)
            .bind(file_hash)
            .bind(exclude.as_str())
            .bind(PRIOR_SUBMISSION_LIMIT)
            .fetch_all(&self.pool)
            .await?
        {
            priors.push(prior_from_submission(Submission::try_from(row)?));
        }

        Ok(priors)
    }

    async fn find_asset_by_hash(&self, file_hash: &str) -> DbResult<Option<ContentAsset>> {
        let query = format!("SELECT {ASSET_COLUMNS} FROM meme_assets WHERE file_hash = $1");
        sqlx::query_as::<_, AssetRow>(&query)
            .bind(file_hash)
            .fetch_optional(&self.pool)
            .await?
            .map(ContentAsset::try_from)
            .transpose()
    }

    async fn apply_quarantine(
        &self,
        seed: &AssetSeed,
        plan: &QuarantinePlan,
        now: DateTime<Utc>,
    ) -> DbResult<QuarantineWrite> {
        let mut tx = self.pool.begin().await?;

        let write = match Self::select_asset_for_update(&mut *tx, &seed.file_hash).await? {
            Some(asset) => Self::replan_existing(&mut *tx, &asset, plan, now).await?,
            None => match plan(None) {
                None => QuarantineWrite::Unchanged,
                Some(m) => {
                    let inserted: Option<(String,)> = sqlx::query_as(
                        "INSERT INTO meme_assets ( \
                             file_hash, file_url, duration_ms, pool_visibility, pool_hidden_at, \
                             pool_hidden_reason, pool_hidden_by_user_id, purge_requested_at, \
                             purge_not_before, purge_reason, purge_by_user_id, purged_at, \
                             ai_status, created_at, updated_at) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'pending', $13, $13) \
                         ON CONFLICT (file_hash) DO NOTHING \
                         RETURNING id",
                    )
                    .bind(&seed.file_hash)
                    .bind(&seed.file_url)
                    .bind(seed.duration_ms)
                    .bind(m.pool_visibility.as_str())
                    .bind(m.pool_hidden_at)
                    .bind(&m.pool_hidden_reason)
                    .bind(&m.pool_hidden_by_user_id)
                    .bind(m.purge_requested_at)
                    .bind(m.purge_not_before)
                    .bind(&m.purge_reason)
                    .bind(&m.purge_by_user_id)
                    .bind(m.purged_at)
                    .bind(now)
                    .fetch_optional(&mut *tx)
                    .await?;

                    if inserted.is_some() {
                        QuarantineWrite::Created
                    } else {
                        // A concurrent transaction created the row; decide again on its state.
                        let asset = Self::select_asset_for_update(&mut *tx, &seed.file_hash)
                            .await?
                            .ok_or_else(|| DbError::not_found(seed.file_hash.clone()))?;
                        Self::replan_existing(&mut *tx, &asset, plan, now).await?
                    }
                }
            },
        };

        tx.commit().await?;
        Ok(write)
    }

    async fn upsert_asset_ai(
        &self,
        token: &ClaimToken,
        seed: &AssetSeed,
        update: &AssetAiUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<Option<String>> {
        let mut tx = self.pool.begin().await?;

        // Holding the submission row blocks a takeover until the asset write commits.
        let owned: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM meme_submissions \
             WHERE id = $1 AND ai_status = 'processing' AND ai_last_tried_at = $2 \
             FOR UPDATE",
        )
        .bind(token.submission_id.as_str())
        .bind(token.claimed_at)
        .fetch_optional(&mut *tx)
        .await?;
        if owned.is_none() {
            return Ok(None);
        }

        let (id,): (String,) = sqlx::query_as(
            "INSERT INTO meme_assets ( \
                 file_hash, file_url, duration_ms, ai_status, ai_decision, ai_risk_score, \
                 ai_auto_title, ai_auto_description, ai_auto_tags, ai_search_text, \
                 ai_model_versions, created_at, updated_at) \
             VALUES ($1, $2, $3, 'done', $4, $5, $6, $7, $8, $9, $10, $11, $11) \
             ON CONFLICT (file_hash) DO UPDATE SET \
                 file_url = COALESCE(meme_assets.file_url, EXCLUDED.file_url), \
                 duration_ms = COALESCE(meme_assets.duration_ms, EXCLUDED.duration_ms), \
                 ai_status = 'done', \
                 ai_decision = EXCLUDED.ai_decision, \
                 ai_risk_score = EXCLUDED.ai_risk_score, \
                 ai_auto_title = EXCLUDED.ai_auto_title, \
                 ai_auto_description = EXCLUDED.ai_auto_description, \
                 ai_auto_tags = EXCLUDED.ai_auto_tags, \
                 ai_search_text = EXCLUDED.ai_search_text, \
                 ai_model_versions = EXCLUDED.ai_model_versions, \
                 updated_at = EXCLUDED.updated_at \
             RETURNING id",
        )
        .bind(&seed.file_hash)
        .bind(&seed.file_url)
        .bind(seed.duration_ms)
        .bind(update.decision.as_str())
        .bind(update.risk_score)
        .bind(&update.auto_title)
        .bind(&update.auto_description)
        .bind(&update.auto_tags)
        .bind(&update.search_text)
        .bind(&update.model_versions)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(id))
    }

    async fn save_submission_ai(
        &self,
        token: &ClaimToken,
        update: &SubmissionAiUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE meme_submissions SET \
                 ai_status = 'done', ai_decision = $3, ai_risk_score = $4, ai_labels = $5, \
                 ai_transcript = $6, ai_auto_tags = $7, ai_auto_description = $8, \
                 ai_model_versions = $9, file_hash = $10, \
                 meme_asset_id = COALESCE(meme_asset_id, $11), \
                 ai_error = NULL, ai_next_retry_at = NULL, updated_at = $12 \
             WHERE id = $1 AND ai_status = 'processing' AND ai_last_tried_at = $2",
        )
        .bind(token.submission_id.as_str())
        .bind(token.claimed_at)
        .bind(update.decision.as_str())
        .bind(update.risk_score)
        .bind(&update.labels)
        .bind(&update.transcript)
        .bind(&update.auto_tags)
        .bind(&update.auto_description)
        .bind(&update.model_versions)
        .bind(&update.file_hash)
        .bind(&update.meme_asset_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn sync_listings(
        &self,
        meme_asset_id: &str,
        update: &ListingUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE channel_memes SET \
                 title = CASE WHEN $2::text IS NOT NULL AND btrim(title) = btrim($3) \
                              THEN $2::text ELSE title END, \
                 ai_auto_description = $4, ai_auto_tags = $5, search_text = $6, updated_at = $7 \
             WHERE meme_asset_id = $1",
        )
        .bind(meme_asset_id)
        .bind(&update.title)
        .bind(&update.original_title)
        .bind(&update.auto_description)
        .bind(&update.auto_tags)
        .bind(&update.search_text)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn approve_submission(
        &self,
        submission: &Submission,
        listing: &ChannelListing,
        audit: &AuditEntry,
    ) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let approved = sqlx::query(
            "UPDATE meme_submissions \
             SET status = 'approved', meme_asset_id = COALESCE(meme_asset_id, $2), updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(submission.id.as_str())
        .bind(&listing.meme_asset_id)
        .execute(&mut *tx)
        .await?;

        if approved.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let insert_listing = format!(
            "INSERT INTO channel_memes ({LISTING_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (channel_id, meme_asset_id) DO NOTHING"
        );
        sqlx::query(&insert_listing)
            .bind(&listing.id)
            .bind(&listing.channel_id)
            .bind(&listing.meme_asset_id)
            .bind(&listing.title)
            .bind(&listing.ai_auto_description)
            .bind(&listing.ai_auto_tags)
            .bind(&listing.search_text)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO audit_logs (actor_id, channel_id, action, target_id, details, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&audit.actor_id)
        .bind(&audit.channel_id)
        .bind(&audit.action)
        .bind(&audit.target_id)
        .bind(&audit.details)
        .bind(audit.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_submission(&self, id: &SubmissionId) -> DbResult<Option<Submission>> {
        let query = format!(
            "SELECT {SUBMISSION_COLUMNS} \
             FROM meme_submissions s LEFT JOIN users u ON u.id = s.submitter_id \
             WHERE s.id = $1"
        );
        sqlx::query_as::<_, SubmissionRow>(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Submission::try_from)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eligible_binds_requested_positions() {
        let sql = eligible(2, 3);
        assert!(sql.contains("s.ai_next_retry_at <= $2"));
        assert!(sql.contains("s.ai_last_tried_at < $3"));
        assert!(sql.contains("s.ai_status = 'pending'"));
    }
}
