//! Candidate selection and compare-and-set claiming.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use memalerts_db::{Claimed, ModerationStore};
use memalerts_models::Submission;

use crate::error::WorkerResult;
use crate::metrics;
use crate::retry::BackoffPolicy;

/// Error stored on rows moved to `failed_final` at claim time.
pub const EXHAUSTED_MARKER: &str = "retry budget exhausted";

/// Result of trying to claim one candidate.
#[derive(Debug)]
pub enum ClaimResult {
    /// This worker owns the submission
    Claimed(Box<Claimed>),
    /// Retry budget used up; moved to `failed_final`
    Exhausted,
    /// Another worker got there first, or the row changed
    Lost,
}

/// Finds eligible submissions and claims them one at a time.
#[derive(Clone)]
pub struct JobClaimer {
    store: Arc<dyn ModerationStore>,
    batch_size: usize,
    stuck_threshold: Duration,
    backoff: BackoffPolicy,
}

impl JobClaimer {
    pub fn new(
        store: Arc<dyn ModerationStore>,
        batch_size: usize,
        stuck_threshold: Duration,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            batch_size,
            stuck_threshold,
            backoff,
        }
    }

    /// Claims older than this are abandoned.
    pub fn stuck_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.stuck_threshold)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Eligible submissions, oldest first.
    pub async fn candidates(&self, now: DateTime<Utc>) -> WorkerResult<Vec<Submission>> {
        let limit = i64::try_from(self.batch_size).unwrap_or(i64::MAX);
        Ok(self
            .store
            .find_candidates(now, self.stuck_before(now), limit)
            .await?)
    }

    /// Claim one candidate.
    ///
    /// Reclaiming a stuck row counts as a retry, so a row that keeps
    /// crashing its worker still reaches `failed_final`.
    pub async fn claim(&self, candidate: &Submission, now: DateTime<Utc>) -> WorkerResult<ClaimResult> {
        let stuck_before = self.stuck_before(now);
        let effective_count = if candidate.is_stuck(stuck_before) {
            candidate.ai_retry_count.saturating_add(1)
        } else {
            candidate.ai_retry_count
        };

        if self.backoff.is_exhausted(effective_count) {
            let marked = self
                .store
                .mark_exhausted(candidate, now, stuck_before, EXHAUSTED_MARKER)
                .await?;
            let result = if marked {
                metrics::record_claim("exhausted");
                ClaimResult::Exhausted
            } else {
                metrics::record_claim("lost");
                ClaimResult::Lost
            };
            return Ok(result);
        }

        match self.store.try_claim(candidate, now, stuck_before).await? {
            Some(claimed) => {
                metrics::record_claim("claimed");
                Ok(ClaimResult::Claimed(Box::new(claimed)))
            }
            None => {
                debug!(submission_id = %candidate.id, "Claim lost to another worker");
                metrics::record_claim("lost");
                Ok(ClaimResult::Lost)
            }
        }
    }
}
