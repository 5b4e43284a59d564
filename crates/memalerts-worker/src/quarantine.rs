//! Pool quarantine for risky content.
//!
//! Medium and high decisions hide the shared asset from the pool; high
//! additionally schedules a purge after a grace period. The pipeline only
//! ever touches moderation state it owns: anything a human decided is left
//! alone, and a low decision never lifts an existing restriction.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use memalerts_db::{AssetSeed, ModerationStore, QuarantinePlan, QuarantineWrite};
use memalerts_models::{AiDecision, AssetModeration, PoolVisibility, AI_REASON_PREFIX};

use crate::error::WorkerResult;
use crate::metrics;

/// Hide reason for an AI-owned restriction.
pub fn ai_reason(decision: AiDecision) -> String {
    format!("{AI_REASON_PREFIX}{}", decision.as_str())
}

/// Compute the new moderation state, or `None` to leave the asset alone.
pub fn plan_quarantine(
    decision: AiDecision,
    current: Option<&AssetModeration>,
    now: DateTime<Utc>,
    quarantine_days: i64,
) -> Option<AssetModeration> {
    if !decision.restricts_pool() {
        return None;
    }
    if current.is_some_and(|c| c.has_human_decision()) {
        return None;
    }

    let mut next = current.cloned().unwrap_or_default();
    let reason = ai_reason(decision);

    if next.pool_visibility != PoolVisibility::Hidden {
        next.pool_visibility = PoolVisibility::Hidden;
        next.pool_hidden_at = Some(now);
    } else if next.pool_hidden_at.is_none() {
        next.pool_hidden_at = Some(now);
    }
    next.pool_hidden_by_user_id = None;

    // A high hide is never downgraded by a later medium analysis.
    let keeps_high = next.pool_hidden_reason.as_deref() == Some(ai_reason(AiDecision::High).as_str());
    if decision == AiDecision::High || !keeps_high {
        next.pool_hidden_reason = Some(reason.clone());
    }

    if decision == AiDecision::High && next.purge_requested_at.is_none() {
        next.purge_requested_at = Some(now);
        next.purge_not_before = Some(purge_deadline(now, quarantine_days));
        next.purge_reason = Some(reason);
        next.purge_by_user_id = None;
    }

    Some(next)
}

/// Earliest purge time; saturates instead of overflowing.
fn purge_deadline(now: DateTime<Utc>, quarantine_days: i64) -> DateTime<Utc> {
    Duration::try_days(quarantine_days)
        .and_then(|grace| now.checked_add_signed(grace))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Applies the quarantine plan through the store's transaction.
#[derive(Clone)]
pub struct QuarantineManager {
    store: Arc<dyn ModerationStore>,
    quarantine_days: i64,
}

impl QuarantineManager {
    pub fn new(store: Arc<dyn ModerationStore>, quarantine_days: i64) -> Self {
        Self {
            store,
            quarantine_days,
        }
    }

    /// Apply a decision to the asset behind `seed`.
    pub async fn apply(
        &self,
        decision: AiDecision,
        seed: &AssetSeed,
        now: DateTime<Utc>,
    ) -> WorkerResult<QuarantineWrite> {
        if !decision.restricts_pool() {
            return Ok(QuarantineWrite::Unchanged);
        }

        let days = self.quarantine_days;
        let plan: Box<QuarantinePlan> =
            Box::new(move |current| plan_quarantine(decision, current, now, days));
        let write = self.store.apply_quarantine(seed, plan.as_ref(), now).await?;

        metrics::record_quarantine_write(match write {
            QuarantineWrite::Created => "created",
            QuarantineWrite::Updated => "updated",
            QuarantineWrite::Unchanged => "unchanged",
        });
        Ok(write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memalerts_db::MemoryStore;

    #[test]
    fn test_low_never_mutates() {
        let now = Utc::now();
        assert_eq!(plan_quarantine(AiDecision::Low, None, now, 14), None);

        let hidden = plan_quarantine(AiDecision::Medium, None, now, 14).unwrap();
        assert_eq!(plan_quarantine(AiDecision::Low, Some(&hidden), now, 14), None);
    }

    #[test]
    fn test_medium_hides_without_purge() {
        let now = Utc::now();
        let next = plan_quarantine(AiDecision::Medium, None, now, 14).unwrap();
        assert_eq!(next.pool_visibility, PoolVisibility::Hidden);
        assert_eq!(next.pool_hidden_reason.as_deref(), Some("ai:medium"));
        assert_eq!(next.pool_hidden_at, Some(now));
        assert_eq!(next.purge_requested_at, None);
        assert!(next.is_ai_owned());
    }

    #[test]
    fn test_high_schedules_purge() {
        let now = Utc::now();
        let next = plan_quarantine(AiDecision::High, None, now, 14).unwrap();
        assert_eq!(next.pool_hidden_reason.as_deref(), Some("ai:high"));
        assert_eq!(next.purge_requested_at, Some(now));
        assert_eq!(next.purge_not_before, Some(now + Duration::days(14)));
        assert_eq!(next.purge_reason.as_deref(), Some("ai:high"));
        assert!(next.is_ai_owned());
    }

    #[test]
    fn test_human_decision_is_preserved() {
        let now = Utc::now();
        let human = AssetModeration {
            pool_visibility: PoolVisibility::Hidden,
            pool_hidden_at: Some(now - Duration::days(1)),
            pool_hidden_reason: Some("dmca".to_string()),
            pool_hidden_by_user_id: Some("mod-1".to_string()),
            ..Default::default()
        };
        assert_eq!(plan_quarantine(AiDecision::High, Some(&human), now, 14), None);
    }

    #[test]
    fn test_rehide_keeps_original_timestamps() {
        let first = Utc::now() - Duration::hours(3);
        let existing = plan_quarantine(AiDecision::High, None, first, 14).unwrap();

        let now = Utc::now();
        let next = plan_quarantine(AiDecision::High, Some(&existing), now, 14).unwrap();
        assert_eq!(next, existing);
    }

    #[test]
    fn test_medium_does_not_downgrade_high() {
        let first = Utc::now() - Duration::hours(3);
        let existing = plan_quarantine(AiDecision::High, None, first, 14).unwrap();

        let next = plan_quarantine(AiDecision::Medium, Some(&existing), Utc::now(), 14).unwrap();
        assert_eq!(next.pool_hidden_reason.as_deref(), Some("ai:high"));
        assert_eq!(next.purge_requested_at, Some(first));
    }

    #[test]
    fn test_visible_asset_is_ai_owned_and_gets_hidden() {
        let now = Utc::now();
        let visible = AssetModeration::default();
        let next = plan_quarantine(AiDecision::Medium, Some(&visible), now, 7).unwrap();
        assert_eq!(next.pool_visibility, PoolVisibility::Hidden);
    }

    #[test]
    fn test_huge_grace_period_saturates() {
        let now = Utc::now();
        let next = plan_quarantine(AiDecision::High, None, now, i64::MAX).unwrap();
        assert_eq!(next.purge_not_before, Some(DateTime::<Utc>::MAX_UTC));
        assert_eq!(next.purge_requested_at, Some(now));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_duplicates_converge_on_one_hidden_asset() {
        for round in 0..20 {
            let store = MemoryStore::new();
            let manager = QuarantineManager::new(Arc::new(store.clone()), 14);
            let seed = AssetSeed {
                file_hash: format!("{round:064x}"),
                file_url: Some("/uploads/memes/dup.mp4".to_string()),
                duration_ms: Some(4000),
            };
            let now = Utc::now();

            let medium = {
                let (manager, seed) = (manager.clone(), seed.clone());
                tokio::spawn(async move { manager.apply(AiDecision::Medium, &seed, now).await })
            };
            let high = {
                let (manager, seed) = (manager.clone(), seed.clone());
                tokio::spawn(async move { manager.apply(AiDecision::High, &seed, now).await })
            };
            let writes = [medium.await.unwrap().unwrap(), high.await.unwrap().unwrap()];

            let created = writes
                .iter()
                .filter(|w| **w == QuarantineWrite::Created)
                .count();
            assert_eq!(created, 1, "round {round}: {writes:?}");

            let asset = store.asset(&seed.file_hash).await.unwrap();
            let moderation = &asset.moderation;
            assert_eq!(moderation.pool_visibility, PoolVisibility::Hidden);
            assert_eq!(moderation.pool_hidden_reason.as_deref(), Some("ai:high"));
            assert_eq!(moderation.purge_reason.as_deref(), Some("ai:high"));
            assert_eq!(moderation.purge_not_before, Some(now + Duration::days(14)));
        }
    }
}
