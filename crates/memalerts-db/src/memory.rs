//! In-memory implementation of the persistence seams.
//!
//! Each trait call takes the state lock once, which gives the same
//! atomicity as the conditional updates and transactions of the Postgres
//! store. Used by worker tests and local dry runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use memalerts_models::{
    AiStatus, AssetModeration, ChannelListing, ContentAsset, Submission, SubmissionId,
    SubmissionStatus,
};

use crate::error::{DbError, DbResult};
use crate::lock::{TickLease, TickLock};
use crate::store::{
    AssetAiUpdate, AssetSeed, AuditEntry, ClaimToken, Claimed, FailureUpdate, ListingUpdate,
    ModerationStore, PriorAnalysis, QuarantinePlan, QuarantineWrite, SubmissionAiUpdate,
};

#[derive(Default)]
struct State {
    submissions: BTreeMap<String, Submission>,
    /// Keyed by content hash
    assets: HashMap<String, ContentAsset>,
    listings: Vec<ChannelListing>,
    audit: Vec<AuditEntry>,
    /// Submission id -> last update time, for newest-first ordering
    updated_at: HashMap<String, DateTime<Utc>>,
}

impl State {
    fn owned_mut(&mut self, token: &ClaimToken) -> Option<&mut Submission> {
        self.submissions
            .get_mut(token.submission_id.as_str())
            .filter(|s| {
                s.ai_status == AiStatus::Processing && s.ai_last_tried_at == Some(token.claimed_at)
            })
    }

    fn touch(&mut self, id: &str, now: DateTime<Utc>) {
        self.updated_at.insert(id.to_string(), now);
    }
}

/// Moderation store kept entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_submission(&self, submission: Submission) {
        let mut state = self.state.lock().await;
        let id = submission.id.as_str().to_string();
        let at = submission.created_at;
        state.submissions.insert(id.clone(), submission);
        state.touch(&id, at);
    }

    pub async fn insert_asset(&self, asset: ContentAsset) {
        let mut state = self.state.lock().await;
        state.assets.insert(asset.file_hash.clone(), asset);
    }

    pub async fn insert_listing(&self, listing: ChannelListing) {
        self.state.lock().await.listings.push(listing);
    }

    pub async fn submission(&self, id: &SubmissionId) -> Option<Submission> {
        self.state.lock().await.submissions.get(id.as_str()).cloned()
    }

    pub async fn update_submission<F>(&self, id: &SubmissionId, f: F)
    where
        F: FnOnce(&mut Submission),
    {
        if let Some(s) = self.state.lock().await.submissions.get_mut(id.as_str()) {
            f(s);
        }
    }

    pub async fn asset(&self, file_hash: &str) -> Option<ContentAsset> {
        self.state.lock().await.assets.get(file_hash).cloned()
    }

    pub async fn listings(&self) -> Vec<ChannelListing> {
        self.state.lock().await.listings.clone()
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit.clone()
    }
}

fn new_asset(seed: &AssetSeed, moderation: AssetModeration, now: DateTime<Utc>) -> ContentAsset {
    ContentAsset {
        id: Uuid::new_v4().to_string(),
        file_hash: seed.file_hash.clone(),
        file_url: seed.file_url.clone(),
        duration_ms: seed.duration_ms,
        moderation,
        ai_status: AiStatus::Pending,
        ai_decision: None,
        ai_risk_score: None,
        ai_auto_title: None,
        ai_auto_description: None,
        ai_auto_tags: Vec::new(),
        ai_search_text: None,
        ai_model_versions: None,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl ModerationStore for MemoryStore {
    async fn find_candidates(
        &self,
        now: DateTime<Utc>,
        stuck_before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Submission>> {
        let state = self.state.lock().await;
        let mut candidates: Vec<Submission> = state
            .submissions
            .values()
            .filter(|s| s.is_claimable(now, stuck_before))
            .cloned()
            .collect();
        candidates.sort_by_key(|s| s.created_at);
        candidates.truncate(limit.max(0) as usize);
        Ok(candidates)
    }

    async fn try_claim(
        &self,
        candidate: &Submission,
        now: DateTime<Utc>,
        stuck_before: DateTime<Utc>,
    ) -> DbResult<Option<Claimed>> {
        let mut state = self.state.lock().await;
        let Some(row) = state.submissions.get_mut(candidate.id.as_str()) else {
            return Ok(None);
        };

        if row.ai_retry_count != candidate.ai_retry_count || !row.is_claimable(now, stuck_before) {
            return Ok(None);
        }

        if row.ai_status == AiStatus::Processing {
            row.ai_retry_count += 1;
        }
        row.ai_status = AiStatus::Processing;
        row.ai_last_tried_at = Some(now);
        row.ai_next_retry_at = None;

        let submission = row.clone();
        state.touch(candidate.id.as_str(), now);

        Ok(Some(Claimed {
            token: ClaimToken {
                submission_id: submission.id.clone(),
                claimed_at: now,
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
        let mut state = self.state.lock().await;
        let Some(row) = state.submissions.get_mut(candidate.id.as_str()) else {
            return Ok(false);
        };

        if row.ai_retry_count != candidate.ai_retry_count || !row.is_claimable(now, stuck_before) {
            return Ok(false);
        }

        row.ai_status = AiStatus::FailedFinal;
        row.ai_error = Some(marker.to_string());
        row.ai_next_retry_at = None;
        state.touch(candidate.id.as_str(), now);
        Ok(true)
    }

    async fn record_failure(&self, token: &ClaimToken, update: &FailureUpdate) -> DbResult<bool> {
        let mut state = self.state.lock().await;
        let Some(row) = state.owned_mut(token) else {
            return Ok(false);
        };

        row.ai_status = update.status;
        row.ai_retry_count = update.retry_count;
        row.ai_next_retry_at = update.next_retry_at;
        row.ai_error = Some(update.error.clone());
        Ok(true)
    }

    async fn set_file_hash(&self, token: &ClaimToken, file_hash: &str) -> DbResult<()> {
        let mut state = self.state.lock().await;
        if let Some(row) = state.submissions.get_mut(token.submission_id.as_str()) {
            if row.ai_last_tried_at == Some(token.claimed_at) {
                row.file_hash = Some(file_hash.to_string());
            }
        }
        Ok(())
    }

    async fn find_prior_analyses(
        &self,
        file_hash: &str,
        exclude: &SubmissionId,
    ) -> DbResult<Vec<PriorAnalysis>> {
        let state = self.state.lock().await;
        let mut priors = Vec::new();

        if let Some(asset) = state
            .assets
            .get(file_hash)
            .filter(|a| a.ai_status == AiStatus::Done)
        {
            priors.push(PriorAnalysis {
                source: format!("asset:{}", asset.id),
                source_title: None,
                decision: asset.ai_decision,
                risk_score: asset.ai_risk_score,
                labels: Vec::new(),
                transcript: None,
                auto_title: asset.ai_auto_title.clone(),
                auto_tags: asset.ai_auto_tags.clone(),
                auto_description: asset.ai_auto_description.clone(),
                search_text: asset.ai_search_text.clone(),
                model_versions: asset.ai_model_versions.clone(),
            });
        }

        let mut siblings: Vec<&Submission> = state
            .submissions
            .values()
            .filter(|s| {
                s.id != *exclude
                    && s.ai_status == AiStatus::Done
                    && s.file_hash.as_deref() == Some(file_hash)
            })
            .collect();
        siblings.sort_by_key(|s| std::cmp::Reverse(state.updated_at.get(s.id.as_str()).copied()));

        priors.extend(siblings.into_iter().take(5).map(|s| PriorAnalysis {
            source: format!("submission:{}", s.id),
            source_title: Some(s.title.clone()),
            decision: s.ai_decision,
            risk_score: s.ai_risk_score,
            labels: s.ai_labels.clone(),
            transcript: s.ai_transcript.clone(),
            auto_title: None,
            auto_tags: s.ai_auto_tags.clone(),
            auto_description: s.ai_auto_description.clone(),
            search_text: None,
            model_versions: s.ai_model_versions.clone(),
        }));

        Ok(priors)
    }

    async fn find_asset_by_hash(&self, file_hash: &str) -> DbResult<Option<ContentAsset>> {
        Ok(self.state.lock().await.assets.get(file_hash).cloned())
    }

    async fn apply_quarantine(
        &self,
        seed: &AssetSeed,
        plan: &QuarantinePlan,
        now: DateTime<Utc>,
    ) -> DbResult<QuarantineWrite> {
        let mut state = self.state.lock().await;

        match state.assets.get_mut(&seed.file_hash) {
            Some(asset) => match plan(Some(&asset.moderation)) {
                Some(next) if next != asset.moderation => {
                    asset.moderation = next;
                    asset.updated_at = now;
                    Ok(QuarantineWrite::Updated)
                }
                _ => Ok(QuarantineWrite::Unchanged),
            },
            None => match plan(None) {
                Some(moderation) => {
                    let asset = new_asset(seed, moderation, now);
                    state.assets.insert(seed.file_hash.clone(), asset);
                    Ok(QuarantineWrite::Created)
                }
                None => Ok(QuarantineWrite::Unchanged),
            },
        }
    }

    async fn upsert_asset_ai(
        &self,
        token: &ClaimToken,
        seed: &AssetSeed,
        update: &AssetAiUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<Option<String>> {
        let mut state = self.state.lock().await;
        if state.owned_mut(token).is_none() {
            return Ok(None);
        }
        let asset = state
            .assets
            .entry(seed.file_hash.clone())
            .or_insert_with(|| new_asset(seed, AssetModeration::default(), now));

        if asset.file_url.is_none() {
            asset.file_url = seed.file_url.clone();
        }
        if asset.duration_ms.is_none() {
            asset.duration_ms = seed.duration_ms;
        }
        asset.ai_status = AiStatus::Done;
        asset.ai_decision = Some(update.decision);
        asset.ai_risk_score = Some(update.risk_score);
        asset.ai_auto_title = update.auto_title.clone();
        asset.ai_auto_description = update.auto_description.clone();
        asset.ai_auto_tags = update.auto_tags.clone();
        asset.ai_search_text = update.search_text.clone();
        asset.ai_model_versions = Some(update.model_versions.clone());
        asset.updated_at = now;

        Ok(Some(asset.id.clone()))
    }

    async fn save_submission_ai(
        &self,
        token: &ClaimToken,
        update: &SubmissionAiUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let mut state = self.state.lock().await;
        let Some(row) = state.owned_mut(token) else {
            return Ok(false);
        };

        row.ai_status = AiStatus::Done;
        row.ai_decision = Some(update.decision);
        row.ai_risk_score = Some(update.risk_score);
        row.ai_labels = update.labels.clone();
        row.ai_transcript = update.transcript.clone();
        row.ai_auto_tags = update.auto_tags.clone();
        row.ai_auto_description = update.auto_description.clone();
        row.ai_model_versions = Some(update.model_versions.clone());
        row.file_hash = Some(update.file_hash.clone());
        if row.meme_asset_id.is_none() {
            row.meme_asset_id = update.meme_asset_id.clone();
        }
        row.ai_error = None;
        row.ai_next_retry_at = None;

        state.touch(token.submission_id.as_str(), now);
        Ok(true)
    }

    async fn sync_listings(
        &self,
        meme_asset_id: &str,
        update: &ListingUpdate,
        _now: DateTime<Utc>,
    ) -> DbResult<u64> {
        let mut state = self.state.lock().await;
        let mut touched = 0;

        for listing in state
            .listings
            .iter_mut()
            .filter(|l| l.meme_asset_id == meme_asset_id)
        {
            if let Some(title) = &update.title {
                if listing.title_is_untouched(&update.original_title) {
                    listing.title = title.clone();
                }
            }
            listing.ai_auto_description = update.auto_description.clone();
            listing.ai_auto_tags = update.auto_tags.clone();
            listing.search_text = update.search_text.clone();
            touched += 1;
        }

        Ok(touched)
    }

    async fn approve_submission(
        &self,
        submission: &Submission,
        listing: &ChannelListing,
        audit: &AuditEntry,
    ) -> DbResult<bool> {
        let mut state = self.state.lock().await;
        let Some(row) = state.submissions.get_mut(submission.id.as_str()) else {
            return Err(DbError::not_found(submission.id.to_string()));
        };

        if row.status != SubmissionStatus::Pending {
            return Ok(false);
        }

        row.status = SubmissionStatus::Approved;
        if row.meme_asset_id.is_none() {
            row.meme_asset_id = Some(listing.meme_asset_id.clone());
        }

        let exists = state
            .listings
            .iter()
            .any(|l| l.channel_id == listing.channel_id && l.meme_asset_id == listing.meme_asset_id);
        if !exists {
            state.listings.push(listing.clone());
        }
        state.audit.push(audit.clone());
        Ok(true)
    }

    async fn get_submission(&self, id: &SubmissionId) -> DbResult<Option<Submission>> {
        Ok(self.submission(id).await)
    }
}

/// Process-wide registry of held in-memory lock keys.
#[derive(Clone, Default)]
pub struct MemoryLocks {
    held: Arc<StdMutex<HashSet<i64>>>,
}

impl MemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, key: i64) -> MemoryLock {
        MemoryLock {
            held: self.held.clone(),
            key,
        }
    }

    pub fn is_held(&self, key: i64) -> bool {
        self.held.lock().map(|h| h.contains(&key)).unwrap_or(false)
    }
}

/// [`TickLock`] over a [`MemoryLocks`] registry.
#[derive(Clone)]
pub struct MemoryLock {
    held: Arc<StdMutex<HashSet<i64>>>,
    key: i64,
}

#[async_trait]
impl TickLock for MemoryLock {
    async fn try_acquire(&self) -> DbResult<Option<Box<dyn TickLease>>> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| DbError::Internal("lock registry poisoned".into()))?;
        if !held.insert(self.key) {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryLease {
            held: self.held.clone(),
            key: self.key,
        })))
    }

    fn key(&self) -> i64 {
        self.key
    }
}

struct MemoryLease {
    held: Arc<StdMutex<HashSet<i64>>>,
    key: i64,
}

impl MemoryLease {
    fn unlock(&self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.key);
        }
    }
}

#[async_trait]
impl TickLease for MemoryLease {
    async fn release(self: Box<Self>) -> DbResult<()> {
        self.unlock();
        Ok(())
    }
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        self.unlock();
    }
}
