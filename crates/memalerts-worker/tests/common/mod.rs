//! Fakes and fixtures shared by the worker integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use memalerts_db::{
    lock_key_for_instance, AssetAiUpdate, AssetSeed, AuditEntry, ClaimToken, Claimed, DbError,
    DbResult, FailureUpdate, ListingUpdate, MemoryLocks, MemoryStore, ModerationStore,
    PriorAnalysis, QuarantinePlan, QuarantineWrite, SubmissionAiUpdate,
};
use memalerts_media::{sha256_file, AudioExtraction, MediaError, MediaInfo, MediaResult, MediaToolkit};
use memalerts_ml_client::{
    AnalysisBackend, MetadataHints, MetadataSuggestion, MlError, MlResult, ModerationResult,
    Transcription,
};
use memalerts_models::{ChannelListing, ContentAsset, Submission, SubmissionId};
use memalerts_storage::{ContentStore, StorageError, StorageResult};
use memalerts_worker::{Scheduler, WorkerConfig, WorkerDeps};

/// How the fake backend answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Healthy,
    Quota,
    RegionBlocked,
    MissingCredentials,
    Unavailable,
}

pub struct FakeBackend {
    pub mode: Mutex<BackendMode>,
    pub transcript: String,
    pub risk_score: Mutex<f64>,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub title: Option<String>,
    pub transcribe_calls: AtomicUsize,
    pub moderate_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
    pub last_frames: Mutex<usize>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            mode: Mutex::new(BackendMode::Healthy),
            transcript: "кот готовит борщ на кухне".to_string(),
            risk_score: Mutex::new(0.1),
            tags: vec!["кот".to_string(), "кухня".to_string(), "борщ".to_string()],
            description: Some("Кот-повар варит борщ".to_string()),
            title: Some("Кот варит борщ".to_string()),
            transcribe_calls: AtomicUsize::new(0),
            moderate_calls: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
            last_frames: Mutex::new(0),
        }
    }
}

impl FakeBackend {
    pub fn set_mode(&self, mode: BackendMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_risk(&self, risk: f64) {
        *self.risk_score.lock().unwrap() = risk;
    }

    pub fn total_calls(&self) -> usize {
        self.transcribe_calls.load(Ordering::SeqCst)
            + self.moderate_calls.load(Ordering::SeqCst)
            + self.metadata_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> MlResult<()> {
        match *self.mode.lock().unwrap() {
            BackendMode::Healthy => Ok(()),
            BackendMode::Quota => Err(MlError::QuotaExceeded("insufficient_quota".into())),
            BackendMode::RegionBlocked => Err(MlError::RegionBlocked(
                "unsupported_country_region_territory".into(),
            )),
            BackendMode::MissingCredentials => Err(MlError::MissingCredentials("401".into())),
            BackendMode::Unavailable => Err(MlError::ServiceUnavailable("503".into())),
        }
    }
}

#[async_trait]
impl AnalysisBackend for FakeBackend {
    async fn transcribe(&self, _audio: &Path) -> MlResult<Transcription> {
        self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(Transcription {
            text: self.transcript.clone(),
            language: Some("ru".to_string()),
            model: Some("whisper-test".to_string()),
        })
    }

    async fn moderate_text(&self, _text: &str) -> MlResult<ModerationResult> {
        self.moderate_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(ModerationResult {
            risk_score: *self.risk_score.lock().unwrap(),
            labels: vec!["test".to_string()],
            model: Some("moderation-test".to_string()),
        })
    }

    async fn synthesize_metadata(&self, hints: &MetadataHints) -> MlResult<MetadataSuggestion> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        *self.last_frames.lock().unwrap() = hints.frames.len();
        Ok(MetadataSuggestion {
            title: self.title.clone(),
            tags: self.tags.clone(),
            description: self.description.clone(),
            model: Some("vision-test".to_string()),
        })
    }
}

/// Media toolkit that never shells out.
pub struct FakeMedia {
    pub info: Mutex<MediaInfo>,
    pub hash_calls: AtomicUsize,
    pub probe_delay: Mutex<Duration>,
}

impl Default for FakeMedia {
    fn default() -> Self {
        Self {
            info: Mutex::new(MediaInfo {
                duration: 12.5,
                width: 1280,
                height: 720,
                has_video: true,
                has_audio: true,
                size: 1024,
            }),
            hash_calls: AtomicUsize::new(0),
            probe_delay: Mutex::new(Duration::ZERO),
        }
    }
}

impl FakeMedia {
    pub fn without_audio(&self) {
        self.info.lock().unwrap().has_audio = false;
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        *self.probe_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl MediaToolkit for FakeMedia {
    async fn probe(&self, input: &Path) -> MediaResult<MediaInfo> {
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }
        let delay = *self.probe_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.info.lock().unwrap().clone())
    }

    async fn extract_audio(&self, _input: &Path, work_dir: &Path) -> MediaResult<AudioExtraction> {
        if !self.info.lock().unwrap().has_audio {
            return Ok(AudioExtraction::NoAudio);
        }
        let path = work_dir.join("audio.mp3");
        tokio::fs::write(&path, b"fake audio").await?;
        Ok(AudioExtraction::Extracted(path))
    }

    async fn sample_frames(
        &self,
        _input: &Path,
        work_dir: &Path,
        _duration_secs: f64,
        count: usize,
    ) -> MediaResult<Vec<PathBuf>> {
        let mut frames = Vec::new();
        for i in 0..count {
            let path = work_dir.join(format!("frame_{i:03}.jpg"));
            tokio::fs::write(&path, b"jpeg").await?;
            frames.push(path);
        }
        Ok(frames)
    }

    async fn hash_file(&self, input: &Path) -> MediaResult<String> {
        self.hash_calls.fetch_add(1, Ordering::SeqCst);
        sha256_file(input).await
    }
}

/// Content store mapping locators onto files in a temp dir.
#[derive(Default)]
pub struct FakeContent {
    files: Mutex<HashMap<String, PathBuf>>,
}

impl FakeContent {
    pub fn register(&self, locator: &str, path: PathBuf) {
        self.files.lock().unwrap().insert(locator.to_string(), path);
    }
}

#[async_trait]
impl ContentStore for FakeContent {
    async fn resolve_local_path(&self, locator: &str) -> StorageResult<Option<PathBuf>> {
        Ok(self.files.lock().unwrap().get(locator).cloned())
    }

    async fn resolve_hash(&self, _hash: &str) -> StorageResult<Option<PathBuf>> {
        Ok(None)
    }

    async fn download(
        &self,
        locator: &str,
        _dest_dir: &Path,
        _max_bytes: u64,
    ) -> StorageResult<PathBuf> {
        Err(StorageError::not_found(locator))
    }

    async fn exists(&self, locator: &str) -> StorageResult<bool> {
        Ok(self.files.lock().unwrap().contains_key(locator))
    }
}

/// In-memory worker environment.
pub struct Harness {
    pub store: MemoryStore,
    pub backend: Arc<FakeBackend>,
    pub media: Arc<FakeMedia>,
    pub content: Arc<FakeContent>,
    pub locks: MemoryLocks,
    pub config: WorkerConfig,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig {
            initial_delay: Duration::ZERO,
            interval: Duration::from_millis(50),
            work_dir: dir.path().join("work"),
            instance_id: "test-instance".to_string(),
            ..Default::default()
        };
        Self {
            store: MemoryStore::new(),
            backend: Arc::new(FakeBackend::default()),
            media: Arc::new(FakeMedia::default()),
            content: Arc::new(FakeContent::default()),
            locks: MemoryLocks::new(),
            config,
            dir,
        }
    }

    pub fn deps(&self, with_backend: bool) -> WorkerDeps {
        let backend: Option<Arc<dyn AnalysisBackend>> = if with_backend {
            Some(self.backend.clone())
        } else {
            None
        };
        WorkerDeps {
            store: Arc::new(self.store.clone()),
            content: self.content.clone(),
            media: self.media.clone(),
            backend,
            lock: Arc::new(
                self.locks
                    .lock_for(lock_key_for_instance(&self.config.instance_id)),
            ),
        }
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(&self.config, self.deps(true)).unwrap()
    }

    pub fn scheduler_without_backend(&self) -> Scheduler {
        Scheduler::new(&self.config, self.deps(false)).unwrap()
    }

    /// Write a media file with `content` and register it under an upload locator.
    pub fn media_file(&self, name: &str, content: &[u8]) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        let locator = format!("/uploads/memes/{name}");
        self.content.register(&locator, path);
        locator
    }

    /// Insert a pending submission whose media has the given bytes.
    pub async fn submit(&self, title: &str, name: &str, content: &[u8]) -> Submission {
        let mut submission = Submission::new("channel-1", "viewer-1", title);
        submission.file_url = Some(self.media_file(name, content));
        self.store.insert_submission(submission.clone()).await;
        submission
    }
}

/// [`MemoryStore`] whose claims fail with a connection error for chosen rows.
pub struct BrokenClaims {
    pub inner: MemoryStore,
    pub broken: Mutex<HashSet<SubmissionId>>,
}

impl BrokenClaims {
    pub fn new(inner: MemoryStore, broken: &[SubmissionId]) -> Self {
        Self {
            inner,
            broken: Mutex::new(broken.iter().cloned().collect()),
        }
    }

    fn check(&self, id: &SubmissionId) -> DbResult<()> {
        if self.broken.lock().unwrap().contains(id) {
            return Err(DbError::Internal("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ModerationStore for BrokenClaims {
    async fn find_candidates(
        &self,
        now: DateTime<Utc>,
        stuck_before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Submission>> {
        self.inner.find_candidates(now, stuck_before, limit).await
    }

    async fn try_claim(
        &self,
        candidate: &Submission,
        now: DateTime<Utc>,
        stuck_before: DateTime<Utc>,
    ) -> DbResult<Option<Claimed>> {
        self.check(&candidate.id)?;
        self.inner.try_claim(candidate, now, stuck_before).await
    }

    async fn mark_exhausted(
        &self,
        candidate: &Submission,
        now: DateTime<Utc>,
        stuck_before: DateTime<Utc>,
        marker: &str,
    ) -> DbResult<bool> {
        self.check(&candidate.id)?;
        self.inner.mark_exhausted(candidate, now, stuck_before, marker).await
    }

    async fn record_failure(&self, token: &ClaimToken, update: &FailureUpdate) -> DbResult<bool> {
        self.inner.record_failure(token, update).await
    }

    async fn set_file_hash(&self, token: &ClaimToken, file_hash: &str) -> DbResult<()> {
        self.inner.set_file_hash(token, file_hash).await
    }

    async fn find_prior_analyses(
        &self,
        file_hash: &str,
        exclude: &SubmissionId,
    ) -> DbResult<Vec<PriorAnalysis>> {
        self.inner.find_prior_analyses(file_hash, exclude).await
    }

    async fn find_asset_by_hash(&self, file_hash: &str) -> DbResult<Option<ContentAsset>> {
        self.inner.find_asset_by_hash(file_hash).await
    }

    async fn apply_quarantine(
        &self,
        seed: &AssetSeed,
        plan: &QuarantinePlan,
        now: DateTime<Utc>,
    ) -> DbResult<QuarantineWrite> {
        self.inner.apply_quarantine(seed, plan, now).await
    }

    async fn upsert_asset_ai(
        &self,
        token: &ClaimToken,
        seed: &AssetSeed,
        update: &AssetAiUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<Option<String>> {
        self.inner.upsert_asset_ai(token, seed, update, now).await
    }

    async fn save_submission_ai(
        &self,
        token: &ClaimToken,
        update: &SubmissionAiUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.inner.save_submission_ai(token, update, now).await
    }

    async fn sync_listings(
        &self,
        meme_asset_id: &str,
        update: &ListingUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        self.inner.sync_listings(meme_asset_id, update, now).await
    }

    async fn approve_submission(
        &self,
        submission: &Submission,
        listing: &ChannelListing,
        audit: &AuditEntry,
    ) -> DbResult<bool> {
        self.inner.approve_submission(submission, listing, audit).await
    }

    async fn get_submission(&self, id: &SubmissionId) -> DbResult<Option<Submission>> {
        self.inner.get_submission(id).await
    }
}
