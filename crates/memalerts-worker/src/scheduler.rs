//! Tick scheduler.
//!
//! Each tick takes the per-instance advisory lock, claims candidates one at
//! a time and processes them sequentially. A tick never overlaps another
//! tick of the same process, and the lock keeps instances of the same
//! deployment from working the queue at once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use memalerts_db::{ModerationStore, TickLock};
use memalerts_media::MediaToolkit;
use memalerts_ml_client::AnalysisBackend;
use memalerts_storage::ContentStore;

use crate::claimer::{ClaimResult, JobClaimer};
use crate::config::WorkerConfig;
use crate::dedup::ReusePolicy;
use crate::error::{WorkerError, WorkerResult};
use crate::hasher::ContentHasher;
use crate::heuristics::KeywordHeuristics;
use crate::metrics;
use crate::pipeline::{AnalysisPipeline, PipelineSettings};
use crate::processor::{ItemStatus, SubmissionProcessor};
use crate::publisher::{ApprovalPolicy, ResultPublisher};
use crate::quarantine::QuarantineManager;
use crate::retry::{BackoffPolicy, FailureTracker};
use crate::source::MediaResolver;

/// External services the worker runs against.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn ModerationStore>,
    pub content: Arc<dyn ContentStore>,
    pub media: Arc<dyn MediaToolkit>,
    /// `None` when no analysis backend is configured
    pub backend: Option<Arc<dyn AnalysisBackend>>,
    pub lock: Arc<dyn TickLock>,
}

/// Why a tick did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickSkip {
    /// A tick of this process is still running
    AlreadyRunning,
    /// Another instance holds the lock
    LockHeld,
}

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub skipped: Option<TickSkip>,
    pub candidates: usize,
    pub claimed: usize,
    pub done: usize,
    pub reused: usize,
    pub auto_approved: usize,
    pub failed: usize,
    pub failed_final: usize,
    pub exhausted: usize,
    pub lost: usize,
    pub claim_errors: usize,
}

impl TickReport {
    fn skipped(reason: TickSkip) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    fn record(&mut self, status: &ItemStatus) {
        match status {
            ItemStatus::Done {
                reused,
                auto_approved,
                ..
            } => {
                self.done += 1;
                self.reused += usize::from(*reused);
                self.auto_approved += usize::from(*auto_approved);
            }
            ItemStatus::Failed => self.failed += 1,
            ItemStatus::FailedFinal => self.failed_final += 1,
            ItemStatus::Lost => self.lost += 1,
        }
    }
}

/// Process-local scheduler state, shared with status reporting.
#[derive(Debug, Default)]
pub struct SchedulerState {
    running: AtomicBool,
    ticks: AtomicU64,
    skipped: AtomicU64,
    claimed: AtomicU64,
    processed: AtomicU64,
    reused: AtomicU64,
    failed: AtomicU64,
    failed_final: AtomicU64,
    last_run: Mutex<LastRun>,
}

#[derive(Debug, Default, Clone)]
struct LastRun {
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// Point-in-time copy of [`SchedulerState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSnapshot {
    pub running: bool,
    pub ticks: u64,
    pub skipped: u64,
    pub claimed: u64,
    pub processed: u64,
    pub reused: u64,
    pub failed: u64,
    pub failed_final: u64,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SchedulerState {
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let last = self
            .last_run
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default();
        SchedulerSnapshot {
            running: self.running.load(Ordering::SeqCst),
            ticks: self.ticks.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            claimed: self.claimed.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            reused: self.reused.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            failed_final: self.failed_final.load(Ordering::SeqCst),
            last_started_at: last.started_at,
            last_finished_at: last.finished_at,
            last_error: last.error,
        }
    }

    fn try_enter(self: &Arc<Self>) -> Option<RunningGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunningGuard {
                state: Arc::clone(self),
            })
    }

    fn start_tick(&self) {
        if let Ok(mut last) = self.last_run.lock() {
            last.started_at = Some(Utc::now());
        }
    }

    fn finish_tick(&self, report: &TickReport) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        if report.skipped.is_some() {
            self.skipped.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.claimed.fetch_add(report.claimed as u64, Ordering::SeqCst);
        self.processed
            .fetch_add((report.done + report.failed + report.failed_final) as u64, Ordering::SeqCst);
        self.reused.fetch_add(report.reused as u64, Ordering::SeqCst);
        self.failed.fetch_add(report.failed as u64, Ordering::SeqCst);
        self.failed_final
            .fetch_add((report.failed_final + report.exhausted) as u64, Ordering::SeqCst);
        if let Ok(mut last) = self.last_run.lock() {
            last.finished_at = Some(Utc::now());
            last.error = None;
        }
    }

    fn fail_tick(&self, error: &WorkerError) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_run.lock() {
            last.finished_at = Some(Utc::now());
            last.error = Some(error.to_string());
        }
    }
}

/// Clears the single-flight flag when the tick ends, even on panic.
struct RunningGuard {
    state: Arc<SchedulerState>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
    }
}

/// Periodic moderation scheduler.
pub struct Scheduler {
    claimer: JobClaimer,
    processor: SubmissionProcessor,
    lock: Arc<dyn TickLock>,
    state: Arc<SchedulerState>,
    interval: Duration,
    initial_delay: Duration,
}

impl Scheduler {
    /// Wire the pipeline from configuration and external services.
    pub fn new(config: &WorkerConfig, deps: WorkerDeps) -> WorkerResult<Self> {
        config.validate()?;

        let backoff = BackoffPolicy::new(config.retry_base, config.retry_max, config.max_retries);
        let heuristics = KeywordHeuristics::new(
            &config.high_risk_keywords,
            &config.medium_risk_keywords,
            &config.placeholder_words,
        )?;

        let processor = SubmissionProcessor {
            store: Arc::clone(&deps.store),
            resolver: MediaResolver::new(deps.content, config.max_download_bytes),
            hasher: ContentHasher::new(
                Arc::clone(&deps.media),
                config.hash_concurrency,
                config.hash_timeout,
            ),
            pipeline: AnalysisPipeline::new(
                deps.backend,
                deps.media,
                heuristics,
                PipelineSettings::from(config),
            ),
            reuse: ReusePolicy::new(&config.placeholder_words),
            quarantine: QuarantineManager::new(Arc::clone(&deps.store), config.quarantine_days),
            publisher: ResultPublisher::new(Arc::clone(&deps.store), ApprovalPolicy::from(config)),
            backoff: backoff.clone(),
            work_dir: config.work_dir.clone(),
            item_timeout: config.item_timeout,
            instance_id: config.instance_id.clone(),
        };

        Ok(Self {
            claimer: JobClaimer::new(deps.store, config.batch_size, config.stuck_threshold, backoff),
            processor,
            lock: deps.lock,
            state: Arc::new(SchedulerState::default()),
            interval: config.interval,
            initial_delay: config.initial_delay,
        })
    }

    pub fn state(&self) -> Arc<SchedulerState> {
        Arc::clone(&self.state)
    }

    /// Run a single tick.
    pub async fn run_once(&self) -> WorkerResult<TickReport> {
        self.tick(None).await
    }

    async fn tick(&self, shutdown: Option<&watch::Receiver<bool>>) -> WorkerResult<TickReport> {
        let started = Instant::now();

        let Some(_guard) = self.state.try_enter() else {
            debug!("Previous tick still running, skipping");
            let report = TickReport::skipped(TickSkip::AlreadyRunning);
            self.state.finish_tick(&report);
            metrics::record_tick("busy", started.elapsed().as_secs_f64());
            return Ok(report);
        };

        let lease = match self.lock.try_acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                let e = WorkerError::from(e);
                self.state.fail_tick(&e);
                metrics::record_tick("error", started.elapsed().as_secs_f64());
                return Err(e);
            }
        };
        let Some(lease) = lease else {
            debug!(lock_key = self.lock.key(), "Tick lock held elsewhere, skipping");
            metrics::record_lock_contended();
            let report = TickReport::skipped(TickSkip::LockHeld);
            self.state.finish_tick(&report);
            metrics::record_tick("locked", started.elapsed().as_secs_f64());
            return Ok(report);
        };

        self.state.start_tick();
        let result = self.work(shutdown).await;

        if let Err(e) = lease.release().await {
            warn!("Failed to release tick lock: {}", e);
        }

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                self.state.fail_tick(&e);
                metrics::record_tick("error", started.elapsed().as_secs_f64());
                return Err(e);
            }
        };
        self.state.finish_tick(&report);
        metrics::record_tick("completed", started.elapsed().as_secs_f64());
        if report.candidates > 0 {
            info!(
                candidates = report.candidates,
                done = report.done,
                reused = report.reused,
                failed = report.failed,
                failed_final = report.failed_final,
                lost = report.lost,
                claim_errors = report.claim_errors,
                "Tick finished in {:?}",
                started.elapsed()
            );
        }
        Ok(report)
    }

    async fn work(&self, shutdown: Option<&watch::Receiver<bool>>) -> WorkerResult<TickReport> {
        let candidates = self.claimer.candidates(Utc::now()).await?;
        let mut report = TickReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        for candidate in &candidates {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                info!("Shutdown requested, leaving remaining candidates for the next run");
                break;
            }

            let claim = match self.claimer.claim(candidate, Utc::now()).await {
                Ok(claim) => claim,
                Err(e) => {
                    // Row stays eligible; the next tick retries it.
                    warn!(submission_id = %candidate.id, "Claim failed: {}", e);
                    metrics::record_claim("error");
                    report.claim_errors += 1;
                    continue;
                }
            };

            match claim {
                ClaimResult::Claimed(claimed) => {
                    report.claimed += 1;
                    let status = self.processor.process(&claimed).await;
                    report.record(&status);
                }
                ClaimResult::Exhausted => {
                    warn!(submission_id = %candidate.id, "Retry budget exhausted at claim time");
                    report.exhausted += 1;
                }
                ClaimResult::Lost => report.lost += 1,
            }
        }

        Ok(report)
    }

    /// Tick until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Scheduler starting: interval={:?} initial_delay={:?}",
            self.interval, self.initial_delay
        );

        tokio::select! {
            _ = tokio::time::sleep(self.initial_delay) => {}
            _ = shutdown.changed() => {
                info!("Shutdown before first tick");
                return;
            }
        }

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failures = FailureTracker::new(3);
        let stop = shutdown.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {
                    match self.tick(Some(&stop)).await {
                        Ok(_) => failures.record_success(),
                        Err(e) => {
                            if failures.record_failure() {
                                error!("Tick failed: {}", e);
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        info!("Scheduler stopped");
    }
}
