//! Processing of one claimed submission.
//!
//! Order of work: resolve the content hash, try to reuse a prior analysis
//! of the same content, otherwise run the pipeline; then quarantine, then
//! persist. Any error is turned into retry bookkeeping fenced on the claim.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::Instrument;

use memalerts_db::{AssetSeed, Claimed, ModerationStore};
use memalerts_models::{AiDecision, AiStatus, AnalysisOutcome};

use crate::dedup::{reuse_outcome, ReusePolicy};
use crate::error::{WorkerError, WorkerResult};
use crate::hasher::{ContentHasher, HashSource};
use crate::logging::SubmissionLogger;
use crate::metrics;
use crate::pipeline::AnalysisPipeline;
use crate::publisher::{PublishReport, ResultPublisher};
use crate::quarantine::QuarantineManager;
use crate::retry::BackoffPolicy;
use crate::source::MediaResolver;

/// Final state of one processed item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemStatus {
    Done {
        decision: AiDecision,
        reused: bool,
        auto_approved: bool,
    },
    Failed,
    FailedFinal,
    /// The claim was taken over; nothing of ours was written
    Lost,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Done { .. } => "done",
            ItemStatus::Failed => "failed",
            ItemStatus::FailedFinal => "failed_final",
            ItemStatus::Lost => "lost",
        }
    }
}

/// Components used to process one submission.
#[derive(Clone)]
pub struct SubmissionProcessor {
    pub(crate) store: Arc<dyn ModerationStore>,
    pub(crate) resolver: MediaResolver,
    pub(crate) hasher: ContentHasher,
    pub(crate) pipeline: AnalysisPipeline,
    pub(crate) reuse: ReusePolicy,
    pub(crate) quarantine: QuarantineManager,
    pub(crate) publisher: ResultPublisher,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) work_dir: PathBuf,
    pub(crate) item_timeout: Duration,
    pub(crate) instance_id: String,
}

impl SubmissionProcessor {
    /// Process a claimed submission under the per-item deadline.
    pub async fn process(&self, claimed: &Claimed) -> ItemStatus {
        let logger = SubmissionLogger::new(&claimed.submission.id, &self.instance_id);
        let span = logger.create_span();
        self.process_logged(claimed, &logger).instrument(span).await
    }

    async fn process_logged(&self, claimed: &Claimed, logger: &SubmissionLogger) -> ItemStatus {
        let started = Instant::now();
        logger.log_start(claimed.submission.ai_retry_count);

        let result = match tokio::time::timeout(self.item_timeout, self.run(claimed, logger)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout(self.item_timeout.as_secs())),
        };

        let status = match result {
            Ok(report) if report.claim_lost => ItemStatus::Lost,
            Ok(report) => ItemStatus::Done {
                decision: report.decision,
                reused: report.reused,
                auto_approved: report.publish.auto_approved,
            },
            Err(e) => self.record_failure(claimed, &e, logger).await,
        };

        let elapsed = started.elapsed();
        metrics::record_item(status.as_str(), elapsed.as_secs_f64());
        logger.log_completion(status.as_str(), elapsed.as_millis());
        status
    }

    async fn run(&self, claimed: &Claimed, logger: &SubmissionLogger) -> WorkerResult<RunReport> {
        let submission = &claimed.submission;

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("ai-{}-", submission.id))
            .tempdir_in(&self.work_dir)?;

        let mut media_path: Option<PathBuf> = None;
        let (file_hash, hash_source) = match ContentHasher::known_hash(submission) {
            Some(known) => known,
            None => {
                let path = self.resolver.resolve(submission, None, scratch.path()).await?;
                let hash = self.hasher.compute(&path).await?;
                media_path = Some(path);
                (hash, HashSource::Computed)
            }
        };
        logger.log_stage("hash", &format!("{} ({})", file_hash, hash_source.as_str()));

        if submission.file_hash.as_deref() != Some(file_hash.as_str()) {
            self.store.set_file_hash(&claimed.token, &file_hash).await?;
        }

        let priors = self
            .store
            .find_prior_analyses(&file_hash, &submission.id)
            .await?;
        let prior = self.reuse.select(&priors, &submission.title);

        let (outcome, duration_ms, reused) = match prior.and_then(|p| reuse_outcome(p).map(|o| (p, o))) {
            Some((prior, outcome)) => {
                logger.log_stage("dedup", &format!("Reusing analysis from {}", prior.source));
                metrics::record_dedup_reuse();
                (outcome, submission.duration_ms, true)
            }
            None => {
                let path = match media_path {
                    Some(path) => path,
                    None => {
                        self.resolver
                            .resolve(submission, Some(&file_hash), scratch.path())
                            .await?
                    }
                };
                let analysis = self
                    .pipeline
                    .analyze(submission, &path, scratch.path(), logger)
                    .await?;
                (
                    analysis.outcome,
                    analysis.duration_ms.or(submission.duration_ms),
                    false,
                )
            }
        };

        self.finish(claimed, file_hash, outcome, duration_ms, reused, logger)
            .await
    }

    async fn finish(
        &self,
        claimed: &Claimed,
        file_hash: String,
        outcome: AnalysisOutcome,
        duration_ms: Option<i64>,
        reused: bool,
        logger: &SubmissionLogger,
    ) -> WorkerResult<RunReport> {
        let seed = AssetSeed {
            file_hash,
            file_url: claimed.submission.file_url.clone(),
            duration_ms,
        };
        let now = Utc::now();

        let write = self.quarantine.apply(outcome.decision, &seed, now).await?;
        logger.log_stage(
            "quarantine",
            &format!("decision={} write={:?}", outcome.decision, write),
        );

        let publish = self
            .publisher
            .publish(claimed, &seed, &outcome, logger, now)
            .await?;

        if !publish.claim_lost {
            metrics::record_decision(
                outcome.decision.as_str(),
                &outcome.model_versions.pipeline_version,
            );
        }

        Ok(RunReport {
            decision: outcome.decision,
            reused,
            claim_lost: publish.claim_lost,
            publish,
        })
    }

    async fn record_failure(
        &self,
        claimed: &Claimed,
        error: &WorkerError,
        logger: &SubmissionLogger,
    ) -> ItemStatus {
        logger.log_error(&format!("{} (class={})", error, error.class().as_str()));

        let update = self.backoff.plan_failure(
            claimed.submission.ai_retry_count,
            Utc::now(),
            error.stored_message(),
        );

        match self.store.record_failure(&claimed.token, &update).await {
            Ok(true) if update.status == AiStatus::FailedFinal => ItemStatus::FailedFinal,
            Ok(true) => ItemStatus::Failed,
            Ok(false) => {
                metrics::record_claim_lost("record_failure");
                logger.log_warning("failure", "Claim lost before failure was recorded");
                ItemStatus::Lost
            }
            Err(e) => {
                // Row stays `processing` and is reclaimed once stuck.
                logger.log_error(&format!("Failed to record failure: {}", e));
                ItemStatus::Failed
            }
        }
    }
}

struct RunReport {
    decision: AiDecision,
    reused: bool,
    claim_lost: bool,
    publish: PublishReport,
}
