//! Persistence of analysis results and auto-approval.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use memalerts_db::{
    AssetAiUpdate, AssetSeed, AuditEntry, Claimed, ListingUpdate, ModerationStore,
    SubmissionAiUpdate,
};
use memalerts_models::{
    AiDecision, AnalysisOutcome, ChannelListing, ContentAsset, Submission, SubmissionStatus,
};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::logging::SubmissionLogger;
use crate::metrics;

/// Audit action recorded for pipeline approvals.
pub const AUTO_APPROVE_ACTION: &str = "submission.auto_approve";

/// Auto-approval policy.
#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    pub enabled: bool,
    pub roles: Vec<String>,
    pub url_prefixes: Vec<String>,
}

impl From<&WorkerConfig> for ApprovalPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            enabled: config.auto_approve_enabled,
            roles: config.auto_approve_roles.clone(),
            url_prefixes: config.auto_approve_url_prefixes.clone(),
        }
    }
}

/// Why a submission was not auto-approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalBlock {
    Disabled,
    NotLowRisk,
    NotPending,
    UnknownDuration,
    UntrustedLocation,
    IneligibleRole,
    /// A moderator restricted the shared asset
    AssetRestricted,
}

impl ApprovalBlock {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalBlock::Disabled => "disabled",
            ApprovalBlock::NotLowRisk => "not_low_risk",
            ApprovalBlock::NotPending => "not_pending",
            ApprovalBlock::UnknownDuration => "unknown_duration",
            ApprovalBlock::UntrustedLocation => "untrusted_location",
            ApprovalBlock::IneligibleRole => "ineligible_role",
            ApprovalBlock::AssetRestricted => "asset_restricted",
        }
    }
}

impl ApprovalPolicy {
    /// Every gate must pass for an automatic approval.
    pub fn check(
        &self,
        submission: &Submission,
        decision: AiDecision,
        duration_ms: Option<i64>,
        asset: Option<&ContentAsset>,
    ) -> Result<(), ApprovalBlock> {
        if !self.enabled {
            return Err(ApprovalBlock::Disabled);
        }
        if decision != AiDecision::Low {
            return Err(ApprovalBlock::NotLowRisk);
        }
        if submission.status != SubmissionStatus::Pending {
            return Err(ApprovalBlock::NotPending);
        }
        if !duration_ms.is_some_and(|d| d > 0) {
            return Err(ApprovalBlock::UnknownDuration);
        }

        let trusted = submission
            .file_url
            .as_deref()
            .is_some_and(|url| self.url_prefixes.iter().any(|p| url.starts_with(p.as_str())));
        if !trusted {
            return Err(ApprovalBlock::UntrustedLocation);
        }

        let role_ok = submission
            .submitter_role
            .as_deref()
            .is_some_and(|role| self.roles.iter().any(|r| r.eq_ignore_ascii_case(role)));
        if !role_ok {
            return Err(ApprovalBlock::IneligibleRole);
        }

        if asset.is_some_and(|a| a.moderation.is_restricted() && a.moderation.has_human_decision())
        {
            return Err(ApprovalBlock::AssetRestricted);
        }

        Ok(())
    }
}

/// What publishing wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// `None` when the claim was lost before the asset was written
    pub asset_id: Option<String>,
    pub listings_updated: u64,
    pub auto_approved: bool,
    /// The claim was taken over before results could be saved
    pub claim_lost: bool,
}

/// Writes results to the submission, the shared asset and its listings.
#[derive(Clone)]
pub struct ResultPublisher {
    store: Arc<dyn ModerationStore>,
    approval: ApprovalPolicy,
}

impl ResultPublisher {
    pub fn new(store: Arc<dyn ModerationStore>, approval: ApprovalPolicy) -> Self {
        Self { store, approval }
    }

    pub async fn publish(
        &self,
        claimed: &Claimed,
        seed: &AssetSeed,
        outcome: &AnalysisOutcome,
        logger: &SubmissionLogger,
        now: DateTime<Utc>,
    ) -> WorkerResult<PublishReport> {
        let submission = &claimed.submission;
        let model_versions = outcome.model_versions.to_json();

        let asset_update = AssetAiUpdate {
            decision: outcome.decision,
            risk_score: outcome.risk_score,
            auto_title: outcome.auto_title.clone(),
            auto_description: outcome.auto_description.clone(),
            auto_tags: outcome.auto_tags.clone(),
            search_text: outcome.search_text.clone(),
            model_versions: model_versions.clone(),
        };
        let Some(asset_id) = self
            .store
            .upsert_asset_ai(&claimed.token, seed, &asset_update, now)
            .await?
        else {
            return Ok(self.claim_lost(logger, None));
        };

        let submission_update = SubmissionAiUpdate {
            decision: outcome.decision,
            risk_score: outcome.risk_score,
            labels: outcome.labels.clone(),
            transcript: outcome.transcript.clone(),
            auto_tags: outcome.auto_tags.clone(),
            auto_description: outcome.auto_description.clone(),
            model_versions,
            file_hash: seed.file_hash.clone(),
            meme_asset_id: Some(
                submission
                    .meme_asset_id
                    .clone()
                    .unwrap_or_else(|| asset_id.clone()),
            ),
        };
        if !self
            .store
            .save_submission_ai(&claimed.token, &submission_update, now)
            .await?
        {
            return Ok(self.claim_lost(logger, Some(asset_id)));
        }

        let listing_update = ListingUpdate {
            title: outcome.auto_title.clone(),
            original_title: submission.title.clone(),
            auto_description: outcome.auto_description.clone(),
            auto_tags: outcome.auto_tags.clone(),
            search_text: outcome.search_text.clone(),
        };
        let listings_updated = self
            .store
            .sync_listings(&asset_id, &listing_update, now)
            .await?;

        let auto_approved = self
            .maybe_auto_approve(submission, seed, &asset_id, outcome, logger, now)
            .await?;

        Ok(PublishReport {
            asset_id: Some(asset_id),
            listings_updated,
            auto_approved,
            claim_lost: false,
        })
    }

    fn claim_lost(&self, logger: &SubmissionLogger, asset_id: Option<String>) -> PublishReport {
        metrics::record_claim_lost("publish");
        logger.log_warning("publish", "Claim lost before results were saved");
        PublishReport {
            asset_id,
            listings_updated: 0,
            auto_approved: false,
            claim_lost: true,
        }
    }

    async fn maybe_auto_approve(
        &self,
        submission: &Submission,
        seed: &AssetSeed,
        asset_id: &str,
        outcome: &AnalysisOutcome,
        logger: &SubmissionLogger,
        now: DateTime<Utc>,
    ) -> WorkerResult<bool> {
        if !self.approval.enabled {
            return Ok(false);
        }

        let asset = self.store.find_asset_by_hash(&seed.file_hash).await?;
        let duration_ms = seed
            .duration_ms
            .or(submission.duration_ms)
            .or(asset.as_ref().and_then(|a| a.duration_ms));

        if let Err(block) =
            self.approval
                .check(submission, outcome.decision, duration_ms, asset.as_ref())
        {
            logger.log_stage("auto_approve", &format!("Skipped: {}", block.as_str()));
            return Ok(false);
        }

        let listing = ChannelListing {
            id: Uuid::new_v4().to_string(),
            channel_id: submission.channel_id.clone(),
            meme_asset_id: asset_id.to_string(),
            title: outcome
                .auto_title
                .clone()
                .unwrap_or_else(|| submission.title.clone()),
            ai_auto_description: outcome.auto_description.clone(),
            ai_auto_tags: outcome.auto_tags.clone(),
            search_text: outcome.search_text.clone(),
        };
        let audit = AuditEntry {
            actor_id: None,
            channel_id: Some(submission.channel_id.clone()),
            action: AUTO_APPROVE_ACTION.to_string(),
            target_id: submission.id.to_string(),
            details: json!({
                "memeAssetId": asset_id,
                "decision": outcome.decision.as_str(),
                "riskScore": outcome.risk_score,
                "pipelineVersion": outcome.model_versions.pipeline_version,
                "durationMs": duration_ms,
            }),
            created_at: now,
        };

        let approved = self
            .store
            .approve_submission(submission, &listing, &audit)
            .await?;
        if approved {
            metrics::record_auto_approved();
            logger.log_stage("auto_approve", "Submission approved");
        }
        Ok(approved)
    }
}
