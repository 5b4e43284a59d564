//! Shared data models for the MemAlerts moderation pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Meme submissions and their AI sub-state
//! - Content-addressed meme assets (shared across channels)
//! - Per-channel listing projections
//! - Analysis outcomes and model version records
//! - Text normalization helpers shared by dedup and heuristics

pub mod ai;
pub mod asset;
pub mod listing;
pub mod submission;
pub mod text;

// Re-export common types
pub use ai::{
    AiDecision, AiStatus, AnalysisOutcome, FallbackReason, ModelVersions, ParseEnumError,
    PIPELINE_VERSION, PIPELINE_VERSION_HEURISTIC, PIPELINE_VERSION_REUSE,
};
pub use asset::{AssetModeration, ContentAsset, PoolVisibility, AI_REASON_PREFIX};
pub use listing::ChannelListing;
pub use submission::{SourceKind, Submission, SubmissionId, SubmissionStatus};
