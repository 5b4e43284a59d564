//! AI moderation and dedup worker for MemAlerts.
//!
//! This crate handles:
//! - Claiming submissions with compare-and-set semantics
//! - Content hash resolution and dedup reuse of prior analyses
//! - The analysis pipeline (transcription, moderation, vision, metadata)
//!   with a keyword-heuristic fallback
//! - Ownership-aware quarantine of the shared asset
//! - Result persistence, listing sync and auto-approval
//! - Retry bookkeeping with exponential backoff

pub mod claimer;
pub mod config;
pub mod dedup;
pub mod error;
pub mod hasher;
pub mod heuristics;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod publisher;
pub mod quarantine;
pub mod retry;
pub mod scheduler;
pub mod source;

pub use claimer::{ClaimResult, JobClaimer, EXHAUSTED_MARKER};
pub use config::WorkerConfig;
pub use dedup::{ReusePolicy, SkipReason};
pub use error::{ErrorClass, WorkerError, WorkerResult};
pub use heuristics::KeywordHeuristics;
pub use logging::SubmissionLogger;
pub use pipeline::{AnalysisPipeline, PipelineSettings};
pub use processor::{ItemStatus, SubmissionProcessor};
pub use publisher::{ApprovalBlock, ApprovalPolicy, ResultPublisher};
pub use quarantine::{plan_quarantine, QuarantineManager};
pub use retry::{BackoffPolicy, FailureTracker};
pub use scheduler::{Scheduler, SchedulerSnapshot, SchedulerState, TickReport, TickSkip, WorkerDeps};
