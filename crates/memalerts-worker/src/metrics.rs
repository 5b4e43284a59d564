//! Prometheus metrics for the moderation worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    // Scheduler
    pub const TICKS_TOTAL: &str = "memalerts_ai_ticks_total";
    pub const TICK_DURATION_SECONDS: &str = "memalerts_ai_tick_duration_seconds";
    pub const LOCK_CONTENDED_TOTAL: &str = "memalerts_ai_lock_contended_total";

    // Claims
    pub const CLAIMS_TOTAL: &str = "memalerts_ai_claims_total";
    pub const CLAIMS_LOST_TOTAL: &str = "memalerts_ai_claims_lost_total";

    // Outcomes
    pub const ITEMS_TOTAL: &str = "memalerts_ai_items_total";
    pub const ITEM_DURATION_SECONDS: &str = "memalerts_ai_item_duration_seconds";
    pub const DECISIONS_TOTAL: &str = "memalerts_ai_decisions_total";
    pub const FALLBACKS_TOTAL: &str = "memalerts_ai_fallbacks_total";
    pub const DEDUP_REUSE_TOTAL: &str = "memalerts_ai_dedup_reuse_total";
    pub const QUARANTINE_WRITES_TOTAL: &str = "memalerts_ai_quarantine_writes_total";
    pub const AUTO_APPROVED_TOTAL: &str = "memalerts_ai_auto_approved_total";

    // Resources
    pub const HASH_DURATION_SECONDS: &str = "memalerts_ai_hash_duration_seconds";
    pub const HASH_IN_FLIGHT: &str = "memalerts_ai_hash_in_flight";
}

/// Install the Prometheus recorder with an HTTP scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {e}")))
}

pub fn record_tick(outcome: &str, duration_secs: f64) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::TICKS_TOTAL, &labels).increment(1);
    histogram!(names::TICK_DURATION_SECONDS).record(duration_secs);
}

pub fn record_lock_contended() {
    counter!(names::LOCK_CONTENDED_TOTAL).increment(1);
}

/// Record a claim attempt (`claimed`, `lost`, `exhausted`, `error`).
pub fn record_claim(result: &str) {
    let labels = [("result", result.to_string())];
    counter!(names::CLAIMS_TOTAL, &labels).increment(1);
}

pub fn record_claim_lost(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::CLAIMS_LOST_TOTAL, &labels).increment(1);
}

/// Record a finished item (`done`, `failed`, `failed_final`, `lost`).
pub fn record_item(status: &str, duration_secs: f64) {
    let labels = [("status", status.to_string())];
    counter!(names::ITEMS_TOTAL, &labels).increment(1);
    histogram!(names::ITEM_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_decision(decision: &str, pipeline_version: &str) {
    let labels = [
        ("decision", decision.to_string()),
        ("pipeline", pipeline_version.to_string()),
    ];
    counter!(names::DECISIONS_TOTAL, &labels).increment(1);
}

pub fn record_fallback(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::FALLBACKS_TOTAL, &labels).increment(1);
}

pub fn record_dedup_reuse() {
    counter!(names::DEDUP_REUSE_TOTAL).increment(1);
}

pub fn record_quarantine_write(result: &str) {
    let labels = [("result", result.to_string())];
    counter!(names::QUARANTINE_WRITES_TOTAL, &labels).increment(1);
}

pub fn record_auto_approved() {
    counter!(names::AUTO_APPROVED_TOTAL).increment(1);
}

pub fn record_hash_duration(duration_secs: f64) {
    histogram!(names::HASH_DURATION_SECONDS).record(duration_secs);
}

pub fn set_hash_in_flight(count: usize) {
    gauge!(names::HASH_IN_FLIGHT).set(count as f64);
}
