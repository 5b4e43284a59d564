//! Persistence for the MemAlerts moderation pipeline.
//!
//! This crate provides:
//! - The `ModerationStore` seam (claim, failure bookkeeping, dedup lookup,
//!   quarantine transaction, result persistence, auto-approval)
//! - A PostgreSQL implementation over `sqlx`
//! - Per-instance advisory tick locks
//! - In-memory implementations for tests and dry runs

pub mod error;
pub mod lock;
pub mod memory;
pub mod postgres;
mod rows;
pub mod store;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use error::{DbError, DbResult};
pub use lock::{lock_key_for_instance, PgAdvisoryLock, TickLease, TickLock};
pub use memory::{MemoryLock, MemoryLocks, MemoryStore};
pub use postgres::PgModerationStore;
pub use store::{
    AssetAiUpdate, AssetSeed, AuditEntry, ClaimToken, Claimed, FailureUpdate, ListingUpdate,
    ModerationStore, PriorAnalysis, QuarantinePlan, QuarantineWrite, SubmissionAiUpdate,
};

/// Open a connection pool.
pub async fn connect(database_url: &str, max_connections: u32) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply the bundled migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Verify the database answers.
pub async fn health_check(pool: &PgPool) -> DbResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
