//! Per-instance advisory lock for scheduler ticks.
//!
//! Each deployment instance derives its own lock key from its identity, so
//! independent deployments sharing one database never starve each other.
//! The lock only prevents redundant scans; claims stay correct without it.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::{debug, warn};

use crate::error::DbResult;

/// Namespace mixed into every lock key.
const LOCK_NAMESPACE: &str = "memalerts:ai-moderation:";

/// Deterministic advisory lock key for an instance identity.
///
/// The first eight bytes of `sha256(namespace || instance_id)`, big endian.
pub fn lock_key_for_instance(instance_id: &str) -> i64 {
    let digest = Sha256::digest(format!("{}{}", LOCK_NAMESPACE, instance_id).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// A held tick lock.
#[async_trait]
pub trait TickLease: Send {
    /// Release the lock. Dropping a lease without releasing also frees it.
    async fn release(self: Box<Self>) -> DbResult<()>;
}

/// Non-blocking mutual exclusion for one scheduler tick.
#[async_trait]
pub trait TickLock: Send + Sync {
    /// Try to take the lock; `None` when another holder has it.
    async fn try_acquire(&self) -> DbResult<Option<Box<dyn TickLease>>>;

    fn key(&self) -> i64;
}

/// Session-level `pg_try_advisory_lock` on a dedicated pooled connection.
#[derive(Clone)]
pub struct PgAdvisoryLock {
    pool: PgPool,
    key: i64,
}

impl PgAdvisoryLock {
    pub fn new(pool: PgPool, key: i64) -> Self {
        Self { pool, key }
    }

    pub fn for_instance(pool: PgPool, instance_id: &str) -> Self {
        Self::new(pool, lock_key_for_instance(instance_id))
    }
}

#[async_trait]
impl TickLock for PgAdvisoryLock {
    async fn try_acquire(&self) -> DbResult<Option<Box<dyn TickLease>>> {
        let mut conn = self.pool.acquire().await?;
        let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await?;

        if !locked {
            debug!(lock_key = self.key, "Advisory lock held elsewhere");
            return Ok(None);
        }

        Ok(Some(Box::new(PgLease {
            conn: Some(conn),
            key: self.key,
        })))
    }

    fn key(&self) -> i64 {
        self.key
    }
}

struct PgLease {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

#[async_trait]
impl TickLease for PgLease {
    async fn release(mut self: Box<Self>) -> DbResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let unlocked = sqlx::query_as::<_, (bool,)>("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await;

        match unlocked {
            Ok((true,)) => Ok(()),
            Ok((false,)) => {
                warn!(lock_key = self.key, "Advisory lock was not held at release");
                Ok(())
            }
            Err(e) => {
                // Closing the session is the only other way to free the lock.
                drop(conn.detach());
                Err(e.into())
            }
        }
    }
}

impl Drop for PgLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Never return a connection that still holds the lock to the pool.
            drop(conn.detach());
        }
    }
}
