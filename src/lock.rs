//! Cross-process exclusion for ingestion cycles, backed by the `worker_lock` row.
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::db::{self, Pool};

pub const LOCK_ID: &str = "fetch-worker";

/// A lock row older than the staleness window is treated as abandoned and
/// may be taken over.
#[derive(Debug, Clone)]
pub struct CycleLock {
    pool: Pool,
    id: String,
    stale_after: Duration,
}

impl CycleLock {
    pub fn new(pool: Pool, stale_minutes: i64) -> Self {
        Self::with_id(pool, LOCK_ID, stale_minutes)
    }

    pub fn with_id(pool: Pool, id: &str, stale_minutes: i64) -> Self {
        Self {
            pool,
            id: id.to_string(),
            stale_after: Duration::minutes(stale_minutes),
        }
    }

    /// True when this caller now holds the lock.
    pub async fn acquire(&self, now: DateTime<Utc>) -> Result<bool> {
        let acquired =
            db::try_acquire_lock(&self.pool, &self.id, now, now - self.stale_after).await?;
        debug!(lock = %self.id, acquired, "lock acquire attempt");
        Ok(acquired)
    }

    pub async fn release(&self) -> Result<()> {
        db::release_lock(&self.pool, &self.id).await
    }

    /// Release and log instead of propagating, for cleanup paths.
    pub async fn release_quietly(&self) {
        if let Err(err) = self.release().await {
            warn!(lock = %self.id, error = %err, "failed to release lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn held_lock_blocks_until_released() {
        let pool = setup_pool().await;
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let a = CycleLock::new(pool.clone(), 30);
        let b = CycleLock::new(pool.clone(), 30);

        assert!(a.acquire(now).await.unwrap());
        assert!(!b.acquire(now + Duration::minutes(5)).await.unwrap());
        a.release().await.unwrap();
        assert!(b.acquire(now + Duration::minutes(6)).await.unwrap());
    }

    #[tokio::test]
    async fn abandoned_lock_is_taken_over() {
        let pool = setup_pool().await;
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let crashed = CycleLock::new(pool.clone(), 30);
        assert!(crashed.acquire(start).await.unwrap());

        let next = CycleLock::new(pool.clone(), 30);
        assert!(!next.acquire(start + Duration::minutes(29)).await.unwrap());
        assert!(next.acquire(start + Duration::minutes(31)).await.unwrap());
        assert_eq!(
            db::lock_locked_at(&pool, LOCK_ID).await.unwrap(),
            Some(start + Duration::minutes(31))
        );
    }
}
