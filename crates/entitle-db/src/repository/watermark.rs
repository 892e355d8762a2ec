//! # Watermark Repository
//!
//! Remembers, per job, the end of the last window that was fully applied.
//! The next scheduled run starts from there, so a missed day is picked up
//! instead of silently skipped.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

/// Repository for the `reconciliation_watermarks` table.
#[derive(Debug, Clone)]
pub struct WatermarkRepository {
    pool: SqlitePool,
}

impl WatermarkRepository {
    /// Creates a new WatermarkRepository.
    pub fn new(pool: SqlitePool) -> Self {
        WatermarkRepository { pool }
    }

    /// Gets the stored watermark for a job.
    pub async fn get(&self, job_name: &str) -> DbResult<Option<DateTime<Utc>>> {
        let watermark: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT watermark FROM reconciliation_watermarks WHERE job_name = ?1",
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(watermark)
    }

    /// Stores (or replaces) the watermark for a job.
    pub async fn set(
        &self,
        job_name: &str,
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reconciliation_watermarks (job_name, watermark, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (job_name) DO UPDATE SET
                watermark = excluded.watermark,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(job_name)
        .bind(watermark)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(job = %job_name, watermark = %watermark, "Watermark advanced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use crate::repository::fixtures::{db, t0};

    #[tokio::test]
    async fn test_watermark_upsert() {
        let db = db().await;
        let repo = db.watermarks();

        assert!(repo.get("reconcile").await.unwrap().is_none());

        repo.set("reconcile", t0(), t0()).await.unwrap();
        assert_eq!(repo.get("reconcile").await.unwrap(), Some(t0()));

        let next = t0() + Duration::days(1);
        repo.set("reconcile", next, next).await.unwrap();
        assert_eq!(repo.get("reconcile").await.unwrap(), Some(next));

        assert!(repo.get("other").await.unwrap().is_none());
    }
}
