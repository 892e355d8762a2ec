//! # Rule Repository
//!
//! Read access to the rule catalog, plus the inserts seeding needs.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use entitle_core::{EntitlementRule, ValidationError, MAX_DAILY_LIMIT};

const RULE_COLUMNS: &str = r#"
    rule_id, course_id, ai_product_id, daily_limit, validity_days,
    is_deleted, created_at, updated_at
"#;

/// Repository for the `entitlement_rules` table.
#[derive(Debug, Clone)]
pub struct RuleRepository {
    pool: SqlitePool,
}

impl RuleRepository {
    /// Creates a new RuleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RuleRepository { pool }
    }

    /// Gets a live rule by id.
    ///
    /// ## Returns
    /// * `Ok(Some(rule))` - Rule exists and is not soft-deleted
    /// * `Ok(None)` - Missing or soft-deleted
    pub async fn get(&self, rule_id: &str) -> DbResult<Option<EntitlementRule>> {
        let sql = format!(
            "SELECT {} FROM entitlement_rules WHERE rule_id = ?1 AND is_deleted = 0",
            RULE_COLUMNS
        );

        let rule = sqlx::query_as::<_, EntitlementRule>(&sql)
            .bind(rule_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(rule)
    }

    /// Gets the live rule for a course.
    ///
    /// A course may be linked to several products; the oldest live rule wins
    /// so that repeated lookups always agree.
    pub async fn get_by_course(&self, course_id: &str) -> DbResult<Option<EntitlementRule>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM entitlement_rules
            WHERE course_id = ?1 AND is_deleted = 0
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
            "#,
            RULE_COLUMNS
        );

        let rule = sqlx::query_as::<_, EntitlementRule>(&sql)
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await?;

        debug!(course_id = %course_id, found = rule.is_some(), "Rule lookup by course");
        Ok(rule)
    }

    /// Inserts a rule.
    ///
    /// Fails with `Validation` for an empty id or out-of-range limits, and
    /// with `UniqueViolation` if a live rule already links the same course
    /// and product.
    pub async fn insert(&self, rule: &EntitlementRule) -> DbResult<()> {
        rule.validate()?;

        sqlx::query(
            r#"
            INSERT INTO entitlement_rules (
                rule_id, course_id, ai_product_id, daily_limit, validity_days,
                is_deleted, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&rule.rule_id)
        .bind(&rule.course_id)
        .bind(&rule.ai_product_id)
        .bind(rule.daily_limit)
        .bind(rule.validity_days)
        .bind(rule.is_deleted)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(rule_id = %rule.rule_id, course_id = %rule.course_id, "Inserted rule");
        Ok(())
    }

    /// Changes a rule's daily limit.
    ///
    /// Existing entitlements are refilled to the new limit at the next quota
    /// reset; a lower limit also caps consumption immediately.
    pub async fn update_daily_limit(
        &self,
        rule_id: &str,
        daily_limit: i64,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        if !(1..=MAX_DAILY_LIMIT).contains(&daily_limit) {
            return Err(ValidationError::OutOfRange {
                field: "daily_limit".to_string(),
                min: 1,
                max: MAX_DAILY_LIMIT,
            }
            .into());
        }

        let result = sqlx::query(
            "UPDATE entitlement_rules SET daily_limit = ?2, updated_at = ?3 WHERE rule_id = ?1",
        )
        .bind(rule_id)
        .bind(daily_limit)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Soft-deletes a rule.
    pub async fn soft_delete(&self, rule_id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE entitlement_rules SET is_deleted = 1, updated_at = ?2
            WHERE rule_id = ?1 AND is_deleted = 0
            "#,
        )
        .bind(rule_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts live rules.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM entitlement_rules WHERE is_deleted = 0")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use crate::error::DbError;
    use crate::repository::fixtures::{db, rule, t0};

    #[tokio::test]
    async fn test_get_by_course_returns_oldest_live_rule() {
        let db = db().await;
        let repo = db.rules();

        let mut newer = rule("R2", "C1", "P2");
        newer.created_at = t0();
        repo.insert(&rule("R1", "C1", "P1")).await.unwrap();
        repo.insert(&newer).await.unwrap();

        let found = repo.get_by_course("C1").await.unwrap().unwrap();
        assert_eq!(found.rule_id, "R1");
        assert_eq!(found.daily_limit, 5);
        assert_eq!(found.validity_days, 30);

        repo.soft_delete("R1", t0()).await.unwrap();
        let found = repo.get_by_course("C1").await.unwrap().unwrap();
        assert_eq!(found.rule_id, "R2");

        assert!(repo.get_by_course("C9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_soft_deleted_rule_is_not_found() {
        let db = db().await;
        let repo = db.rules();

        repo.insert(&rule("R1", "C1", "P1")).await.unwrap();
        assert!(repo.get("R1").await.unwrap().is_some());

        assert!(repo.soft_delete("R1", t0()).await.unwrap());
        assert!(!repo.soft_delete("R1", t0()).await.unwrap());
        assert!(repo.get("R1").await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_live_course_product_pair_is_unique() {
        let db = db().await;
        let repo = db.rules();

        repo.insert(&rule("R1", "C1", "P1")).await.unwrap();
        let err = repo.insert(&rule("R2", "C1", "P1")).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        // Allowed again once the first one is soft-deleted
        repo.soft_delete("R1", t0()).await.unwrap();
        repo.insert(&rule("R3", "C1", "P1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_daily_limit() {
        let db = db().await;
        let repo = db.rules();

        repo.insert(&rule("R1", "C1", "P1")).await.unwrap();
        assert!(repo
            .update_daily_limit("R1", 3, t0() + Duration::hours(1))
            .await
            .unwrap());

        let found = repo.get("R1").await.unwrap().unwrap();
        assert_eq!(found.daily_limit, 3);
        assert_eq!(found.updated_at, t0() + Duration::hours(1));
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_rule() {
        let db = db().await;
        let repo = db.rules();

        let mut no_limit = rule("R1", "C1", "P1");
        no_limit.daily_limit = 0;
        let err = repo.insert(&no_limit).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));

        let no_course = rule("R2", "", "P1");
        let err = repo.insert(&no_course).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));

        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_daily_limit_rejects_zero() {
        let db = db().await;
        let repo = db.rules();

        repo.insert(&rule("R1", "C1", "P1")).await.unwrap();
        let err = repo.update_daily_limit("R1", 0, t0()).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
        assert_eq!(repo.get("R1").await.unwrap().unwrap().daily_limit, 5);
    }
}
