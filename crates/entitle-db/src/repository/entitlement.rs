//! # Entitlement Repository
//!
//! The mutable state owned by the engine: one row per granted access window.
//!
//! ## Concurrency Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Writer                 Statement                     Guard            │
//! │  ──────                 ─────────                     ─────            │
//! │  Reconciliation job     create_if_absent (tx)         partial UNIQUE   │
//! │                         revoke_live                   is_deleted = 0   │
//! │                         (both keyed by order id)      order UNIQUE     │
//! │  Quota reset job        reset_quota                   is_deleted = 0   │
//! │  Consumption gate       try_decrement                 min(rem,limit)>0 │
//! │                         restore_one                   remaining < limit│
//! │                                                                         │
//! │  Every quota change is a single conditional UPDATE. SQLite serializes  │
//! │  writers, so two callers can never both take the last unit.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use entitle_core::{ProductKey, UserEntitlement};

const ENTITLEMENT_COLUMNS: &str = r#"
    entitlement_id, phone, rule_id, start_date, end_date, daily_remaining,
    is_active, is_deleted, source_order_id, revoked_by_order_id, created_at, updated_at
"#;

/// Result of [`EntitlementRepository::create_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The entitlement was inserted.
    Created,
    /// A live entitlement for the same phone and rule already existed.
    AlreadyLive { entitlement_id: String },
    /// The source order already produced an entitlement, live or revoked.
    AlreadyGranted { entitlement_id: String },
}

/// Repository for the `user_entitlements` table.
#[derive(Debug, Clone)]
pub struct EntitlementRepository {
    pool: SqlitePool,
}

impl EntitlementRepository {
    /// Creates a new EntitlementRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EntitlementRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets an entitlement by id, including soft-deleted rows.
    pub async fn get(&self, entitlement_id: &str) -> DbResult<Option<UserEntitlement>> {
        let sql = format!(
            "SELECT {} FROM user_entitlements WHERE entitlement_id = ?1",
            ENTITLEMENT_COLUMNS
        );

        let ent = sqlx::query_as::<_, UserEntitlement>(&sql)
            .bind(entitlement_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(ent)
    }

    /// Lists every live entitlement, oldest first.
    pub async fn list_live(&self) -> DbResult<Vec<UserEntitlement>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM user_entitlements
            WHERE is_deleted = 0
            ORDER BY created_at ASC, rowid ASC
            "#,
            ENTITLEMENT_COLUMNS
        );

        let ents = sqlx::query_as::<_, UserEntitlement>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(ents)
    }

    /// Resolves the newest live entitlement a phone holds for a product.
    ///
    /// Only entitlements whose rule is itself live are considered. Matching
    /// is on the rule's `ai_product_id` or its linked `course_id`, depending
    /// on the key.
    pub async fn resolve_for_product(
        &self,
        phone: &str,
        key: &ProductKey,
    ) -> DbResult<Option<UserEntitlement>> {
        let key_column = match key {
            ProductKey::AiProduct(_) => "r.ai_product_id",
            ProductKey::Course(_) => "r.course_id",
        };

        let sql = format!(
            r#"
            SELECT
                e.entitlement_id, e.phone, e.rule_id, e.start_date, e.end_date,
                e.daily_remaining, e.is_active, e.is_deleted, e.source_order_id,
                e.revoked_by_order_id, e.created_at, e.updated_at
            FROM user_entitlements e
            INNER JOIN entitlement_rules r ON r.rule_id = e.rule_id
            WHERE e.phone = ?1
            AND {} = ?2
            AND e.is_deleted = 0
            AND r.is_deleted = 0
            ORDER BY e.created_at DESC, e.rowid DESC
            LIMIT 1
            "#,
            key_column
        );

        let ent = sqlx::query_as::<_, UserEntitlement>(&sql)
            .bind(phone)
            .bind(key.id())
            .fetch_optional(&self.pool)
            .await?;

        debug!(phone = %phone, key = %key, found = ent.is_some(), "Resolved entitlement");
        Ok(ent)
    }

    // =========================================================================
    // Reconciliation Writes
    // =========================================================================

    /// Inserts `ent` unless its source order was already granted or
    /// `(phone, rule_id)` already has a live row.
    ///
    /// ## How It Works
    /// ```text
    /// BEGIN
    ///   SELECT by source_order_id   ── found ──► COMMIT, AlreadyGranted
    ///   SELECT live (phone, rule_id) ── found ──► COMMIT, AlreadyLive
    ///   INSERT OR IGNORE            ── ignored ─► re-read, Already*
    /// COMMIT                                      Created
    /// ```
    /// The partial unique indexes catch a writer that slips in between the
    /// checks and the insert.
    pub async fn create_if_absent(&self, ent: &UserEntitlement) -> DbResult<CreateOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        if let Some(order_id) = &ent.source_order_id {
            let granted = granted_by_order(&mut *tx, order_id).await?;
            if let Some(entitlement_id) = granted {
                tx.commit()
                    .await
                    .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
                return Ok(CreateOutcome::AlreadyGranted { entitlement_id });
            }
        }

        let existing: Option<String> = sqlx::query_scalar(
            r#"
            SELECT entitlement_id FROM user_entitlements
            WHERE phone = ?1 AND rule_id = ?2 AND is_deleted = 0
            LIMIT 1
            "#,
        )
        .bind(&ent.phone)
        .bind(&ent.rule_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(entitlement_id) = existing {
            tx.commit()
                .await
                .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
            return Ok(CreateOutcome::AlreadyLive { entitlement_id });
        }

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO user_entitlements (
                entitlement_id, phone, rule_id, start_date, end_date, daily_remaining,
                is_active, is_deleted, source_order_id, revoked_by_order_id,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&ent.entitlement_id)
        .bind(&ent.phone)
        .bind(&ent.rule_id)
        .bind(ent.start_date)
        .bind(ent.end_date)
        .bind(ent.daily_remaining)
        .bind(ent.is_active)
        .bind(ent.is_deleted)
        .bind(&ent.source_order_id)
        .bind(&ent.revoked_by_order_id)
        .bind(ent.created_at)
        .bind(ent.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            if let Some(order_id) = &ent.source_order_id {
                if let Some(entitlement_id) = granted_by_order(&mut *tx, order_id).await? {
                    tx.commit()
                        .await
                        .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
                    warn!(
                        order_id = %order_id,
                        "Concurrent grant for the same order, keeping existing entitlement"
                    );
                    return Ok(CreateOutcome::AlreadyGranted { entitlement_id });
                }
            }

            let winner: Option<String> = sqlx::query_scalar(
                r#"
                SELECT entitlement_id FROM user_entitlements
                WHERE phone = ?1 AND rule_id = ?2 AND is_deleted = 0
                LIMIT 1
                "#,
            )
            .bind(&ent.phone)
            .bind(&ent.rule_id)
            .fetch_optional(&mut *tx)
            .await?;

            tx.commit()
                .await
                .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

            return match winner {
                Some(entitlement_id) => {
                    warn!(
                        phone = %ent.phone,
                        rule_id = %ent.rule_id,
                        "Concurrent create detected, keeping existing entitlement"
                    );
                    Ok(CreateOutcome::AlreadyLive { entitlement_id })
                }
                // Ignored for a reason other than the order or live-pair index
                None => Err(DbError::duplicate("entitlement_id", ent.entitlement_id.clone())),
            };
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(
            entitlement_id = %ent.entitlement_id,
            phone = %ent.phone,
            rule_id = %ent.rule_id,
            "Created entitlement"
        );
        Ok(CreateOutcome::Created)
    }

    /// Soft-deletes the live entitlement for `(phone, rule_id)` on behalf of
    /// `refund_order_id`.
    ///
    /// A refund order revokes at most once: replaying it is a no-op even if
    /// a later purchase has made a new entitlement live.
    ///
    /// ## Returns
    /// * `Ok(Some(id))` - The entitlement that was revoked
    /// * `Ok(None)` - Nothing live to revoke, or this refund already revoked one
    pub async fn revoke_live(
        &self,
        phone: &str,
        rule_id: &str,
        refund_order_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Option<String>> {
        let revoked: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE user_entitlements
            SET is_deleted = 1, revoked_by_order_id = ?3, updated_at = ?4
            WHERE phone = ?1 AND rule_id = ?2 AND is_deleted = 0
            AND NOT EXISTS (
                SELECT 1 FROM user_entitlements WHERE revoked_by_order_id = ?3
            )
            RETURNING entitlement_id
            "#,
        )
        .bind(phone)
        .bind(rule_id)
        .bind(refund_order_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = &revoked {
            debug!(entitlement_id = %id, phone = %phone, rule_id = %rule_id, "Revoked entitlement");
        }
        Ok(revoked)
    }

    // =========================================================================
    // Quota Writes
    // =========================================================================

    /// Sets a live entitlement's remaining quota to `daily_limit`.
    ///
    /// Returns false if the row is gone or was revoked in the meantime.
    pub async fn reset_quota(
        &self,
        entitlement_id: &str,
        daily_limit: i64,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_entitlements SET daily_remaining = ?2, updated_at = ?3
            WHERE entitlement_id = ?1 AND is_deleted = 0
            "#,
        )
        .bind(entitlement_id)
        .bind(daily_limit)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Takes one unit of quota iff any is left.
    ///
    /// The stored count is first clamped to the rule's current
    /// `daily_limit`, so a lowered limit takes effect before the next reset.
    ///
    /// ## Returns
    /// * `Ok(Some(remaining))` - Decremented; `remaining` is the new count
    /// * `Ok(None)` - Nothing left (or the entitlement was revoked)
    pub async fn try_decrement(
        &self,
        entitlement_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Option<i64>> {
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE user_entitlements
            SET daily_remaining = MIN(daily_remaining, (
                    SELECT r.daily_limit FROM entitlement_rules r
                    WHERE r.rule_id = user_entitlements.rule_id
                )) - 1,
                updated_at = ?2
            WHERE entitlement_id = ?1
            AND is_deleted = 0
            AND MIN(daily_remaining, (
                SELECT r.daily_limit FROM entitlement_rules r
                WHERE r.rule_id = user_entitlements.rule_id
            )) > 0
            RETURNING daily_remaining
            "#,
        )
        .bind(entitlement_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(remaining)
    }

    /// Gives back one unit of quota, never exceeding the rule's daily limit.
    ///
    /// ## Returns
    /// * `Ok(Some(remaining))` - Restored; `remaining` is the new count
    /// * `Ok(None)` - Already at the limit (a reset ran in between) or revoked
    pub async fn restore_one(
        &self,
        entitlement_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Option<i64>> {
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE user_entitlements
            SET daily_remaining = daily_remaining + 1, updated_at = ?2
            WHERE entitlement_id = ?1
            AND is_deleted = 0
            AND daily_remaining < (
                SELECT r.daily_limit FROM entitlement_rules r
                WHERE r.rule_id = user_entitlements.rule_id
            )
            RETURNING daily_remaining
            "#,
        )
        .bind(entitlement_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(remaining)
    }
}

/// The entitlement `order_id` produced, whether or not it is still live.
async fn granted_by_order(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> DbResult<Option<String>> {
    let id = sqlx::query_scalar(
        "SELECT entitlement_id FROM user_entitlements WHERE source_order_id = ?1 LIMIT 1",
    )
    .bind(order_id)
    .fetch_optional(conn)
    .await?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use entitle_core::{ProductKey, UserEntitlement};

    use super::CreateOutcome;
    use crate::repository::fixtures::{db, order, rule, t0};
    use crate::Database;

    const PHONE: &str = "13800000000";

    async fn seeded() -> Database {
        let db = db().await;
        db.rules().insert(&rule("R1", "C1", "P1")).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_create_if_absent_is_idempotent() {
        let db = seeded().await;
        let repo = db.entitlements();
        let r1 = rule("R1", "C1", "P1");

        let first = UserEntitlement::grant(PHONE, &r1, t0());
        assert_eq!(repo.create_if_absent(&first).await.unwrap(), CreateOutcome::Created);

        let second = UserEntitlement::grant(PHONE, &r1, t0() + Duration::hours(1));
        assert_eq!(
            repo.create_if_absent(&second).await.unwrap(),
            CreateOutcome::AlreadyLive {
                entitlement_id: first.entitlement_id.clone()
            }
        );
        let live = repo.list_live().await.unwrap();
        assert_eq!(live, vec![first]);
    }

    #[tokio::test]
    async fn test_revoke_then_regrant() {
        let db = seeded().await;
        let repo = db.entitlements();
        let r1 = rule("R1", "C1", "P1");

        let first = UserEntitlement::grant(PHONE, &r1, t0());
        repo.create_if_absent(&first).await.unwrap();

        let revoked = repo.revoke_live(PHONE, "R1", "O2", t0()).await.unwrap();
        assert_eq!(revoked.as_deref(), Some(first.entitlement_id.as_str()));
        assert!(repo.revoke_live(PHONE, "R1", "O3", t0()).await.unwrap().is_none());
        assert!(repo.list_live().await.unwrap().is_empty());

        // Revoked row is kept, only flagged
        let kept = repo.get(&first.entitlement_id).await.unwrap().unwrap();
        assert!(kept.is_deleted);
        assert_eq!(kept.revoked_by_order_id.as_deref(), Some("O2"));

        let again = UserEntitlement::grant(PHONE, &r1, t0() + Duration::days(1));
        assert_eq!(repo.create_if_absent(&again).await.unwrap(), CreateOutcome::Created);
    }

    #[tokio::test]
    async fn test_order_grants_at_most_once() {
        let db = seeded().await;
        let repo = db.entitlements();
        let r1 = rule("R1", "C1", "P1");
        let purchase = order("O1", "C1", false, t0());

        let first = UserEntitlement::from_order(&purchase, &r1, t0());
        assert_eq!(repo.create_if_absent(&first).await.unwrap(), CreateOutcome::Created);
        repo.revoke_live(PHONE, "R1", "O2", t0()).await.unwrap();

        // Replaying the purchase after its refund must not bring it back
        let replay = UserEntitlement::from_order(&purchase, &r1, t0() + Duration::days(1));
        assert_eq!(
            repo.create_if_absent(&replay).await.unwrap(),
            CreateOutcome::AlreadyGranted {
                entitlement_id: first.entitlement_id.clone()
            }
        );
        assert!(repo.list_live().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refund_revokes_at_most_once() {
        let db = seeded().await;
        let repo = db.entitlements();
        let r1 = rule("R1", "C1", "P1");

        let first = UserEntitlement::from_order(&order("O1", "C1", false, t0()), &r1, t0());
        repo.create_if_absent(&first).await.unwrap();
        assert!(repo.revoke_live(PHONE, "R1", "O2", t0()).await.unwrap().is_some());

        // A later purchase is not revoked by replaying the old refund
        let later = t0() + Duration::days(2);
        let second = UserEntitlement::from_order(&order("O3", "C1", false, later), &r1, later);
        assert_eq!(repo.create_if_absent(&second).await.unwrap(), CreateOutcome::Created);
        assert!(repo.revoke_live(PHONE, "R1", "O2", later).await.unwrap().is_none());

        let live = repo.list_live().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].entitlement_id, second.entitlement_id);
    }

    #[tokio::test]
    async fn test_decrement_honours_lowered_limit() {
        let db = seeded().await;
        let repo = db.entitlements();
        let ent = UserEntitlement::grant(PHONE, &rule("R1", "C1", "P1"), t0());
        repo.create_if_absent(&ent).await.unwrap();

        db.rules().update_daily_limit("R1", 2, t0()).await.unwrap();

        assert_eq!(repo.try_decrement(&ent.entitlement_id, t0()).await.unwrap(), Some(1));
        assert_eq!(repo.try_decrement(&ent.entitlement_id, t0()).await.unwrap(), Some(0));
        assert_eq!(repo.try_decrement(&ent.entitlement_id, t0()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_decrement_stops_at_zero() {
        let db = seeded().await;
        let repo = db.entitlements();
        let ent = UserEntitlement::grant(PHONE, &rule("R1", "C1", "P1"), t0());
        repo.create_if_absent(&ent).await.unwrap();

        for expected in (0..5).rev() {
            let left = repo.try_decrement(&ent.entitlement_id, t0()).await.unwrap();
            assert_eq!(left, Some(expected));
        }
        assert_eq!(repo.try_decrement(&ent.entitlement_id, t0()).await.unwrap(), None);

        let stored = repo.get(&ent.entitlement_id).await.unwrap().unwrap();
        assert_eq!(stored.daily_remaining, 0);
    }

    #[tokio::test]
    async fn test_restore_is_capped_at_limit() {
        let db = seeded().await;
        let repo = db.entitlements();
        let ent = UserEntitlement::grant(PHONE, &rule("R1", "C1", "P1"), t0());
        repo.create_if_absent(&ent).await.unwrap();

        assert_eq!(repo.restore_one(&ent.entitlement_id, t0()).await.unwrap(), None);

        repo.try_decrement(&ent.entitlement_id, t0()).await.unwrap();
        assert_eq!(repo.restore_one(&ent.entitlement_id, t0()).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_revoked_entitlement_cannot_be_consumed() {
        let db = seeded().await;
        let repo = db.entitlements();
        let ent = UserEntitlement::grant(PHONE, &rule("R1", "C1", "P1"), t0());
        repo.create_if_absent(&ent).await.unwrap();
        repo.revoke_live(PHONE, "R1", "O2", t0()).await.unwrap();

        assert_eq!(repo.try_decrement(&ent.entitlement_id, t0()).await.unwrap(), None);
        assert!(!repo.reset_quota(&ent.entitlement_id, 5, t0()).await.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_for_product_picks_newest() {
        let db = seeded().await;
        let mut r2 = rule("R2", "C1", "P2");
        r2.created_at = t0();
        db.rules().insert(&r2).await.unwrap();

        let repo = db.entitlements();
        let older = UserEntitlement::grant(PHONE, &rule("R1", "C1", "P1"), t0());
        let newer = UserEntitlement::grant(PHONE, &r2, t0() + Duration::hours(1));
        repo.create_if_absent(&older).await.unwrap();
        repo.create_if_absent(&newer).await.unwrap();

        let by_product = repo
            .resolve_for_product(PHONE, &ProductKey::AiProduct("P1".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_product.entitlement_id, older.entitlement_id);

        let by_course = repo
            .resolve_for_product(PHONE, &ProductKey::Course("C1".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_course.entitlement_id, newer.entitlement_id);

        assert!(repo
            .resolve_for_product("13900000000", &ProductKey::Course("C1".into()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_resolve_ignores_deleted_rule() {
        let db = seeded().await;
        let repo = db.entitlements();
        let ent = UserEntitlement::grant(PHONE, &rule("R1", "C1", "P1"), t0());
        repo.create_if_absent(&ent).await.unwrap();

        db.rules().soft_delete("R1", t0()).await.unwrap();

        assert!(repo
            .resolve_for_product(PHONE, &ProductKey::AiProduct("P1".into()))
            .await
            .unwrap()
            .is_none());
    }
}
