//! # Order Repository
//!
//! Read access to the order feed.
//!
//! Windows are cut on `created_at` (ingestion time), never on
//! `purchase_time`: a late-arriving order still lands in the next window.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use entitle_core::Order;

/// Repository for the `orders` table.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Lists orders with `created_from <= created_at < created_to`.
    ///
    /// Ordered by ingestion time so that a purchase and its later refund in
    /// the same window are applied in the order they happened.
    pub async fn list(
        &self,
        created_from: DateTime<Utc>,
        created_to: DateTime<Utc>,
        include_deleted: bool,
    ) -> DbResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, phone, course_id, purchase_time, is_refund, created_at, is_deleted
            FROM orders
            WHERE created_at >= ?1
            AND created_at < ?2
            AND (?3 OR is_deleted = 0)
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(created_from)
        .bind(created_to)
        .bind(include_deleted)
        .fetch_all(&self.pool)
        .await?;

        debug!(
            from = %created_from,
            to = %created_to,
            count = orders.len(),
            "Listed orders"
        );
        Ok(orders)
    }

    /// Gets an order by id (deleted or not).
    pub async fn get(&self, order_id: &str) -> DbResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, phone, course_id, purchase_time, is_refund, created_at, is_deleted
            FROM orders
            WHERE order_id = ?1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    /// Inserts an order.
    pub async fn insert(&self, order: &Order) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, phone, course_id, purchase_time, is_refund, created_at, is_deleted
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.phone)
        .bind(&order.course_id)
        .bind(order.purchase_time)
        .bind(order.is_refund)
        .bind(order.created_at)
        .bind(order.is_deleted)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Counts live orders.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE is_deleted = 0")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use crate::error::DbError;
    use crate::repository::fixtures::{db, order, t0};

    #[tokio::test]
    async fn test_list_is_half_open_and_ordered() {
        let db = db().await;
        let repo = db.orders();

        let start = t0();
        let end = t0() + Duration::days(1);

        repo.insert(&order("O3", "C1", false, end)).await.unwrap();
        repo.insert(&order("O2", "C1", true, start + Duration::hours(2)))
            .await
            .unwrap();
        repo.insert(&order("O1", "C1", false, start)).await.unwrap();
        repo.insert(&order("O0", "C1", false, start - Duration::seconds(1)))
            .await
            .unwrap();

        let orders = repo.list(start, end, false).await.unwrap();
        let ids: Vec<_> = orders.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, vec!["O1", "O2"]);
        assert!(orders[1].is_refund);
    }

    #[tokio::test]
    async fn test_list_excludes_deleted_unless_asked() {
        let db = db().await;
        let repo = db.orders();

        let mut deleted = order("O1", "C1", false, t0());
        deleted.is_deleted = true;
        repo.insert(&deleted).await.unwrap();
        repo.insert(&order("O2", "C1", false, t0())).await.unwrap();

        let end = t0() + Duration::hours(1);
        assert_eq!(repo.list(t0(), end, false).await.unwrap().len(), 1);
        assert_eq!(repo.list(t0(), end, true).await.unwrap().len(), 2);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_order_id_rejected() {
        let db = db().await;
        let repo = db.orders();

        repo.insert(&order("O1", "C1", false, t0())).await.unwrap();
        let err = repo.insert(&order("O1", "C1", true, t0())).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        let stored = repo.get("O1").await.unwrap().unwrap();
        assert!(!stored.is_refund);
    }
}
