//! # Store Interfaces
//!
//! The narrow read/write contracts the jobs and the gate depend on.
//!
//! ## Seams
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Trait              Owner                 Implemented by               │
//! │  ─────              ─────                 ──────────────               │
//! │  RuleCatalog        catalog management    entitle_db::Database         │
//! │  OrderFeed          order management      entitle_db::Database         │
//! │  EntitlementStore   this engine           entitle_db::Database         │
//! │  WatermarkStore     this engine           entitle_db::Database         │
//! │                                                                         │
//! │  Tests wrap Database to inject transient faults at any seam.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;

use chrono::{DateTime, Utc};

use entitle_core::{EntitlementRule, Order, ProductKey, UserEntitlement};
use entitle_db::{CreateOutcome, Database, DbResult};

// =============================================================================
// Read-only Collaborators
// =============================================================================

/// Read access to the rule catalog.
pub trait RuleCatalog: Send + Sync {
    /// `GetRuleByCourse`: the oldest live rule for a course.
    fn rule_by_course(
        &self,
        course_id: &str,
    ) -> impl Future<Output = DbResult<Option<EntitlementRule>>> + Send;

    /// `GetRule`: a live rule by id.
    fn rule(&self, rule_id: &str) -> impl Future<Output = DbResult<Option<EntitlementRule>>> + Send;
}

/// Read access to the order feed.
pub trait OrderFeed: Send + Sync {
    /// `ListOrders`: orders with `created_from <= created_at < created_to`.
    fn list_orders(
        &self,
        created_from: DateTime<Utc>,
        created_to: DateTime<Utc>,
        include_deleted: bool,
    ) -> impl Future<Output = DbResult<Vec<Order>>> + Send;
}

// =============================================================================
// Engine-owned State
// =============================================================================

/// The entitlement store.
pub trait EntitlementStore: Send + Sync {
    /// Check-before-create, guarded by the same transaction as the insert.
    fn create_if_absent(
        &self,
        ent: &UserEntitlement,
    ) -> impl Future<Output = DbResult<CreateOutcome>> + Send;

    /// Soft-deletes the live row for `(phone, rule_id)`, returning its id.
    /// A refund order that already revoked a row revokes nothing.
    fn revoke_live(
        &self,
        phone: &str,
        rule_id: &str,
        refund_order_id: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = DbResult<Option<String>>> + Send;

    fn list_live(&self) -> impl Future<Output = DbResult<Vec<UserEntitlement>>> + Send;

    fn reset_quota(
        &self,
        entitlement_id: &str,
        daily_limit: i64,
        now: DateTime<Utc>,
    ) -> impl Future<Output = DbResult<bool>> + Send;

    fn resolve_for_product(
        &self,
        phone: &str,
        key: &ProductKey,
    ) -> impl Future<Output = DbResult<Option<UserEntitlement>>> + Send;

    /// Conditional decrement; `None` when nothing is left.
    fn try_decrement(
        &self,
        entitlement_id: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = DbResult<Option<i64>>> + Send;

    /// Conditional increment capped at the rule's limit.
    fn restore_one(
        &self,
        entitlement_id: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = DbResult<Option<i64>>> + Send;
}

/// Persisted reconciliation progress.
pub trait WatermarkStore: Send + Sync {
    fn watermark(&self, job: &str) -> impl Future<Output = DbResult<Option<DateTime<Utc>>>> + Send;

    fn set_watermark(
        &self,
        job: &str,
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = DbResult<()>> + Send;
}

/// Everything the engine needs from storage, in one bound.
pub trait EngineStore:
    RuleCatalog + OrderFeed + EntitlementStore + WatermarkStore + Clone + 'static
{
}

impl<T> EngineStore for T where
    T: RuleCatalog + OrderFeed + EntitlementStore + WatermarkStore + Clone + 'static
{
}

// =============================================================================
// SQLite Implementation
// =============================================================================

impl RuleCatalog for Database {
    async fn rule_by_course(&self, course_id: &str) -> DbResult<Option<EntitlementRule>> {
        self.rules().get_by_course(course_id).await
    }

    async fn rule(&self, rule_id: &str) -> DbResult<Option<EntitlementRule>> {
        self.rules().get(rule_id).await
    }
}

impl OrderFeed for Database {
    async fn list_orders(
        &self,
        created_from: DateTime<Utc>,
        created_to: DateTime<Utc>,
        include_deleted: bool,
    ) -> DbResult<Vec<Order>> {
        self.orders()
            .list(created_from, created_to, include_deleted)
            .await
    }
}

impl EntitlementStore for Database {
    async fn create_if_absent(&self, ent: &UserEntitlement) -> DbResult<CreateOutcome> {
        self.entitlements().create_if_absent(ent).await
    }

    async fn revoke_live(
        &self,
        phone: &str,
        rule_id: &str,
        refund_order_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Option<String>> {
        self.entitlements()
            .revoke_live(phone, rule_id, refund_order_id, now)
            .await
    }

    async fn list_live(&self) -> DbResult<Vec<UserEntitlement>> {
        self.entitlements().list_live().await
    }

    async fn reset_quota(
        &self,
        entitlement_id: &str,
        daily_limit: i64,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.entitlements()
            .reset_quota(entitlement_id, daily_limit, now)
            .await
    }

    async fn resolve_for_product(
        &self,
        phone: &str,
        key: &ProductKey,
    ) -> DbResult<Option<UserEntitlement>> {
        self.entitlements().resolve_for_product(phone, key).await
    }

    async fn try_decrement(
        &self,
        entitlement_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Option<i64>> {
        self.entitlements().try_decrement(entitlement_id, now).await
    }

    async fn restore_one(&self, entitlement_id: &str, now: DateTime<Utc>) -> DbResult<Option<i64>> {
        self.entitlements().restore_one(entitlement_id, now).await
    }
}

impl WatermarkStore for Database {
    async fn watermark(&self, job: &str) -> DbResult<Option<DateTime<Utc>>> {
        self.watermarks().get(job).await
    }

    async fn set_watermark(
        &self,
        job: &str,
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        self.watermarks().set(job, watermark, now).await
    }
}

// =============================================================================
// Test Support
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    //! Fault-injecting wrapper and fixtures shared by the job and gate tests.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use entitle_core::{EntitlementRule, Order, ProductKey, UserEntitlement};
    use entitle_db::{CreateOutcome, Database, DbConfig, DbError, DbResult};

    use super::{EntitlementStore, OrderFeed, RuleCatalog, WatermarkStore};

    pub const PHONE: &str = "13800000000";

    pub async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    /// Today 00:00 UTC in the fixed test calendar.
    pub fn today() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap()
    }

    pub fn rule(rule_id: &str, course_id: &str, product_id: &str) -> EntitlementRule {
        let created = today() - Duration::days(90);
        EntitlementRule {
            rule_id: rule_id.to_string(),
            course_id: course_id.to_string(),
            ai_product_id: product_id.to_string(),
            daily_limit: 5,
            validity_days: 30,
            is_deleted: false,
            created_at: created,
            updated_at: created,
        }
    }

    pub fn order(
        order_id: &str,
        phone: &str,
        course_id: &str,
        is_refund: bool,
        created_at: DateTime<Utc>,
    ) -> Order {
        Order {
            order_id: order_id.to_string(),
            phone: phone.to_string(),
            course_id: course_id.to_string(),
            purchase_time: created_at,
            is_refund,
            created_at,
            is_deleted: false,
        }
    }

    /// Which store call a fault is attached to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Op {
        RuleByCourse,
        Create,
        Revoke,
        ResetQuota,
        Decrement,
        Restore,
    }

    /// A fault: fail the next `remaining` calls of `op` whose key matches.
    #[derive(Debug, Clone)]
    struct Fault {
        key: Option<String>,
        remaining: u32,
        error: fn() -> DbError,
    }

    /// Database wrapper that fails selected calls.
    #[derive(Debug, Clone)]
    pub struct FlakyStore {
        pub db: Database,
        faults: Arc<Mutex<HashMap<Op, Vec<Fault>>>>,
        calls: Arc<Mutex<HashMap<Op, u32>>>,
    }

    pub fn busy() -> DbError {
        DbError::Busy("database is locked".to_string())
    }

    pub fn constraint() -> DbError {
        DbError::QueryFailed("CHECK constraint failed".to_string())
    }

    impl FlakyStore {
        pub fn new(db: Database) -> Self {
            FlakyStore {
                db,
                faults: Arc::new(Mutex::new(HashMap::new())),
                calls: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        /// Fails the next `times` calls of `op` (for `key`, if given).
        pub fn fail(&self, op: Op, key: Option<&str>, times: u32, error: fn() -> DbError) {
            self.faults.lock().unwrap().entry(op).or_default().push(Fault {
                key: key.map(str::to_string),
                remaining: times,
                error,
            });
        }

        pub fn calls(&self, op: Op) -> u32 {
            self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
        }

        fn check(&self, op: Op, key: &str) -> DbResult<()> {
            *self.calls.lock().unwrap().entry(op).or_default() += 1;

            let mut faults = self.faults.lock().unwrap();
            if let Some(list) = faults.get_mut(&op) {
                for fault in list.iter_mut() {
                    let matches = fault.key.as_deref().map_or(true, |k| k == key);
                    if matches && fault.remaining > 0 {
                        fault.remaining -= 1;
                        return Err((fault.error)());
                    }
                }
            }
            Ok(())
        }
    }

    impl RuleCatalog for FlakyStore {
        async fn rule_by_course(&self, course_id: &str) -> DbResult<Option<EntitlementRule>> {
            self.check(Op::RuleByCourse, course_id)?;
            self.db.rule_by_course(course_id).await
        }

        async fn rule(&self, rule_id: &str) -> DbResult<Option<EntitlementRule>> {
            self.db.rule(rule_id).await
        }
    }

    impl OrderFeed for FlakyStore {
        async fn list_orders(
            &self,
            created_from: DateTime<Utc>,
            created_to: DateTime<Utc>,
            include_deleted: bool,
        ) -> DbResult<Vec<Order>> {
            self.db
                .list_orders(created_from, created_to, include_deleted)
                .await
        }
    }

    impl EntitlementStore for FlakyStore {
        async fn create_if_absent(&self, ent: &UserEntitlement) -> DbResult<CreateOutcome> {
            self.check(Op::Create, &ent.phone)?;
            self.db.create_if_absent(ent).await
        }

        async fn revoke_live(
            &self,
            phone: &str,
            rule_id: &str,
            refund_order_id: &str,
            now: DateTime<Utc>,
        ) -> DbResult<Option<String>> {
            self.check(Op::Revoke, phone)?;
            self.db.revoke_live(phone, rule_id, refund_order_id, now).await
        }

        async fn list_live(&self) -> DbResult<Vec<UserEntitlement>> {
            self.db.list_live().await
        }

        async fn reset_quota(
            &self,
            entitlement_id: &str,
            daily_limit: i64,
            now: DateTime<Utc>,
        ) -> DbResult<bool> {
            self.check(Op::ResetQuota, entitlement_id)?;
            self.db.reset_quota(entitlement_id, daily_limit, now).await
        }

        async fn resolve_for_product(
            &self,
            phone: &str,
            key: &ProductKey,
        ) -> DbResult<Option<UserEntitlement>> {
            self.db.resolve_for_product(phone, key).await
        }

        async fn try_decrement(
            &self,
            entitlement_id: &str,
            now: DateTime<Utc>,
        ) -> DbResult<Option<i64>> {
            self.check(Op::Decrement, entitlement_id)?;
            self.db.try_decrement(entitlement_id, now).await
        }

        async fn restore_one(
            &self,
            entitlement_id: &str,
            now: DateTime<Utc>,
        ) -> DbResult<Option<i64>> {
            self.check(Op::Restore, entitlement_id)?;
            self.db.restore_one(entitlement_id, now).await
        }
    }

    impl WatermarkStore for FlakyStore {
        async fn watermark(&self, job: &str) -> DbResult<Option<DateTime<Utc>>> {
            self.db.watermark(job).await
        }

        async fn set_watermark(
            &self,
            job: &str,
            watermark: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> DbResult<()> {
            self.db.set_watermark(job, watermark, now).await
        }
    }
}
