//! # Repository Module
//!
//! Typed data access for each table.
//!
//! ## Ownership
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Repository              Table                        Engine access    │
//! │  ──────────              ─────                        ─────────────    │
//! │  RuleRepository          entitlement_rules            read-only        │
//! │  OrderRepository         orders                       read-only        │
//! │  EntitlementRepository   user_entitlements            read/write       │
//! │  WatermarkRepository     reconciliation_watermarks    read/write       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rule and order inserts exist for seeding and tests; catalog and order
//! management own those tables in production.
//!
//! Every lookup takes typed parameters (ids, phone, time bounds); there is no
//! generic filter map.

pub mod entitlement;
pub mod order;
pub mod rule;
pub mod watermark;

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use entitle_core::{EntitlementRule, Order};

    use crate::{Database, DbConfig};

    pub async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap()
    }

    pub fn rule(rule_id: &str, course_id: &str, product_id: &str) -> EntitlementRule {
        EntitlementRule {
            rule_id: rule_id.to_string(),
            course_id: course_id.to_string(),
            ai_product_id: product_id.to_string(),
            daily_limit: 5,
            validity_days: 30,
            is_deleted: false,
            created_at: t0() - Duration::days(10),
            updated_at: t0() - Duration::days(10),
        }
    }

    pub fn order(order_id: &str, course_id: &str, is_refund: bool, created_at: DateTime<Utc>) -> Order {
        Order {
            order_id: order_id.to_string(),
            phone: "13800000000".to_string(),
            course_id: course_id.to_string(),
            purchase_time: created_at,
            is_refund,
            created_at,
            is_deleted: false,
        }
    }
}
