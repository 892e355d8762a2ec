//! # Domain Types
//!
//! Records the engine reads and writes.
//!
//! ## Type Relationships
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────┐   ┌─────────────────────┐  │
//! │  │     Order       │   │ EntitlementRule  │   │  UserEntitlement    │  │
//! │  │  ─────────────  │   │  ──────────────  │   │  ─────────────────  │  │
//! │  │  order_id       │   │  rule_id         │◄──│  rule_id (FK)       │  │
//! │  │  phone          │   │  course_id       │   │  phone              │  │
//! │  │  course_id ─────┼──►│  ai_product_id   │   │  start/end_date     │  │
//! │  │  is_refund      │   │  daily_limit     │   │  daily_remaining    │  │
//! │  │  created_at     │   │  validity_days   │   │  is_deleted         │  │
//! │  └─────────────────┘   └──────────────────┘   └─────────────────────┘  │
//! │   external, read-only   external, read-only     owned by the engine    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Soft Delete
//! Every record carries `is_deleted`. Nothing is ever physically removed:
//! refunds flip `is_deleted` on the entitlement, catalog removals flip it on
//! the rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::quota::ValidityWindow;
use crate::validation::{validate_id, validate_rule_limits, ValidationResult};
use crate::{ENTITLEMENT_ID_PREFIX, RULE_ID_PREFIX};

// =============================================================================
// Entitlement Rule
// =============================================================================

/// Catalog configuration: what a purchase of `course_id` grants on
/// `ai_product_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct EntitlementRule {
    pub rule_id: String,
    pub course_id: String,
    pub ai_product_id: String,

    /// Uses per day granted to each entitlement.
    pub daily_limit: i64,

    /// Length of the access window in days.
    pub validity_days: i64,

    pub is_deleted: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl EntitlementRule {
    /// Builds a new rule with a generated id.
    ///
    /// ## Errors
    /// Returns `ValidationError` for empty ids or out-of-range limits.
    pub fn new(
        course_id: impl Into<String>,
        ai_product_id: impl Into<String>,
        daily_limit: i64,
        validity_days: i64,
        now: DateTime<Utc>,
    ) -> ValidationResult<Self> {
        let rule = EntitlementRule {
            rule_id: generate_rule_id(),
            course_id: course_id.into(),
            ai_product_id: ai_product_id.into(),
            daily_limit,
            validity_days,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Checks ids and limits before the rule is stored.
    pub fn validate(&self) -> ValidationResult<()> {
        validate_id("rule_id", &self.rule_id)?;
        validate_id("course_id", &self.course_id)?;
        validate_id("ai_product_id", &self.ai_product_id)?;
        validate_rule_limits(self.daily_limit, self.validity_days)
    }
}

// =============================================================================
// Order
// =============================================================================

/// A purchase (or its refund) observed on the order feed.
///
/// A refund is the same order shape with `is_refund = true`; there is no
/// separate refund event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub order_id: String,
    pub phone: String,
    pub course_id: String,
    pub purchase_time: DateTime<Utc>,
    pub is_refund: bool,

    /// Ingestion timestamp. Reconciliation windows are cut on this field.
    pub created_at: DateTime<Utc>,

    pub is_deleted: bool,
}

// =============================================================================
// User Entitlement
// =============================================================================

/// One granted access window for a phone under a rule.
///
/// ## Invariants
/// - At most one non-deleted row per `(phone, rule_id)`
/// - `0 ≤ daily_remaining ≤ rule.daily_limit`
/// - `end_date` is frozen at creation from the rule's `validity_days`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct UserEntitlement {
    pub entitlement_id: String,
    pub phone: String,
    pub rule_id: String,
    #[ts(as = "String")]
    pub start_date: DateTime<Utc>,
    #[ts(as = "String")]
    pub end_date: DateTime<Utc>,
    pub daily_remaining: i64,
    pub is_active: bool,
    pub is_deleted: bool,

    /// Purchase order that produced this row, if any.
    pub source_order_id: Option<String>,

    /// Refund order that revoked this row, if any.
    pub revoked_by_order_id: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl UserEntitlement {
    /// Grants a fresh entitlement for `phone` under `rule`.
    ///
    /// Snapshot pattern: `end_date` and the initial quota are copied from the
    /// rule now; later rule edits never touch this row's window.
    pub fn grant(phone: impl Into<String>, rule: &EntitlementRule, now: DateTime<Utc>) -> Self {
        let window = ValidityWindow::starting_at(now, rule.validity_days);

        UserEntitlement {
            entitlement_id: generate_entitlement_id(),
            phone: phone.into(),
            rule_id: rule.rule_id.clone(),
            start_date: window.start_date,
            end_date: window.end_date,
            daily_remaining: rule.daily_limit,
            is_active: false,
            is_deleted: false,
            source_order_id: None,
            revoked_by_order_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Grants the entitlement a purchase order pays for.
    ///
    /// The order id is kept on the row, so replaying the order finds it
    /// even after a refund revoked it.
    pub fn from_order(order: &Order, rule: &EntitlementRule, now: DateTime<Utc>) -> Self {
        let mut ent = Self::grant(order.phone.clone(), rule, now);
        ent.source_order_id = Some(order.order_id.clone());
        ent
    }

    /// Returns true once the access window has closed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_date
    }
}

// =============================================================================
// Product Key
// =============================================================================

/// How a calling feature identifies what is being consumed.
///
/// Features built around an AI product pass its id; course-scoped features
/// pass the course id and match through the rule's linked course.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "id", rename_all = "snake_case")]
pub enum ProductKey {
    AiProduct(String),
    Course(String),
}

impl ProductKey {
    /// Returns the raw identifier.
    pub fn id(&self) -> &str {
        match self {
            ProductKey::AiProduct(id) | ProductKey::Course(id) => id,
        }
    }
}

impl std::fmt::Display for ProductKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductKey::AiProduct(id) => write!(f, "ai_product:{}", id),
            ProductKey::Course(id) => write!(f, "course:{}", id),
        }
    }
}

// =============================================================================
// Identifier Generation
// =============================================================================

/// Generates a new rule id (`RULE_<uuid hex>`).
pub fn generate_rule_id() -> String {
    format!("{}{}", RULE_ID_PREFIX, Uuid::new_v4().simple())
}

/// Generates a new entitlement id (`ENT_<uuid hex>`).
pub fn generate_entitlement_id() -> String {
    format!("{}{}", ENTITLEMENT_ID_PREFIX, Uuid::new_v4().simple())
}

// =============================================================================
// Unit Tests
// =============================================================================
