//! # Job Reports
//!
//! What the reconciliation and quota reset jobs hand back after a run.
//!
//! Per-item failures are data, not errors: a batch always completes and
//! returns its report, with failed items listed inside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Reconciliation
// =============================================================================

/// The effect a single order had on the entitlement store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEffect {
    /// A new entitlement was written.
    Created,
    /// The live entitlement was soft-deleted.
    Revoked,
    /// The effect was already present (replayed purchase, replayed refund).
    AlreadyApplied,
}

/// Why an order could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No rule exists for the order's course. Never retried.
    NoMatchingRule,
    /// Transient storage errors on every allowed attempt.
    RetriesExhausted,
    /// A storage error that retrying cannot fix.
    NonRetryable,
}

/// One order that reconciliation could not apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub order_id: String,
    pub phone: String,
    pub course_id: String,
    pub kind: FailureKind,
    /// Last error message seen for the order.
    pub error: String,
    /// Attempts made before giving up (0 for `NoMatchingRule`).
    pub retry_count: u32,
}

/// Summary of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_processed: usize,
    pub created: usize,
    pub revoked: usize,
    pub already_applied: usize,
    pub failures: Vec<FailureRecord>,
}

impl ReconciliationReport {
    /// Empty report for a window.
    pub fn new(window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        ReconciliationReport {
            window_start,
            window_end,
            total_processed: 0,
            created: 0,
            revoked: 0,
            already_applied: 0,
            failures: Vec::new(),
        }
    }

    /// Counts one successfully applied order.
    pub fn record_effect(&mut self, effect: OrderEffect) {
        self.total_processed += 1;
        match effect {
            OrderEffect::Created => self.created += 1,
            OrderEffect::Revoked => self.revoked += 1,
            OrderEffect::AlreadyApplied => self.already_applied += 1,
        }
    }

    /// Counts one failed order.
    pub fn record_failure(&mut self, failure: FailureRecord) {
        self.total_processed += 1;
        self.failures.push(failure);
    }

    /// Returns true if any order failed for a reason a rerun could fix.
    ///
    /// Watermarks must not advance past such a window.
    pub fn has_retryable_failures(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.kind == FailureKind::RetriesExhausted)
    }
}

// =============================================================================
// Quota Reset
// =============================================================================

/// Summary of one quota reset run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetReport {
    /// Entitlements whose quota was refilled.
    pub updated: usize,
    /// Of `updated`, rows that were already full.
    pub unchanged: usize,
    /// Entitlements whose rule is missing or soft-deleted.
    pub orphaned: Vec<String>,
    /// Entitlements a storage error kept from being reset.
    pub failed: Vec<String>,
}
