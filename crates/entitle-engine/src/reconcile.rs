//! # Reconciliation Job
//!
//! Turns newly observed orders into entitlements, and refunds into revokes.
//!
//! ## Per-order Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Reconciling One Order                               │
//! │                                                                         │
//! │  order ──► rule for course? ── none ──► NoMatchingRule (no retry)      │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │           is_refund?                                                   │
//! │            │       │                                                    │
//! │           no      yes                                                   │
//! │            │       │                                                    │
//! │            ▼       ▼                                                    │
//! │   create_if_absent  revoke_live                                        │
//! │   Created |         Revoked |                                          │
//! │   AlreadyApplied    AlreadyApplied (nothing live, or this refund       │
//! │   (order granted    already revoked a row)                             │
//! │   or pair live)                                                        │
//! │                                                                         │
//! │  Transient storage error anywhere above ──► retry this order only,     │
//! │  with backoff; exhausted ──► RetriesExhausted, batch continues         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Re-running over the same or an overlapping window is safe. Entitlements
//! record the order that granted them and the refund that revoked them, so
//! a purchase and its refund in one window settle once and stay settled.

use backoff::backoff::Backoff;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use tracing::{debug, error, info, warn};

use entitle_core::validation::validate_window;
use entitle_core::{
    CoreError, FailureKind, FailureRecord, Order, OrderEffect, ReconciliationReport,
    UserEntitlement,
};
use entitle_db::CreateOutcome;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::retry::{retry_transient, RetryFailure};
use crate::store::EngineStore;
use crate::window::ReconciliationWindow;

/// Watermark key of the scheduled reconciliation.
pub const RECONCILE_JOB: &str = "reconcile_orders";

/// The reconciliation job.
pub struct Reconciler<S> {
    store: S,
    backoff: Box<dyn Backoff + Send>,
    max_retries: u32,
    cutoff_hour: u32,
    offset: FixedOffset,
    use_watermark: bool,
}

impl<S: EngineStore> Reconciler<S> {
    /// Creates a reconciler with default settings.
    pub fn new(store: S) -> Self {
        let defaults = EngineConfig::default();
        Reconciler {
            store,
            backoff: Box::new(defaults.reconcile.backoff()),
            max_retries: defaults.reconcile.max_retries,
            cutoff_hour: defaults.schedule.reconcile_hour,
            offset: Utc.fix(),
            use_watermark: defaults.reconcile.use_watermark,
        }
    }

    /// Creates a reconciler from validated configuration.
    pub fn from_config(store: S, config: &EngineConfig) -> EngineResult<Self> {
        Ok(Reconciler {
            store,
            backoff: Box::new(config.reconcile.backoff()),
            max_retries: config.reconcile.max_retries,
            cutoff_hour: config.schedule.reconcile_hour,
            offset: config.schedule.offset()?,
            use_watermark: config.reconcile.use_watermark,
        })
    }

    /// Replaces the backoff strategy.
    pub fn with_backoff(mut self, backoff: impl Backoff + Send + 'static) -> Self {
        self.backoff = Box::new(backoff);
        self
    }

    /// Sets the attempt budget used by scheduled runs.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the daily window cutoff.
    pub fn with_cutoff(mut self, hour: u32, offset: FixedOffset) -> Self {
        self.cutoff_hour = hour;
        self.offset = offset;
        self
    }

    /// Enables or disables the persisted watermark.
    pub fn with_watermark(mut self, enabled: bool) -> Self {
        self.use_watermark = enabled;
        self
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    // =========================================================================
    // Scheduled Run
    // =========================================================================

    /// Runs the job for the window ending at the latest cutoff before `now`.
    ///
    /// The watermark advances to the window end unless some order ran out of
    /// retries; the next run then covers the window again.
    pub async fn run_scheduled(&mut self, now: DateTime<Utc>) -> EngineResult<ReconciliationReport> {
        let watermark = if self.use_watermark {
            self.store.watermark(RECONCILE_JOB).await?
        } else {
            None
        };

        let window = ReconciliationWindow::for_run(now, self.cutoff_hour, self.offset, watermark)?;

        if window.is_empty() {
            if window.start > window.end {
                warn!(
                    watermark = %window.start,
                    cutoff = %window.end,
                    "Watermark is ahead of the latest cutoff"
                );
            } else {
                info!(cutoff = %window.end, "Window already reconciled");
            }
            return Ok(ReconciliationReport::new(window.start, window.end));
        }

        let report = self
            .reconcile(window.start, window.end, self.max_retries)
            .await?;

        if self.use_watermark {
            if report.has_retryable_failures() {
                warn!(
                    window_start = %window.start,
                    failures = report.failures.len(),
                    "Watermark held back; window will be retried"
                );
            } else {
                self.store
                    .set_watermark(RECONCILE_JOB, window.end, Utc::now())
                    .await?;
            }
        }

        Ok(report)
    }

    // =========================================================================
    // Reconcile
    // =========================================================================

    /// `Reconcile(windowStart, windowEnd, maxRetries)`.
    ///
    /// Applies every live order with `window_start <= created_at <
    /// window_end`. `max_retries` is the number of attempts per order.
    /// Per-order failures land in the report; only an invalid window or a
    /// failure to list orders is returned as an error. Never touches the
    /// watermark.
    pub async fn reconcile(
        &mut self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        max_retries: u32,
    ) -> EngineResult<ReconciliationReport> {
        validate_window(window_start, window_end)?;

        let orders = self
            .store
            .list_orders(window_start, window_end, false)
            .await?;

        info!(
            window_start = %window_start,
            window_end = %window_end,
            orders = orders.len(),
            "Reconciliation starting"
        );

        let mut report = ReconciliationReport::new(window_start, window_end);
        let store = &self.store;
        let backoff = self.backoff.as_mut();

        for order in &orders {
            let outcome = retry_transient(max_retries, &mut *backoff, |attempt| {
                debug!(order_id = %order.order_id, attempt, "Applying order");
                apply_order(store, order)
            })
            .await;

            match outcome {
                Ok(effect) => {
                    debug!(order_id = %order.order_id, ?effect, "Order applied");
                    report.record_effect(effect);
                }
                Err(failure) => report.record_failure(failure_record(order, failure)),
            }
        }

        info!(
            total = report.total_processed,
            created = report.created,
            revoked = report.revoked,
            already_applied = report.already_applied,
            failures = report.failures.len(),
            "Reconciliation finished"
        );

        Ok(report)
    }
}

/// Applies one order. Safe to call again after any failure.
async fn apply_order<S: EngineStore>(store: &S, order: &Order) -> EngineResult<OrderEffect> {
    let rule = store
        .rule_by_course(&order.course_id)
        .await?
        .ok_or_else(|| CoreError::NoMatchingRule {
            course_id: order.course_id.clone(),
        })?;

    let now = Utc::now();

    if order.is_refund {
        let revoked = store
            .revoke_live(&order.phone, &rule.rule_id, &order.order_id, now)
            .await?;
        return match revoked {
            Some(entitlement_id) => {
                info!(
                    order_id = %order.order_id,
                    entitlement_id = %entitlement_id,
                    phone = %order.phone,
                    rule_id = %rule.rule_id,
                    "Entitlement revoked on refund"
                );
                Ok(OrderEffect::Revoked)
            }
            None => {
                debug!(order_id = %order.order_id, "Nothing live to revoke or refund already applied");
                Ok(OrderEffect::AlreadyApplied)
            }
        };
    }

    let ent = UserEntitlement::from_order(order, &rule, now);
    match store.create_if_absent(&ent).await? {
        CreateOutcome::Created => {
            info!(
                order_id = %order.order_id,
                entitlement_id = %ent.entitlement_id,
                phone = %order.phone,
                rule_id = %rule.rule_id,
                end_date = %ent.end_date,
                "Entitlement created"
            );
            Ok(OrderEffect::Created)
        }
        CreateOutcome::AlreadyLive { entitlement_id } => {
            debug!(
                order_id = %order.order_id,
                entitlement_id = %entitlement_id,
                "Entitlement already live"
            );
            Ok(OrderEffect::AlreadyApplied)
        }
        CreateOutcome::AlreadyGranted { entitlement_id } => {
            debug!(
                order_id = %order.order_id,
                entitlement_id = %entitlement_id,
                "Order already granted"
            );
            Ok(OrderEffect::AlreadyApplied)
        }
    }
}

/// Classifies a failed order for the report.
fn failure_record(order: &Order, failure: RetryFailure) -> FailureRecord {
    let (kind, retry_count) = match &failure.error {
        EngineError::Core(CoreError::NoMatchingRule { .. }) => {
            warn!(
                order_id = %order.order_id,
                course_id = %order.course_id,
                "No entitlement rule for course"
            );
            (FailureKind::NoMatchingRule, 0)
        }
        _ if failure.exhausted => {
            error!(
                order_id = %order.order_id,
                attempts = failure.attempts,
                error = %failure.error,
                "Order failed after all retries"
            );
            (FailureKind::RetriesExhausted, failure.attempts)
        }
        _ => {
            error!(
                order_id = %order.order_id,
                error = %failure.error,
                "Order failed with non-retryable error"
            );
            (FailureKind::NonRetryable, failure.attempts)
        }
    };

    FailureRecord {
        order_id: order.order_id.clone(),
        phone: order.phone.clone(),
        course_id: order.course_id.clone(),
        kind,
        error: failure.error.to_string(),
        retry_count,
    }
}
