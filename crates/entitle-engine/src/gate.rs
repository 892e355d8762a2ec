//! # Consumption Gate
//!
//! Admits or denies one use of a gated feature.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  try_consume(phone, key)                                               │
//! │     │                                                                   │
//! │     ├── resolve newest live entitlement ── none ──► Deny(NoEntitlement)│
//! │     ├── now ≥ end_date ─────────────────────────► Deny(Expired)        │
//! │     ├── UPDATE … daily_remaining - 1                                   │
//! │     │     WHERE daily_remaining > 0 ── no row ──► Deny(QuotaExhausted) │
//! │     └── Granted(QuotaPermit)                                           │
//! │             │                                                           │
//! │             ├── operation ok ──► permit.commit()                       │
//! │             └── operation err ─► permit.rollback() (restore one unit)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The decrement is a single conditional UPDATE, so concurrent callers on
//! the same entitlement are serialized by the database. No in-process lock
//! is involved.

use std::future::Future;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use entitle_core::validation::validate_phone;
use entitle_core::{ConsumeOutcome, CoreError, DenyReason, ProductKey};

use crate::error::{EngineError, EngineResult};
use crate::store::EngineStore;

// =============================================================================
// Gate
// =============================================================================

/// Per-request quota check. Cheap to clone.
#[derive(Debug, Clone)]
pub struct QuotaGate<S> {
    store: S,
}

/// Result of [`QuotaGate::try_consume`].
#[derive(Debug)]
pub enum Admission<S: EngineStore> {
    /// One unit is reserved. Commit or roll back the permit.
    Granted(QuotaPermit<S>),
    Denied(ConsumeOutcome),
}

impl<S: EngineStore> Admission<S> {
    /// The `TryConsume` view of this admission.
    pub fn outcome(&self) -> ConsumeOutcome {
        match self {
            Admission::Granted(permit) => ConsumeOutcome::allowed(permit.remaining),
            Admission::Denied(outcome) => outcome.clone(),
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted(_))
    }
}

/// Result of [`QuotaGate::run_gated`].
#[derive(Debug)]
pub enum Gated<T, E> {
    /// The operation never ran.
    Denied(ConsumeOutcome),
    /// The operation succeeded and its unit of quota stays consumed.
    Completed { value: T, remaining: i64 },
    /// The operation failed and its unit was handed back.
    ///
    /// `remaining` is `None` when the unit could not be restored (the row
    /// was reset or revoked meanwhile, or the restore itself failed).
    Failed { error: E, remaining: Option<i64> },
}

impl<S: EngineStore> QuotaGate<S> {
    pub fn new(store: S) -> Self {
        QuotaGate { store }
    }

    /// `TryConsume(phone, productKey)` at the current time.
    pub async fn try_consume(&self, phone: &str, key: &ProductKey) -> EngineResult<Admission<S>> {
        self.try_consume_at(phone, key, Utc::now()).await
    }

    /// `TryConsume` evaluated at `now`.
    ///
    /// ## Errors
    /// * `EngineError::Core` - Malformed phone
    /// * `EngineError::Storage` - The check itself failed; nothing was consumed
    pub async fn try_consume_at(
        &self,
        phone: &str,
        key: &ProductKey,
        now: DateTime<Utc>,
    ) -> EngineResult<Admission<S>> {
        let phone = phone.trim();
        validate_phone(phone).map_err(CoreError::from)?;

        let Some(ent) = self.store.resolve_for_product(phone, key).await? else {
            debug!(phone = %phone, key = %key, "No entitlement");
            return Ok(Admission::Denied(ConsumeOutcome::denied(
                DenyReason::NoEntitlement,
                0,
            )));
        };

        if ent.is_expired_at(now) {
            debug!(
                entitlement_id = %ent.entitlement_id,
                end_date = %ent.end_date,
                "Entitlement expired"
            );
            return Ok(Admission::Denied(ConsumeOutcome::denied(
                DenyReason::EntitlementExpired,
                0,
            )));
        }

        match self.store.try_decrement(&ent.entitlement_id, now).await? {
            Some(remaining) => {
                debug!(
                    entitlement_id = %ent.entitlement_id,
                    remaining,
                    "Quota reserved"
                );
                Ok(Admission::Granted(QuotaPermit {
                    store: self.store.clone(),
                    entitlement_id: ent.entitlement_id,
                    remaining,
                    settled: false,
                }))
            }
            None => {
                debug!(entitlement_id = %ent.entitlement_id, "Quota exhausted");
                Ok(Admission::Denied(ConsumeOutcome::denied(
                    DenyReason::QuotaExhausted,
                    0,
                )))
            }
        }
    }

    /// Runs `op` behind the gate.
    ///
    /// The unit of quota is kept only if `op` returns `Ok`.
    pub async fn run_gated<T, E, F, Fut>(
        &self,
        phone: &str,
        key: &ProductKey,
        op: F,
    ) -> EngineResult<Gated<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = match self.try_consume(phone, key).await? {
            Admission::Granted(permit) => permit,
            Admission::Denied(outcome) => return Ok(Gated::Denied(outcome)),
        };

        match op().await {
            Ok(value) => {
                let remaining = permit.commit();
                Ok(Gated::Completed { value, remaining })
            }
            Err(error) => {
                let entitlement_id = permit.entitlement_id().to_string();
                let remaining = match permit.rollback().await {
                    Ok(remaining) => remaining,
                    Err(e) => {
                        error!(
                            entitlement_id = %entitlement_id,
                            error = %e,
                            "Failed to restore quota after gated operation failed"
                        );
                        None
                    }
                };
                Ok(Gated::Failed { error, remaining })
            }
        }
    }
}

/// Deny outcome reported to the caller when the gate itself failed.
pub fn outcome_for_error(err: &EngineError) -> ConsumeOutcome {
    warn!(error = %err, kind = %err.kind(), "Consumption check failed");
    ConsumeOutcome::denied(DenyReason::InternalError, 0)
}

// =============================================================================
// Permit
// =============================================================================

/// One reserved unit of quota.
///
/// Dropping a permit without calling `commit` or `rollback` keeps the unit
/// consumed.
#[derive(Debug)]
pub struct QuotaPermit<S: EngineStore> {
    store: S,
    entitlement_id: String,
    remaining: i64,
    settled: bool,
}

impl<S: EngineStore> QuotaPermit<S> {
    pub fn entitlement_id(&self) -> &str {
        &self.entitlement_id
    }

    /// Quota left after this reservation.
    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    /// Keeps the unit consumed. Returns the remaining count.
    pub fn commit(mut self) -> i64 {
        self.settled = true;
        debug!(entitlement_id = %self.entitlement_id, "Quota committed");
        self.remaining
    }

    /// Hands the unit back.
    ///
    /// ## Returns
    /// * `Ok(Some(remaining))` - Restored
    /// * `Ok(None)` - Not restored: already at the rule's limit, or revoked
    pub async fn rollback(mut self) -> EngineResult<Option<i64>> {
        self.settled = true;
        let restored = self
            .store
            .restore_one(&self.entitlement_id, Utc::now())
            .await?;

        match restored {
            Some(remaining) => {
                debug!(entitlement_id = %self.entitlement_id, remaining, "Quota restored");
            }
            None => {
                debug!(
                    entitlement_id = %self.entitlement_id,
                    "Quota not restored, entitlement full or revoked"
                );
            }
        }
        Ok(restored)
    }
}

impl<S: EngineStore> Drop for QuotaPermit<S> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                entitlement_id = %self.entitlement_id,
                "Quota permit dropped unsettled, unit stays consumed"
            );
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
