//! # entitle-engine: Entitlement Jobs and Consumption Gate
//!
//! Turns purchase and refund orders into time-boxed, quota-bearing
//! entitlements, refills their quota once a day, and admits or denies each
//! use of a gated feature.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Entitlement Engine                               │
//! │                                                                         │
//! │   Scheduler (daily, wall clock)            Feature endpoints            │
//! │     │                  │                         │                      │
//! │     ▼                  ▼                         ▼                      │
//! │  ┌────────────┐  ┌──────────────┐       ┌─────────────────┐            │
//! │  │ Reconciler │  │QuotaResetter │       │   QuotaGate     │            │
//! │  │            │  │              │       │                 │            │
//! │  │ orders →   │  │ remaining =  │       │ atomic decrement│            │
//! │  │ create /   │  │ rule.limit   │       │ permit commit / │            │
//! │  │ revoke     │  │              │       │ rollback        │            │
//! │  └─────┬──────┘  └──────┬───────┘       └────────┬────────┘            │
//! │        │                │                        │                      │
//! │        ▼                ▼                        ▼                      │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Store traits: RuleCatalog · OrderFeed · EntitlementStore ·     │   │
//! │  │                WatermarkStore   (implemented by entitle-db)      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Engine configuration (TOML + environment)
//! - [`error`] - Engine error type
//! - [`gate`] - Consumption gate
//! - [`reconcile`] - Reconciliation job
//! - [`reset`] - Daily quota reset job
//! - [`retry`] - Retry with backoff for transient storage faults
//! - [`scheduler`] - Daily job triggers
//! - [`store`] - Storage seams
//! - [`window`] - Wall-clock window arithmetic
//!
//! ## Usage
//! ```rust,ignore
//! use entitle_core::ProductKey;
//! use entitle_engine::{Admission, QuotaGate};
//!
//! let gate = QuotaGate::new(db.clone());
//! match gate.try_consume("13800138000", &ProductKey::AiProduct("P1".into())).await? {
//!     Admission::Granted(permit) => {
//!         // run the feature, then
//!         permit.commit();
//!     }
//!     Admission::Denied(outcome) => return Ok(outcome.deny_body()),
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod gate;
pub mod reconcile;
pub mod reset;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod window;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{DatabaseSettings, EngineConfig, ReconcileSettings, ScheduleSettings};
pub use error::{EngineError, EngineResult};
pub use gate::{outcome_for_error, Admission, Gated, QuotaGate, QuotaPermit};
pub use reconcile::{Reconciler, RECONCILE_JOB};
pub use reset::QuotaResetter;
pub use retry::{exponential_backoff, retry_transient, RetryFailure};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use store::{EngineStore, EntitlementStore, OrderFeed, RuleCatalog, WatermarkStore};
pub use window::{last_daily_cutoff, next_daily_run, ReconciliationWindow};
