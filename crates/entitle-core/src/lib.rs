//! # entitle-core: Pure Domain Logic for the Entitlement Engine
//!
//! This crate holds every rule of the entitlement domain that can be stated
//! without touching a database, a clock, or the network.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Entitle Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Scheduler / Feature endpoint (external)            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        entitle-engine: Reconcile • Reset • Consumption Gate     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ entitle-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   quota   │  │  report   │  │ validation│  │   │
//! │  │   │   Rule    │  │  Window   │  │ Reconcile │  │   phone   │  │   │
//! │  │   │   Order   │  │  Outcome  │  │   Reset   │  │   rules   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  entitle-db (Database Layer)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain records (EntitlementRule, Order, UserEntitlement, ProductKey)
//! - [`quota`] - Validity windows, quota bounds and consumption outcomes
//! - [`report`] - Reconciliation and reset job reports
//! - [`error`] - Domain error types and the engine-wide error taxonomy
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use entitle_core::quota::ValidityWindow;
//!
//! let now = Utc::now();
//! let window = ValidityWindow::starting_at(now, 30);
//! assert_eq!(window.end_date - window.start_date, Duration::days(30));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod quota;
pub mod report;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, ErrorKind, ValidationError};
pub use quota::{ConsumeOutcome, DenyBody, DenyReason, ValidityWindow};
pub use report::{FailureKind, FailureRecord, OrderEffect, ReconciliationReport, ResetReport};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Daily quota a rule grants when the catalog does not specify one.
pub const DEFAULT_DAILY_LIMIT: i64 = 5;

/// Validity period (days) a rule grants when the catalog does not specify one.
pub const DEFAULT_VALIDITY_DAYS: i64 = 30;

/// Upper bound accepted for `daily_limit`.
///
/// Keeps a mistyped catalog entry (e.g. 50000 instead of 50) from handing out
/// effectively unlimited usage.
pub const MAX_DAILY_LIMIT: i64 = 10_000;

/// Upper bound accepted for `validity_days` (ten years).
pub const MAX_VALIDITY_DAYS: i64 = 3_650;

/// Prefix of generated rule ids.
pub const RULE_ID_PREFIX: &str = "RULE_";

/// Prefix of generated entitlement ids.
pub const ENTITLEMENT_ID_PREFIX: &str = "ENT_";
