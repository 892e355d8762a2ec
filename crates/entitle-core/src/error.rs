//! # Error Types
//!
//! Domain-specific error types for entitle-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  entitle-core errors (this file)                                       │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  ├── ValidationError  - Input validation failures                      │
//! │  └── ErrorKind        - Taxonomy shared by every layer                 │
//! │                                                                         │
//! │  entitle-db errors                                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  entitle-engine errors                                                 │
//! │  └── EngineError      - What jobs and the gate report                  │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → EngineError → caller    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Kind
// =============================================================================

/// Coarse classification every error in the workspace maps onto.
///
/// ## Handling Policy
/// ```text
/// Validation     → surfaced to caller, never retried
/// NotFound       → surfaced or logged depending on caller
/// Transient      → retried with backoff, then recorded as failure
/// Permanent      → logged, never retried (e.g. no rule for a course)
/// QuotaExhausted → ordinary deny result, not a fault
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Transient,
    Permanent,
    QuotaExhausted,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Permanent => write!(f, "permanent"),
            ErrorKind::QuotaExhausted => write!(f, "quota_exhausted"),
        }
    }
}

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No non-deleted rule exists for the course of an order.
    ///
    /// ## When This Occurs
    /// - Order references a course that was never given a rule
    /// - The only rule for the course was soft-deleted
    ///
    /// Retrying cannot fix this, so reconciliation records it as permanent.
    #[error("No entitlement rule for course {course_id}")]
    NoMatchingRule { course_id: String },

    /// A rule id is referenced but absent (or soft-deleted).
    #[error("Entitlement rule not found: {0}")]
    RuleNotFound(String),

    /// An entitlement id is referenced but absent (or soft-deleted).
    #[error("Entitlement not found: {0}")]
    EntitlementNotFound(String),

    /// The requested time window is empty or inverted.
    #[error("Invalid window: start {start} is not before end {end}")]
    InvalidWindow { start: String, end: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Maps the error onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NoMatchingRule { .. } => ErrorKind::Permanent,
            CoreError::RuleNotFound(_) | CoreError::EntitlementNotFound(_) => ErrorKind::NotFound,
            CoreError::InvalidWindow { .. } | CoreError::Validation(_) => ErrorKind::Validation,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., malformed phone number).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
