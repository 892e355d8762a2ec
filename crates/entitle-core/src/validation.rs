//! # Validation Module
//!
//! Input validation for the engine's entry points.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: Feature endpoint / seed tooling                              │
//! │  └── Deserialization, basic presence checks                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  └── Phone format, id presence, rule limits, window ordering           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (daily_remaining >= 0)                                      │
//! │  └── Partial UNIQUE (phone, rule_id) WHERE is_deleted = 0              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use entitle_core::validation::{validate_phone, validate_rule_limits};
//!
//! assert!(validate_phone("13800138000").is_ok());
//! assert!(validate_rule_limits(5, 30).is_ok());
//! assert!(validate_rule_limits(0, 30).is_err());
//! ```

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::{MAX_DAILY_LIMIT, MAX_VALIDITY_DAYS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const PHONE_MIN_LEN: usize = 5;
const PHONE_MAX_LEN: usize = 20;
const ID_MAX_LEN: usize = 64;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a phone number.
///
/// ## Rules
/// - Must not be empty
/// - 5 to 20 characters
/// - Digits only, with an optional leading `+`
///
/// Surrounding whitespace is rejected, not trimmed: callers normalize first
/// and validate the value they will store or query with.
pub fn validate_phone(phone: &str) -> ValidationResult<()> {
    if phone.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "phone".to_string(),
        });
    }

    if phone.len() > PHONE_MAX_LEN {
        return Err(ValidationError::TooLong {
            field: "phone".to_string(),
            max: PHONE_MAX_LEN,
        });
    }

    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if digits.len() < PHONE_MIN_LEN || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "phone".to_string(),
            reason: format!(
                "must be {}-{} digits with an optional leading '+'",
                PHONE_MIN_LEN, PHONE_MAX_LEN
            ),
        });
    }

    Ok(())
}

/// Validates an identifier (course id, product id, rule id, order id).
pub fn validate_id(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.trim() != value {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must not have leading or trailing whitespace".to_string(),
        });
    }

    if value.len() > ID_MAX_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: ID_MAX_LEN,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a rule's daily limit and validity period.
pub fn validate_rule_limits(daily_limit: i64, validity_days: i64) -> ValidationResult<()> {
    if !(1..=MAX_DAILY_LIMIT).contains(&daily_limit) {
        return Err(ValidationError::OutOfRange {
            field: "daily_limit".to_string(),
            min: 1,
            max: MAX_DAILY_LIMIT,
        });
    }

    if !(1..=MAX_VALIDITY_DAYS).contains(&validity_days) {
        return Err(ValidationError::OutOfRange {
            field: "validity_days".to_string(),
            min: 1,
            max: MAX_VALIDITY_DAYS,
        });
    }

    Ok(())
}

/// Validates that `[start, end)` is a non-empty window.
pub fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<()> {
    if start >= end {
        return Err(CoreError::InvalidWindow {
            start: start.to_rfc3339(),
            end: end.to_rfc3339(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("13800138000").is_ok());
        assert!(validate_phone("+8613800138000").is_ok());

        assert!(matches!(
            validate_phone("  13800138000 "),
            Err(ValidationError::InvalidFormat { .. })
        ));
        assert!(matches!(
            validate_phone("   "),
            Err(ValidationError::Required { .. })
        ));

        assert!(matches!(
            validate_phone(""),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_phone("138-0013-8000"),
            Err(ValidationError::InvalidFormat { .. })
        ));
        assert!(matches!(
            validate_phone("1234"),
            Err(ValidationError::InvalidFormat { .. })
        ));
        assert!(matches!(
            validate_phone(&"1".repeat(21)),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("course_id", "C1").is_ok());
        assert!(matches!(
            validate_id("course_id", "   "),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_id("course_id", " C1"),
            Err(ValidationError::InvalidFormat { .. })
        ));
        assert!(validate_id("course_id", &"x".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_rule_limits() {
        assert!(validate_rule_limits(5, 30).is_ok());
        assert!(validate_rule_limits(1, 1).is_ok());
        assert!(validate_rule_limits(0, 30).is_err());
        assert!(validate_rule_limits(5, 0).is_err());
        assert!(validate_rule_limits(MAX_DAILY_LIMIT + 1, 30).is_err());
    }

    #[test]
    fn test_validate_window() {
        let now = Utc::now();
        assert!(validate_window(now, now + Duration::hours(1)).is_ok());
        assert!(matches!(
            validate_window(now, now),
            Err(CoreError::InvalidWindow { .. })
        ));
        assert!(validate_window(now, now - Duration::hours(1)).is_err());
    }
}
