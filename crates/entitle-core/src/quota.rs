//! # Quota Module
//!
//! Validity windows and the outcome type of a consumption attempt.
//!
//! ## Daily Quota Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    daily_remaining over one day                         │
//! │                                                                         │
//! │  00:00 reset ──► 5 ──consume──► 4 ──► 3 ──► 2 ──► 1 ──► 0              │
//! │                                                          │              │
//! │                                             QuotaExhausted (deny)       │
//! │                                                                         │
//! │  Bounds: 0 ≤ daily_remaining ≤ rule.daily_limit, always.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Validity Window
// =============================================================================

/// The `[start_date, end_date)` access window of an entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl ValidityWindow {
    /// Window of `validity_days` days beginning at `start`.
    pub fn starting_at(start: DateTime<Utc>, validity_days: i64) -> Self {
        ValidityWindow {
            start_date: start,
            end_date: start + Duration::days(validity_days),
        }
    }
}

// =============================================================================
// Consumption Outcome
// =============================================================================

/// Why a consumption attempt was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The phone holds no live entitlement for the product.
    NoEntitlement,
    /// Today's quota is used up.
    QuotaExhausted,
    /// The entitlement's access window has closed.
    EntitlementExpired,
    /// Storage failed while checking; the attempt did not consume quota.
    InternalError,
}

impl DenyReason {
    /// HTTP status the feature endpoint answers with.
    pub const fn http_status(&self) -> u16 {
        403
    }

    /// Stable machine-readable code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DenyReason::NoEntitlement => "no_entitlement",
            DenyReason::QuotaExhausted => "quota_exhausted",
            DenyReason::EntitlementExpired => "entitlement_expired",
            DenyReason::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `TryConsume`.
///
/// Deny outcomes are ordinary values, never errors: an exhausted quota is an
/// expected business state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConsumeOutcome {
    pub allowed: bool,

    /// Quota left after this attempt (0 when denied for lack of entitlement).
    pub remaining: i64,

    /// Set iff `allowed` is false.
    pub reason: Option<DenyReason>,
}

impl ConsumeOutcome {
    /// An allowed attempt leaving `remaining` uses.
    pub fn allowed(remaining: i64) -> Self {
        ConsumeOutcome {
            allowed: true,
            remaining,
            reason: None,
        }
    }

    /// A denied attempt.
    pub fn denied(reason: DenyReason, remaining: i64) -> Self {
        ConsumeOutcome {
            allowed: false,
            remaining,
            reason: Some(reason),
        }
    }

    /// Body the feature endpoint returns for a denied attempt.
    pub fn deny_body(&self) -> Option<DenyBody> {
        self.reason.map(DenyBody::from)
    }
}

/// `{code: 403, reason}` returned by the feature endpoint on deny.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DenyBody {
    pub code: u16,
    pub reason: DenyReason,
}

impl From<DenyReason> for DenyBody {
    fn from(reason: DenyReason) -> Self {
        DenyBody {
            code: reason.http_status(),
            reason,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_length() {
        let start = Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap();
        let window = ValidityWindow::starting_at(start, 30);

        assert_eq!(window.start_date, start);
        assert_eq!(window.end_date, Utc.with_ymd_and_hms(2026, 11, 16, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_deny_body_json() {
        let outcome = ConsumeOutcome::denied(DenyReason::QuotaExhausted, 0);
        let body = outcome.deny_body().unwrap();
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"code":403,"reason":"quota_exhausted"}"#);
    }

    #[test]
    fn test_allowed_has_no_deny_body() {
        let outcome = ConsumeOutcome::allowed(4);
        assert!(outcome.allowed);
        assert!(outcome.deny_body().is_none());
    }
}
