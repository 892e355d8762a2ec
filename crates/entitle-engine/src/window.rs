//! # Daily Windows
//!
//! Wall-clock arithmetic for the scheduler and the reconciliation window.
//!
//! ## Reconciliation Window
//! ```text
//!            watermark                         cutoff ≤ now
//!                │                                  │
//!   ─────────────┼──────────────────────────────────┼──────────► time
//!                [ window_start         window_end  )
//!
//!   No watermark yet: window_start = window_end − 1 day, i.e. the classic
//!   [yesterday 13:00, today 13:00) in the business timezone.
//! ```

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};

use crate::error::{EngineError, EngineResult};

/// The local `hour:00` on the calendar day `now` falls on, in `offset`.
fn cutoff_on_same_day(
    now: DateTime<Utc>,
    hour: u32,
    offset: FixedOffset,
) -> EngineResult<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0)
        .ok_or_else(|| EngineError::InvalidConfig(format!("hour must be 0-23, got {}", hour)))?;

    let local_day = now.with_timezone(&offset).date_naive();
    local_day
        .and_time(time)
        .and_local_timezone(offset)
        .single()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| EngineError::InvalidConfig("ambiguous local time".into()))
}

/// Next fire time strictly after `now` for a job scheduled daily at
/// `hour:00` in `offset`.
pub fn next_daily_run(
    now: DateTime<Utc>,
    hour: u32,
    offset: FixedOffset,
) -> EngineResult<DateTime<Utc>> {
    let candidate = cutoff_on_same_day(now, hour, offset)?;
    if candidate > now {
        Ok(candidate)
    } else {
        Ok(candidate + Duration::days(1))
    }
}

/// Most recent `hour:00` in `offset` at or before `now`.
pub fn last_daily_cutoff(
    now: DateTime<Utc>,
    hour: u32,
    offset: FixedOffset,
) -> EngineResult<DateTime<Utc>> {
    let candidate = cutoff_on_same_day(now, hour, offset)?;
    if candidate <= now {
        Ok(candidate)
    } else {
        Ok(candidate - Duration::days(1))
    }
}

/// The `[start, end)` span of orders a scheduled reconciliation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReconciliationWindow {
    /// Window for a scheduled run at `now`.
    ///
    /// `watermark` is where the previous complete run stopped, if any. A
    /// watermark at or past the cutoff yields an empty window.
    pub fn for_run(
        now: DateTime<Utc>,
        cutoff_hour: u32,
        offset: FixedOffset,
        watermark: Option<DateTime<Utc>>,
    ) -> EngineResult<Self> {
        let end = last_daily_cutoff(now, cutoff_hour, offset)?;
        let start = watermark.unwrap_or(end - Duration::days(1));
        Ok(ReconciliationWindow { start, end })
    }

    /// True when there is nothing to reconcile.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn utc_offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_next_run_later_today() {
        let next = next_daily_run(utc(2026, 10, 17, 9, 30), 13, utc_offset()).unwrap();
        assert_eq!(next, utc(2026, 10, 17, 13, 0));
    }

    #[test]
    fn test_next_run_rolls_to_tomorrow() {
        let next = next_daily_run(utc(2026, 10, 17, 13, 0), 13, utc_offset()).unwrap();
        assert_eq!(next, utc(2026, 10, 18, 13, 0));

        let next = next_daily_run(utc(2026, 10, 17, 23, 59), 0, utc_offset()).unwrap();
        assert_eq!(next, utc(2026, 10, 18, 0, 0));
    }

    #[test]
    fn test_next_run_respects_offset() {
        // 13:00 at UTC+8 is 05:00 UTC
        let plus8 = FixedOffset::east_opt(8 * 3600).unwrap();
        let next = next_daily_run(utc(2026, 10, 17, 4, 0), 13, plus8).unwrap();
        assert_eq!(next, utc(2026, 10, 17, 5, 0));

        // Local midnight at UTC+8 is 16:00 UTC the previous day
        let next = next_daily_run(utc(2026, 10, 17, 17, 0), 0, plus8).unwrap();
        assert_eq!(next, utc(2026, 10, 18, 16, 0));
    }

    #[test]
    fn test_invalid_hour() {
        assert!(next_daily_run(utc(2026, 10, 17, 0, 0), 24, utc_offset()).is_err());
    }

    #[test]
    fn test_default_window_is_previous_day() {
        let window =
            ReconciliationWindow::for_run(utc(2026, 10, 17, 13, 0), 13, utc_offset(), None).unwrap();
        assert_eq!(window.start, utc(2026, 10, 16, 13, 0));
        assert_eq!(window.end, utc(2026, 10, 17, 13, 0));
        assert!(!window.is_empty());

        // Before today's cutoff, the window ends at yesterday's cutoff
        let window =
            ReconciliationWindow::for_run(utc(2026, 10, 17, 12, 59), 13, utc_offset(), None).unwrap();
        assert_eq!(window.end, utc(2026, 10, 16, 13, 0));
    }

    #[test]
    fn test_window_starts_at_watermark() {
        // Scheduler missed two days
        let watermark = utc(2026, 10, 14, 13, 0);
        let window = ReconciliationWindow::for_run(
            utc(2026, 10, 17, 13, 5),
            13,
            utc_offset(),
            Some(watermark),
        )
        .unwrap();
        assert_eq!(window.start, watermark);
        assert_eq!(window.end, utc(2026, 10, 17, 13, 0));

        // Already covered
        let window = ReconciliationWindow::for_run(
            utc(2026, 10, 17, 14, 0),
            13,
            utc_offset(),
            Some(utc(2026, 10, 17, 13, 0)),
        )
        .unwrap();
        assert!(window.is_empty());
    }
}
