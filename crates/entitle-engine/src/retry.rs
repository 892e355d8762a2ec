//! # Retry Policy
//!
//! Per-item retry with an injectable backoff strategy.
//!
//! ## Schedule
//! ```text
//! attempt 1 ──fail──► wait 2s ──► attempt 2 ──fail──► wait 4s ──► attempt 3
//!                                                                  │
//!                                            fail ─► RetriesExhausted
//! ```
//! `max_attempts` counts every attempt, the first one included. Errors that
//! are not retryable end the loop immediately.
//!
//! The strategy is any [`Backoff`]: production builds an
//! [`ExponentialBackoff`] without jitter, tests pass `backoff::backoff::Zero`
//! or run under a paused tokio clock.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::warn;

use crate::error::EngineError;

/// Builds the production backoff: `initial`, doubling, capped at `max`.
pub fn exponential_backoff(initial: Duration, max: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: initial,
        initial_interval: initial,
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_interval: max,
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Why a retried operation finally failed.
#[derive(Debug)]
pub struct RetryFailure {
    /// The last error seen.
    pub error: EngineError,
    /// Attempts made, the failing one included.
    pub attempts: u32,
    /// True if the error was retryable and the attempt budget ran out.
    pub exhausted: bool,
}

/// Runs `op` until it succeeds, fails permanently, or `max_attempts` is used.
///
/// `op` receives the 1-based attempt number. The backoff is reset first, so
/// one strategy instance can be reused across items.
pub async fn retry_transient<T, F, Fut>(
    max_attempts: u32,
    backoff: &mut (dyn Backoff + Send),
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let max_attempts = max_attempts.max(1);
    backoff.reset();

    let mut attempt = 1;
    loop {
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_retryable() {
            return Err(RetryFailure {
                error,
                attempts: attempt,
                exhausted: false,
            });
        }

        if attempt >= max_attempts {
            return Err(RetryFailure {
                error,
                attempts: attempt,
                exhausted: true,
            });
        }

        let Some(delay) = backoff.next_backoff() else {
            return Err(RetryFailure {
                error,
                attempts: attempt,
                exhausted: true,
            });
        };

        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient error, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
