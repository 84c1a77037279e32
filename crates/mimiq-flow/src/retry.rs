//! Retry decisions and backoff computation.
//!
//! Backoff doubles from `min_backoff` for `max_doublings` attempts, then
//! grows linearly in units of `max_backoff`, clamped to `max_backoff`:
//!
//! ```text
//! doublings   = min(dispatch_count - 1, max_doublings)
//! base        = min_backoff * 2^doublings
//! linear_tail = (dispatch_count - 1 - max_doublings) * max_backoff
//! backoff     = min(base + max(linear_tail, 0), max_backoff)
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::RetryConfig;

/// What to do with a task after a failed dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reschedule after the given backoff.
    Retry {
        /// Delay before the next attempt.
        backoff: Duration,
    },
    /// Stop retrying; the task is removed.
    GiveUp,
}

/// Computes the backoff preceding attempt `dispatch_count + 1`.
///
/// `dispatch_count` is the number of attempts already made, including the
/// one that just failed (so it is at least 1).
#[must_use]
pub fn backoff_after(config: &RetryConfig, dispatch_count: i32) -> Duration {
    let failed_attempts = dispatch_count.max(1) - 1;
    let doublings = failed_attempts.min(config.max_doublings);

    let base = config.min_backoff.as_secs_f64() * 2_f64.powi(doublings);
    let linear_steps = f64::from((failed_attempts - config.max_doublings).max(0));
    let linear_tail = linear_steps * config.max_backoff.as_secs_f64();

    let backoff = (base + linear_tail).min(config.max_backoff.as_secs_f64());
    Duration::from_secs_f64(backoff)
}

/// Decides whether a failed task retries or is dropped.
///
/// A task gives up once `dispatch_count` reaches `max_attempts` (when
/// bounded) or once `max_retry_duration` has elapsed since the first
/// attempt (when set).
#[must_use]
pub fn evaluate(
    config: &RetryConfig,
    dispatch_count: i32,
    first_attempt_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> RetryDecision {
    if !config.unlimited_attempts() && dispatch_count >= config.max_attempts {
        return RetryDecision::GiveUp;
    }

    if let (Some(limit), Some(first)) = (config.max_retry_duration, first_attempt_at) {
        let elapsed = (now - first).to_std().unwrap_or_default();
        if elapsed >= limit {
            return RetryDecision::GiveUp;
        }
    }

    RetryDecision::Retry {
        backoff: backoff_after(config, dispatch_count),
    }
}
