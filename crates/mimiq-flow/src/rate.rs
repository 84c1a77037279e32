//! Token-bucket rate limiting for dispatch loops.
//!
//! Capacity is `max_burst_size`, refill rate is
//! `max_dispatches_per_second`. Refill is continuous: fractional tokens
//! accumulate between reads and the level is floored at capacity. The
//! bucket starts full, so a fresh queue can burst immediately.
//!
//! The bucket does no waiting itself; the dispatch loop asks for a wait
//! hint and sleeps on the emulator clock, which keeps virtual-clock tests
//! in control of time.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::RateLimits;

/// A token bucket drawing time from the caller.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    level: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    /// Creates a full bucket from validated rate limits.
    #[must_use]
    pub fn new(limits: &RateLimits, now: DateTime<Utc>) -> Self {
        let capacity = f64::from(limits.max_burst_size);
        Self {
            capacity,
            refill_rate: limits.max_dispatches_per_second,
            level: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = (now - self.last_refill)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        self.level = (self.level + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes one token if available.
    pub fn try_take(&mut self, now: DateTime<Utc>) -> bool {
        self.refill(now);
        if self.level >= 1.0 {
            self.level -= 1.0;
            true
        } else {
            false
        }
    }

    /// Returns how long until a full token has accumulated.
    ///
    /// Returns zero when a token is already available.
    pub fn time_until_token(&mut self, now: DateTime<Utc>) -> Duration {
        self.refill(now);
        if self.level >= 1.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - self.level) / self.refill_rate)
    }

    /// Current token level, for assertions.
    #[must_use]
    pub fn level(&self) -> f64 {
        self.level
    }
}
