//! Queue configuration: rate limits, retry policy, App Engine routing.
//!
//! Defaults match the managed product, so queues created without explicit
//! configuration behave like real Cloud Tasks queues.

use std::time::Duration;

use mimiq_core::{Error, Result};

/// Sentinel for unlimited retry attempts.
pub const UNLIMITED_ATTEMPTS: i32 = -1;

/// Dispatch throughput limits for a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimits {
    /// Token refill rate, in dispatches per second.
    pub max_dispatches_per_second: f64,
    /// Token bucket capacity.
    pub max_burst_size: i32,
    /// Maximum number of concurrent in-flight dispatches.
    pub max_concurrent_dispatches: i32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            max_dispatches_per_second: 500.0,
            max_burst_size: 100,
            max_concurrent_dispatches: 1_000,
        }
    }
}

impl RateLimits {
    /// Validates the limits.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for non-positive rates, burst sizes, or
    /// concurrency caps.
    pub fn validate(&self) -> Result<()> {
        if !self.max_dispatches_per_second.is_finite() || self.max_dispatches_per_second <= 0.0 {
            return Err(Error::invalid_argument(
                "rate_limits.max_dispatches_per_second must be positive",
            ));
        }
        if self.max_burst_size <= 0 {
            return Err(Error::invalid_argument(
                "rate_limits.max_burst_size must be positive",
            ));
        }
        if self.max_concurrent_dispatches <= 0 {
            return Err(Error::invalid_argument(
                "rate_limits.max_concurrent_dispatches must be positive",
            ));
        }
        Ok(())
    }
}

/// Retry policy for failed dispatches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, or [`UNLIMITED_ATTEMPTS`].
    pub max_attempts: i32,
    /// Deadline from the first attempt after which retries stop.
    pub max_retry_duration: Option<Duration>,
    /// Minimum backoff between attempts.
    pub min_backoff: Duration,
    /// Maximum backoff between attempts.
    pub max_backoff: Duration,
    /// Number of times the backoff doubles before growing linearly.
    pub max_doublings: i32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            max_retry_duration: None,
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(3_600),
            max_doublings: 16,
        }
    }
}

impl RetryConfig {
    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for contradictory or out-of-range fields.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts != UNLIMITED_ATTEMPTS && self.max_attempts < 1 {
            return Err(Error::invalid_argument(
                "retry_config.max_attempts must be positive or -1 for unlimited",
            ));
        }
        if self.min_backoff > self.max_backoff {
            return Err(Error::invalid_argument(
                "retry_config.min_backoff must not exceed max_backoff",
            ));
        }
        if self.max_doublings < 0 {
            return Err(Error::invalid_argument(
                "retry_config.max_doublings must not be negative",
            ));
        }
        Ok(())
    }

    /// Returns true when the attempt count is unbounded.
    #[must_use]
    pub const fn unlimited_attempts(&self) -> bool {
        self.max_attempts == UNLIMITED_ATTEMPTS
    }
}

/// App Engine routing: which service/version/instance receives a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppEngineRouting {
    /// Target service.
    pub service: Option<String>,
    /// Target version.
    pub version: Option<String>,
    /// Target instance.
    pub instance: Option<String>,
}

/// Full configuration of a queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueConfig {
    /// Dispatch throughput limits.
    pub rate_limits: RateLimits,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Default routing applied to App Engine tasks without their own.
    pub app_engine_routing_override: Option<AppEngineRouting>,
}

impl QueueConfig {
    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when any section is invalid.
    pub fn validate(&self) -> Result<()> {
        self.rate_limits.validate()?;
        self.retry.validate()
    }
}
