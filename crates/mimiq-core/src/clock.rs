//! Clock abstraction.
//!
//! The clock is the only source of "now" and of delayed firings in the
//! emulator. Production uses [`SystemClock`]; tests substitute
//! [`TestClock`], which advances on command and wakes sleepers
//! deterministically.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// Source of current time and delayed firings.
///
/// All sleeps are cancel-safe: callers race them against shutdown or
/// state-change signals with `select!`.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Completes once the clock reaches `deadline`.
    ///
    /// Returns immediately when the deadline is already in the past.
    async fn sleep_until(&self, deadline: DateTime<Utc>);

    /// Completes once `duration` has elapsed from now.
    async fn sleep(&self, duration: Duration) {
        let deadline = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|step| self.now().checked_add_signed(step))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.sleep_until(deadline).await;
    }
}

/// Wall-clock implementation backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let now = Utc::now();
        if deadline <= now {
            return;
        }
        let remaining = (deadline - now)
            .to_std()
            .unwrap_or(Duration::from_secs(u64::MAX));
        tokio::time::sleep(remaining).await;
    }
}

/// Virtual clock for tests.
///
/// Time is frozen until [`TestClock::advance`] or [`TestClock::set`] is
/// called; every pending `sleep_until` whose deadline has been reached
/// wakes up. Backed by a `watch` channel so wakeups are broadcast without
/// the clock tracking individual sleepers.
#[derive(Debug)]
pub struct TestClock {
    now_tx: watch::Sender<DateTime<Utc>>,
}

impl TestClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        let (now_tx, _) = watch::channel(start);
        Self { now_tx }
    }

    /// Moves time forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let step = chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::MAX);
        self.now_tx.send_modify(|now| *now += step);
    }

    /// Jumps time to an absolute instant. Panics when moving backwards.
    pub fn set(&self, instant: DateTime<Utc>) {
        let current = *self.now_tx.borrow();
        assert!(
            instant >= current,
            "TestClock cannot move backwards: {current} -> {instant}"
        );
        self.now_tx.send_replace(instant);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now_tx.borrow()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let mut now_rx = self.now_tx.subscribe();
        loop {
            if *now_rx.borrow_and_update() >= deadline {
                return;
            }
            if now_rx.changed().await.is_err() {
                // Clock dropped; nothing will ever advance time again.
                return;
            }
        }
    }
}
