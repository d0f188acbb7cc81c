//! Monotonic time source with a cooperative suspension primitive.
//!
//! Everything in the engine that touches time goes through [`Clock`], so
//! tests inject either [`ManualClock`] or a [`TokioClock`] on a paused
//! tokio runtime and run wall-clock-scale scenarios in microseconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

/// Monotonic nanosecond clock.
///
/// `now_ns` is relative to an arbitrary epoch fixed at construction; only
/// differences are meaningful.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Nanoseconds since the clock's epoch.
    fn now_ns(&self) -> u64;

    /// Suspend the calling worker until `deadline_ns`. Returns immediately
    /// if the deadline has already passed.
    async fn sleep_until(&self, deadline_ns: u64);

    /// Convenience: suspend for a relative duration.
    async fn sleep(&self, duration: Duration) {
        let deadline = self.now_ns().saturating_add(duration.as_nanos() as u64);
        self.sleep_until(deadline).await;
    }
}

/// Production clock backed by `tokio::time`.
///
/// On a runtime started with `start_paused = true` the sleeps auto-advance,
/// which makes engine-level tests deterministic.
pub struct TokioClock {
    epoch: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    async fn sleep_until(&self, deadline_ns: u64) {
        let deadline = self.epoch + Duration::from_nanos(deadline_ns);
        tokio::time::sleep_until(deadline).await;
    }
}

/// Deterministic clock for unit tests: time only moves via [`advance`].
///
/// Sleepers re-check the deadline every time the clock is advanced, so a
/// test can drive a pacing loop step by step.
///
/// [`advance`]: ManualClock::advance
pub struct ManualClock {
    now_ns: AtomicU64,
    tick: Notify,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now_ns: AtomicU64::new(0),
            tick: Notify::new(),
        })
    }

    /// Move time forward and wake every sleeper.
    pub fn advance(&self, delta: Duration) {
        self.now_ns
            .fetch_add(delta.as_nanos() as u64, Ordering::SeqCst);
        self.tick.notify_waiters();
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }

    async fn sleep_until(&self, deadline_ns: u64) {
        loop {
            // Register interest before the check so an advance between the
            // check and the await cannot be missed.
            let notified = self.tick.notified();
            if self.now_ns() >= deadline_ns {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_monotonic() {
        let clock = TokioClock::new();
        let a = clock.now_ns();
        clock.sleep(Duration::from_millis(5)).await;
        let b = clock.now_ns();
        assert!(b >= a + 5_000_000, "expected >= 5ms elapsed, got {}ns", b - a);
    }

    #[tokio::test]
    async fn test_manual_clock_sleep_wakes_on_advance() {
        let clock = ManualClock::new();
        let sleeper = {
            let clock = clock.clone();
            tokio::spawn(async move {
                clock.sleep_until(1_000_000).await;
                clock.now_ns()
            })
        };
        // Give the sleeper a chance to park first.
        tokio::task::yield_now().await;
        clock.advance(Duration::from_micros(400));
        tokio::task::yield_now().await;
        clock.advance(Duration::from_micros(700));
        let woke_at = sleeper.await.unwrap();
        assert!(woke_at >= 1_000_000);
    }

    #[tokio::test]
    async fn test_manual_clock_sleep_past_deadline_returns_immediately() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(1));
        clock.sleep_until(500).await; // already past
        assert_eq!(clock.now_ns(), 1_000_000_000);
    }
}
