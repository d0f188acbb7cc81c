//! Rate controller: converts `tps_at` into a stream of release deadlines.
//!
//! The controller keeps one absolute deadline (`next_release_ns`) and
//! advances it by the current per-invocation interval after every release.
//! When the deadline has fallen behind the clock it is reset to `now`
//! ("catch-up suppression"): a stall must never be answered with a burst of
//! make-up issuance. If a pattern wants catch-up it has to express it in
//! `tps_at` itself.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::EngineError;
use crate::pattern::LoadPattern;

/// Outcome of one pacing wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// A slot was released; issue one invocation now.
    Release,
    /// The pattern is at 0 TPS; poll again after the minimum poll interval.
    Idle,
}

pub struct RateController {
    clock: Arc<dyn Clock>,
    start_ns: u64,
    next_release_ns: u64,
    issued: u64,
}

impl RateController {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let start_ns = clock.now_ns();
        Self {
            clock,
            start_ns,
            next_release_ns: 0,
            issued: 0,
        }
    }

    pub fn start_ns(&self) -> u64 {
        self.start_ns
    }

    pub fn elapsed_ms(&self) -> u64 {
        (self.clock.now_ns().saturating_sub(self.start_ns)) / 1_000_000
    }

    /// Total releases so far.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Wait until the next slot opens under the pattern's current rate.
    ///
    /// Cancel-safe: dropping the future mid-sleep neither consumes nor
    /// duplicates a release.
    pub async fn wait_for_next(&mut self, pattern: &dyn LoadPattern) -> Result<Pacing, EngineError> {
        let now = self.clock.now_ns();
        let elapsed_ms = now.saturating_sub(self.start_ns) / 1_000_000;

        let tps = pattern.tps_at(elapsed_ms);
        if tps.is_nan() || tps < 0.0 {
            return Err(EngineError::PatternContract { elapsed_ms, tps });
        }
        if tps == 0.0 {
            return Ok(Pacing::Idle);
        }

        let interval_ns = ((1e9 / tps) as u64).max(1);
        if self.next_release_ns <= now {
            self.next_release_ns = now;
        } else {
            self.clock.sleep_until(self.next_release_ns).await;
        }
        self.next_release_ns += interval_ns;
        self.issued += 1;
        Ok(Pacing::Release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::pattern::{Constant, LinearRamp};
    use std::time::Duration;

    struct BrokenPattern;
    impl LoadPattern for BrokenPattern {
        fn tps_at(&self, _elapsed_ms: u64) -> f64 {
            f64::NAN
        }
        fn is_terminating(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_first_release_is_immediate() {
        let clock = ManualClock::new();
        let mut rc = RateController::new(clock);
        let pattern = Constant::new(100.0, Duration::from_secs(10)).unwrap();
        assert_eq!(rc.wait_for_next(&pattern).await.unwrap(), Pacing::Release);
        assert_eq!(rc.issued(), 1);
    }

    #[tokio::test]
    async fn test_release_spacing_matches_rate() {
        let clock = ManualClock::new();
        let mut rc = RateController::new(clock.clone());
        let pattern = Constant::new(100.0, Duration::from_secs(10)).unwrap();
        rc.wait_for_next(&pattern).await.unwrap();

        // The second release must wait for the 10ms interval.
        {
            let fut = rc.wait_for_next(&pattern);
            tokio::pin!(fut);
            let early = tokio::time::timeout(Duration::from_millis(20), &mut fut).await;
            assert!(early.is_err(), "release should still be pending");

            clock.advance(Duration::from_millis(10));
            assert_eq!(fut.await.unwrap(), Pacing::Release);
        }
        assert_eq!(rc.issued(), 2);
    }

    #[tokio::test]
    async fn test_catch_up_is_suppressed() {
        let clock = ManualClock::new();
        let mut rc = RateController::new(clock.clone());
        let pattern = Constant::new(100.0, Duration::from_secs(10)).unwrap();
        rc.wait_for_next(&pattern).await.unwrap();

        // Stall for 500ms: 50 intervals' worth of backlog must NOT be issued.
        clock.advance(Duration::from_millis(500));
        assert_eq!(rc.wait_for_next(&pattern).await.unwrap(), Pacing::Release);

        // The very next release is a full interval away again.
        let fut = rc.wait_for_next(&pattern);
        tokio::pin!(fut);
        let early = tokio::time::timeout(Duration::from_millis(20), &mut fut).await;
        assert!(early.is_err(), "no burst after a stall");
        clock.advance(Duration::from_millis(10));
        assert_eq!(fut.await.unwrap(), Pacing::Release);
    }

    #[tokio::test]
    async fn test_idle_when_pattern_is_exhausted() {
        let clock = ManualClock::new();
        let mut rc = RateController::new(clock.clone());
        let pattern = Constant::new(100.0, Duration::from_secs(1)).unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(rc.wait_for_next(&pattern).await.unwrap(), Pacing::Idle);
        assert_eq!(rc.issued(), 0);
    }

    #[tokio::test]
    async fn test_idle_at_ramp_start() {
        let clock = ManualClock::new();
        let mut rc = RateController::new(clock);
        let pattern = LinearRamp::new(200.0, Duration::from_secs(4)).unwrap();
        // tps(0) == 0: idle rather than dividing by zero.
        assert_eq!(rc.wait_for_next(&pattern).await.unwrap(), Pacing::Idle);
    }

    #[tokio::test]
    async fn test_contract_violation_is_fatal() {
        let clock = ManualClock::new();
        let mut rc = RateController::new(clock);
        let err = rc.wait_for_next(&BrokenPattern).await.unwrap_err();
        assert!(matches!(err, EngineError::PatternContract { .. }));
    }
}
