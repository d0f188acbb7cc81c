//! Warm-up / cool-down measurement wrapper.
//!
//! The wrapper never alters the load — `tps_at` defers to the inner
//! pattern. It only gates measurement: samples issued outside the
//! steady-state window `[warm, total - cool)` are excluded so reported
//! statistics reflect steady-state behavior only.

use std::time::Duration;

use crate::error::ConfigError;
use crate::metrics::MetricsRegistry;
use crate::pattern::LoadPattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmCoolPhase {
    Warmup,
    SteadyState,
    Cooldown,
    Complete,
}

pub struct WarmCool {
    inner: Box<dyn LoadPattern>,
    warm_ms: u64,
    cool_ms: u64,
}

impl WarmCool {
    pub fn new(
        inner: impl LoadPattern + 'static,
        warm: Duration,
        cool: Duration,
    ) -> Result<Self, ConfigError> {
        let wrapper = Self {
            inner: Box::new(inner),
            warm_ms: warm.as_millis() as u64,
            cool_ms: cool.as_millis() as u64,
        };
        if let Some(total) = wrapper.inner.duration_ms() {
            if wrapper.warm_ms + wrapper.cool_ms >= total {
                return Err(ConfigError::new(
                    "warm-up plus cool-down must leave a steady-state window",
                ));
            }
        }
        Ok(wrapper)
    }

    /// Re-wrap with additional windows; the wider warm-up and the wider
    /// cool-down win, so wrapping a wrapper is idempotent.
    pub fn rewrap(self, warm: Duration, cool: Duration) -> Result<Self, ConfigError> {
        let warm_ms = self.warm_ms.max(warm.as_millis() as u64);
        let cool_ms = self.cool_ms.max(cool.as_millis() as u64);
        let wrapper = Self {
            inner: self.inner,
            warm_ms,
            cool_ms,
        };
        if let Some(total) = wrapper.inner.duration_ms() {
            if wrapper.warm_ms + wrapper.cool_ms >= total {
                return Err(ConfigError::new(
                    "warm-up plus cool-down must leave a steady-state window",
                ));
            }
        }
        Ok(wrapper)
    }

    pub fn phase(&self, elapsed_ms: u64) -> WarmCoolPhase {
        if elapsed_ms < self.warm_ms {
            return WarmCoolPhase::Warmup;
        }
        match self.inner.duration_ms() {
            Some(total) => {
                if elapsed_ms >= total {
                    WarmCoolPhase::Complete
                } else if elapsed_ms >= total.saturating_sub(self.cool_ms) {
                    WarmCoolPhase::Cooldown
                } else {
                    WarmCoolPhase::SteadyState
                }
            }
            // Non-terminating inner: the cool-down phase is unreachable.
            None => WarmCoolPhase::SteadyState,
        }
    }
}

impl LoadPattern for WarmCool {
    fn tps_at(&self, elapsed_ms: u64) -> f64 {
        self.inner.tps_at(elapsed_ms)
    }

    fn is_terminating(&self) -> bool {
        self.inner.is_terminating()
    }

    fn duration_ms(&self) -> Option<u64> {
        self.inner.duration_ms()
    }

    fn records_metrics(&self, elapsed_ms: u64) -> bool {
        self.phase(elapsed_ms) == WarmCoolPhase::SteadyState
    }

    fn register_metrics(&self, registry: &dyn MetricsRegistry) {
        self.inner.register_metrics(registry);
    }

    fn phase_name(&self, elapsed_ms: u64) -> Option<&'static str> {
        Some(match self.phase(elapsed_ms) {
            WarmCoolPhase::Warmup => "warmup",
            WarmCoolPhase::SteadyState => "steady_state",
            WarmCoolPhase::Cooldown => "cooldown",
            WarmCoolPhase::Complete => "complete",
        })
    }
}
