//! Periodic-spike pattern.

use std::time::Duration;

use crate::error::ConfigError;
use crate::pattern::LoadPattern;

/// Baseline load with a spike of `spike_tps` for `spike_duration` at the
/// start of every `interval`, until `total_duration`.
pub struct Spike {
    base: f64,
    spike_tps: f64,
    spike_ms: u64,
    interval_ms: u64,
    total_ms: u64,
}

impl Spike {
    pub fn new(
        base: f64,
        spike_tps: f64,
        spike_duration: Duration,
        interval: Duration,
        total_duration: Duration,
    ) -> Result<Self, ConfigError> {
        for (name, v) in [("base", base), ("spike_tps", spike_tps)] {
            if !v.is_finite() || v < 0.0 {
                return Err(ConfigError::new(format!("{name} must be finite and >= 0, got {v}")));
            }
        }
        if interval.is_zero() || total_duration.is_zero() {
            return Err(ConfigError::new("interval and total duration must be positive"));
        }
        if spike_duration >= interval {
            return Err(ConfigError::new("spike duration must be shorter than the interval"));
        }
        Ok(Self {
            base,
            spike_tps,
            spike_ms: spike_duration.as_millis() as u64,
            interval_ms: interval.as_millis() as u64,
            total_ms: total_duration.as_millis() as u64,
        })
    }
}

impl LoadPattern for Spike {
    fn tps_at(&self, elapsed_ms: u64) -> f64 {
        if elapsed_ms >= self.total_ms {
            return 0.0;
        }
        if elapsed_ms % self.interval_ms < self.spike_ms {
            self.spike_tps
        } else {
            self.base
        }
    }

    fn is_terminating(&self) -> bool {
        true
    }

    fn duration_ms(&self) -> Option<u64> {
        Some(self.total_ms)
    }
}
