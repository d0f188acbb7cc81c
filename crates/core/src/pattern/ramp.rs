//! Ramping patterns: linear ramp and ramp-then-hold.

use std::time::Duration;

use crate::error::ConfigError;
use crate::pattern::LoadPattern;

/// `target * min(elapsed / duration, 1.0)` while `elapsed <= duration`,
/// then 0.
pub struct LinearRamp {
    target: f64,
    duration_ms: u64,
}

impl LinearRamp {
    pub fn new(target: f64, duration: Duration) -> Result<Self, ConfigError> {
        if !target.is_finite() || target < 0.0 {
            return Err(ConfigError::new(format!(
                "ramp target must be finite and >= 0, got {target}"
            )));
        }
        if duration.is_zero() {
            return Err(ConfigError::new("ramp duration must be positive"));
        }
        Ok(Self {
            target,
            duration_ms: duration.as_millis() as u64,
        })
    }
}

impl LoadPattern for LinearRamp {
    fn tps_at(&self, elapsed_ms: u64) -> f64 {
        if elapsed_ms > self.duration_ms {
            return 0.0;
        }
        let fraction = (elapsed_ms as f64 / self.duration_ms as f64).min(1.0);
        self.target * fraction
    }

    fn is_terminating(&self) -> bool {
        true
    }

    fn duration_ms(&self) -> Option<u64> {
        Some(self.duration_ms)
    }
}

/// Linear ramp to `target` over `ramp`, hold for `hold`, then 0.
pub struct RampThenHold {
    target: f64,
    ramp_ms: u64,
    total_ms: u64,
}

impl RampThenHold {
    pub fn new(target: f64, ramp: Duration, hold: Duration) -> Result<Self, ConfigError> {
        if !target.is_finite() || target < 0.0 {
            return Err(ConfigError::new(format!(
                "ramp target must be finite and >= 0, got {target}"
            )));
        }
        if ramp.is_zero() || hold.is_zero() {
            return Err(ConfigError::new("ramp and hold durations must be positive"));
        }
        let ramp_ms = ramp.as_millis() as u64;
        Ok(Self {
            target,
            ramp_ms,
            total_ms: ramp_ms + hold.as_millis() as u64,
        })
    }
}

impl LoadPattern for RampThenHold {
    fn tps_at(&self, elapsed_ms: u64) -> f64 {
        if elapsed_ms >= self.total_ms {
            0.0
        } else if elapsed_ms < self.ramp_ms {
            self.target * elapsed_ms as f64 / self.ramp_ms as f64
        } else {
            self.target
        }
    }

    fn is_terminating(&self) -> bool {
        true
    }

    fn duration_ms(&self) -> Option<u64> {
        Some(self.total_ms)
    }
}
