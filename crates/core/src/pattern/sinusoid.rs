//! Sinusoidal pattern.

use std::f64::consts::TAU;
use std::time::Duration;

use crate::error::ConfigError;
use crate::pattern::LoadPattern;

/// `base + amplitude * sin(2π * elapsed / period)` for `duration`, floored
/// at 0 so an amplitude larger than the base clips instead of going
/// negative.
pub struct Sinusoid {
    base: f64,
    amplitude: f64,
    period_ms: u64,
    duration_ms: u64,
}

impl Sinusoid {
    pub fn new(
        base: f64,
        amplitude: f64,
        period: Duration,
        duration: Duration,
    ) -> Result<Self, ConfigError> {
        if !base.is_finite() || base < 0.0 {
            return Err(ConfigError::new(format!("base must be finite and >= 0, got {base}")));
        }
        if !amplitude.is_finite() {
            return Err(ConfigError::new("amplitude must be finite"));
        }
        if period.is_zero() || duration.is_zero() {
            return Err(ConfigError::new("period and duration must be positive"));
        }
        Ok(Self {
            base,
            amplitude,
            period_ms: period.as_millis() as u64,
            duration_ms: duration.as_millis() as u64,
        })
    }
}

impl LoadPattern for Sinusoid {
    fn tps_at(&self, elapsed_ms: u64) -> f64 {
        if elapsed_ms >= self.duration_ms {
            return 0.0;
        }
        let phase = TAU * (elapsed_ms as f64 / self.period_ms as f64);
        (self.base + self.amplitude * phase.sin()).max(0.0)
    }

    fn is_terminating(&self) -> bool {
        true
    }

    fn duration_ms(&self) -> Option<u64> {
        Some(self.duration_ms)
    }
}
