//! Constant-rate pattern.

use std::time::Duration;

use crate::error::ConfigError;
use crate::pattern::LoadPattern;

/// `tps` for `duration`, then 0.
pub struct Constant {
    tps: f64,
    duration_ms: u64,
}

impl Constant {
    pub fn new(tps: f64, duration: Duration) -> Result<Self, ConfigError> {
        if !tps.is_finite() || tps < 0.0 {
            return Err(ConfigError::new(format!("tps must be finite and >= 0, got {tps}")));
        }
        if duration.is_zero() {
            return Err(ConfigError::new("duration must be positive"));
        }
        Ok(Self {
            tps,
            duration_ms: duration.as_millis() as u64,
        })
    }
}

impl LoadPattern for Constant {
    fn tps_at(&self, elapsed_ms: u64) -> f64 {
        if elapsed_ms < self.duration_ms {
            self.tps
        } else {
            0.0
        }
    }

    fn is_terminating(&self) -> bool {
        true
    }

    fn duration_ms(&self) -> Option<u64> {
        Some(self.duration_ms)
    }
}
