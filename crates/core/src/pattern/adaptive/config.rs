//! Adaptive pattern configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Health thresholds consulted by the decision policy.
///
/// A sample is *unhealthy* when the failure rate reaches `error_threshold`
/// or backpressure reaches `bp_ramp_down_threshold`; it is *healthy* when
/// the failure rate is below `error_threshold` and backpressure is below
/// `bp_ramp_up_threshold`. Between the two backpressure thresholds the
/// policy holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampThresholds {
    pub error_threshold: f64,
    pub bp_ramp_up_threshold: f64,
    pub bp_ramp_down_threshold: f64,
}

impl Default for RampThresholds {
    fn default() -> Self {
        Self {
            error_threshold: 0.05,
            bp_ramp_up_threshold: 0.7,
            bp_ramp_down_threshold: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    pub initial_tps: f64,
    pub ramp_increment: f64,
    pub ramp_decrement: f64,
    pub ramp_interval: Duration,
    pub max_tps: f64,
    pub min_tps: f64,
    pub sustain_duration: Duration,
    pub stable_intervals_required: u32,
    pub tps_tolerance: f64,
    pub recovery_ratio: f64,
    /// Health window for the failure rate. Defaults to one `ramp_interval`
    /// plus the current partial second: stale samples from an abandoned
    /// operating point must leave the window within one interval or the
    /// policy can never re-stabilise, while samples from the interval just
    /// elapsed must still be visible at the decision instant.
    pub failure_window: Option<Duration>,
    pub thresholds: RampThresholds,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            initial_tps: 10.0,
            ramp_increment: 10.0,
            ramp_decrement: 20.0,
            ramp_interval: Duration::from_secs(1),
            max_tps: f64::INFINITY,
            min_tps: 0.0,
            sustain_duration: Duration::from_secs(30),
            stable_intervals_required: 3,
            tps_tolerance: 50.0,
            recovery_ratio: 0.5,
            failure_window: None,
            thresholds: RampThresholds::default(),
        }
    }
}

impl AdaptiveConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_tps < 0.0 || !self.min_tps.is_finite() {
            return Err(ConfigError::new("min_tps must be finite and >= 0"));
        }
        if self.max_tps < self.min_tps {
            return Err(ConfigError::new("max_tps must be >= min_tps"));
        }
        if !self.initial_tps.is_finite()
            || self.initial_tps < self.min_tps
            || self.initial_tps > self.max_tps
        {
            return Err(ConfigError::new(
                "initial_tps must lie within [min_tps, max_tps]",
            ));
        }
        if !(self.ramp_increment > 0.0) || !self.ramp_increment.is_finite() {
            return Err(ConfigError::new("ramp_increment must be > 0"));
        }
        if !(self.ramp_decrement > 0.0) || !self.ramp_decrement.is_finite() {
            return Err(ConfigError::new("ramp_decrement must be > 0"));
        }
        if self.ramp_interval.is_zero() {
            return Err(ConfigError::new("ramp_interval must be positive"));
        }
        if self.sustain_duration.is_zero() {
            return Err(ConfigError::new("sustain_duration must be positive"));
        }
        if self.stable_intervals_required < 1 {
            return Err(ConfigError::new("stable_intervals_required must be >= 1"));
        }
        if self.tps_tolerance < 0.0 || !self.tps_tolerance.is_finite() {
            return Err(ConfigError::new("tps_tolerance must be finite and >= 0"));
        }
        if !(self.recovery_ratio > 0.0 && self.recovery_ratio <= 1.0) {
            return Err(ConfigError::new("recovery_ratio must be in (0, 1]"));
        }
        let t = &self.thresholds;
        for (name, v) in [
            ("error_threshold", t.error_threshold),
            ("bp_ramp_up_threshold", t.bp_ramp_up_threshold),
            ("bp_ramp_down_threshold", t.bp_ramp_down_threshold),
        ] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(ConfigError::new(format!("{name} must be in (0, 1]")));
            }
        }
        if t.bp_ramp_up_threshold > t.bp_ramp_down_threshold {
            return Err(ConfigError::new(
                "bp_ramp_up_threshold must be <= bp_ramp_down_threshold",
            ));
        }
        Ok(())
    }

    pub fn ramp_interval_ms(&self) -> u64 {
        self.ramp_interval.as_millis() as u64
    }

    /// Health window in whole seconds, at least 1. The default covers the
    /// previous full ramp interval plus the current partial second.
    pub fn failure_window_s(&self) -> u64 {
        match self.failure_window {
            Some(window) => window.as_secs().max(1),
            None => self.ramp_interval.as_secs().max(1) + 1,
        }
    }

    pub fn clamp_tps(&self, tps: f64) -> f64 {
        tps.clamp(self.min_tps, self.max_tps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AdaptiveConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_fields() {
        let mut c = AdaptiveConfig::default();
        c.ramp_decrement = 0.0;
        assert!(c.validate().is_err());

        let mut c = AdaptiveConfig::default();
        c.stable_intervals_required = 0;
        assert!(c.validate().is_err());

        let mut c = AdaptiveConfig::default();
        c.initial_tps = -5.0;
        assert!(c.validate().is_err());

        let mut c = AdaptiveConfig::default();
        c.min_tps = 100.0;
        c.max_tps = 50.0;
        assert!(c.validate().is_err());

        let mut c = AdaptiveConfig::default();
        c.thresholds.bp_ramp_up_threshold = 0.95;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_failure_window_defaults_to_interval_plus_partial_second() {
        let mut c = AdaptiveConfig::default();
        c.ramp_interval = Duration::from_secs(2);
        assert_eq!(c.failure_window_s(), 3);
        c.failure_window = Some(Duration::from_secs(10));
        assert_eq!(c.failure_window_s(), 10);
        // Sub-second windows floor at 1s.
        c.failure_window = Some(Duration::from_millis(200));
        assert_eq!(c.failure_window_s(), 1);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = AdaptiveConfig {
            initial_tps: 25.0,
            max_tps: 400.0,
            failure_window: Some(Duration::from_secs(5)),
            ..AdaptiveConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: AdaptiveConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.initial_tps, 25.0);
        assert_eq!(back.max_tps, 400.0);
        assert_eq!(back.failure_window, Some(Duration::from_secs(5)));
        assert!(back.validate().is_ok());
    }

    #[test]
    fn test_clamp_with_unbounded_max() {
        let config = AdaptiveConfig {
            min_tps: 10.0,
            ..AdaptiveConfig::default()
        };
        assert_eq!(config.clamp_tps(5.0), 10.0);
        assert_eq!(config.clamp_tps(1e12), 1e12);
    }
}
