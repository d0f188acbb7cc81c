//! Stepped pattern: a sequence of (tps, duration) plateaus.

use std::time::Duration;

use crate::error::ConfigError;
use crate::pattern::LoadPattern;

pub struct Step {
    /// (tps, end_ms) with cumulative end offsets; immutable after build.
    steps: Vec<(f64, u64)>,
    total_ms: u64,
}

impl Step {
    pub fn new(steps: Vec<(f64, Duration)>) -> Result<Self, ConfigError> {
        if steps.is_empty() {
            return Err(ConfigError::new("step pattern needs at least one step"));
        }
        let mut cumulative = Vec::with_capacity(steps.len());
        let mut end_ms = 0u64;
        for (i, (tps, duration)) in steps.iter().enumerate() {
            if !tps.is_finite() || *tps < 0.0 {
                return Err(ConfigError::new(format!(
                    "step {i}: tps must be finite and >= 0, got {tps}"
                )));
            }
            if duration.is_zero() {
                return Err(ConfigError::new(format!("step {i}: duration must be positive")));
            }
            end_ms += duration.as_millis() as u64;
            cumulative.push((*tps, end_ms));
        }
        Ok(Self {
            steps: cumulative,
            total_ms: end_ms,
        })
    }
}

impl LoadPattern for Step {
    fn tps_at(&self, elapsed_ms: u64) -> f64 {
        for &(tps, end_ms) in &self.steps {
            if elapsed_ms < end_ms {
                return tps;
            }
        }
        0.0
    }

    fn is_terminating(&self) -> bool {
        true
    }

    fn duration_ms(&self) -> Option<u64> {
        Some(self.total_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_plateaus() {
        let p = Step::new(vec![
            (50.0, Duration::from_secs(2)),
            (150.0, Duration::from_secs(1)),
            (25.0, Duration::from_secs(3)),
        ])
        .unwrap();
        assert_eq!(p.tps_at(0), 50.0);
        assert_eq!(p.tps_at(1_999), 50.0);
        assert_eq!(p.tps_at(2_000), 150.0);
        assert_eq!(p.tps_at(3_000), 25.0);
        assert_eq!(p.tps_at(5_999), 25.0);
        assert_eq!(p.tps_at(6_000), 0.0);
        assert_eq!(p.duration_ms(), Some(6_000));
    }

    #[test]
    fn test_step_rejects_empty_and_invalid() {
        assert!(Step::new(vec![]).is_err());
        assert!(Step::new(vec![(-1.0, Duration::from_secs(1))]).is_err());
        assert!(Step::new(vec![(10.0, Duration::ZERO)]).is_err());
    }
}
