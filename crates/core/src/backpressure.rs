//! Backpressure providers: opaque sources of a saturation scalar in [0, 1].
//!
//! The adaptive decision policy samples one provider per adjustment
//! interval. Providers are combinable with [`MaxOf`], so a queue-depth
//! signal and a pool-utilization signal can gate ramping together.

use std::sync::Arc;

use crate::metrics::MetricsCollector;

/// Scalar measure of downstream saturation: 0.0 = idle, 1.0 = saturated.
pub trait BackpressureProvider: Send + Sync {
    fn level(&self) -> f64;
}

/// Always reports zero saturation. The default when nothing downstream is
/// observable.
pub struct NoBackpressure;

impl BackpressureProvider for NoBackpressure {
    fn level(&self) -> f64 {
        0.0
    }
}

/// Constant level, clamped into [0, 1]. Mostly useful in tests and as a
/// manual override.
pub struct FixedBackpressure(f64);

impl FixedBackpressure {
    pub fn new(level: f64) -> Self {
        Self(level.clamp(0.0, 1.0))
    }
}

impl BackpressureProvider for FixedBackpressure {
    fn level(&self) -> f64 {
        self.0
    }
}

/// In-flight invocations over capacity, read from the collector's gauge.
///
/// This is the engine's own saturation: it approaches 1.0 when the worker
/// pool can no longer keep up with the release rate.
pub struct InFlightBackpressure {
    collector: Arc<MetricsCollector>,
    capacity: u64,
}

impl InFlightBackpressure {
    pub fn new(collector: Arc<MetricsCollector>, capacity: u64) -> Self {
        Self {
            collector,
            capacity: capacity.max(1),
        }
    }
}

impl BackpressureProvider for InFlightBackpressure {
    fn level(&self) -> f64 {
        (self.collector.in_flight() as f64 / self.capacity as f64).clamp(0.0, 1.0)
    }
}

/// Combinator: the maximum over all inner providers.
pub struct MaxOf {
    providers: Vec<Arc<dyn BackpressureProvider>>,
}

impl MaxOf {
    pub fn new(providers: Vec<Arc<dyn BackpressureProvider>>) -> Self {
        Self { providers }
    }
}

impl BackpressureProvider for MaxOf {
    fn level(&self) -> f64 {
        self.providers
            .iter()
            .map(|p| p.level())
            .fold(0.0, f64::max)
            .clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clamps_into_unit_interval() {
        assert_eq!(FixedBackpressure::new(2.5).level(), 1.0);
        assert_eq!(FixedBackpressure::new(-1.0).level(), 0.0);
        assert_eq!(FixedBackpressure::new(0.4).level(), 0.4);
    }

    #[test]
    fn test_max_of_takes_maximum() {
        let combined = MaxOf::new(vec![
            Arc::new(FixedBackpressure::new(0.2)),
            Arc::new(FixedBackpressure::new(0.7)),
            Arc::new(NoBackpressure),
        ]);
        assert_eq!(combined.level(), 0.7);
    }

    #[test]
    fn test_max_of_empty_is_idle() {
        assert_eq!(MaxOf::new(vec![]).level(), 0.0);
    }
}
