//! The immutable aggregated-metrics value produced by `snapshot()`.

use crate::metrics::window::WindowSnapshot;

/// Quantile -> value pairs for one latency stream, in query order.
#[derive(Debug, Clone, Default)]
pub struct Percentiles(Vec<(f64, f64)>);

impl Percentiles {
    pub fn new(pairs: Vec<(f64, f64)>) -> Self {
        Self(pairs)
    }

    /// Value for quantile `q`, if it was requested at snapshot time.
    pub fn get(&self, q: f64) -> Option<f64> {
        self.0
            .iter()
            .find(|(quantile, _)| (quantile - q).abs() < 1e-9)
            .map(|&(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Aggregated view of a run at one point in time.
///
/// Invariants: `success_count + failure_count == total_executions`,
/// percentile values are non-negative, rates are `count / max(elapsed_s, ε)`.
#[derive(Debug, Clone)]
pub struct AggregatedMetrics {
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,

    pub success_percentiles: Percentiles,
    pub failure_percentiles: Percentiles,
    pub queue_wait_percentiles: Percentiles,

    pub elapsed_ns: u64,
    pub response_tps_total: f64,
    pub response_tps_success: f64,
    pub response_tps_failure: f64,
    pub request_tps_total: f64,

    pub current_in_flight: u64,

    pub(crate) window: WindowSnapshot,
}

impl AggregatedMetrics {
    /// An all-zero snapshot; the reporter's initial value and a test seed.
    pub fn empty() -> Self {
        Self {
            total_executions: 0,
            success_count: 0,
            failure_count: 0,
            success_percentiles: Percentiles::default(),
            failure_percentiles: Percentiles::default(),
            queue_wait_percentiles: Percentiles::default(),
            elapsed_ns: 0,
            response_tps_total: 0.0,
            response_tps_success: 0.0,
            response_tps_failure: 0.0,
            request_tps_total: 0.0,
            current_in_flight: 0,
            window: WindowSnapshot::empty(0),
        }
    }

    /// Build a snapshot around a prepared failure window; decision-policy
    /// tests use this to script health signals.
    pub fn with_window(window: WindowSnapshot) -> Self {
        Self {
            window,
            ..Self::empty()
        }
    }

    /// Failure rate over the last `window_s` wall-clock seconds; `0.0` when
    /// the window holds no samples.
    pub fn recent_failure_rate(&self, window_s: u64) -> f64 {
        self.window.failure_rate(window_s)
    }

    pub fn elapsed_s(&self) -> f64 {
        self.elapsed_ns as f64 / 1e9
    }
}
