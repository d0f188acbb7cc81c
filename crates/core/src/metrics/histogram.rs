//! Bounded-memory latency histogram.
//!
//! hdrhistogram gives logarithmic bucketing at a fixed relative error (two
//! significant figures here, so <= 1%) with no per-sample allocation. One
//! instance per latency stream, guarded by a mutex around the bucket update
//! — the critical section is a few loads and one increment.

use hdrhistogram::Histogram;
use parking_lot::Mutex;

use crate::metrics::snapshot::Percentiles;

/// Highest recordable latency: one hour in nanoseconds. Larger values are
/// clamped into the top bucket rather than dropped.
const MAX_LATENCY_NS: u64 = 3_600_000_000_000;

pub struct LatencyHistogram {
    inner: Mutex<Histogram<u64>>,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        // Static, known-valid bounds.
        let hist = Histogram::new_with_bounds(1, MAX_LATENCY_NS, 2)
            .expect("static histogram bounds");
        Self {
            inner: Mutex::new(hist),
        }
    }

    pub fn record(&self, latency_ns: u64) {
        self.inner.lock().saturating_record(latency_ns.max(1));
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().len()
    }

    /// Interpolated values for the requested quantiles, in recording order.
    /// Empty streams report 0 for every quantile.
    pub fn percentiles(&self, quantiles: &[f64]) -> Percentiles {
        let hist = self.inner.lock();
        Percentiles::new(
            quantiles
                .iter()
                .map(|&q| {
                    let v = if hist.is_empty() {
                        0
                    } else {
                        hist.value_at_quantile(q)
                    };
                    (q, v as f64)
                })
                .collect(),
        )
    }

    pub fn mean_ns(&self) -> f64 {
        let hist = self.inner.lock();
        if hist.is_empty() {
            0.0
        } else {
            hist.mean()
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}
