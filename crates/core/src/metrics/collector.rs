//! Thread-safe metrics collector.
//!
//! Multi-writer, multi-reader. Counters are plain atomics, latency streams
//! go through [`LatencyHistogram`], and the failure window is an
//! epoch-tagged ring. `record` is O(1) and allocation-free in steady state;
//! it never blocks on I/O.
//!
//! The collector doubles as the [`MetricsRegistry`] that load patterns use
//! to expose gauges, labeled counters, and value histograms.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::clock::Clock;
use crate::metrics::histogram::LatencyHistogram;
use crate::metrics::snapshot::AggregatedMetrics;
use crate::metrics::window::FailureWindow;
use crate::metrics::DEFAULT_QUANTILES;
use crate::task::Outcome;

/// Reader callback for a registered gauge.
pub type GaugeFn = Box<dyn Fn() -> f64 + Send + Sync>;

/// Registration surface handed to `LoadPattern::register_metrics`.
pub trait MetricsRegistry: Send + Sync {
    fn register_gauge(&self, name: &'static str, read: GaugeFn);

    /// A counter whose increments carry a label value, e.g.
    /// `adaptive.transitions{reason}`.
    fn labeled_counter(&self, name: &'static str) -> LabeledCounter;

    /// A histogram over plain values (not latencies), e.g. TPS adjustment
    /// magnitudes.
    fn value_histogram(&self, name: &'static str) -> ValueHistogram;

    /// Drop every gauge whose name starts with `prefix`. Counters and
    /// histograms keep their accumulated totals.
    fn unregister_gauges(&self, prefix: &str);
}

/// Counter with per-label cells.
#[derive(Clone, Default)]
pub struct LabeledCounter {
    cells: Arc<RwLock<HashMap<&'static str, Arc<AtomicU64>>>>,
}

impl LabeledCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, label: &'static str) {
        {
            let cells = self.cells.read();
            if let Some(cell) = cells.get(label) {
                cell.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        self.cells
            .write()
            .entry(label)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn value(&self, label: &str) -> u64 {
        self.cells
            .read()
            .get(label)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.cells
            .read()
            .values()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    pub fn values(&self) -> Vec<(&'static str, u64)> {
        self.cells
            .read()
            .iter()
            .map(|(label, c)| (*label, c.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Histogram over arbitrary magnitudes, sharing the latency bucketing.
#[derive(Clone)]
pub struct ValueHistogram {
    inner: Arc<LatencyHistogram>,
}

impl ValueHistogram {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LatencyHistogram::new()),
        }
    }

    pub fn record(&self, value: u64) {
        self.inner.record(value);
    }

    pub fn count(&self) -> u64 {
        self.inner.count()
    }

    pub fn mean(&self) -> f64 {
        self.inner.mean_ns()
    }
}

impl Default for ValueHistogram {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MetricsCollector {
    clock: Arc<dyn Clock>,
    start_ns: AtomicU64,

    issued: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    in_flight: AtomicU64,

    success_latency: LatencyHistogram,
    failure_latency: LatencyHistogram,
    queue_wait: LatencyHistogram,
    window: FailureWindow,

    quantiles: Vec<f64>,

    gauges: RwLock<Vec<(&'static str, GaugeFn)>>,
    counters: RwLock<HashMap<&'static str, LabeledCounter>>,
    histograms: RwLock<HashMap<&'static str, ValueHistogram>>,

    closed: AtomicBool,
}

impl MetricsCollector {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_quantiles(clock, DEFAULT_QUANTILES.to_vec())
    }

    pub fn with_quantiles(clock: Arc<dyn Clock>, quantiles: Vec<f64>) -> Self {
        let start = clock.now_ns();
        Self {
            clock,
            start_ns: AtomicU64::new(start),
            issued: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            success_latency: LatencyHistogram::new(),
            failure_latency: LatencyHistogram::new(),
            queue_wait: LatencyHistogram::new(),
            window: FailureWindow::new(),
            quantiles,
            gauges: RwLock::new(Vec::new()),
            counters: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Re-anchor elapsed time; the engine calls this when the run starts.
    pub fn mark_start(&self) {
        self.start_ns.store(self.clock.now_ns(), Ordering::SeqCst);
    }

    fn now_s(&self) -> u64 {
        self.clock.now_ns() / 1_000_000_000
    }

    /// Record one finished invocation.
    pub fn record(&self, outcome: &Outcome, latency_ns: u64) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        let now_s = self.now_s();
        match outcome {
            Outcome::Success { .. } => {
                self.success.fetch_add(1, Ordering::Relaxed);
                self.success_latency.record(latency_ns);
                self.window.record(now_s, true);
            }
            Outcome::Failure { .. } => {
                self.failure.fetch_add(1, Ordering::Relaxed);
                self.failure_latency.record(latency_ns);
                self.window.record(now_s, false);
            }
        }
    }

    /// Record the release-to-start delay of one invocation.
    pub fn record_queue_wait(&self, wait_ns: u64) {
        if !self.closed.load(Ordering::Relaxed) {
            self.queue_wait.record(wait_ns);
        }
    }

    /// Count one issued iteration (request-side TPS).
    pub fn record_issued(&self) {
        self.issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_in_flight(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decr_in_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn success_count(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure.load(Ordering::Relaxed)
    }

    pub fn issued_count(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    /// Elapsed seconds since `mark_start`, floored at ε for rate division.
    pub fn elapsed_s(&self) -> f64 {
        let elapsed_ns = self
            .clock
            .now_ns()
            .saturating_sub(self.start_ns.load(Ordering::SeqCst));
        (elapsed_ns as f64 / 1e9).max(1e-9)
    }

    /// Failure rate over the trailing window without building a snapshot.
    pub fn recent_failure_rate(&self, window_s: u64) -> f64 {
        let now_s = self.now_s();
        self.window.snapshot(now_s).failure_rate(window_s)
    }

    /// Aggregate the current totals. Consistent enough for policy decisions;
    /// not strictly point-in-time.
    pub fn snapshot(&self) -> AggregatedMetrics {
        let now = self.clock.now_ns();
        let elapsed_ns = now.saturating_sub(self.start_ns.load(Ordering::SeqCst));
        let elapsed_s = (elapsed_ns as f64 / 1e9).max(1e-9);

        let success = self.success.load(Ordering::Relaxed);
        let failure = self.failure.load(Ordering::Relaxed);
        let issued = self.issued.load(Ordering::Relaxed);

        AggregatedMetrics {
            total_executions: success + failure,
            success_count: success,
            failure_count: failure,
            success_percentiles: self.success_latency.percentiles(&self.quantiles),
            failure_percentiles: self.failure_latency.percentiles(&self.quantiles),
            queue_wait_percentiles: self.queue_wait.percentiles(&self.quantiles),
            elapsed_ns,
            response_tps_total: (success + failure) as f64 / elapsed_s,
            response_tps_success: success as f64 / elapsed_s,
            response_tps_failure: failure as f64 / elapsed_s,
            request_tps_total: issued as f64 / elapsed_s,
            current_in_flight: self.in_flight(),
            window: self.window.snapshot(now / 1_000_000_000),
        }
    }

    /// Values of every registered gauge, for exporters.
    pub fn gauge_values(&self) -> Vec<(&'static str, f64)> {
        self.gauges
            .read()
            .iter()
            .map(|(name, read)| (*name, read()))
            .collect()
    }

    /// Per-label values of every registered counter, for exporters.
    pub fn counter_values(&self) -> Vec<(&'static str, &'static str, u64)> {
        self.counters
            .read()
            .iter()
            .flat_map(|(name, counter)| {
                counter
                    .values()
                    .into_iter()
                    .map(|(label, value)| (*name, label, value))
            })
            .collect()
    }

    /// Stop accepting records and drop registered gauges. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.gauges.write().clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl MetricsRegistry for MetricsCollector {
    fn register_gauge(&self, name: &'static str, read: GaugeFn) {
        self.gauges.write().push((name, read));
    }

    fn labeled_counter(&self, name: &'static str) -> LabeledCounter {
        self.counters
            .write()
            .entry(name)
            .or_insert_with(LabeledCounter::new)
            .clone()
    }

    fn value_histogram(&self, name: &'static str) -> ValueHistogram {
        self.histograms
            .write()
            .entry(name)
            .or_insert_with(ValueHistogram::new)
            .clone()
    }

    fn unregister_gauges(&self, prefix: &str) {
        self.gauges.write().retain(|(name, _)| !name.starts_with(prefix));
    }
}

static_assertions::assert_impl_all!(MetricsCollector: Send, Sync);
