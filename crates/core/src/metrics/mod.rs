//! Metrics: high-concurrency recording, periodic aggregation, export.
//!
//! The hot path (`record`, `incr_in_flight`, ...) is atomic counters plus a
//! short bucket-update critical section per histogram; `snapshot()` does the
//! lazy summation and percentile interpolation. Snapshots are consistent
//! enough for policy decisions, not strictly point-in-time.

mod collector;
mod export;
mod histogram;
mod snapshot;
pub(crate) mod window;

pub use collector::{GaugeFn, LabeledCounter, MetricsCollector, MetricsRegistry, ValueHistogram};
pub use export::{ConsoleExporter, MetricsExporter, Reporter};
pub use histogram::LatencyHistogram;
pub use snapshot::{AggregatedMetrics, Percentiles};
pub use window::{FailureWindow, WindowEntry, WindowSnapshot};

/// Default latency quantiles reported in snapshots.
pub const DEFAULT_QUANTILES: [f64; 3] = [0.50, 0.95, 0.99];
