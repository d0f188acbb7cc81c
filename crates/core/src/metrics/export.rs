//! Exporter seam and the periodic reporter.
//!
//! Exporters are registered before the run starts; the engine spawns one
//! [`Reporter`] that invokes them at a fixed cadence and once more at
//! shutdown. Hot-swapping exporters is not supported.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics::{AggregatedMetrics, MetricsCollector};

pub trait MetricsExporter: Send + Sync {
    fn export(&self, title: &str, snapshot: &AggregatedMetrics);
}

/// Logs one aggregate line per export via `tracing`.
pub struct ConsoleExporter;

impl MetricsExporter for ConsoleExporter {
    fn export(&self, title: &str, snapshot: &AggregatedMetrics) {
        let p = |q: f64| {
            snapshot
                .success_percentiles
                .get(q)
                .map(|ns| ns / 1e6)
                .unwrap_or(0.0)
        };
        info!(
            target: "vajrapulse::report",
            title,
            total = snapshot.total_executions,
            success = snapshot.success_count,
            failure = snapshot.failure_count,
            response_tps = format_args!("{:.1}", snapshot.response_tps_total),
            request_tps = format_args!("{:.1}", snapshot.request_tps_total),
            p50_ms = format_args!("{:.2}", p(0.50)),
            p95_ms = format_args!("{:.2}", p(0.95)),
            p99_ms = format_args!("{:.2}", p(0.99)),
            in_flight = snapshot.current_in_flight,
            failure_rate_10s = format_args!("{:.3}", snapshot.recent_failure_rate(10)),
            "metrics"
        );
    }
}

/// Drives the registered exporters until cancelled, then emits a final
/// export so short runs still produce output.
pub struct Reporter {
    collector: Arc<MetricsCollector>,
    exporters: Vec<Arc<dyn MetricsExporter>>,
    interval: Duration,
}

impl Reporter {
    pub fn new(
        collector: Arc<MetricsCollector>,
        exporters: Vec<Arc<dyn MetricsExporter>>,
        interval: Duration,
    ) -> Self {
        Self {
            collector,
            exporters,
            interval,
        }
    }

    fn export_all(&self, title: &str) {
        let snapshot = self.collector.snapshot();
        for exporter in &self.exporters {
            exporter.export(title, &snapshot);
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        if self.exporters.is_empty() {
            cancel.cancelled().await;
            return;
        }
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await; // the immediate first tick
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => self.export_all("periodic"),
            }
        }
        self.export_all("final");
    }
}
