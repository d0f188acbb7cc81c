//! The execution engine: dispatch loop, worker pool, lifecycle.
//!
//! One logical dispatcher paces releases through the [`RateController`];
//! every released slot spawns a worker invocation onto the task pool.
//! Workers run as lightweight tokio tasks by default, or through a bounded
//! `spawn_blocking` pool for CPU-bound tasks. Shutdown is two-staged: a
//! drain window in which in-flight invocations may settle, then a forced
//! stage that abandons whatever ignored cancellation.

use std::future::pending;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::backpressure::{BackpressureProvider, NoBackpressure};
use crate::clock::{Clock, TokioClock};
use crate::error::{ConfigError, EngineError};
use crate::metrics::{AggregatedMetrics, MetricsCollector, MetricsExporter, MetricsRegistry, Reporter};
use crate::pattern::adaptive::AdaptiveLoadPattern;
use crate::pattern::LoadPattern;
use crate::rate::{Pacing, RateController};
use crate::task::{ExecutionMode, Outcome, Task, TaskError};

/// Gauge name prefixes owned by the engine, unregistered after each run.
const ENGINE_GAUGE_PREFIXES: [&str; 4] = ["response.", "request.", "execution.", "adaptive."];

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window for in-flight invocations to settle after stop.
    pub drain_timeout: Duration,
    /// Window for the forced stage before workers are abandoned.
    pub force_timeout: Duration,
    /// In-flight bound in lightweight mode.
    pub max_in_flight: usize,
    /// Cadence of the periodic reporter.
    pub report_interval: Duration,
    /// Outer wall-clock bound, mainly for non-terminating patterns.
    pub max_duration: Option<Duration>,
    /// Poll cadence while the pattern sits at 0 TPS.
    pub min_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(5),
            force_timeout: Duration::from_secs(10),
            max_in_flight: 16_384,
            report_interval: Duration::from_secs(10),
            max_duration: None,
            min_poll_interval: Duration::from_millis(100),
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::new("max_in_flight must be >= 1"));
        }
        if self.min_poll_interval.is_zero() {
            return Err(ConfigError::new("min_poll_interval must be positive"));
        }
        if self.report_interval.is_zero() {
            return Err(ConfigError::new("report_interval must be positive"));
        }
        Ok(())
    }
}

pub struct EngineBuilder {
    task: Arc<dyn Task>,
    pattern: Arc<dyn LoadPattern>,
    adaptive: Option<Arc<AdaptiveLoadPattern>>,
    clock: Option<Arc<dyn Clock>>,
    collector: Option<Arc<MetricsCollector>>,
    backpressure: Arc<dyn BackpressureProvider>,
    exporters: Vec<Arc<dyn MetricsExporter>>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new(task: Arc<dyn Task>, pattern: Arc<dyn LoadPattern>) -> Self {
        Self {
            task,
            pattern,
            adaptive: None,
            clock: None,
            collector: None,
            backpressure: Arc::new(NoBackpressure),
            exporters: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    /// Drive an adaptive pattern: it becomes the load pattern and the
    /// engine's periodic adjustment callback is wired to it.
    pub fn adaptive(task: Arc<dyn Task>, pattern: Arc<AdaptiveLoadPattern>) -> Self {
        let mut builder = Self::new(task, pattern.clone());
        builder.adaptive = Some(pattern);
        builder
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn collector(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn backpressure(mut self, provider: Arc<dyn BackpressureProvider>) -> Self {
        self.backpressure = provider;
        self
    }

    pub fn exporter(mut self, exporter: Arc<dyn MetricsExporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_duration(mut self, duration: Duration) -> Self {
        self.config.max_duration = Some(duration);
        self
    }

    pub fn build(self) -> Result<ExecutionEngine, ConfigError> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(TokioClock::new()));
        let collector = self
            .collector
            .unwrap_or_else(|| Arc::new(MetricsCollector::new(clock.clone())));
        Ok(ExecutionEngine {
            task: self.task,
            pattern: self.pattern,
            adaptive: self.adaptive,
            clock,
            collector,
            backpressure: self.backpressure,
            exporters: self.exporters,
            config: self.config,
            cancel: CancellationToken::new(),
            hard_cancel: CancellationToken::new(),
            run_state: AtomicU8::new(RunState::IDLE),
            run_start_ns: AtomicU64::new(0),
        })
    }
}

struct RunState;

impl RunState {
    const IDLE: u8 = 0;
    const RUNNING: u8 = 1;
    const FINISHED: u8 = 2;
    const CLOSED: u8 = 3;
}

pub struct ExecutionEngine {
    task: Arc<dyn Task>,
    pattern: Arc<dyn LoadPattern>,
    adaptive: Option<Arc<AdaptiveLoadPattern>>,
    clock: Arc<dyn Clock>,
    collector: Arc<MetricsCollector>,
    backpressure: Arc<dyn BackpressureProvider>,
    exporters: Vec<Arc<dyn MetricsExporter>>,
    config: EngineConfig,
    cancel: CancellationToken,
    hard_cancel: CancellationToken,
    run_state: AtomicU8,
    run_start_ns: AtomicU64,
}

impl ExecutionEngine {
    pub fn collector(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.collector)
    }

    pub fn snapshot(&self) -> AggregatedMetrics {
        self.collector.snapshot()
    }

    pub fn in_flight_count(&self) -> u64 {
        self.collector.in_flight()
    }

    /// Current pattern phase, for patterns that expose one.
    pub fn current_phase(&self) -> Option<&'static str> {
        let start = self.run_start_ns.load(Ordering::Acquire);
        let elapsed_ms = self.clock.now_ns().saturating_sub(start) / 1_000_000;
        self.pattern.phase_name(elapsed_ms)
    }

    /// Request graceful shutdown. Idempotent, callable from any thread.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Release all resources. Safe to call multiple times and from a
    /// different thread than `run`.
    pub fn close(&self) {
        let previous = self.run_state.swap(RunState::CLOSED, Ordering::SeqCst);
        if previous != RunState::CLOSED {
            self.cancel.cancel();
            self.hard_cancel.cancel();
            for prefix in ENGINE_GAUGE_PREFIXES {
                self.collector.unregister_gauges(prefix);
            }
            self.collector.close();
        }
    }

    /// Drive the run to completion: init, dispatch, drain, teardown.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<(), EngineError> {
        if self
            .run_state
            .compare_exchange(
                RunState::IDLE,
                RunState::RUNNING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(EngineError::NotRunnable("run() may only be called once"));
        }

        // Lifecycle 1: init on the caller's task; failure aborts the run
        // and teardown is not called.
        self.task
            .init()
            .await
            .map_err(|source| EngineError::TaskInit { source })?;

        // Lifecycle 2: metrics wiring.
        self.collector.mark_start();
        self.pattern.register_metrics(self.collector.as_ref());
        self.register_engine_gauges();

        let reporter_cancel = CancellationToken::new();
        let reporter = Reporter::new(
            Arc::clone(&self.collector),
            self.exporters.clone(),
            self.config.report_interval,
        );
        let reporter_handle = tokio::spawn(reporter.run(reporter_cancel.clone()));

        // Lifecycle 3: the dispatch loop.
        let tracker = TaskTracker::new();
        let loop_result = self.dispatch_loop(&tracker).await;

        // Lifecycle 4-5: drain, then force. Always attempted, even when the
        // loop failed.
        self.shutdown_workers(&tracker).await;

        reporter_cancel.cancel();
        let _ = reporter_handle.await;

        // Lifecycle 6: unregister gauges, tear the task down.
        for prefix in ENGINE_GAUGE_PREFIXES {
            self.collector.unregister_gauges(prefix);
        }
        if let Err(error) = self.task.teardown().await {
            warn!(%error, "task teardown failed");
        }

        let _ = self.run_state.compare_exchange(
            RunState::RUNNING,
            RunState::FINISHED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        loop_result
    }

    async fn dispatch_loop(&self, tracker: &TaskTracker) -> Result<(), EngineError> {
        let mut controller = RateController::new(Arc::clone(&self.clock));
        self.run_start_ns
            .store(controller.start_ns(), Ordering::Release);

        let mode = self.task.execution_mode();
        let permits = match mode {
            ExecutionMode::Lightweight => self.config.max_in_flight,
            bounded => bounded.thread_count(),
        };
        let semaphore = Arc::new(Semaphore::new(permits));

        let max_deadline_ns = self
            .config
            .max_duration
            .map(|d| controller.start_ns() + d.as_nanos() as u64);
        let ramp_interval_ms = self.adaptive.as_ref().map(|a| a.config().ramp_interval_ms());
        let mut last_adjust_ms = 0u64;
        let mut next_iteration = 0u64;

        info!(
            permits,
            terminating = self.pattern.is_terminating(),
            adaptive = self.adaptive.is_some(),
            "dispatch loop started"
        );

        loop {
            let pacing = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = sleep_until_opt(self.clock.as_ref(), max_deadline_ns) => {
                    debug!("max_duration reached");
                    break;
                }
                result = controller.wait_for_next(self.pattern.as_ref()) => result?,
            };

            match pacing {
                Pacing::Idle => {
                    if self.pattern.is_terminating() {
                        if let Some(duration_ms) = self.pattern.duration_ms() {
                            if controller.elapsed_ms() >= duration_ms {
                                debug!("pattern exhausted");
                                break;
                            }
                        }
                    }
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = self.clock.sleep(self.config.min_poll_interval) => {}
                    }
                }
                Pacing::Release => {
                    let release_ns = self.clock.now_ns();
                    let records = self.pattern.records_metrics(controller.elapsed_ms());
                    let permit = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        permit = semaphore.clone().acquire_owned() => permit
                            .map_err(|_| EngineError::InvariantViolation(
                                "worker semaphore closed".into(),
                            ))?,
                    };

                    let iteration = next_iteration;
                    next_iteration += 1;
                    if records {
                        self.collector.record_issued();
                    }
                    self.collector.incr_in_flight();

                    let task = Arc::clone(&self.task);
                    let collector = Arc::clone(&self.collector);
                    let clock = Arc::clone(&self.clock);
                    let hard_cancel = self.hard_cancel.clone();
                    tracker.spawn(async move {
                        let start_ns = clock.now_ns();
                        if records {
                            collector.record_queue_wait(start_ns.saturating_sub(release_ns));
                        }
                        let outcome = tokio::select! {
                            biased;
                            _ = hard_cancel.cancelled() => None,
                            outcome = invoke(task, iteration, mode) => Some(outcome),
                        };
                        if let Some(outcome) = outcome {
                            if records {
                                let latency_ns = clock.now_ns().saturating_sub(start_ns);
                                collector.record(&outcome, latency_ns);
                            }
                        }
                        collector.decr_in_flight();
                        drop(permit);
                    });
                }
            }

            // Adaptive tick, at most once per ramp interval.
            if let (Some(adaptive), Some(interval_ms)) = (&self.adaptive, ramp_interval_ms) {
                let now_ms = controller.elapsed_ms();
                if now_ms.saturating_sub(last_adjust_ms) >= interval_ms {
                    last_adjust_ms = now_ms;
                    let snapshot = self.collector.snapshot();
                    let level = self.backpressure.level().clamp(0.0, 1.0);
                    if let Err(error) = adaptive.check_and_adjust(now_ms, &snapshot, level) {
                        warn!(%error, "adaptive adjustment failed; keeping previous tps");
                    }
                }
            }
        }

        debug!(issued = controller.issued(), "dispatch loop exited");
        Ok(())
    }

    /// Drain in-flight work, escalating to the forced stage on timeout.
    async fn shutdown_workers(&self, tracker: &TaskTracker) {
        tracker.close();
        if tokio::time::timeout(self.config.drain_timeout, tracker.wait())
            .await
            .is_ok()
        {
            return;
        }
        warn!(
            in_flight = self.collector.in_flight(),
            "drain timeout expired; forcing shutdown"
        );
        self.hard_cancel.cancel();
        if tokio::time::timeout(self.config.force_timeout, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.collector.in_flight(),
                "force timeout expired; abandoning remaining invocations"
            );
        }
    }

    fn register_engine_gauges(&self) {
        let c = Arc::clone(&self.collector);
        self.collector.register_gauge(
            "response.tps.total",
            Box::new(move || (c.success_count() + c.failure_count()) as f64 / c.elapsed_s()),
        );
        let c = Arc::clone(&self.collector);
        self.collector.register_gauge(
            "response.tps.success",
            Box::new(move || c.success_count() as f64 / c.elapsed_s()),
        );
        let c = Arc::clone(&self.collector);
        self.collector.register_gauge(
            "response.tps.failure",
            Box::new(move || c.failure_count() as f64 / c.elapsed_s()),
        );
        let c = Arc::clone(&self.collector);
        self.collector.register_gauge(
            "request.tps.total",
            Box::new(move || c.issued_count() as f64 / c.elapsed_s()),
        );
        let c = Arc::clone(&self.collector);
        self.collector.register_gauge(
            "execution.queue.size",
            Box::new(move || c.in_flight() as f64),
        );
    }
}

/// Sleep until the optional deadline; never resolves when there is none.
async fn sleep_until_opt(clock: &dyn Clock, deadline_ns: Option<u64>) {
    match deadline_ns {
        Some(deadline) => clock.sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Run one invocation under the task's execution mode.
async fn invoke(task: Arc<dyn Task>, iteration: u64, mode: ExecutionMode) -> Outcome {
    match mode {
        ExecutionMode::Lightweight => task.execute(iteration).await,
        ExecutionMode::BoundedBlocking(_) => {
            let handle = tokio::runtime::Handle::current();
            match tokio::task::spawn_blocking(move || handle.block_on(task.execute(iteration)))
                .await
            {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    Outcome::failure(TaskError::new("panic", join_error.to_string()))
                }
            }
        }
    }
}

static_assertions::assert_impl_all!(ExecutionEngine: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Constant;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct SleepTask {
        delay: Duration,
        init_called: AtomicBool,
        teardown_called: AtomicBool,
    }

    impl SleepTask {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                init_called: AtomicBool::new(false),
                teardown_called: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Task for SleepTask {
        async fn init(&self) -> Result<(), crate::error::BoxedError> {
            self.init_called.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(&self, _iteration: u64) -> Outcome {
            tokio::time::sleep(self.delay).await;
            Outcome::ok()
        }

        async fn teardown(&self) -> Result<(), crate::error::BoxedError> {
            self.teardown_called.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingInit;

    #[async_trait]
    impl Task for FailingInit {
        async fn init(&self) -> Result<(), crate::error::BoxedError> {
            Err("no database".into())
        }

        async fn execute(&self, _iteration: u64) -> Outcome {
            Outcome::ok()
        }
    }

    fn constant(tps: f64, secs: u64) -> Arc<dyn LoadPattern> {
        Arc::new(Constant::new(tps, Duration::from_secs(secs)).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drives_task_at_rate() {
        let task = Arc::new(SleepTask::new(Duration::from_millis(5)));
        let engine = EngineBuilder::new(task.clone(), constant(50.0, 2))
            .build()
            .unwrap();
        engine.run().await.unwrap();

        let snap = engine.snapshot();
        assert!(task.init_called.load(Ordering::SeqCst));
        assert!(task.teardown_called.load(Ordering::SeqCst));
        // 50 tps for 2s: one release at t=0, then every 20ms.
        assert!(
            (95..=105).contains(&snap.total_executions),
            "total={}",
            snap.total_executions
        );
        assert_eq!(snap.failure_count, 0);
        assert_eq!(engine.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_failure_aborts_without_teardown() {
        let engine = EngineBuilder::new(Arc::new(FailingInit), constant(10.0, 1))
            .build()
            .unwrap();
        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, EngineError::TaskInit { .. }));
        assert_eq!(engine.snapshot().total_executions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_new_iterations() {
        let task = Arc::new(SleepTask::new(Duration::from_millis(1)));
        let engine = Arc::new(
            EngineBuilder::new(task, constant(100.0, 60))
                .build()
                .unwrap(),
        );

        let runner = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run().await })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        engine.stop();
        runner.await.unwrap().unwrap();

        let issued_at_stop = engine.snapshot().total_executions;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(engine.snapshot().total_executions, issued_at_stop);
        assert_eq!(engine.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_is_single_shot() {
        let task = Arc::new(SleepTask::new(Duration::from_millis(1)));
        let engine = EngineBuilder::new(task, constant(10.0, 1)).build().unwrap();
        engine.run().await.unwrap();
        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, EngineError::NotRunnable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_releases_collector() {
        let task = Arc::new(SleepTask::new(Duration::from_millis(1)));
        let engine = EngineBuilder::new(task, constant(10.0, 1)).build().unwrap();
        engine.run().await.unwrap();
        engine.close();
        engine.close();
        assert!(engine.collector().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_outcomes_keep_the_loop_running() {
        struct Flaky;
        #[async_trait]
        impl Task for Flaky {
            async fn execute(&self, iteration: u64) -> Outcome {
                if iteration % 2 == 0 {
                    Outcome::failure(TaskError::other("even iterations fail"))
                } else {
                    Outcome::ok()
                }
            }
        }
        let engine = EngineBuilder::new(Arc::new(Flaky), constant(100.0, 1))
            .build()
            .unwrap();
        engine.run().await.unwrap();
        let snap = engine.snapshot();
        assert!(snap.total_executions >= 95);
        assert!(snap.failure_count >= 45);
        assert_eq!(snap.total_executions, snap.success_count + snap.failure_count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_bounds_non_terminating_pattern() {
        struct Forever;
        impl LoadPattern for Forever {
            fn tps_at(&self, _elapsed_ms: u64) -> f64 {
                20.0
            }
            fn is_terminating(&self) -> bool {
                false
            }
        }
        let task = Arc::new(SleepTask::new(Duration::from_millis(1)));
        let engine = EngineBuilder::new(task, Arc::new(Forever))
            .max_duration(Duration::from_secs(3))
            .build()
            .unwrap();
        engine.run().await.unwrap();
        let snap = engine.snapshot();
        assert!(
            (55..=65).contains(&snap.total_executions),
            "total={}",
            snap.total_executions
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bounded_blocking_mode_completes() {
        struct CpuTask;
        #[async_trait]
        impl Task for CpuTask {
            async fn execute(&self, iteration: u64) -> Outcome {
                // Trivial CPU-ish work.
                let mut acc = iteration;
                for _ in 0..1_000 {
                    acc = acc.wrapping_mul(31).wrapping_add(7);
                }
                if acc == u64::MAX {
                    Outcome::failure(TaskError::other("unreachable"))
                } else {
                    Outcome::ok()
                }
            }
            fn execution_mode(&self) -> ExecutionMode {
                ExecutionMode::BoundedBlocking(2)
            }
        }
        let engine = EngineBuilder::new(
            Arc::new(CpuTask),
            Arc::new(Constant::new(200.0, Duration::from_millis(200)).unwrap()),
        )
        .build()
        .unwrap();
        engine.run().await.unwrap();
        let snap = engine.snapshot();
        assert!(snap.total_executions > 0);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(engine.in_flight_count(), 0);
    }

    #[test]
    fn test_engine_config_validation() {
        let mut config = EngineConfig::default();
        config.max_in_flight = 0;
        assert!(config.validate().is_err());
        assert!(EngineConfig::default().validate().is_ok());
    }
}
