//! `vajrapulse` — drive a task at a target TPS and report what happened.

mod tasks;

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result, WrapErr};
use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::{info, warn};
use vajrapulse_core::{
    AdaptiveConfig, AdaptiveListener, AdaptiveLoadPattern, AggregatedMetrics, ConsoleExporter,
    Constant, EngineBuilder, EngineConfig, ExecutionEngine, LinearRamp, LoadPattern,
    MetricsCollector, MetricsExporter, Phase, RampThenHold, Task, TokioClock, WarmCool,
};

#[derive(Parser)]
#[command(name = "vajrapulse", version, about = "VajraPulse load generator")]
struct Cli {
    /// Task id: noop, sleep:<dur>, or flaky:<dur>:<p>
    task: String,

    #[arg(long, value_enum, default_value = "static")]
    mode: Mode,

    /// Target TPS (the plateau for static/ramp modes, max_tps for adaptive).
    #[arg(long, default_value_t = 100.0)]
    tps: f64,

    /// Total run duration, e.g. 90s, 500ms, 2m (bare integer = seconds).
    #[arg(long, default_value = "60s", value_parser = parse_duration_arg)]
    duration: Duration,

    /// Ramp window for ramp-sustain mode.
    #[arg(long, default_value = "10s", value_parser = parse_duration_arg)]
    ramp_duration: Duration,

    /// Exclude samples from the first part of the run.
    #[arg(long, default_value = "0s", value_parser = parse_duration_arg)]
    warm_up: Duration,

    /// Exclude samples from the last part of the run.
    #[arg(long, default_value = "0s", value_parser = parse_duration_arg)]
    cool_down: Duration,

    /// Starting TPS for adaptive mode.
    #[arg(long, default_value_t = 10.0)]
    initial_tps: f64,

    /// TPS added per healthy adaptive interval.
    #[arg(long, default_value_t = 10.0)]
    ramp_increment: f64,

    /// Adaptive adjustment interval.
    #[arg(long, default_value = "1s", value_parser = parse_duration_arg)]
    ramp_interval: Duration,

    /// Seed for the flaky task's failure sequence.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value = "10s", value_parser = parse_duration_arg)]
    report_interval: Duration,

    /// Serve Prometheus text metrics on this address, e.g. 127.0.0.1:9095.
    #[arg(long)]
    metrics_addr: Option<String>,

    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Static,
    Ramp,
    RampSustain,
    Adaptive,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

fn parse_duration_arg(input: &str) -> std::result::Result<Duration, String> {
    tasks::parse_duration(input)
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };
    let task = match tasks::build(&cli.task, cli.seed) {
        Ok(task) => task,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
    };
    match run(cli, task) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("Error: {report:?}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(log_format: LogFormat, log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .into_diagnostic()?;
    let fmt = tracing_subscriber::fmt().with_env_filter(env_filter);
    match log_format {
        LogFormat::Json => fmt.json().init(),
        LogFormat::Pretty => fmt.init(),
    }
    Ok(())
}

/// Logs adaptive phase movement as it happens.
struct LogListener;

impl AdaptiveListener for LogListener {
    fn on_phase_transition(&self, from: Phase, to: Phase, tps: f64) {
        info!(from = from.name(), to = to.name(), tps, "adaptive phase transition");
    }

    fn on_stability_detected(&self, tps: f64) {
        info!(tps, "stable plateau detected");
    }

    fn on_recovery(&self, tps: f64) {
        info!(tps, "recovered; ramping again");
    }
}

fn run(cli: Cli, task: Arc<dyn Task>) -> Result<()> {
    init_tracing(cli.log_format, &cli.log_level)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()
        .wrap_err("failed to start the runtime")?;

    runtime.block_on(async {
        let clock = Arc::new(TokioClock::new());
        let collector = Arc::new(MetricsCollector::new(clock.clone()));

        // The listener is weakly held by the pattern; keep it alive here.
        let listener: Arc<dyn AdaptiveListener> = Arc::new(LogListener);

        let mut builder = match cli.mode {
            Mode::Static => {
                let pattern = Constant::new(cli.tps, cli.duration).into_diagnostic()?;
                EngineBuilder::new(task, warm_cooled(pattern, &cli)?)
            }
            Mode::Ramp => {
                let pattern = LinearRamp::new(cli.tps, cli.duration).into_diagnostic()?;
                EngineBuilder::new(task, warm_cooled(pattern, &cli)?)
            }
            Mode::RampSustain => {
                let hold = cli
                    .duration
                    .checked_sub(cli.ramp_duration)
                    .filter(|hold| !hold.is_zero())
                    .ok_or_else(|| miette::miette!("--duration must exceed --ramp-duration"))?;
                let pattern =
                    RampThenHold::new(cli.tps, cli.ramp_duration, hold).into_diagnostic()?;
                EngineBuilder::new(task, warm_cooled(pattern, &cli)?)
            }
            Mode::Adaptive => {
                let config = AdaptiveConfig {
                    initial_tps: cli.initial_tps,
                    ramp_increment: cli.ramp_increment,
                    ramp_decrement: cli.ramp_increment * 2.0,
                    ramp_interval: cli.ramp_interval,
                    max_tps: cli.tps,
                    ..AdaptiveConfig::default()
                };
                let pattern = Arc::new(AdaptiveLoadPattern::new(config).into_diagnostic()?);
                pattern.add_listener(&listener);
                EngineBuilder::adaptive(task, pattern)
            }
        };

        builder = builder
            .clock(clock)
            .collector(Arc::clone(&collector))
            .exporter(Arc::new(ConsoleExporter))
            .config(EngineConfig {
                report_interval: cli.report_interval,
                ..EngineConfig::default()
            });
        if matches!(cli.mode, Mode::Adaptive) {
            // The adaptive pattern never terminates on its own; bound it by
            // the requested duration.
            builder = builder.max_duration(cli.duration);
        }

        if let Some(addr) = cli.metrics_addr.as_deref() {
            let prometheus = PrometheusExporter::init(addr, Arc::clone(&collector))?;
            builder = builder.exporter(prometheus);
        }

        let engine = Arc::new(builder.build().into_diagnostic()?);

        spawn_signal_handler(Arc::clone(&engine));

        let result = engine.run().await;
        let snapshot = engine.snapshot();
        engine.close();
        result.into_diagnostic().wrap_err("load run failed")?;

        print_summary(&snapshot);
        Ok(())
    })
}

fn warm_cooled(
    pattern: impl LoadPattern + 'static,
    cli: &Cli,
) -> Result<Arc<dyn LoadPattern>> {
    if cli.warm_up.is_zero() && cli.cool_down.is_zero() {
        return Ok(Arc::new(pattern));
    }
    let wrapped = WarmCool::new(pattern, cli.warm_up, cli.cool_down).into_diagnostic()?;
    Ok(Arc::new(wrapped))
}

/// First interrupt drains; a second one aborts immediately.
fn spawn_signal_handler(engine: Arc<ExecutionEngine>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("interrupt received; draining");
        engine.stop();
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("second interrupt; aborting");
            std::process::exit(130);
        }
    });
}

fn print_summary(snapshot: &AggregatedMetrics) {
    let p = |q: f64| {
        snapshot
            .success_percentiles
            .get(q)
            .map(|ns| ns / 1e6)
            .unwrap_or(0.0)
    };
    println!(
        "run complete: {} executions ({} failed) in {:.1}s",
        snapshot.total_executions,
        snapshot.failure_count,
        snapshot.elapsed_s(),
    );
    println!(
        "  response tps {:.1} | p50 {:.2}ms | p95 {:.2}ms | p99 {:.2}ms",
        snapshot.response_tps_total,
        p(0.50),
        p(0.95),
        p(0.99),
    );
}

/// Publishes engine snapshots and registered pattern gauges as Prometheus
/// text metrics, served by a background thread.
struct PrometheusExporter {
    collector: Arc<MetricsCollector>,
    response_tps_total: Gauge,
    response_tps_success: Gauge,
    response_tps_failure: Gauge,
    request_tps_total: Gauge,
    executions_total: IntGauge,
    failures_total: IntGauge,
    in_flight: IntGauge,
    latency_ms: GaugeVec,
    pattern_gauges: GaugeVec,
}

impl PrometheusExporter {
    fn init(addr: &str, collector: Arc<MetricsCollector>) -> Result<Arc<Self>> {
        let registry = Registry::new();

        let response_tps_total =
            Gauge::new("vajrapulse_response_tps_total", "Completed transactions per second")
                .into_diagnostic()?;
        let response_tps_success =
            Gauge::new("vajrapulse_response_tps_success", "Successful transactions per second")
                .into_diagnostic()?;
        let response_tps_failure =
            Gauge::new("vajrapulse_response_tps_failure", "Failed transactions per second")
                .into_diagnostic()?;
        let request_tps_total =
            Gauge::new("vajrapulse_request_tps_total", "Issued iterations per second")
                .into_diagnostic()?;
        let executions_total =
            IntGauge::new("vajrapulse_executions_total", "Total recorded executions")
                .into_diagnostic()?;
        let failures_total = IntGauge::new("vajrapulse_failures_total", "Total recorded failures")
            .into_diagnostic()?;
        let in_flight = IntGauge::new("vajrapulse_in_flight", "In-flight invocations")
            .into_diagnostic()?;
        let latency_ms = GaugeVec::new(
            Opts::new("vajrapulse_latency_ms", "Success latency percentiles"),
            &["quantile"],
        )
        .into_diagnostic()?;
        let pattern_gauges = GaugeVec::new(
            Opts::new("vajrapulse_pattern_gauge", "Pattern-registered gauges"),
            &["name"],
        )
        .into_diagnostic()?;

        registry
            .register(Box::new(response_tps_total.clone()))
            .into_diagnostic()?;
        registry
            .register(Box::new(response_tps_success.clone()))
            .into_diagnostic()?;
        registry
            .register(Box::new(response_tps_failure.clone()))
            .into_diagnostic()?;
        registry
            .register(Box::new(request_tps_total.clone()))
            .into_diagnostic()?;
        registry
            .register(Box::new(executions_total.clone()))
            .into_diagnostic()?;
        registry
            .register(Box::new(failures_total.clone()))
            .into_diagnostic()?;
        registry.register(Box::new(in_flight.clone())).into_diagnostic()?;
        registry.register(Box::new(latency_ms.clone())).into_diagnostic()?;
        registry
            .register(Box::new(pattern_gauges.clone()))
            .into_diagnostic()?;

        let exporter = Arc::new(Self {
            collector,
            response_tps_total,
            response_tps_success,
            response_tps_failure,
            request_tps_total,
            executions_total,
            failures_total,
            in_flight,
            latency_ms,
            pattern_gauges,
        });

        let addr = addr.to_string();
        thread::spawn(move || serve_metrics(&addr, &registry));
        Ok(exporter)
    }
}

impl MetricsExporter for PrometheusExporter {
    fn export(&self, _title: &str, snapshot: &AggregatedMetrics) {
        self.response_tps_total.set(snapshot.response_tps_total);
        self.response_tps_success.set(snapshot.response_tps_success);
        self.response_tps_failure.set(snapshot.response_tps_failure);
        self.request_tps_total.set(snapshot.request_tps_total);
        self.executions_total.set(snapshot.total_executions as i64);
        self.failures_total.set(snapshot.failure_count as i64);
        self.in_flight.set(snapshot.current_in_flight as i64);
        for (quantile, value_ns) in snapshot.success_percentiles.iter() {
            let label = format!("{quantile}");
            self.latency_ms
                .with_label_values(&[label.as_str()])
                .set(value_ns / 1e6);
        }
        for (name, value) in self.collector.gauge_values() {
            self.pattern_gauges.with_label_values(&[name]).set(value);
        }
    }
}

fn serve_metrics(addr: &str, registry: &Registry) {
    let server = match tiny_http::Server::http(addr) {
        Ok(server) => server,
        Err(err) => {
            warn!(%addr, "failed to bind metrics endpoint: {err}");
            return;
        }
    };
    info!(%addr, "metrics endpoint listening");
    for request in server.incoming_requests() {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&registry.gather(), &mut buffer).is_err() {
            continue;
        }
        let response = tiny_http::Response::from_data(buffer).with_header(
            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/plain; version=0.0.4"[..])
                .expect("static header"),
        );
        let _ = request.respond(response);
    }
}
