//! VajraPulse core: a rate-paced load-generation engine.
//!
//! Given a [`Task`] (one invocation = one transaction) and a [`LoadPattern`]
//! (elapsed time -> target TPS), the [`ExecutionEngine`] drives the task at
//! the requested rate, records latency and outcome statistics into the
//! [`MetricsCollector`], and — with the [`AdaptiveLoadPattern`] — searches
//! for the highest TPS the downstream system absorbs without errors or
//! backpressure.
//!
//! # Architecture
//!
//! ```text
//! LoadPattern ──tps_at──> RateController ──release──> ExecutionEngine
//!      ^                                                   │ spawn
//!      │ check_and_adjust                                  v
//! AdaptiveState <──decide── MetricsCollector <──record── workers
//! ```

pub mod backpressure;
pub mod clock;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod pattern;
pub mod rate;
pub mod task;

pub use backpressure::{BackpressureProvider, FixedBackpressure, InFlightBackpressure, MaxOf, NoBackpressure};
pub use clock::{Clock, ManualClock, TokioClock};
pub use engine::{EngineBuilder, EngineConfig, ExecutionEngine};
pub use error::{AdjusterError, ConfigError, EngineError};
pub use metrics::{
    AggregatedMetrics, ConsoleExporter, MetricsCollector, MetricsExporter, MetricsRegistry,
};
pub use pattern::adaptive::{
    AdaptiveConfig, AdaptiveListener, AdaptiveLoadPattern, Decision, DefaultRampDecisionPolicy,
    PatternEvent, Phase, RampDecisionPolicy, RampThresholds,
};
pub use pattern::{
    Constant, LinearRamp, LoadPattern, RampThenHold, Sinusoid, Spike, Step, WarmCool,
};
pub use rate::{Pacing, RateController};
pub use task::{ExecutionMode, Outcome, Task, TaskError};
