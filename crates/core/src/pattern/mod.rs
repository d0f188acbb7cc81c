//! Load patterns: elapsed time -> target transactions per second.
//!
//! A pattern is a small dispatched capability; the built-in shapes are
//! independent implementations and the adaptive pattern is just one more
//! variant. Patterns own no engine state and are sampled from the dispatch
//! loop only.

pub mod adaptive;

mod constant;
mod ramp;
mod sinusoid;
mod spike;
mod step;
mod warmcool;

pub use constant::Constant;
pub use ramp::{LinearRamp, RampThenHold};
pub use sinusoid::Sinusoid;
pub use spike::Spike;
pub use step::Step;
pub use warmcool::{WarmCool, WarmCoolPhase};

use crate::metrics::MetricsRegistry;

pub trait LoadPattern: Send + Sync {
    /// Target TPS at `elapsed_ms` since run start. Must be non-negative;
    /// NaN or a negative value is a contract violation and fails the run.
    fn tps_at(&self, elapsed_ms: u64) -> f64;

    /// True iff the pattern has an intrinsic end after which `tps_at`
    /// returns 0 indefinitely.
    fn is_terminating(&self) -> bool;

    /// The intrinsic end, when [`is_terminating`](Self::is_terminating).
    fn duration_ms(&self) -> Option<u64> {
        None
    }

    /// Whether samples taken at `elapsed_ms` should be recorded. The
    /// warm-up/cool-down wrapper returns false outside its steady-state
    /// window.
    fn records_metrics(&self, _elapsed_ms: u64) -> bool {
        true
    }

    /// Opt-in hook for patterns that expose gauges.
    fn register_metrics(&self, _registry: &dyn MetricsRegistry) {}

    /// Current phase label, for patterns that have one.
    fn phase_name(&self, _elapsed_ms: u64) -> Option<&'static str> {
        None
    }
}
