//! Error taxonomy for the engine and the adaptive adjuster.
//!
//! Task execution failures are not errors in this sense: they become
//! [`Outcome::Failure`](crate::task::Outcome) records and never propagate
//! past the worker that produced them.

use thiserror::Error;

/// A boxed error source from user code (task init/teardown).
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Invalid configuration, surfaced from constructors before any work starts.
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Errors that terminate or fail a run at the dispatcher level.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `task.init()` failed; the run is aborted and `teardown` is skipped.
    #[error("task init failed: {source}")]
    TaskInit {
        #[source]
        source: BoxedError,
    },

    /// The pattern violated its contract (`tps_at` returned NaN or < 0).
    #[error("load pattern contract violation: tps_at({elapsed_ms}ms) = {tps}")]
    PatternContract { elapsed_ms: u64, tps: f64 },

    /// Unexpected internal state; always a bug.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),

    /// The engine was started twice or after `close()`.
    #[error("engine is not in a runnable state: {0}")]
    NotRunnable(&'static str),
}

/// Failure inside a single `check_and_adjust` cycle. Logged by the engine;
/// the pattern keeps serving the previous TPS and the next interval retries.
#[derive(Debug, Error)]
pub enum AdjusterError {
    /// The state cell was replaced concurrently twice in a row. Only one
    /// adjuster may exist, so this indicates a wiring bug.
    #[error("adaptive state contention: concurrent adjuster detected")]
    Contention,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::new("ramp_decrement must be > 0");
        assert_eq!(err.to_string(), "invalid configuration: ramp_decrement must be > 0");
    }

    #[test]
    fn test_engine_error_carries_source() {
        let source: BoxedError = "connection refused".into();
        let err = EngineError::TaskInit { source };
        assert!(err.to_string().contains("connection refused"));
    }
}
