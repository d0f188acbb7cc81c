//! The adaptive decision engine.
//!
//! `decide` is a pure function of (state, snapshot, backpressure, config,
//! now); it owns no clock and mutates nothing, so the full phase machine is
//! testable as a table of inputs and expected decisions. Applying a
//! decision is [`AdaptiveState::apply`]'s job.

use crate::metrics::AggregatedMetrics;
use crate::pattern::adaptive::config::AdaptiveConfig;
use crate::pattern::adaptive::state::{AdaptiveState, Phase};

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    NoChange,
    /// Move to a new TPS inside the current phase (clamped on apply).
    SetTps(f64),
    /// Enter a new phase at the given TPS (clamped on apply).
    TransitionPhase(Phase, f64),
    /// Extend (or restart) the plateau candidate at the given TPS.
    RecordStabilityCandidate { tps: f64 },
    ClearCandidate,
}

pub trait RampDecisionPolicy: Send + Sync {
    fn decide(
        &self,
        state: &AdaptiveState,
        snapshot: &AggregatedMetrics,
        backpressure: f64,
        config: &AdaptiveConfig,
        now_ms: u64,
    ) -> Decision;
}

/// The built-in policy implementing the three-phase search.
#[derive(Debug, Default)]
pub struct DefaultRampDecisionPolicy;

impl RampDecisionPolicy for DefaultRampDecisionPolicy {
    fn decide(
        &self,
        state: &AdaptiveState,
        snapshot: &AggregatedMetrics,
        backpressure: f64,
        config: &AdaptiveConfig,
        now_ms: u64,
    ) -> Decision {
        // At most one adjustment per ramp interval.
        if now_ms.saturating_sub(state.last_adjustment_ms) < config.ramp_interval_ms() {
            return Decision::NoChange;
        }

        let failure_rate = snapshot.recent_failure_rate(config.failure_window_s());
        let t = &config.thresholds;
        let unhealthy =
            failure_rate >= t.error_threshold || backpressure >= t.bp_ramp_down_threshold;
        let healthy = failure_rate < t.error_threshold && backpressure < t.bp_ramp_up_threshold;
        let current = state.current_tps;

        match state.phase {
            Phase::RampUp => {
                if unhealthy {
                    Decision::TransitionPhase(Phase::RampDown, current - config.ramp_decrement)
                } else if healthy && current >= config.max_tps {
                    Decision::TransitionPhase(Phase::Sustain, config.max_tps)
                } else if healthy && state.stability_detected(current, now_ms, config) {
                    // Pinned below max long enough: sustain the plateau.
                    Decision::TransitionPhase(Phase::Sustain, current)
                } else if healthy {
                    Decision::SetTps(current + config.ramp_increment)
                } else {
                    // Backpressure between the two thresholds: hold.
                    Decision::NoChange
                }
            }
            Phase::RampDown => {
                if state.stability_detected(current, now_ms, config) {
                    Decision::TransitionPhase(Phase::Sustain, current)
                } else if current <= config.min_tps + 1e-9 {
                    if failure_rate < t.error_threshold {
                        // Recovered at the floor: re-enter the ramp at a
                        // fraction of the best level seen.
                        let reentry = config
                            .min_tps
                            .max(config.recovery_ratio * state.last_known_good_tps);
                        Decision::TransitionPhase(Phase::RampUp, reentry)
                    } else {
                        // Never drop below min_tps.
                        Decision::NoChange
                    }
                } else if unhealthy {
                    Decision::SetTps(current - config.ramp_decrement)
                } else if healthy {
                    // Healthy above the floor: hold here and accumulate
                    // evidence that this level is a plateau.
                    Decision::RecordStabilityCandidate { tps: current }
                } else {
                    Decision::NoChange
                }
            }
            Phase::Sustain => {
                if unhealthy {
                    Decision::TransitionPhase(Phase::RampDown, current - config.ramp_decrement)
                } else if healthy
                    && now_ms.saturating_sub(state.phase_start_ms)
                        >= config.sustain_duration.as_millis() as u64
                    && current < config.max_tps
                {
                    Decision::TransitionPhase(Phase::RampUp, current + config.ramp_increment)
                } else {
                    Decision::NoChange
                }
            }
        }
    }
}
