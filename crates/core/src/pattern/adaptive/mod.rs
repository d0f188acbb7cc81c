//! The adaptive load pattern.
//!
//! A stateful pattern driven by a pure decision policy. `tps_at` is a cheap
//! read of the shared [`StateCell`]; `check_and_adjust` is called by the
//! engine at most once per `ramp_interval`, consults the policy, and
//! replaces the state record atomically. Phase changes feed the event log,
//! the listeners, and the registered metrics.

mod config;
mod decision;
mod events;
mod listener;
mod state;

pub use config::{AdaptiveConfig, RampThresholds};
pub use decision::{Decision, DefaultRampDecisionPolicy, RampDecisionPolicy};
pub use events::{EventLog, PatternEvent};
pub use listener::AdaptiveListener;
pub use state::{AdaptiveState, Phase, StateCell};

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::AdjusterError;
use crate::metrics::{AggregatedMetrics, LabeledCounter, MetricsRegistry, ValueHistogram};
use crate::pattern::LoadPattern;

/// Default capacity of the event audit queue.
const EVENT_LOG_CAPACITY: usize = 256;

struct AdaptiveMetrics {
    transitions: LabeledCounter,
    adjustments: ValueHistogram,
}

pub struct AdaptiveLoadPattern {
    config: AdaptiveConfig,
    cell: Arc<StateCell>,
    policy: Box<dyn RampDecisionPolicy>,
    listeners: listener::ListenerSet,
    events: EventLog,
    metrics: RwLock<Option<AdaptiveMetrics>>,
}

impl AdaptiveLoadPattern {
    pub fn new(config: AdaptiveConfig) -> Result<Self, crate::error::ConfigError> {
        Self::with_policy(config, Box::new(DefaultRampDecisionPolicy))
    }

    pub fn with_policy(
        config: AdaptiveConfig,
        policy: Box<dyn RampDecisionPolicy>,
    ) -> Result<Self, crate::error::ConfigError> {
        config.validate()?;
        let cell = Arc::new(StateCell::new(AdaptiveState::initial(&config)));
        Ok(Self {
            config,
            cell,
            policy,
            listeners: listener::ListenerSet::default(),
            events: EventLog::new(EVENT_LOG_CAPACITY),
            metrics: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Current state record (cheap `Arc` clone).
    pub fn state(&self) -> Arc<AdaptiveState> {
        self.cell.load().0
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    pub fn current_tps(&self) -> f64 {
        self.state().current_tps
    }

    pub fn add_listener(&self, listener: &Arc<dyn AdaptiveListener>) {
        self.listeners.add(listener);
    }

    /// Drain pending audit events, oldest first.
    pub fn drain_events(&self) -> Vec<PatternEvent> {
        self.events.drain()
    }

    /// One adjustment cycle: read, decide, CAS-replace, notify.
    ///
    /// The CAS is retried once against a fresh read; a second failure means
    /// a concurrent adjuster exists, which is a wiring bug.
    pub fn check_and_adjust(
        &self,
        now_ms: u64,
        snapshot: &AggregatedMetrics,
        backpressure: f64,
    ) -> Result<Decision, AdjusterError> {
        for attempt in 0..2 {
            let (state, generation) = self.cell.load();
            let decision = self
                .policy
                .decide(&state, snapshot, backpressure, &self.config, now_ms);
            if decision == Decision::NoChange {
                return Ok(decision);
            }
            let next = state.apply(&decision, now_ms, &self.config);
            if self.cell.swap_if(generation, next.clone()) {
                self.publish(&state, &next, now_ms);
                return Ok(decision);
            }
            debug!(attempt, "adaptive state swap lost a race; retrying");
        }
        Err(AdjusterError::Contention)
    }

    /// Emit events, listener callbacks, and metric updates for one applied
    /// adjustment.
    fn publish(&self, before: &AdaptiveState, after: &AdaptiveState, now_ms: u64) {
        let tps_changed = (after.current_tps - before.current_tps).abs() > f64::EPSILON;
        let transitioned = after.phase != before.phase;

        if tps_changed {
            if let Some(m) = self.metrics.read().as_ref() {
                let delta = (after.current_tps - before.current_tps).abs();
                m.adjustments.record(delta.round() as u64);
            }
            self.events.push(PatternEvent::TpsChange {
                from: before.current_tps,
                to: after.current_tps,
                at_ms: now_ms,
            });
            self.listeners
                .notify(|l| l.on_tps_change(before.current_tps, after.current_tps));
        }

        if transitioned {
            let reason = transition_reason(before, after, &self.config);
            debug!(
                from = before.phase.name(),
                to = after.phase.name(),
                tps = after.current_tps,
                reason,
                "adaptive phase transition"
            );
            if let Some(m) = self.metrics.read().as_ref() {
                m.transitions.incr(reason);
            }
            self.events.push(PatternEvent::PhaseTransition {
                from: before.phase,
                to: after.phase,
                tps: after.current_tps,
                at_ms: now_ms,
                reason,
            });
            self.listeners
                .notify(|l| l.on_phase_transition(before.phase, after.phase, after.current_tps));

            match reason {
                "stability" => {
                    self.events.push(PatternEvent::StabilityDetected {
                        tps: after.current_tps,
                        at_ms: now_ms,
                    });
                    self.listeners.notify(|l| l.on_stability_detected(after.current_tps));
                }
                "recovery" => {
                    self.events.push(PatternEvent::Recovery {
                        tps: after.current_tps,
                        at_ms: now_ms,
                    });
                    self.listeners.notify(|l| l.on_recovery(after.current_tps));
                }
                _ => {}
            }
        }
    }
}

fn transition_reason(
    before: &AdaptiveState,
    after: &AdaptiveState,
    config: &AdaptiveConfig,
) -> &'static str {
    match (before.phase, after.phase) {
        (_, Phase::RampDown) => "unhealthy",
        (Phase::RampDown, Phase::RampUp) => "recovery",
        (Phase::Sustain, Phase::RampUp) => "sustain_complete",
        (_, Phase::Sustain) => {
            if after.current_tps >= config.max_tps {
                "max_tps"
            } else {
                "stability"
            }
        }
        _ => "policy",
    }
}

impl LoadPattern for AdaptiveLoadPattern {
    fn tps_at(&self, _elapsed_ms: u64) -> f64 {
        self.cell.load().0.current_tps
    }

    /// The adaptive pattern never ends on its own; the engine stops it via
    /// `stop()` or an outer wall-clock timeout.
    fn is_terminating(&self) -> bool {
        false
    }

    fn register_metrics(&self, registry: &dyn MetricsRegistry) {
        let cell = Arc::clone(&self.cell);
        registry.register_gauge(
            "adaptive.phase",
            Box::new(move || cell.load().0.phase.code() as f64),
        );
        let cell = Arc::clone(&self.cell);
        registry.register_gauge(
            "adaptive.current_tps",
            Box::new(move || cell.load().0.current_tps),
        );
        let cell = Arc::clone(&self.cell);
        registry.register_gauge(
            "adaptive.stable_tps",
            Box::new(move || cell.load().0.stable_tps.unwrap_or(f64::NAN)),
        );
        let cell = Arc::clone(&self.cell);
        registry.register_gauge(
            "adaptive.phase_transitions",
            Box::new(move || cell.load().0.phase_transition_count as f64),
        );
        *self.metrics.write() = Some(AdaptiveMetrics {
            transitions: registry.labeled_counter("adaptive.transitions"),
            adjustments: registry.value_histogram("adaptive.tps_adjustment"),
        });
    }

    fn phase_name(&self, _elapsed_ms: u64) -> Option<&'static str> {
        Some(self.phase().name())
    }
}

static_assertions::assert_impl_all!(AdaptiveLoadPattern: Send, Sync);
