//! Adaptive state record and its atomically-replaced cell.
//!
//! The state is a single immutable record. Readers (`tps_at`) take a cheap
//! `Arc` clone; the one adjuster replaces the whole record through
//! [`StateCell::swap_if`], which fails when another replacement happened in
//! between. A torn read is impossible by construction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::pattern::adaptive::config::AdaptiveConfig;
use crate::pattern::adaptive::decision::Decision;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RampUp,
    RampDown,
    Sustain,
}

impl Phase {
    /// Stable integer coding for the `adaptive.phase` gauge.
    pub fn code(self) -> u64 {
        match self {
            Phase::RampUp => 0,
            Phase::RampDown => 1,
            Phase::Sustain => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::RampUp => "ramp_up",
            Phase::RampDown => "ramp_down",
            Phase::Sustain => "sustain",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveState {
    pub phase: Phase,
    pub current_tps: f64,
    pub last_adjustment_ms: u64,
    pub phase_start_ms: u64,
    pub phase_transition_count: u64,
    /// The sustained plateau, defined while in `Sustain`.
    pub stable_tps: Option<f64>,
    /// Currently-observed plateau candidate.
    pub candidate_tps: Option<f64>,
    pub candidate_start_ms: Option<u64>,
    pub consecutive_stable: u32,
    /// Highest TPS abandoned with clean signals; seeds recovery.
    pub last_known_good_tps: f64,
}

impl AdaptiveState {
    pub fn initial(config: &AdaptiveConfig) -> Self {
        Self {
            phase: Phase::RampUp,
            current_tps: config.clamp_tps(config.initial_tps),
            last_adjustment_ms: 0,
            phase_start_ms: 0,
            phase_transition_count: 0,
            stable_tps: None,
            candidate_tps: None,
            candidate_start_ms: None,
            consecutive_stable: 0,
            last_known_good_tps: config.clamp_tps(config.initial_tps),
        }
    }

    /// True when the candidate plateau has held for the required number of
    /// intervals and wall-clock span, and `observed` is still on it.
    pub fn stability_detected(&self, observed: f64, now_ms: u64, config: &AdaptiveConfig) -> bool {
        match (self.candidate_tps, self.candidate_start_ms) {
            (Some(candidate), Some(start_ms)) => {
                (observed - candidate).abs() <= config.tps_tolerance
                    && self.consecutive_stable >= config.stable_intervals_required
                    && now_ms.saturating_sub(start_ms)
                        >= config.stable_intervals_required as u64 * config.ramp_interval_ms()
            }
            _ => false,
        }
    }

    /// Extend the plateau candidate with a new observation, or restart it
    /// when the observation left the tolerance band.
    fn note_candidate(&mut self, observed: f64, now_ms: u64, config: &AdaptiveConfig) {
        match self.candidate_tps {
            Some(candidate) if (observed - candidate).abs() <= config.tps_tolerance => {
                self.consecutive_stable = self
                    .consecutive_stable
                    .saturating_add(1)
                    .min(config.stable_intervals_required);
            }
            _ => {
                self.candidate_tps = Some(observed);
                self.candidate_start_ms = Some(now_ms);
                self.consecutive_stable = 1;
            }
        }
    }

    fn clear_candidate(&mut self) {
        self.candidate_tps = None;
        self.candidate_start_ms = None;
        self.consecutive_stable = 0;
    }

    /// Produce the successor state with `decision` applied. TPS is clamped
    /// into `[min_tps, max_tps]` after every arithmetic step.
    pub fn apply(&self, decision: &Decision, now_ms: u64, config: &AdaptiveConfig) -> Self {
        let mut next = self.clone();
        match decision {
            Decision::NoChange => {}
            Decision::SetTps(tps) => {
                let clamped = config.clamp_tps(*tps);
                next.current_tps = clamped;
                next.last_adjustment_ms = now_ms;
                // An active ramp step is not plateau evidence; only explicit
                // RecordStabilityCandidate decisions accumulate it.
                next.clear_candidate();
            }
            Decision::TransitionPhase(phase, tps) => {
                let clamped = config.clamp_tps(*tps);
                if *phase == Phase::RampDown && self.phase != Phase::RampDown {
                    // The TPS being abandoned is the best level seen so far.
                    next.last_known_good_tps = self.last_known_good_tps.max(self.current_tps);
                }
                next.phase = *phase;
                next.current_tps = clamped;
                next.phase_start_ms = now_ms;
                next.phase_transition_count += 1;
                next.last_adjustment_ms = now_ms;
                next.clear_candidate();
                next.stable_tps = (*phase == Phase::Sustain).then_some(clamped);
            }
            Decision::RecordStabilityCandidate { tps } => {
                next.note_candidate(config.clamp_tps(*tps), now_ms, config);
                next.last_adjustment_ms = now_ms;
            }
            Decision::ClearCandidate => next.clear_candidate(),
        }
        next
    }
}

/// Atomically replaced state snapshot with a generation counter, so the
/// adjuster can detect a concurrent replacement and retry.
pub struct StateCell {
    current: RwLock<Arc<AdaptiveState>>,
    generation: AtomicU64,
}

impl StateCell {
    pub fn new(state: AdaptiveState) -> Self {
        Self {
            current: RwLock::new(Arc::new(state)),
            generation: AtomicU64::new(0),
        }
    }

    /// Cheap consistent read: the record and the generation it belongs to.
    pub fn load(&self) -> (Arc<AdaptiveState>, u64) {
        let guard = self.current.read();
        (Arc::clone(&guard), self.generation.load(Ordering::Acquire))
    }

    /// Replace the record iff no other replacement happened since
    /// `expected_generation` was read.
    pub fn swap_if(&self, expected_generation: u64, next: AdaptiveState) -> bool {
        let mut guard = self.current.write();
        if self.generation.load(Ordering::Acquire) != expected_generation {
            return false;
        }
        *guard = Arc::new(next);
        self.generation.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
