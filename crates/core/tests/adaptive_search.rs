//! Adaptive pattern end-to-end: plateau search and recovery, on virtual
//! time, through the full engine + collector + decision loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vajrapulse_core::{
    AdaptiveConfig, AdaptiveLoadPattern, EngineBuilder, Outcome, PatternEvent, Phase, Task,
    TaskError,
};

fn search_config() -> AdaptiveConfig {
    AdaptiveConfig {
        initial_tps: 50.0,
        ramp_increment: 50.0,
        ramp_decrement: 100.0,
        ramp_interval: Duration::from_secs(1),
        max_tps: 1000.0,
        min_tps: 10.0,
        sustain_duration: Duration::from_secs(3),
        stable_intervals_required: 3,
        tps_tolerance: 50.0,
        recovery_ratio: 0.5,
        ..AdaptiveConfig::default()
    }
}

/// S3: the downstream absorbs 300 TPS and collapses above it. The search
/// must reach Sustain at an intermediate plateau within 20s.
#[tokio::test(start_paused = true)]
async fn adaptive_finds_intermediate_plateau() {
    struct CliffTask {
        pattern: Arc<AdaptiveLoadPattern>,
    }

    #[async_trait]
    impl Task for CliffTask {
        async fn execute(&self, _iteration: u64) -> Outcome {
            if self.pattern.current_tps() > 300.0 {
                Outcome::failure(TaskError::new("overload", "queue full"))
            } else {
                Outcome::ok()
            }
        }
    }

    let pattern = Arc::new(AdaptiveLoadPattern::new(search_config()).unwrap());
    let task = Arc::new(CliffTask {
        pattern: Arc::clone(&pattern),
    });
    let engine = EngineBuilder::adaptive(task, Arc::clone(&pattern))
        .max_duration(Duration::from_secs(20))
        .build()
        .unwrap();
    engine.run().await.unwrap();

    let events = pattern.drain_events();
    let sustained = events.iter().find_map(|e| match e {
        PatternEvent::PhaseTransition {
            to: Phase::Sustain,
            tps,
            at_ms,
            ..
        } => Some((*tps, *at_ms)),
        _ => None,
    });
    let (tps, at_ms) = sustained.expect("never reached Sustain");
    assert!(
        (250.0..=350.0).contains(&tps),
        "sustained at {tps}, expected the plateau below the cliff"
    );
    assert!(at_ms <= 20_000, "took {at_ms}ms");

    let state = pattern.state();
    assert!(state.phase_transition_count >= 2);
    assert!(state.current_tps >= 10.0 && state.current_tps <= 1000.0);
}

/// S4: the downstream is down for the first 5s, then heals. The pattern
/// must fall to min_tps and re-enter RampUp within one interval of the
/// recovery.
#[tokio::test(start_paused = true)]
async fn adaptive_recovers_after_outage() {
    struct OutageTask {
        healed_at: tokio::time::Instant,
    }

    #[async_trait]
    impl Task for OutageTask {
        async fn execute(&self, _iteration: u64) -> Outcome {
            if tokio::time::Instant::now() < self.healed_at {
                Outcome::failure(TaskError::new("unavailable", "connection refused"))
            } else {
                Outcome::ok()
            }
        }
    }

    let task = Arc::new(OutageTask {
        healed_at: tokio::time::Instant::now() + Duration::from_secs(5),
    });
    let pattern = Arc::new(AdaptiveLoadPattern::new(search_config()).unwrap());
    let engine = EngineBuilder::adaptive(task, Arc::clone(&pattern))
        .max_duration(Duration::from_secs(10))
        .build()
        .unwrap();
    engine.run().await.unwrap();

    let events = pattern.drain_events();

    // Phase 1: the outage drives the TPS down to the floor.
    let floored = events.iter().any(|e| {
        matches!(
            e,
            PatternEvent::PhaseTransition { to: Phase::RampDown, tps, at_ms, .. }
                if *tps <= 10.0 + 1e-9 && *at_ms < 5_000
        )
    });
    assert!(floored, "pattern never descended to min_tps: {events:?}");

    // Phase 2: recovery fires within ~one interval of the heal, re-entering
    // RampUp above the floor.
    let recovery = events.iter().find_map(|e| match e {
        PatternEvent::Recovery { tps, at_ms } => Some((*tps, *at_ms)),
        _ => None,
    });
    let (tps, at_ms) = recovery.expect("no recovery event");
    assert!(tps > 10.0, "recovery re-entered at the floor: {tps}");
    assert!(
        (5_000..=7_000).contains(&at_ms),
        "recovery at {at_ms}ms, expected shortly after the heal"
    );

    // After recovery the pattern keeps ramping.
    let state = pattern.state();
    assert!(state.current_tps > 10.0);
}

/// A downstream that never fails must be ramped all the way to max_tps;
/// the climb itself must not be mistaken for a plateau, so the only
/// Sustain the run ever enters is at max_tps.
#[tokio::test(start_paused = true)]
async fn adaptive_climbs_to_max_without_false_plateaus() {
    struct AlwaysOk;

    #[async_trait]
    impl Task for AlwaysOk {
        async fn execute(&self, _iteration: u64) -> Outcome {
            Outcome::ok()
        }
    }

    let config = AdaptiveConfig {
        // Increment inside the tolerance band: the configuration the climb
        // is most easily misread as a plateau under.
        ramp_increment: 25.0,
        max_tps: 400.0,
        ..search_config()
    };
    let pattern = Arc::new(AdaptiveLoadPattern::new(config).unwrap());
    let engine = EngineBuilder::adaptive(Arc::new(AlwaysOk), Arc::clone(&pattern))
        .max_duration(Duration::from_secs(20))
        .build()
        .unwrap();
    engine.run().await.unwrap();

    let events = pattern.drain_events();
    let sustains: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            PatternEvent::PhaseTransition {
                to: Phase::Sustain,
                tps,
                ..
            } => Some(*tps),
            _ => None,
        })
        .collect();
    assert!(!sustains.is_empty(), "clean climb never reached max_tps");
    for tps in sustains {
        assert_eq!(tps, 400.0, "sustained below max on a clean climb");
    }
    assert_eq!(pattern.state().current_tps, 400.0);
}

/// Invariant 3: TPS stays inside [min_tps, max_tps] across the entire run,
/// observed at every state change.
#[tokio::test(start_paused = true)]
async fn adaptive_tps_stays_in_bounds() {
    struct Chaotic;

    #[async_trait]
    impl Task for Chaotic {
        async fn execute(&self, iteration: u64) -> Outcome {
            // Deterministic churn: fail in bursts.
            if (iteration / 97) % 3 == 0 {
                Outcome::failure(TaskError::other("burst"))
            } else {
                Outcome::ok()
            }
        }
    }

    let pattern = Arc::new(AdaptiveLoadPattern::new(search_config()).unwrap());
    let engine = EngineBuilder::adaptive(Arc::new(Chaotic), Arc::clone(&pattern))
        .max_duration(Duration::from_secs(15))
        .build()
        .unwrap();
    engine.run().await.unwrap();

    for event in pattern.drain_events() {
        let tps = match event {
            PatternEvent::TpsChange { to, .. } => to,
            PatternEvent::PhaseTransition { tps, .. } => tps,
            PatternEvent::StabilityDetected { tps, .. } => tps,
            PatternEvent::Recovery { tps, .. } => tps,
        };
        assert!(
            (10.0..=1000.0).contains(&tps),
            "tps {tps} escaped [min, max]"
        );
    }
}

/// The adaptive gauges are registered for the duration of the run and
/// unregistered afterwards.
#[tokio::test(start_paused = true)]
async fn adaptive_gauges_are_scoped_to_the_run() {
    struct Ok10;
    #[async_trait]
    impl Task for Ok10 {
        async fn execute(&self, _iteration: u64) -> Outcome {
            Outcome::ok()
        }
    }

    let pattern = Arc::new(AdaptiveLoadPattern::new(search_config()).unwrap());
    let engine = Arc::new(
        EngineBuilder::adaptive(Arc::new(Ok10), Arc::clone(&pattern))
            .max_duration(Duration::from_secs(3))
            .build()
            .unwrap(),
    );

    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run().await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    let gauges = engine.collector().gauge_values();
    assert!(gauges.iter().any(|(name, _)| *name == "adaptive.current_tps"));
    assert!(gauges.iter().any(|(name, _)| *name == "response.tps.total"));

    runner.await.unwrap().unwrap();
    assert!(engine.collector().gauge_values().is_empty());
}
