//! Built-in tasks and the duration grammar.
//!
//! Task ids:
//! - `noop` — returns success immediately
//! - `sleep:<dur>` — sleeps, then succeeds (an I/O-bound stand-in)
//! - `flaky:<dur>:<p>` — sleeps, then fails with probability `p` (seeded,
//!   deterministic per iteration)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use vajrapulse_core::{Outcome, Task, TaskError};

/// Parse `<integer>(ms|s|m|h)`; a bare integer means seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{input}'"))?;
    match unit {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3_600)),
        other => Err(format!("unknown duration unit '{other}' in '{input}'")),
    }
}

struct NoopTask;

#[async_trait]
impl Task for NoopTask {
    async fn execute(&self, _iteration: u64) -> Outcome {
        Outcome::ok()
    }
}

struct SleepTask {
    delay: Duration,
}

#[async_trait]
impl Task for SleepTask {
    async fn execute(&self, _iteration: u64) -> Outcome {
        tokio::time::sleep(self.delay).await;
        Outcome::ok()
    }
}

struct FlakyTask {
    delay: Duration,
    failure_probability: f64,
    seed: u64,
}

#[async_trait]
impl Task for FlakyTask {
    async fn execute(&self, iteration: u64) -> Outcome {
        tokio::time::sleep(self.delay).await;
        // Seeded per iteration: reruns with the same seed reproduce the
        // same failure sequence.
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ iteration);
        if rng.random::<f64>() < self.failure_probability {
            Outcome::failure(TaskError::new("injected", "flaky task failure"))
        } else {
            Outcome::ok()
        }
    }
}

/// Resolve a task id into a runnable task.
pub fn build(spec: &str, seed: u64) -> Result<Arc<dyn Task>, String> {
    let mut parts = spec.split(':');
    match parts.next() {
        Some("noop") => Ok(Arc::new(NoopTask)),
        Some("sleep") => {
            let delay = parse_duration(parts.next().ok_or("sleep task needs a duration, e.g. sleep:10ms")?)?;
            Ok(Arc::new(SleepTask { delay }))
        }
        Some("flaky") => {
            let delay = parse_duration(parts.next().ok_or("flaky task needs a duration, e.g. flaky:10ms:0.1")?)?;
            let failure_probability: f64 = parts
                .next()
                .ok_or("flaky task needs a failure probability, e.g. flaky:10ms:0.1")?
                .parse()
                .map_err(|_| "failure probability must be a number in [0, 1]".to_string())?;
            if !(0.0..=1.0).contains(&failure_probability) {
                return Err("failure probability must be in [0, 1]".to_string());
            }
            Ok(Arc::new(FlakyTask {
                delay,
                failure_probability,
                seed,
            }))
        }
        _ => Err(format!(
            "unknown task '{spec}' (expected noop, sleep:<dur> or flaky:<dur>:<p>)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_grammar() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3_600)));
        // Bare integer means seconds.
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
    }

    #[test]
    fn test_duration_grammar_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("1.5s").is_err());
    }

    #[test]
    fn test_build_known_tasks() {
        assert!(build("noop", 0).is_ok());
        assert!(build("sleep:10ms", 0).is_ok());
        assert!(build("flaky:5ms:0.25", 0).is_ok());
    }

    #[test]
    fn test_build_rejects_bad_specs() {
        assert!(build("warp", 0).is_err());
        assert!(build("sleep", 0).is_err());
        assert!(build("flaky:5ms", 0).is_err());
        assert!(build("flaky:5ms:1.5", 0).is_err());
    }

    #[tokio::test]
    async fn test_flaky_task_is_deterministic_per_seed() {
        let task = FlakyTask {
            delay: Duration::ZERO,
            failure_probability: 0.5,
            seed: 7,
        };
        let first: Vec<bool> = futures_outcomes(&task).await;
        let second: Vec<bool> = futures_outcomes(&task).await;
        assert_eq!(first, second);
        assert!(first.iter().any(|v| *v) && first.iter().any(|v| !*v));
    }

    async fn futures_outcomes(task: &FlakyTask) -> Vec<bool> {
        let mut outcomes = Vec::new();
        for iteration in 0..64 {
            outcomes.push(task.execute(iteration).await.is_success());
        }
        outcomes
    }
}
