//! The workload seam: tasks, outcomes, and execution modes.

use std::borrow::Cow;
use std::fmt;

use async_trait::async_trait;

use crate::error::BoxedError;

/// Result of one task invocation.
///
/// Failures are data, not control flow: a failing invocation is recorded
/// and the dispatch loop continues.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success { payload: Option<Vec<u8>> },
    Failure { error: TaskError },
}

impl Outcome {
    /// Success with no payload.
    pub fn ok() -> Self {
        Outcome::Success { payload: None }
    }

    pub fn failure(error: TaskError) -> Self {
        Outcome::Failure { error }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// Categorized task-level failure carried inside [`Outcome::Failure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    /// Coarse category ("timeout", "rejected", ...), used for reporting only.
    pub kind: Cow<'static, str>,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Catch-all category for errors without a better classification.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new("other", message)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskError {}

/// Worker scheduling policy, declared by the task at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Many cheap cooperative tasks multiplexed over few OS threads.
    /// The default; suitable for I/O-bound work.
    Lightweight,
    /// A fixed pool of OS threads, for CPU-bound work. The argument is the
    /// pool size; `BoundedBlocking(0)` sizes it to the CPU count.
    BoundedBlocking(usize),
}

impl ExecutionMode {
    pub(crate) fn thread_count(self) -> usize {
        match self {
            ExecutionMode::Lightweight => 0,
            ExecutionMode::BoundedBlocking(0) => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            ExecutionMode::BoundedBlocking(n) => n,
        }
    }
}

/// A unit of work whose single invocation is one transaction.
///
/// Lifecycle: `init` once before any invocation, `execute` many times
/// (concurrently in [`ExecutionMode::Lightweight`]), `teardown` once after
/// all invocations settle. Iteration numbers are assigned by the engine,
/// monotonic and gap-free from 0.
#[async_trait]
pub trait Task: Send + Sync {
    async fn init(&self) -> Result<(), BoxedError> {
        Ok(())
    }

    async fn execute(&self, iteration: u64) -> Outcome;

    async fn teardown(&self) -> Result<(), BoxedError> {
        Ok(())
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Lightweight
    }
}
