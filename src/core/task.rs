//! Tasks, task metadata and per-task results.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::PoolError;
use crate::util::clock::now_ms;

/// Unique task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a random identifier (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A unit of work submitted to the pool.
///
/// Ownership moves from the producer to the queue on submission, then to the worker
/// that dequeues it.
#[derive(Debug, Clone)]
pub struct Task<P> {
    /// Task identifier, echoed in the matching [`TaskResult`].
    pub id: TaskId,
    /// Opaque payload handed to the handler.
    pub payload: P,
    /// Submission timestamp in milliseconds since epoch; stamped on submit when unset.
    pub submitted_at_ms: Option<u128>,
    /// Per-task deadline overriding the pool default, measured from dequeue.
    pub timeout: Option<Duration>,
}

impl<P> Task<P> {
    /// Create a task with a generated identifier.
    pub fn new(payload: P) -> Self {
        Self::with_id(TaskId::new(), payload)
    }

    /// Create a task with a caller-chosen identifier.
    pub fn with_id(id: impl Into<TaskId>, payload: P) -> Self {
        Self {
            id: id.into(),
            payload,
            submitted_at_ms: None,
            timeout: None,
        }
    }

    /// Set a per-task deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Metadata passed to the handler alongside the payload.
#[derive(Debug, Clone)]
pub struct TaskMeta {
    /// Task identifier.
    pub id: TaskId,
    /// Submission timestamp in milliseconds since epoch.
    pub submitted_at_ms: Option<u128>,
    /// Worker executing the task.
    pub worker_id: usize,
    /// Absolute deadline for the task, if any.
    pub deadline: Option<Instant>,
}

impl TaskMeta {
    /// Time left before the deadline; `None` without a deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// Category of a task failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The handler reported a failure of the given application-defined kind.
    Handler(String),
    /// The handler panicked.
    Panic,
    /// The task was cancelled before or while waiting to run.
    Cancelled,
    /// The task's deadline expired.
    DeadlineExceeded,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(kind) => write!(f, "handler failure ({kind})"),
            Self::Panic => f.write_str("handler panic"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Failure descriptor carried by a failed [`TaskResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    /// What went wrong.
    pub kind: FailureKind,
    /// Human-readable detail.
    pub message: String,
}

impl Failure {
    /// Handler-reported failure with an application-defined kind.
    pub fn handler(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Handler(kind.into()),
            message: message.into(),
        }
    }

    /// Failure produced by a caught handler panic.
    pub fn panic(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Panic,
            message: message.into(),
        }
    }

    /// Failure for a task cancelled before it ran to completion.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: message.into(),
        }
    }

    /// Failure for a task whose deadline expired.
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::DeadlineExceeded,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Self::handler("error", format!("{err:#}"))
    }
}

impl From<PoolError> for Failure {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Cancelled => Self::cancelled("cancelled before the handler started"),
            PoolError::DeadlineExceeded => {
                Self::deadline_exceeded("deadline expired before the handler started")
            }
            other => Self::handler("pool", other.to_string()),
        }
    }
}

/// Outcome of processing one task. Produced exactly once per accepted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult<R> {
    /// Identifier of the task this result belongs to.
    pub id: TaskId,
    /// Handler value or failure descriptor.
    pub outcome: Result<R, Failure>,
    /// Completion timestamp in milliseconds since epoch.
    pub completed_at_ms: u128,
    /// Worker that produced the result; `None` if the task never reached one.
    pub worker_id: Option<usize>,
}

impl<R> TaskResult<R> {
    /// Build a result stamped with the current time.
    pub fn new(id: TaskId, outcome: Result<R, Failure>, worker_id: Option<usize>) -> Self {
        Self {
            id,
            outcome,
            completed_at_ms: now_ms(),
            worker_id,
        }
    }

    /// Whether the handler succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Success value, if any.
    pub fn value(&self) -> Option<&R> {
        self.outcome.as_ref().ok()
    }

    /// Failure descriptor, if any.
    pub fn failure(&self) -> Option<&Failure> {
        self.outcome.as_ref().err()
    }

    /// Consume the result, returning the outcome.
    pub fn into_outcome(self) -> Result<R, Failure> {
        self.outcome
    }
}
