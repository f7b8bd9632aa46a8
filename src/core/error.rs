//! Error types for pool operations.

use thiserror::Error;

/// Errors produced by the pool and its components.
///
/// Task-level failures are not errors of the pool; they travel inside
/// [`TaskResult`](crate::core::TaskResult) as a [`Failure`](crate::core::Failure).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The intake queue is at capacity (non-blocking submission only). Transient.
    #[error("task queue is full")]
    QueueFull,
    /// The intake queue no longer accepts submissions; the pool is shutting down.
    #[error("task queue is closed")]
    QueueClosed,
    /// A cooperative stop was observed at a suspension point.
    #[error("operation cancelled")]
    Cancelled,
    /// A local deadline expired while waiting.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Admission ticket accounting does not balance at shutdown.
    #[error("admission tickets out of balance: acquired {acquired}, released {released}")]
    TicketImbalance {
        /// Tickets handed out.
        acquired: u64,
        /// Tickets returned.
        released: u64,
    },
    /// A ticket was returned to the admission gate without a matching acquire.
    #[error("admission ticket released without a matching acquire")]
    ReleaseWithoutAcquire,
    /// Internal failure (thread spawn, disconnected channel).
    #[error("internal error: {0}")]
    Internal(String),
}

impl PoolError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::QueueFull)
    }

    /// Whether the error reports a broken internal invariant.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::TicketImbalance { .. } | Self::ReleaseWithoutAcquire
        )
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
