//! Worker pool with dedicated worker threads.
//!
//! Each worker is an OS thread driving its own single-threaded tokio runtime, so
//! async handlers never block the caller's runtime. Tasks flow through the bounded
//! intake queue, the rate limiter and the admission gate before reaching the handler;
//! results are published to a shared aggregator in completion order.
//!
//! # Example
//!
//! ```rust,ignore
//! use bounded_worker_pool::config::PoolConfig;
//! use bounded_worker_pool::core::{handler_fn, ShutdownMode, Task, WorkerPool};
//!
//! let pool = WorkerPool::new(
//!     PoolConfig::new().with_worker_count(4).with_queue_capacity(64),
//!     handler_fn(|n: u64, _meta| Ok(n * 2)),
//! )?;
//! let results = pool.results();
//! for n in 0..10 {
//!     pool.submit(Task::new(n))?;
//! }
//! let report = pool.shutdown(ShutdownMode::Graceful)?;
//! assert_eq!(results.count(), 10);
//! ```

mod native;
mod worker;

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::{Failure, FailureKind, PoolState, ShutdownMode, ShutdownReport};

pub use native::WorkerPool;

/// Statistics about pool utilization and outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Configured number of worker threads.
    pub worker_count: usize,
    /// Worker threads currently alive.
    pub active_workers: usize,
    /// Lifecycle state at the time of the snapshot.
    pub state: PoolState,
    /// Tasks accepted into the queue.
    pub submitted: u64,
    /// Submissions refused (full, closed, cancelled or timed out).
    pub rejected: u64,
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Handlers currently executing.
    pub in_flight: u64,
    /// Tasks whose handler succeeded.
    pub completed: u64,
    /// Tasks whose handler failed or panicked.
    pub failed: u64,
    /// Tasks reported as cancelled.
    pub cancelled: u64,
    /// Tasks whose deadline expired.
    pub timed_out: u64,
}

impl PoolStats {
    /// Results produced so far.
    #[must_use]
    pub const fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled + self.timed_out
    }
}

/// Liveness summary of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolHealth {
    /// Worker threads the pool was configured with.
    pub configured_workers: usize,
    /// Worker threads currently alive.
    pub active_workers: usize,
    /// Lifecycle state.
    pub state: PoolState,
}

impl PoolHealth {
    /// A running pool that lost workers. Workers are not respawned.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.state == PoolState::Running && self.active_workers < self.configured_workers
    }
}

/// What a worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerState {
    /// Waiting for a task.
    Idle = 0,
    /// Waiting on the rate limiter or the admission gate.
    Admitting = 1,
    /// Running the handler.
    Processing = 2,
    /// Handing the result to the aggregator.
    Publishing = 3,
    /// The thread has exited.
    Exited = 4,
}

impl WorkerState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Admitting,
            2 => Self::Processing,
            3 => Self::Publishing,
            _ => Self::Exited,
        }
    }
}

/// Per-worker state slots.
#[derive(Debug)]
pub(crate) struct WorkerStates(Box<[AtomicU8]>);

impl WorkerStates {
    pub(crate) fn new(worker_count: usize) -> Self {
        Self(
            (0..worker_count)
                .map(|_| AtomicU8::new(WorkerState::Idle as u8))
                .collect(),
        )
    }

    pub(crate) fn set(&self, worker_id: usize, state: WorkerState) {
        if let Some(slot) = self.0.get(worker_id) {
            slot.store(state as u8, Ordering::Release);
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<WorkerState> {
        self.0
            .iter()
            .map(|slot| WorkerState::from_u8(slot.load(Ordering::Acquire)))
            .collect()
    }
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub submitted: AtomicU64,
    pub rejected: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
    pub timed_out: AtomicU64,
    /// Cancelled tasks whose handler never ran.
    pub abandoned: AtomicU64,
    pub in_flight: AtomicU64,
    pub active_workers: AtomicUsize,
}

impl PoolCounters {
    /// Count one finished task by outcome.
    pub(crate) fn record<R>(&self, outcome: &Result<R, Failure>) {
        let counter = match outcome {
            Ok(_) => &self.completed,
            Err(failure) => match failure.kind {
                FailureKind::Cancelled => &self.cancelled,
                FailureKind::DeadlineExceeded => &self.timed_out,
                FailureKind::Handler(_) | FailureKind::Panic => &self.failed,
            },
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics.
    pub(crate) fn snapshot(&self, worker_count: usize, state: PoolState, queued: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_workers: self.active_workers.load(Ordering::Relaxed),
            state,
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            queued,
            in_flight: self.in_flight.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn report(&self, mode: ShutdownMode) -> ShutdownReport {
        ShutdownReport {
            mode,
            completed: self.completed.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            cancelled: self.cancelled.load(Ordering::Acquire),
            timed_out: self.timed_out.load(Ordering::Acquire),
            abandoned: self.abandoned.load(Ordering::Acquire),
        }
    }
}
