//! Pool lifecycle state machine and shutdown coordination.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::core::PoolError;

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    /// Constructed; no worker has started yet.
    #[default]
    Initializing,
    /// At least one worker is running and submissions are accepted.
    Running,
    /// Submissions are refused; accepted work is finishing.
    Draining,
    /// All workers have exited and the result stream is closed.
    Stopped,
}

impl PoolState {
    /// Whether new submissions are admitted in this state.
    #[must_use]
    pub const fn accepts_work(self) -> bool {
        matches!(self, Self::Initializing | Self::Running)
    }
}

/// How `shutdown` treats work that has not started yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Stop intake, run every queued and in-flight task to completion.
    Graceful,
    /// Stop intake and cancel: queued tasks are reported as `Cancelled` results,
    /// in-flight handlers still run to completion.
    Forced,
}

/// Summary returned by a completed shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Mode requested by the caller that performed the shutdown.
    pub mode: ShutdownMode,
    /// Tasks whose handler succeeded.
    pub completed: u64,
    /// Tasks whose handler failed or panicked.
    pub failed: u64,
    /// Tasks reported as cancelled.
    pub cancelled: u64,
    /// Tasks whose deadline expired.
    pub timed_out: u64,
    /// Of the cancelled tasks, those whose handler never ran because the pool was
    /// cancelled (forced shutdown or a cancelled parent token).
    #[serde(default)]
    pub abandoned: u64,
}

impl ShutdownReport {
    /// Process exit code for a thin CLI wrapper.
    ///
    /// `0` every task succeeded, `1` one or more tasks failed, `2` cancellation
    /// abandoned accepted work before the drain completed. Code `2` does not depend
    /// on `mode`: a cancelled parent token followed by a graceful shutdown counts too.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.abandoned > 0 {
            2
        } else if self.failed + self.cancelled + self.timed_out > 0 {
            1
        } else {
            0
        }
    }

    /// Total number of results produced.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.completed + self.failed + self.cancelled + self.timed_out
    }
}

struct Inner {
    state: PoolState,
    shutdown_claimed: bool,
    outcome: Option<Result<ShutdownReport, PoolError>>,
}

/// Shared lifecycle controller. The first shutdown caller owns the drain; every other
/// caller parks on the condvar until the pool is stopped.
pub(crate) struct Lifecycle {
    inner: Mutex<Inner>,
    stopped: Condvar,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: PoolState::Initializing,
                shutdown_claimed: false,
                outcome: None,
            }),
            stopped: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> PoolState {
        self.inner.lock().state
    }

    pub(crate) fn accepts_work(&self) -> bool {
        self.state().accepts_work()
    }

    /// Initializing → Running. No effect in any other state.
    pub(crate) fn mark_running(&self) {
        let mut inner = self.inner.lock();
        if inner.state == PoolState::Initializing {
            inner.state = PoolState::Running;
        }
    }

    /// Initializing/Running → Draining. Returns whether this call made the transition.
    pub(crate) fn begin_drain(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.accepts_work() {
            inner.state = PoolState::Draining;
            true
        } else {
            false
        }
    }

    /// Claim the right to perform shutdown. Only the first caller gets `true`.
    pub(crate) fn claim_shutdown(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.shutdown_claimed {
            return false;
        }
        inner.shutdown_claimed = true;
        if inner.state.accepts_work() {
            inner.state = PoolState::Draining;
        }
        true
    }

    /// Record the shutdown outcome, move to Stopped and wake every waiter.
    pub(crate) fn finish(&self, outcome: Result<ShutdownReport, PoolError>) {
        let mut inner = self.inner.lock();
        inner.state = PoolState::Stopped;
        inner.outcome = Some(outcome);
        drop(inner);
        self.stopped.notify_all();
    }

    /// Block until the owning caller has finished, then return its outcome.
    pub(crate) fn wait_stopped(&self) -> Result<ShutdownReport, PoolError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(outcome) = inner.outcome.as_ref() {
                return outcome.clone();
            }
            self.stopped.wait(&mut inner);
        }
    }
}
