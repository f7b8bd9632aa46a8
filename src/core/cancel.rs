//! Cooperative cancellation shared by every blocking call in the pool.
//!
//! A [`CancelToken`] is a cheap, cloneable handle. Cancelling it flips an atomic flag
//! and disconnects a crossbeam channel, so any thread parked in a `select!` on
//! [`CancelToken::signal`] wakes up immediately. Child tokens are cancelled together
//! with their parent, never the other way round.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{at, bounded, never, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

/// Handle used to request a cooperative stop.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    state: Mutex<State>,
    /// Never receives a message; becomes disconnected once `trigger` is dropped.
    signal: Receiver<()>,
}

struct State {
    trigger: Option<Sender<()>>,
    children: Vec<Weak<Inner>>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (trigger, signal) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                state: Mutex::new(State {
                    trigger: Some(trigger),
                    children: Vec::new(),
                }),
                signal,
            }),
        }
    }

    /// Create a token that is cancelled whenever `self` is.
    ///
    /// Cancelling the child does not affect the parent. A child of an already
    /// cancelled token starts out cancelled.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        let mut state = self.inner.state.lock();
        if state.trigger.is_none() {
            drop(state);
            child.cancel();
            return child;
        }
        state.children.retain(|c| c.strong_count() > 0);
        state.children.push(Arc::downgrade(&child.inner));
        child
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Receiver that becomes ready (disconnected) once the token is cancelled.
    ///
    /// Intended for `crossbeam_channel::select!` next to the operation being waited on.
    #[must_use]
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }

    /// Block until the token is cancelled.
    pub fn wait(&self) {
        let _ = self.inner.signal.recv();
    }

    /// Block until the token is cancelled or `timeout` elapses.
    ///
    /// Returns `true` if the token was cancelled.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.inner.signal.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}

impl Inner {
    fn cancel(&self) {
        let (trigger, children) = {
            let mut state = self.state.lock();
            let Some(trigger) = state.trigger.take() else {
                return;
            };
            self.cancelled.store(true, Ordering::Release);
            (trigger, std::mem::take(&mut state.children))
        };
        drop(trigger);
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Receiver that fires at `deadline`, or never when there is none.
pub(crate) fn deadline_signal(deadline: Option<Instant>) -> Receiver<Instant> {
    deadline.map_or_else(never, at)
}
