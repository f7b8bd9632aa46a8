//! Bounded in-memory FIFO intake queue.
//!
//! Backed by a `crossbeam_channel::bounded` channel, so a capacity of zero gives a
//! synchronous hand-off: a submission completes only when a worker takes it.
//! Ordering is FIFO at the channel; once several workers compete for the head no
//! cross-worker ordering is promised.
//!
//! Every send holds a read lock on the sender slot and `close` takes it for writing,
//! so once `close` returns no submission is still in flight: whatever was accepted
//! is already in the buffer and visible to `try_recv`.

use std::time::Instant;

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::{RwLock, RwLockReadGuard};

use crate::core::cancel::{deadline_signal, CancelToken};
use crate::core::{PoolError, Task};

/// Outcome of a worker-side dequeue.
#[derive(Debug)]
pub enum Dequeued<P> {
    /// The next task.
    Task(Task<P>),
    /// The queue is closed and fully drained.
    Closed,
    /// The caller's token was cancelled while waiting.
    Cancelled,
}

/// Bounded intake queue decoupling producers from workers.
pub struct TaskQueue<P> {
    capacity: usize,
    /// Dropped on close so workers observe disconnection once the buffer drains.
    tx: RwLock<Option<Sender<Task<P>>>>,
    rx: Receiver<Task<P>>,
    closed: CancelToken,
}

impl<P> TaskQueue<P> {
    /// Create a queue holding at most `capacity` tasks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_close_token(capacity, CancelToken::new())
    }

    /// Create a queue whose closed state is driven by `closed`.
    ///
    /// Passing a child of a pool-wide token closes the queue for submissions as soon
    /// as the pool is cancelled.
    #[must_use]
    pub fn with_close_token(capacity: usize, closed: CancelToken) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            capacity,
            tx: RwLock::new(Some(tx)),
            rx,
            closed,
        }
    }

    /// Enqueue a task, blocking while the buffer is full.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueClosed` if the queue is (or becomes) closed
    /// - `PoolError::Cancelled` if `cancel` fires while waiting for space
    /// - `PoolError::DeadlineExceeded` if `deadline` passes while waiting for space
    pub fn submit(
        &self,
        task: Task<P>,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<(), PoolError> {
        let slot = self.sender()?;
        let Some(tx) = slot.as_ref() else {
            return Err(PoolError::QueueClosed);
        };
        if cancel.is_cancelled() {
            return Err(self.cancelled_error());
        }
        let timeout = deadline_signal(deadline);
        select! {
            send(tx, task) -> res => res.map_err(|_| PoolError::QueueClosed),
            recv(self.closed.signal()) -> _ => Err(PoolError::QueueClosed),
            recv(cancel.signal()) -> _ => Err(self.cancelled_error()),
            recv(timeout) -> _ => Err(PoolError::DeadlineExceeded),
        }
    }

    /// Enqueue a task without blocking.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueFull` if the buffer is at capacity
    /// - `PoolError::QueueClosed` if the queue is closed
    pub fn try_submit(&self, task: Task<P>) -> Result<(), PoolError> {
        let slot = self.sender()?;
        let Some(tx) = slot.as_ref() else {
            return Err(PoolError::QueueClosed);
        };
        tx.try_send(task).map_err(|err| match err {
            TrySendError::Full(_) => PoolError::QueueFull,
            TrySendError::Disconnected(_) => PoolError::QueueClosed,
        })
    }

    /// Stop accepting submissions. Queued tasks remain available to workers.
    /// Idempotent.
    ///
    /// Blocked submitters are woken first; the call returns once every in-flight
    /// send has either landed in the buffer or failed.
    pub fn close(&self) {
        self.closed.cancel();
        let tx = self.tx.write().take();
        drop(tx);
    }

    /// Whether submissions are refused.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Block for the next task (worker side).
    pub fn recv(&self, cancel: &CancelToken) -> Dequeued<P> {
        select! {
            recv(self.rx) -> task => task.map_or(Dequeued::Closed, Dequeued::Task),
            recv(cancel.signal()) -> _ => Dequeued::Cancelled,
        }
    }

    /// Take the next task if one is buffered.
    pub fn try_recv(&self) -> Option<Task<P>> {
        self.rx.try_recv().ok()
    }

    /// Tasks currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no task is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Read access to the sender slot. Held for the whole send.
    fn sender(&self) -> Result<RwLockReadGuard<'_, Option<Sender<Task<P>>>>, PoolError> {
        let slot = self.tx.read();
        if self.is_closed() {
            return Err(PoolError::QueueClosed);
        }
        Ok(slot)
    }

    /// A pool-wide cancel also closes the queue; report the close in that case.
    fn cancelled_error(&self) -> PoolError {
        if self.is_closed() {
            PoolError::QueueClosed
        } else {
            PoolError::Cancelled
        }
    }
}
