//! In-memory result aggregator: a bounded fan-in channel from every worker to the
//! consumers.

use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::core::cancel::{deadline_signal, CancelToken};
use crate::core::{PoolError, TaskResult};

/// Non-blocking view of the result stream.
#[derive(Debug)]
pub enum Collected<R> {
    /// A result was ready.
    Ready(TaskResult<R>),
    /// Nothing ready yet; more results may follow.
    Empty,
    /// The stream is closed and fully drained; no result will ever follow.
    Closed,
}

impl<R> Collected<R> {
    /// The result, if one was ready.
    pub fn into_result(self) -> Option<TaskResult<R>> {
        match self {
            Self::Ready(result) => Some(result),
            Self::Empty | Self::Closed => None,
        }
    }

    /// Whether the stream is finished.
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Owner of the fan-in channel. Hands out sinks to workers and streams to consumers.
pub struct ResultAggregator<R> {
    capacity: usize,
    tx: Mutex<Option<Sender<TaskResult<R>>>>,
    rx: Receiver<TaskResult<R>>,
}

impl<R> ResultAggregator<R> {
    /// Create an aggregator buffering up to `capacity` results (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            capacity,
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// A publishing handle; `None` once the aggregator is closed.
    pub fn sink(&self) -> Option<ResultSink<R>> {
        self.tx.lock().clone().map(|tx| ResultSink { tx })
    }

    /// A consumer handle. Every stream shares the same underlying results.
    pub fn stream(&self) -> ResultStream<R> {
        ResultStream {
            rx: self.rx.clone(),
        }
    }

    /// Drop the aggregator's own sender. The stream ends once every sink is gone and
    /// the buffer is drained. Idempotent.
    pub fn close(&self) {
        let tx = self.tx.lock().take();
        drop(tx);
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Configured buffer capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Worker-side publishing handle.
pub struct ResultSink<R> {
    tx: Sender<TaskResult<R>>,
}

impl<R> Clone for ResultSink<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<R> ResultSink<R> {
    /// Publish a result, blocking while the buffer is full.
    ///
    /// Results are never dropped while a consumer handle exists. Returns `false` only
    /// when every stream (and the aggregator) has been dropped.
    pub fn publish(&self, result: TaskResult<R>) -> bool {
        self.tx.send(result).is_ok()
    }
}

/// Consumer view of the results, in completion order.
///
/// Iterating blocks until the next result and ends when the stream is closed and
/// drained. Cloned streams share one queue: each result goes to exactly one reader.
pub struct ResultStream<R> {
    rx: Receiver<TaskResult<R>>,
}

impl<R> Clone for ResultStream<R> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<R> ResultStream<R> {
    /// Block for the next result; `None` once the stream is closed and drained.
    pub fn recv(&self) -> Option<TaskResult<R>> {
        self.rx.recv().ok()
    }

    /// Poll for a result without blocking.
    pub fn try_recv(&self) -> Collected<R> {
        match self.rx.try_recv() {
            Ok(result) => Collected::Ready(result),
            Err(TryRecvError::Empty) => Collected::Empty,
            Err(TryRecvError::Disconnected) => Collected::Closed,
        }
    }

    /// Wait up to `timeout` for a result.
    pub fn recv_timeout(&self, timeout: Duration) -> Collected<R> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Collected::Ready(result),
            Err(RecvTimeoutError::Timeout) => Collected::Empty,
            Err(RecvTimeoutError::Disconnected) => Collected::Closed,
        }
    }

    /// Block for the next result, honoring cancellation and a deadline.
    ///
    /// # Errors
    ///
    /// - `PoolError::Cancelled` if `cancel` fires first
    /// - `PoolError::DeadlineExceeded` if `deadline` passes first
    pub fn recv_with(
        &self,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<Option<TaskResult<R>>, PoolError> {
        let timeout = deadline_signal(deadline);
        select! {
            recv(self.rx) -> result => Ok(result.ok()),
            recv(cancel.signal()) -> _ => Err(PoolError::Cancelled),
            recv(timeout) -> _ => Err(PoolError::DeadlineExceeded),
        }
    }

    /// Results buffered right now.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is buffered right now.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<R> Iterator for ResultStream<R> {
    type Item = TaskResult<R>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}
