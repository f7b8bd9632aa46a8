//! Native implementation of `WorkerPool` using OS threads.
//!
//! # Design Principles
//!
//! - **No polling**: workers block in `select!` on the queue and the cancel signal
//! - **Lock-free accounting**: counters and worker states are atomics
//! - **Clean shutdown**: closing the queue unblocks idle workers once it drains;
//!   cancelling additionally turns queued work into `Cancelled` results

use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::core::lifecycle::Lifecycle;
use crate::core::{
    AdmissionGate, CancelToken, Failure, PoolError, PoolState, RateLimiter, ShutdownMode,
    ShutdownReport, Task, TaskHandler, TaskId, TaskResult,
};
use crate::infra::{ResultAggregator, ResultStream, TaskQueue};
use crate::util::now_ms;

use super::worker::{spawn_worker, WorkerContext};
use super::{PoolCounters, PoolHealth, PoolStats, WorkerState, WorkerStates};

/// Bounded pool of worker threads.
///
/// Submissions go through a bounded FIFO queue. Each worker takes one task at a
/// time, waits for the rate limiter and an admission ticket, runs the handler on
/// its own single-threaded tokio runtime and publishes exactly one [`TaskResult`].
///
/// Results must be consumed (see [`WorkerPool::results`]) while the pool runs:
/// publishing blocks once the result buffer is full, and a graceful shutdown waits
/// for every worker to publish.
pub struct WorkerPool<P, R, H>
where
    P: Send + 'static,
    R: Send + 'static,
    H: TaskHandler<P, R>,
{
    config: PoolConfig,
    queue: Arc<TaskQueue<P>>,
    gate: Arc<AdmissionGate>,
    aggregator: ResultAggregator<R>,
    cancel: CancelToken,
    counters: Arc<PoolCounters>,
    states: Arc<WorkerStates>,
    lifecycle: Arc<Lifecycle>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    _handler: PhantomData<H>,
}

impl<P, R, H> WorkerPool<P, R, H>
where
    P: Send + 'static,
    R: Send + 'static,
    H: TaskHandler<P, R>,
{
    /// Create a pool and spawn `config.worker_count` worker threads.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if the configuration is invalid
    /// - `PoolError::Internal` if a worker thread cannot be spawned
    pub fn new(config: PoolConfig, handler: H) -> Result<Self, PoolError> {
        Self::with_cancel(config, handler, &CancelToken::new())
    }

    /// Create a pool that shuts its intake and workers down when `parent` is
    /// cancelled.
    ///
    /// Cancelling `parent` behaves like the cancel half of a forced shutdown; call
    /// [`WorkerPool::shutdown`] afterwards to join the workers and close the results.
    ///
    /// # Errors
    ///
    /// Same as [`WorkerPool::new`].
    pub fn with_cancel(
        config: PoolConfig,
        handler: H,
        parent: &CancelToken,
    ) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let cancel = parent.child();
        let queue = Arc::new(TaskQueue::with_close_token(
            config.queue_capacity,
            cancel.child(),
        ));
        let limiter = Arc::new(RateLimiter::new(config.rate_per_sec, config.burst));
        let gate = Arc::new(AdmissionGate::new(config.admission_limit()));
        let aggregator = ResultAggregator::new(config.result_buffer());
        let counters = Arc::new(PoolCounters::default());
        let states = Arc::new(WorkerStates::new(config.worker_count));
        let lifecycle = Arc::new(Lifecycle::new());
        let sink = aggregator
            .sink()
            .ok_or_else(|| PoolError::Internal("result aggregator closed at startup".into()))?;

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let ctx = WorkerContext {
                queue: Arc::clone(&queue),
                limiter: Arc::clone(&limiter),
                gate: Arc::clone(&gate),
                sink: sink.clone(),
                cancel: cancel.clone(),
                counters: Arc::clone(&counters),
                states: Arc::clone(&states),
                lifecycle: Arc::clone(&lifecycle),
                task_timeout: config.task_timeout(),
            };
            match spawn_worker(worker_id, ctx, handler.clone(), config.thread_stack_size) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    error!(worker_id, error = %e, "Failed to spawn worker thread");
                    queue.close();
                    cancel.cancel();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(PoolError::Internal(format!(
                        "failed to spawn worker {worker_id}: {e}"
                    )));
                }
            }
        }

        info!(
            worker_count = config.worker_count,
            queue_capacity = config.queue_capacity,
            max_in_flight = config.admission_limit(),
            rate_per_sec = config.rate_per_sec,
            burst = config.burst,
            "WorkerPool initialized with dedicated OS threads"
        );

        Ok(Self {
            config,
            queue,
            gate,
            aggregator,
            cancel,
            counters,
            states,
            lifecycle,
            workers: Mutex::new(workers),
            _handler: PhantomData,
        })
    }

    /// Submit a task, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueClosed` once shutdown has begun
    /// - `PoolError::Cancelled` if the pool is cancelled while waiting
    pub fn submit(&self, task: Task<P>) -> Result<TaskId, PoolError> {
        self.submit_with(task, &CancelToken::new(), None)
    }

    /// Submit a task, blocking while the queue is full, until `cancel` fires or
    /// `deadline` passes.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueClosed` once shutdown has begun
    /// - `PoolError::Cancelled` if `cancel` fires while waiting for space
    /// - `PoolError::DeadlineExceeded` if `deadline` passes while waiting for space
    pub fn submit_with(
        &self,
        task: Task<P>,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<TaskId, PoolError> {
        self.enqueue(task, |queue, task| queue.submit(task, cancel, deadline))
    }

    /// Submit a task without blocking.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueFull` if the queue is at capacity
    /// - `PoolError::QueueClosed` once shutdown has begun
    pub fn try_submit(&self, task: Task<P>) -> Result<TaskId, PoolError> {
        self.enqueue(task, TaskQueue::try_submit)
    }

    fn enqueue<F>(&self, mut task: Task<P>, push: F) -> Result<TaskId, PoolError>
    where
        F: FnOnce(&TaskQueue<P>, Task<P>) -> Result<(), PoolError>,
    {
        let id = task.id.clone();
        let pushed = if self.lifecycle.accepts_work() {
            task.submitted_at_ms.get_or_insert_with(now_ms);
            push(&self.queue, task)
        } else {
            Err(PoolError::QueueClosed)
        };
        match pushed {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                debug!(task_id = %id, "Task submitted to worker pool");
                Ok(id)
            }
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(task_id = %id, error = %e, "Task submission rejected");
                Err(e)
            }
        }
    }

    /// Stream of results in completion order. Every call returns a handle on the
    /// same stream; the stream ends after shutdown once it is drained.
    #[must_use]
    pub fn results(&self) -> ResultStream<R> {
        self.aggregator.stream()
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(
            self.config.worker_count,
            self.lifecycle.state(),
            self.queue.len(),
        )
    }

    /// Worker liveness.
    #[must_use]
    pub fn health(&self) -> PoolHealth {
        PoolHealth {
            configured_workers: self.config.worker_count,
            active_workers: self.counters.active_workers.load(Ordering::Acquire),
            state: self.lifecycle.state(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.lifecycle.state()
    }

    /// What each worker is doing, indexed by worker id.
    #[must_use]
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.states.snapshot()
    }

    /// The pool's own cancellation token. Cancelling it stops intake and turns
    /// queued tasks into `Cancelled` results.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Configuration the pool was built with.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Stop the pool and wait for every worker to exit.
    ///
    /// `Graceful` processes everything already queued. `Forced` reports queued
    /// tasks as `Cancelled` results; handlers already running are still awaited.
    /// Safe to call concurrently and repeatedly: the first caller performs the
    /// shutdown, later callers wait for it and receive the same outcome.
    ///
    /// # Errors
    ///
    /// - `PoolError::TicketImbalance` or `PoolError::ReleaseWithoutAcquire` if the
    ///   admission accounting does not balance
    /// - `PoolError::Internal` if a worker thread panicked outside its handler
    ///
    /// The pool is stopped either way.
    pub fn shutdown(&self, mode: ShutdownMode) -> Result<ShutdownReport, PoolError> {
        if !self.lifecycle.claim_shutdown() {
            debug!(?mode, "Shutdown already in progress, waiting for it");
            return self.lifecycle.wait_stopped();
        }

        info!(?mode, queued = self.queue.len(), "Shutting down worker pool");
        self.queue.close();
        if mode == ShutdownMode::Forced {
            self.cancel.cancel();
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        let worker_count = workers.len();
        let mut panicked = 0_usize;
        for (worker_id, worker) in workers.into_iter().enumerate() {
            if worker.join().is_err() {
                error!(worker_id, "Worker thread panicked");
                panicked += 1;
            } else {
                debug!(worker_id, "Worker joined successfully");
            }
        }

        let stragglers = self.drain_unprocessed();
        self.aggregator.close();

        let report = self.counters.report(mode);
        let outcome = self.gate.check_balanced().and_then(|()| {
            if panicked == 0 {
                Ok(report)
            } else {
                Err(PoolError::Internal(format!(
                    "{panicked} of {worker_count} worker threads panicked"
                )))
            }
        });
        match &outcome {
            Ok(report) => info!(
                worker_count,
                stragglers,
                completed = report.completed,
                failed = report.failed,
                cancelled = report.cancelled,
                timed_out = report.timed_out,
                abandoned = report.abandoned,
                "Worker pool shut down complete"
            ),
            Err(e) => error!(
                error = %e,
                acquired = self.gate.acquired(),
                released = self.gate.released(),
                "Worker pool shut down with errors"
            ),
        }
        self.lifecycle.finish(outcome.clone());
        outcome
    }

    /// Tasks still queued after every worker exited (none started, or all lost).
    fn drain_unprocessed(&self) -> usize {
        let Some(sink) = self.aggregator.sink() else {
            return 0;
        };
        let mut drained = 0;
        while let Some(task) = self.queue.try_recv() {
            let outcome = Err(Failure::cancelled("no worker left to process the task"));
            self.counters.record::<R>(&outcome);
            self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
            if !sink.publish(TaskResult::new(task.id, outcome, None)) {
                warn!("Result dropped: no consumer left");
            }
            drained += 1;
        }
        drained
    }
}

impl<P, R, H> Drop for WorkerPool<P, R, H>
where
    P: Send + 'static,
    R: Send + 'static,
    H: TaskHandler<P, R>,
{
    fn drop(&mut self) {
        // Signal shutdown but don't join: workers finish their current task and exit.
        if self.lifecycle.claim_shutdown() {
            self.queue.close();
            self.cancel.cancel();
            self.aggregator.close();
            debug!("WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}
