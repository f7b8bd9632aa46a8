//! Worker thread body.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::runtime::Runtime;
use tracing::{debug, error, warn};

use crate::core::lifecycle::Lifecycle;
use crate::core::{
    AdmissionGate, CancelToken, Failure, PoolError, RateLimiter, Task, TaskHandler, TaskMeta,
    TaskResult,
};
use crate::infra::{Dequeued, ResultSink, TaskQueue};

use super::{PoolCounters, WorkerState, WorkerStates};

/// Everything a worker shares with the pool.
pub(super) struct WorkerContext<P, R> {
    pub queue: Arc<TaskQueue<P>>,
    pub limiter: Arc<RateLimiter>,
    pub gate: Arc<AdmissionGate>,
    pub sink: ResultSink<R>,
    pub cancel: CancelToken,
    pub counters: Arc<PoolCounters>,
    pub states: Arc<WorkerStates>,
    pub lifecycle: Arc<Lifecycle>,
    pub task_timeout: Option<Duration>,
}

/// Spawn a worker thread.
pub(super) fn spawn_worker<P, R, H>(
    worker_id: usize,
    ctx: WorkerContext<P, R>,
    handler: H,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>>
where
    P: Send + 'static,
    R: Send + 'static,
    H: TaskHandler<P, R>,
{
    thread::Builder::new()
        .name(format!("wp-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || ctx.run(worker_id, &handler))
}

impl<P, R> WorkerContext<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    fn run<H: TaskHandler<P, R>>(&self, worker_id: usize, handler: &H) {
        self.counters.active_workers.fetch_add(1, Ordering::AcqRel);
        let _exit = ExitGuard {
            worker_id,
            states: &self.states,
            counters: &self.counters,
        };
        self.lifecycle.mark_running();
        debug!(worker_id, "Worker thread started");

        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!(worker_id, error = %e, "Failed to create worker runtime");
                return;
            }
        };

        loop {
            self.states.set(worker_id, WorkerState::Idle);
            let task = match self.queue.recv(&self.cancel) {
                Dequeued::Task(task) => task,
                Dequeued::Closed => {
                    debug!(worker_id, "Queue closed and drained, exiting");
                    break;
                }
                Dequeued::Cancelled => {
                    self.drain_cancelled(worker_id);
                    break;
                }
            };

            let id = task.id.clone();
            let outcome = self.process(worker_id, task, &rt, handler);
            self.states.set(worker_id, WorkerState::Publishing);
            self.publish(TaskResult::new(id, outcome, Some(worker_id)));
        }
    }

    /// Rate limit, admit, run. Cancellation is only observed between these steps.
    fn process<H: TaskHandler<P, R>>(
        &self,
        worker_id: usize,
        task: Task<P>,
        rt: &Runtime,
        handler: &H,
    ) -> Result<R, Failure> {
        let Task {
            id,
            payload,
            submitted_at_ms,
            timeout,
        } = task;
        // A timeout past the representable range means no deadline.
        let deadline = timeout
            .or(self.task_timeout)
            .and_then(|t| Instant::now().checked_add(t));

        self.states.set(worker_id, WorkerState::Admitting);
        let admitted = self
            .limiter
            .allow(&self.cancel, deadline)
            .and_then(|()| self.gate.acquire(&self.cancel, deadline));
        let permit = match admitted {
            Ok(permit) => permit,
            Err(e) => {
                if e == PoolError::Cancelled {
                    self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                }
                return Err(e.into());
            }
        };

        self.states.set(worker_id, WorkerState::Processing);
        self.counters.in_flight.fetch_add(1, Ordering::AcqRel);
        debug!(worker_id, task_id = %id, "Worker executing task");

        let meta = TaskMeta {
            id,
            submitted_at_ms,
            worker_id,
            deadline,
        };
        let outcome = rt.block_on(invoke(handler, payload, meta));

        self.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
        drop(permit);
        outcome
    }

    fn publish(&self, result: TaskResult<R>) {
        self.counters.record(&result.outcome);
        match &result.outcome {
            Ok(_) => debug!(task_id = %result.id, worker_id = ?result.worker_id, "Task completed"),
            Err(failure) => warn!(
                task_id = %result.id,
                worker_id = ?result.worker_id,
                failure = %failure,
                "Task failed"
            ),
        }
        if !self.sink.publish(result) {
            warn!("Result dropped: no consumer left");
        }
    }

    /// Report everything still queued as cancelled.
    fn drain_cancelled(&self, worker_id: usize) {
        self.lifecycle.begin_drain();
        let mut drained = 0_usize;
        while let Some(task) = self.queue.try_recv() {
            self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
            self.publish(TaskResult::new(
                task.id,
                Err(Failure::cancelled("pool cancelled before the task was dequeued")),
                None,
            ));
            drained += 1;
        }
        debug!(worker_id, drained, "Worker observed cancellation, exiting");
    }

}

/// Marks the worker exited on every path out of `run`, unwinding included.
struct ExitGuard<'a> {
    worker_id: usize,
    states: &'a WorkerStates,
    counters: &'a PoolCounters,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.states.set(self.worker_id, WorkerState::Exited);
        self.counters.active_workers.fetch_sub(1, Ordering::AcqRel);
        if thread::panicking() {
            error!(worker_id = self.worker_id, "Worker thread panicked outside the handler");
        } else {
            debug!(worker_id = self.worker_id, "Worker thread exiting");
        }
    }
}

/// Run the handler, turning panics and deadline expiry into failures.
async fn invoke<P, R, H>(handler: &H, payload: P, meta: TaskMeta) -> Result<R, Failure>
where
    P: Send + 'static,
    R: Send + 'static,
    H: TaskHandler<P, R>,
{
    let deadline = meta.deadline;
    // Build the future inside the guarded block so a panic before the first await is caught too.
    let call = AssertUnwindSafe(async move { handler.handle(payload, meta).await }).catch_unwind();
    let joined = match deadline {
        Some(deadline) => {
            match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), call).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(Failure::deadline_exceeded(
                        "handler did not finish before the task deadline",
                    ));
                }
            }
        }
        None => call.await,
    };
    joined.unwrap_or_else(|panic| Err(Failure::panic(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_owned())
}
