//! Task handler abstraction.

use async_trait::async_trait;

use super::{Failure, TaskMeta};

/// Abstraction for processing a task payload and producing a result.
///
/// The handler is cloned into every worker thread. Each worker drives it on its own
/// single-threaded tokio runtime, so `handle` may await freely without blocking
/// the caller's runtime. Returning `Err` yields a failed
/// [`TaskResult`](crate::core::TaskResult) for this task only; panics are caught
/// and reported the same way.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use bounded_worker_pool::core::{Failure, TaskHandler, TaskMeta};
///
/// #[derive(Clone)]
/// struct Resize;
///
/// #[async_trait]
/// impl TaskHandler<Vec<u8>, usize> for Resize {
///     async fn handle(&self, image: Vec<u8>, _meta: TaskMeta) -> Result<usize, Failure> {
///         if image.is_empty() {
///             return Err(Failure::handler("invalid_input", "empty image"));
///         }
///         Ok(image.len() / 2)
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler<P, R>: Send + Sync + Clone + 'static
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Process one payload.
    ///
    /// Cancellation is cooperative: the pool never interrupts a running call, but a
    /// per-task deadline drops the future at its next await point.
    async fn handle(&self, payload: P, meta: TaskMeta) -> Result<R, Failure>;
}

/// Handler backed by a synchronous closure. Built with [`handler_fn`].
#[derive(Clone)]
pub struct FnHandler<F> {
    f: F,
}

/// Wrap a closure as a [`TaskHandler`].
pub const fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler { f }
}

#[async_trait]
impl<P, R, F> TaskHandler<P, R> for FnHandler<F>
where
    P: Send + 'static,
    R: Send + 'static,
    F: Fn(P, TaskMeta) -> Result<R, Failure> + Send + Sync + Clone + 'static,
{
    async fn handle(&self, payload: P, meta: TaskMeta) -> Result<R, Failure> {
        (self.f)(payload, meta)
    }
}
