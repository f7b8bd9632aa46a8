//! Core scheduling abstractions: cancellation, pacing, admission and the worker pool.

pub mod admission;
pub mod cancel;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod rate_limiter;
pub mod task;
pub mod worker_pool;

pub use admission::{AdmissionGate, Permit};
pub use cancel::CancelToken;
pub use error::{AppResult, PoolError};
pub use handler::{handler_fn, FnHandler, TaskHandler};
pub use lifecycle::{PoolState, ShutdownMode, ShutdownReport};
pub use rate_limiter::RateLimiter;
pub use task::{Failure, FailureKind, Task, TaskId, TaskMeta, TaskResult};
pub use worker_pool::{PoolHealth, PoolStats, WorkerPool, WorkerState};
