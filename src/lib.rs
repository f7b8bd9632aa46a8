//! # Bounded Worker Pool
//!
//! A bounded task-processing engine: a fixed set of worker threads draws tasks from a
//! shared bounded intake queue, runs them under a token-bucket rate limit and an
//! overall concurrency cap, and reports every outcome through a single result stream.
//! The pool can be drained or cancelled at any time without losing track of
//! in-flight work or leaking worker threads.
//!
//! ## Data Flow
//!
//! ```text
//! producer ─▶ TaskQueue ─▶ RateLimiter ─▶ AdmissionGate ─▶ worker ─▶ ResultAggregator ─▶ consumer
//! ```
//!
//! - **`TaskQueue`**: bounded FIFO; `submit` blocks when full, `try_submit` fails fast
//! - **`RateLimiter`**: token bucket, lazily refilled, no background thread
//! - **`AdmissionGate`**: counting semaphore; tickets are RAII permits
//! - **`WorkerPool`**: OS threads, each with its own current-thread tokio runtime
//! - **`ResultAggregator`**: fan-in channel; the stream ends after shutdown
//! - **Lifecycle**: `Initializing → Running → Draining → Stopped`
//!
//! One [`core::CancelToken`] threads through every blocking call, so a forced
//! shutdown (or a cancelled parent token) wakes all of them at once.
//!
//! ## Example
//!
//! ```rust,ignore
//! use bounded_worker_pool::config::PoolConfig;
//! use bounded_worker_pool::core::{handler_fn, ShutdownMode, Task, WorkerPool};
//!
//! let pool = WorkerPool::new(
//!     PoolConfig::new()
//!         .with_worker_count(2)
//!         .with_queue_capacity(5)
//!         .with_rate_limit(5.0, 1),
//!     handler_fn(|n: u32, _meta| Ok(n + 1)),
//! )?;
//!
//! let results = pool.results();
//! let consumer = std::thread::spawn(move || results.collect::<Vec<_>>());
//!
//! for n in 0..10 {
//!     pool.submit(Task::new(n))?;
//! }
//! let report = pool.shutdown(ShutdownMode::Graceful)?;
//! assert_eq!(consumer.join().unwrap().len(), 10);
//! std::process::exit(report.exit_code());
//! ```
//!
//! For complete examples, see `tests/worker_pool_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Configuration models for the worker pool.
pub mod config;
/// Core scheduling abstractions: cancellation, pacing, admission and the worker pool.
pub mod core;
/// Infrastructure adapters for task intake and result delivery.
pub mod infra;
/// Shared utilities.
pub mod util;
