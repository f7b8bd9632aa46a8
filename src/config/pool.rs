//! Worker pool configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Prefix shared by every environment variable read in [`PoolConfig::from_env`].
pub const ENV_PREFIX: &str = "WORKER_POOL_";

const DEFAULT_QUEUE_CAPACITY: usize = 256;
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
const MIN_STACK_SIZE: usize = 64 * 1024;

/// Pool configuration. Immutable once handed to a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Intake queue capacity. Zero means synchronous hand-off.
    pub queue_capacity: usize,
    /// Concurrent handler executions allowed. Defaults to `worker_count`.
    pub max_in_flight: Option<usize>,
    /// Sustained admissions per second. Zero disables rate limiting.
    pub rate_per_sec: f64,
    /// Token bucket burst ceiling.
    pub burst: u32,
    /// Default per-task deadline in milliseconds, measured from dequeue.
    pub task_timeout_ms: Option<u64>,
    /// Result buffer size. Defaults to `worker_count + queue_capacity`.
    pub result_capacity: Option<usize>,
    /// Stack size of each worker thread in bytes.
    pub thread_stack_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_in_flight: None,
            rate_per_sec: 0.0,
            burst: 1,
            task_timeout_ms: None,
            result_capacity: None,
            thread_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl PoolConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the intake queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Cap concurrent handler executions independently of the worker count.
    #[must_use]
    pub const fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight);
        self
    }

    /// Enable rate limiting.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_per_sec: f64, burst: u32) -> Self {
        self.rate_per_sec = rate_per_sec;
        self.burst = burst;
        self
    }

    /// Set the default per-task deadline.
    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set the result buffer size.
    #[must_use]
    pub const fn with_result_capacity(mut self, result_capacity: usize) -> Self {
        self.result_capacity = Some(result_capacity);
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, thread_stack_size: usize) -> Self {
        self.thread_stack_size = thread_stack_size;
        self
    }

    /// Effective admission gate capacity.
    #[must_use]
    pub fn admission_limit(&self) -> usize {
        self.max_in_flight.unwrap_or(self.worker_count)
    }

    /// Effective result buffer size.
    #[must_use]
    pub fn result_buffer(&self) -> usize {
        self.result_capacity
            .unwrap_or_else(|| self.worker_count.saturating_add(self.queue_capacity))
    }

    /// Default per-task deadline as a duration.
    #[must_use]
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.burst == 0 {
            return Err("burst must be greater than 0".into());
        }
        if !self.rate_per_sec.is_finite() || self.rate_per_sec < 0.0 {
            return Err(format!(
                "rate_per_sec must be a finite non-negative number, got {}",
                self.rate_per_sec
            ));
        }
        if self.rate_per_sec > 0.0 && Duration::try_from_secs_f64(1.0 / self.rate_per_sec).is_err() {
            return Err(format!(
                "rate_per_sec {} is too small: one token would never mature",
                self.rate_per_sec
            ));
        }
        if self.max_in_flight == Some(0) {
            return Err("max_in_flight must be greater than 0".into());
        }
        if self.task_timeout_ms == Some(0) {
            return Err("task_timeout_ms must be greater than 0".into());
        }
        if self.result_buffer() < self.worker_count {
            return Err(format!(
                "result_capacity ({}) must be at least worker_count ({})",
                self.result_buffer(),
                self.worker_count
            ));
        }
        if self.thread_stack_size < MIN_STACK_SIZE {
            return Err(format!(
                "thread_stack_size must be at least {MIN_STACK_SIZE} bytes"
            ));
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields take
    /// their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build a configuration from `WORKER_POOL_*` environment variables, loading a
    /// `.env` file first when one exists. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Fails when a variable cannot be parsed or the result does not validate.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        if let Some(v) = env_var("WORKER_COUNT")? {
            cfg.worker_count = v;
        }
        if let Some(v) = env_var("QUEUE_CAPACITY")? {
            cfg.queue_capacity = v;
        }
        if let Some(v) = env_var("MAX_IN_FLIGHT")? {
            cfg.max_in_flight = Some(v);
        }
        if let Some(v) = env_var("RATE_PER_SEC")? {
            cfg.rate_per_sec = v;
        }
        if let Some(v) = env_var("BURST")? {
            cfg.burst = v;
        }
        if let Some(v) = env_var("TASK_TIMEOUT_MS")? {
            cfg.task_timeout_ms = Some(v);
        }
        if let Some(v) = env_var("RESULT_CAPACITY")? {
            cfg.result_capacity = Some(v);
        }
        if let Some(v) = env_var("THREAD_STACK_SIZE")? {
            cfg.thread_stack_size = v;
        }
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}

fn env_var<T>(suffix: &str) -> AppResult<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let key = format!("{ENV_PREFIX}{suffix}");
    match env::var(&key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("unreadable {key}")),
    }
}
