//! Token-bucket rate limiter.
//!
//! Tokens accrue at `rate` per second up to `burst`. Refill is computed lazily from
//! elapsed time on every request; there is no background ticker. Each blocking call
//! reserves one token up front, letting the bucket go into debt, and then sleeps
//! until its reservation matures. Reservations that are cancelled or would miss
//! their deadline are refunded.

use std::time::{Duration, Instant};

use crossbeam_channel::select;
use parking_lot::Mutex;

use crate::core::cancel::{deadline_signal, CancelToken};
use crate::core::PoolError;

/// Rate limiter gating admissions over time.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, rate: f64, burst: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = elapsed.mul_add(rate, self.tokens).min(burst);
        self.last_refill = now;
    }
}

impl RateLimiter {
    /// Create a limiter admitting `rate_per_sec` on average with bursts up to `burst`.
    ///
    /// A rate of zero (or any non-positive / non-finite rate) disables limiting.
    /// The bucket starts full.
    #[must_use]
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let rate = if rate_per_sec.is_finite() && rate_per_sec > 0.0 {
            rate_per_sec
        } else {
            0.0
        };
        let burst = f64::from(burst.max(1));
        Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// A limiter that never blocks.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(0.0, 1)
    }

    /// Whether limiting is disabled.
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.rate <= 0.0
    }

    /// Configured sustained rate in tokens per second (zero when unlimited).
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Configured burst ceiling.
    #[must_use]
    pub fn burst(&self) -> f64 {
        self.burst
    }

    /// Block until one token is available and consume it.
    ///
    /// # Errors
    ///
    /// - `PoolError::Cancelled` if `cancel` fires before the token matures
    /// - `PoolError::DeadlineExceeded` if the token cannot mature before `deadline`;
    ///   this is reported immediately instead of sleeping until the deadline
    pub fn allow(&self, cancel: &CancelToken, deadline: Option<Instant>) -> Result<(), PoolError> {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        if self.is_unlimited() {
            return Ok(());
        }

        let now = Instant::now();
        let wait = self.reserve(now);
        if wait.is_zero() {
            return Ok(());
        }
        // `None` when the reservation matures beyond any representable instant.
        let ready_at = now.checked_add(wait);
        if deadline.is_some_and(|d| ready_at.is_none_or(|r| r > d)) {
            self.refund();
            return Err(PoolError::DeadlineExceeded);
        }

        select! {
            recv(deadline_signal(ready_at)) -> _ => Ok(()),
            recv(cancel.signal()) -> _ => {
                self.refund();
                Err(PoolError::Cancelled)
            }
        }
    }

    /// Consume a token if one is available right now.
    pub fn try_allow(&self) -> bool {
        if self.is_unlimited() {
            return true;
        }
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now(), self.rate, self.burst);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently in the bucket; negative while reservations are pending.
    #[must_use]
    pub fn available(&self) -> f64 {
        if self.is_unlimited() {
            return f64::INFINITY;
        }
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now(), self.rate, self.burst);
        bucket.tokens
    }

    /// Take one token, returning how long until it is actually available.
    fn reserve(&self, now: Instant) -> Duration {
        let mut bucket = self.bucket.lock();
        bucket.refill(now, self.rate, self.burst);
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-bucket.tokens / self.rate).unwrap_or(Duration::MAX)
        }
    }

    fn refund(&self) {
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now(), self.rate, self.burst);
        bucket.tokens = (bucket.tokens + 1.0).min(self.burst);
    }
}
