//! Admission gate: a counting semaphore bounding concurrent handler executions.
//!
//! The gate is a bounded crossbeam channel pre-loaded with `N` permits. Acquiring
//! receives a permit, releasing sends it back, so the outstanding count can never
//! leave `[0, N]`. Blocked acquirers are woken by crossbeam in unspecified order;
//! there is no strict FIFO hand-off.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::error;

use crate::core::cancel::{deadline_signal, CancelToken};
use crate::core::PoolError;

/// Bounded counting semaphore with cancellation and deadline support.
#[derive(Debug)]
pub struct AdmissionGate {
    capacity: usize,
    permits_tx: Sender<()>,
    permits_rx: Receiver<()>,
    acquired: AtomicU64,
    released: AtomicU64,
    misreleased: AtomicU64,
}

/// Admission ticket. Returned to the gate when dropped.
#[must_use = "dropping a permit immediately releases it"]
#[derive(Debug)]
pub struct Permit<'a> {
    gate: &'a AdmissionGate,
}

impl AdmissionGate {
    /// Create a gate with `capacity` permits. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (permits_tx, permits_rx) = bounded(capacity);
        for _ in 0..capacity {
            let _ = permits_tx.try_send(());
        }
        Self {
            capacity,
            permits_tx,
            permits_rx,
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            misreleased: AtomicU64::new(0),
        }
    }

    /// Block until a permit is available.
    ///
    /// # Errors
    ///
    /// - `PoolError::Cancelled` if `cancel` fires first (checked before waiting too)
    /// - `PoolError::DeadlineExceeded` if `deadline` passes first
    pub fn acquire(
        &self,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<Permit<'_>, PoolError> {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        if let Some(permit) = self.try_acquire() {
            return Ok(permit);
        }
        let timeout = deadline_signal(deadline);
        select! {
            recv(self.permits_rx) -> permit => match permit {
                Ok(()) => Ok(self.admit()),
                Err(_) => Err(PoolError::Internal("admission gate disconnected".into())),
            },
            recv(cancel.signal()) -> _ => Err(PoolError::Cancelled),
            recv(timeout) -> _ => Err(PoolError::DeadlineExceeded),
        }
    }

    /// Take a permit if one is immediately available.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        self.permits_rx.try_recv().ok().map(|()| self.admit())
    }

    /// Return a ticket previously detached with [`Permit::forget`].
    ///
    /// # Errors
    ///
    /// `PoolError::ReleaseWithoutAcquire` if every permit is already home.
    pub fn release(&self) -> Result<(), PoolError> {
        // Count first so `outstanding` never over-reports while the permit is in transit.
        self.released.fetch_add(1, Ordering::AcqRel);
        if self.permits_tx.try_send(()).is_ok() {
            Ok(())
        } else {
            self.released.fetch_sub(1, Ordering::AcqRel);
            self.misreleased.fetch_add(1, Ordering::AcqRel);
            error!(
                capacity = self.capacity,
                "admission ticket released without a matching acquire"
            );
            Err(PoolError::ReleaseWithoutAcquire)
        }
    }

    /// Configured number of permits.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits_rx.len()
    }

    /// Tickets handed out so far.
    #[must_use]
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Acquire)
    }

    /// Tickets returned so far.
    #[must_use]
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    /// Tickets currently held.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }

    /// Verify every acquired ticket has been released exactly once.
    ///
    /// # Errors
    ///
    /// - `PoolError::ReleaseWithoutAcquire` if a release ever found the gate full
    /// - `PoolError::TicketImbalance` if acquire and release counts differ
    pub fn check_balanced(&self) -> Result<(), PoolError> {
        if self.misreleased.load(Ordering::Acquire) > 0 {
            return Err(PoolError::ReleaseWithoutAcquire);
        }
        let (acquired, released) = (self.acquired(), self.released());
        if acquired == released {
            Ok(())
        } else {
            Err(PoolError::TicketImbalance { acquired, released })
        }
    }

    fn admit(&self) -> Permit<'_> {
        self.acquired.fetch_add(1, Ordering::AcqRel);
        Permit { gate: self }
    }
}

impl Permit<'_> {
    /// Detach the ticket without returning it; it must later be handed back with
    /// [`AdmissionGate::release`].
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.gate.release();
    }
}
