//! Accounting pool: the byte quota of a peer's incoming queue.
//!
//! Only the accounting half of the original pool lives in the core —
//! allocation and mapping belong to the IO layer. Senders charge each
//! payload against the destination's quota at stage time and the charge is
//! released when the message is dequeued (or the transaction rolls back).
//! Exhaustion is a transient condition: the caller may retry once the
//! destination drains.

use std::sync::atomic::{AtomicUsize, Ordering};

use peerbus_error::{BusError, Result};

/// Byte-quota accounting for one peer.
#[derive(Debug)]
pub struct Pool {
    capacity: usize,
    charged: AtomicUsize,
}

impl Pool {
    /// Create a pool with the given byte quota.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            charged: AtomicUsize::new(0),
        }
    }

    /// Total quota in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently charged.
    #[must_use]
    pub fn charged(&self) -> usize {
        self.charged.load(Ordering::Acquire)
    }

    /// Charge `size` bytes against the quota.
    ///
    /// Fails with [`BusError::PoolExhausted`] when the quota has no room;
    /// the pool is unchanged in that case.
    pub fn charge(&self, size: usize) -> Result<()> {
        let mut used = self.charged.load(Ordering::Acquire);
        loop {
            let Some(next) = used.checked_add(size).filter(|&n| n <= self.capacity) else {
                return Err(BusError::PoolExhausted {
                    needed: size,
                    available: self.capacity.saturating_sub(used),
                });
            };
            match self.charged.compare_exchange_weak(
                used,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => used = actual,
            }
        }
    }

    /// Release a previous charge of `size` bytes.
    pub fn release(&self, size: usize) {
        let previous = self.charged.fetch_sub(size, Ordering::AcqRel);
        debug_assert!(previous >= size, "pool release exceeds charge");
    }

    /// Discharge everything; used at teardown. Returns the bytes released.
    pub(crate) fn drain(&self) -> usize {
        self.charged.swap(0, Ordering::AcqRel)
    }
}
