//! Deferred reclamation for queue nodes.
//!
//! A safe wrapper around `crossbeam-epoch` pin/unpin. The queue's published
//! front cache is read lock-free; when the queue lock holder removes a node,
//! it retires the index's strong reference through [`ReclaimGuard::defer_retire`]
//! instead of dropping it inline, so the node outlives every reader pinned
//! while the removal happened. Retirement defers owned values only — no raw
//! pointers cross this boundary.

use crossbeam_epoch as epoch;

use crate::metrics;

/// Scoped epoch pin.
///
/// Readers of the front cache hold one across the read; writers hold one
/// around retirements. Dropping the guard unpins the thread.
pub struct ReclaimGuard {
    guard: epoch::Guard,
}

/// Pin the current thread into the reclamation epoch.
#[must_use]
pub fn pin() -> ReclaimGuard {
    ReclaimGuard {
        guard: epoch::pin(),
    }
}

impl ReclaimGuard {
    /// Defer dropping `retired` until all currently pinned readers unpin.
    pub fn defer_retire<T: Send + 'static>(&self, retired: T) {
        metrics::record_retired();
        self.guard.defer(move || drop(retired));
    }

    /// Push deferred retirements toward execution.
    ///
    /// Execution still depends on epoch advancement and active readers.
    pub fn flush(&self) {
        self.guard.flush();
    }
}

impl std::fmt::Debug for ReclaimGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReclaimGuard").finish_non_exhaustive()
    }
}
