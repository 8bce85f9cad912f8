//! Active references: a lifecycle gate fused with a reference counter.
//!
//! One `AtomicI64` encodes the whole lifecycle. While an object is active the
//! counter is `>= 0` and tracks outstanding active references. Deactivation
//! adds a large negative bias, so the counter stays negative but keeps
//! counting; when it drops to exactly the bias, all references are gone and
//! exactly one draining thread moves it through the release state to drained,
//! running the release callback on the way. An object deactivated without
//! ever having been activated takes a separate release-direct sentinel, so
//! the releasing thread knows whether the object ever carried references.
//!
//! The pattern behaves like an asymmetric reader/writer lock: acquire is a
//! read-trylock, release a read-unlock, deactivate-plus-drain the exclusive
//! side.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::metrics;
use crate::waitq::WaitQueue;

// ---------------------------------------------------------------------------
// Counter bands
// ---------------------------------------------------------------------------

// All sentinels sit below any biased count. `i64::MIN` itself stays
// reserved: no stored value may be `i64::MIN`, so negating a live value
// cannot overflow.
const BIAS: i64 = i64::MIN + 5;
const RELEASE_DIRECT: i64 = BIAS - 1;
const RELEASE: i64 = BIAS - 2;
const DRAINED: i64 = BIAS - 3;
const NEW: i64 = BIAS - 4;

// ---------------------------------------------------------------------------
// Active
// ---------------------------------------------------------------------------

/// Active-reference lifecycle counter.
///
/// The initial state is new; no reference can be acquired until
/// [`activate`](Active::activate) succeeds. Teardown is deactivate, then
/// drain, then destroy.
#[derive(Debug)]
pub struct Active {
    count: AtomicI64,
}

impl Default for Active {
    fn default() -> Self {
        Self::new()
    }
}

impl Active {
    /// Create an object in the new state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            count: AtomicI64::new(NEW),
        }
    }

    /// Whether the object was never activated nor deactivated.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.count.load(Ordering::Acquire) == NEW
    }

    /// Whether the object is currently active.
    ///
    /// A point-in-time observation; the state may change as soon as this
    /// returns. It only serves as a barrier.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.count.load(Ordering::Acquire) >= 0
    }

    /// Whether the object was deactivated (the new state does not count).
    ///
    /// Once this returns true, it stays true.
    #[must_use]
    pub fn is_deactivated(&self) -> bool {
        let v = self.count.load(Ordering::Acquire);
        v > NEW && v < 0
    }

    /// Whether drain has completed.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.count.load(Ordering::Acquire) == DRAINED
    }

    /// Activate the object if it is still new.
    ///
    /// Returns true exactly once per object; false if it was already
    /// activated (or already deactivated).
    pub fn activate(&self) -> bool {
        self.count
            .compare_exchange(NEW, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Try to acquire an active reference.
    ///
    /// Fails if the object is not active. On success the returned handle
    /// releases the reference on drop, waking a drain waiter if it was the
    /// last one.
    #[must_use]
    pub fn acquire<'a>(&'a self, waitq: &'a WaitQueue) -> Option<ActiveRef<'a>> {
        if self.add_unless_negative(1) {
            Some(ActiveRef {
                active: self,
                waitq,
            })
        } else {
            None
        }
    }

    /// Deactivate the object, if not already done by someone else.
    ///
    /// Once this returns, no new active references can be acquired. A second
    /// concurrent deactivate is a no-op.
    pub fn deactivate(&self) {
        let previous = self.count.compare_exchange(
            NEW,
            RELEASE_DIRECT,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if previous.is_err() {
            self.add_unless_negative(BIAS);
        }
        tracing::debug!(target: "peerbus_core::active", "deactivated");
    }

    /// Wait for all active references to drop, then release once.
    ///
    /// The caller must guarantee that [`deactivate`](Active::deactivate)
    /// returned before. The first thread to move the counter into the release
    /// state runs `release` and publishes the drained state; every other
    /// concurrent caller sleeps on `waitq` until that happens. Safe to call
    /// from any number of threads in parallel; once the first returns, the
    /// drain is fully finished.
    ///
    /// Returns true on the thread that performed the release.
    pub fn drain(&self, waitq: &WaitQueue, release: impl FnOnce()) -> bool {
        if !self.is_deactivated() {
            tracing::error!(
                target: "peerbus_core::active",
                count = self.count.load(Ordering::Acquire),
                "drain called before deactivate"
            );
            return false;
        }

        // Wait until all active references were dropped.
        waitq.wait_until(|| self.count.load(Ordering::Acquire) <= BIAS);

        // Mark the object as releasing; the winner of exactly one of these
        // two exchanges runs the callback.
        let won = self
            .count
            .compare_exchange(
                RELEASE_DIRECT,
                RELEASE,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
            || self
                .count
                .compare_exchange(BIAS, RELEASE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();

        if won {
            release();
            self.count.store(DRAINED, Ordering::Release);
            metrics::record_drain();
            tracing::debug!(target: "peerbus_core::active", "drained");
            waitq.wake_all();
        } else {
            waitq.wait_until(|| self.count.load(Ordering::Acquire) == DRAINED);
        }

        won
    }

    /// Assert the object finished its lifecycle.
    ///
    /// A no-op apart from sanity checks: the object must have been
    /// deactivated and drained before destruction.
    pub fn destroy(&self) {
        let count = self.count.load(Ordering::Acquire);
        if count != DRAINED {
            tracing::error!(
                target: "peerbus_core::active",
                count,
                "active object destroyed without drain"
            );
            debug_assert_eq!(count, DRAINED, "active object destroyed without drain");
        }
    }

    /// Decrement the reference count, waking drain waiters when the last
    /// biased reference drops.
    pub(crate) fn release(&self, waitq: &WaitQueue) {
        if self.count.fetch_sub(1, Ordering::AcqRel) - 1 == BIAS {
            waitq.wake_all();
        }
    }

    /// Atomically add `add` to the counter, but only while it is
    /// non-negative.
    fn add_unless_negative(&self, add: i64) -> bool {
        let mut v = self.count.load(Ordering::Acquire);
        while v >= 0 {
            match self.count.compare_exchange_weak(
                v,
                v + add,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => v = actual,
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// ActiveRef
// ---------------------------------------------------------------------------

/// An acquired active reference.
///
/// Releases on drop. Holding one guarantees the owning object's release
/// callback has not run and cannot run until the handle is dropped.
#[derive(Debug)]
pub struct ActiveRef<'a> {
    active: &'a Active,
    waitq: &'a WaitQueue,
}

impl Drop for ActiveRef<'_> {
    fn drop(&mut self) {
        self.active.release(self.waitq);
    }
}
