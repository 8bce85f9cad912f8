//! Wait queues: "notify when a predicate may have changed".
//!
//! A [`WaitQueue`] pairs a mutex-protected generation counter with a condition
//! variable. Waiters re-check their predicate on every wakeup; wakers bump the
//! generation under the lock before notifying, so a predicate change that
//! races a waiter going to sleep is never lost.
//!
//! Blocking reads may be cancelled externally via a [`CancelToken`]; drain
//! waits are not cancellable and use the plain [`WaitQueue::wait_until`].

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use peerbus_error::{BusError, Result};

/// Condition-variable wait queue with lost-wakeup protection.
#[derive(Debug, Default)]
pub struct WaitQueue {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl WaitQueue {
    /// Create an empty wait queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake one waiter.
    pub fn wake_one(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        drop(generation);
        self.cond.notify_one();
    }

    /// Wake all waiters.
    pub fn wake_all(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        drop(generation);
        self.cond.notify_all();
    }

    /// Block until `pred` returns true.
    ///
    /// The predicate is evaluated under the queue's internal lock; any state
    /// change that can flip it must be followed by [`wake_one`](Self::wake_one)
    /// or [`wake_all`](Self::wake_all).
    pub fn wait_until(&self, mut pred: impl FnMut() -> bool) {
        let mut generation = self.generation.lock();
        while !pred() {
            self.cond.wait(&mut generation);
        }
    }

    /// Block until `pred` returns true or `token` is cancelled.
    ///
    /// Cancellation surfaces as [`BusError::Interrupted`]; the protected state
    /// is unchanged and the caller may retry with a fresh token.
    pub fn wait_until_cancellable(
        &self,
        token: &CancelToken,
        mut pred: impl FnMut() -> bool,
    ) -> Result<()> {
        let mut generation = self.generation.lock();
        loop {
            if pred() {
                return Ok(());
            }
            if token.is_cancelled() {
                return Err(BusError::Interrupted);
            }
            self.cond.wait(&mut generation);
        }
    }

    /// Cancel `token` and wake every waiter so the cancellation is observed.
    pub fn cancel(&self, token: &CancelToken) {
        token.cancel();
        self.wake_all();
    }
}

/// External cancellation flag for blocking waits.
///
/// Cancelling a token does not by itself wake sleeping waiters; use
/// [`WaitQueue::cancel`] (or call [`WaitQueue::wake_all`] after
/// [`CancelToken::cancel`]) so the flag is observed promptly.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the token cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the token was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
