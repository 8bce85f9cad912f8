//! Per-peer message queues ordered by distributed Lamport clocks.
//!
//! A queue is an ordered index of nodes keyed by `(stamp, sender)` plus a
//! local clock. Multicast delivery stays consistent across queues without any
//! global lock: a transaction first links a *staging* entry (odd stamp) into
//! every destination, then re-links each entry with a single *commit* stamp
//! (even) chosen above every staging stamp it observed. An entry can only be
//! dequeued once it is committed and no staging entry is ordered ahead of it,
//! so two racing multicasts block each other exactly until their mutual order
//! is decided.
//!
//! The queue caches its front entry in a single packed word published with
//! release semantics; readers poll it lock-free under a reclamation pin while
//! the lock holder republishes it on every mutation. The cache is non-zero
//! exactly when the leftmost entry is committed: a staging entry ordered
//! earlier would itself be leftmost, so "leftmost entry has an even stamp" is
//! the whole readiness condition.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use peerbus_error::{BusError, Result};
use peerbus_types::{NodeKind, PeerTag, Stamp, unpack_stamp_kind};
use tracing::{debug, error, trace, warn};

use crate::metrics;
use crate::node::QueueNode;
use crate::reclaim;
use crate::waitq::WaitQueue;

// ---------------------------------------------------------------------------
// OrderKey
// ---------------------------------------------------------------------------

/// Index key: stamp first, sender second, insertion serial last.
///
/// The serial only separates two staged entries from one sender that collide
/// on the same odd stamp; committed entries never tie on `(stamp, sender)`
/// because the final stamp is allocated from the sender's own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    stamp: Stamp,
    sender: PeerTag,
    serial: u64,
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct QueueIndex {
    clock: Stamp,
    next_serial: u64,
    entries: BTreeMap<OrderKey, Arc<QueueNode>>,
}

/// A peer's message queue.
///
/// All mutation happens through [`QueueGuard`], obtained via
/// [`lock`](Queue::lock). [`is_readable`](Queue::is_readable) is the only
/// lock-free entry point and backs the poll surface.
#[derive(Debug)]
pub struct Queue {
    index: Mutex<QueueIndex>,
    /// Packed stamp/kind word of the front entry; zero when no entry is
    /// ready. Written by the lock holder with release semantics.
    front: AtomicU64,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    /// Create an empty queue with clock zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            index: Mutex::new(QueueIndex {
                clock: Stamp::ZERO,
                next_serial: 0,
                entries: BTreeMap::new(),
            }),
            front: AtomicU64::new(0),
        }
    }

    /// Lock the queue for mutation or consistent inspection.
    #[must_use]
    pub fn lock(&self) -> QueueGuard<'_> {
        QueueGuard {
            queue: self,
            index: self.index.lock(),
        }
    }

    /// Lock-free readability check.
    ///
    /// True when at least one entry is committed and unblocked. The
    /// reclamation pin pairs with the deferred retirement of removed nodes:
    /// whatever the published word was read from stays allocated until this
    /// reader unpins.
    #[must_use]
    pub fn is_readable(&self) -> bool {
        let _pin = reclaim::pin();
        self.front.load(Ordering::Acquire) != 0
    }

    /// Lock-free snapshot of the front entry's stable fields, if any.
    #[must_use]
    pub fn front_snapshot(&self) -> Option<(Stamp, NodeKind)> {
        let _pin = reclaim::pin();
        let word = self.front.load(Ordering::Acquire);
        if word == 0 {
            return None;
        }
        unpack_stamp_kind(word)
    }
}

// ---------------------------------------------------------------------------
// Peeked
// ---------------------------------------------------------------------------

/// Result of [`QueueGuard::peek`].
#[derive(Debug)]
pub struct Peeked {
    /// The front entry, ready to be dequeued.
    pub node: Arc<QueueNode>,
    /// Whether the queue holds further entries beyond the returned one.
    pub more: bool,
}

// ---------------------------------------------------------------------------
// QueueGuard
// ---------------------------------------------------------------------------

/// Exclusive access to a locked queue.
pub struct QueueGuard<'a> {
    queue: &'a Queue,
    index: MutexGuard<'a, QueueIndex>,
}

impl QueueGuard<'_> {
    /// Current clock value.
    #[must_use]
    pub fn clock(&self) -> Stamp {
        self.index.clock
    }

    /// Number of linked entries, staged and committed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.entries.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.entries.is_empty()
    }

    /// Advance the clock by a full interval and return the new even value.
    ///
    /// Both the returned value and its odd staging twin are uniquely
    /// allocated to the caller.
    pub fn tick(&mut self) -> Stamp {
        self.index.clock = self.index.clock.next_even();
        self.index.clock
    }

    /// Fast-forward the clock to `stamp` if it is ahead.
    ///
    /// `stamp` must be even.
    pub fn sync(&mut self, stamp: Stamp) -> Result<Stamp> {
        if stamp.is_staging() {
            return Err(BusError::InvalidStamp {
                stamp: stamp.get(),
                expected: "even stamp to sync on",
            });
        }
        self.index.clock = self.index.clock.max(stamp);
        Ok(self.index.clock)
    }

    /// Allocate a commit stamp above both `staged_max` and the local clock.
    ///
    /// The clock is fast-forwarded to the returned value, so the stamp is
    /// uniquely this sender's; equal commit stamps can only come from
    /// distinct senders.
    pub fn allocate_commit(&mut self, staged_max: Stamp) -> Stamp {
        let candidate = staged_max.commit_successor();
        let local = self.index.clock.next_even();
        self.index.clock = candidate.max(local);
        self.index.clock
    }

    /// Link `node` as a staging entry.
    ///
    /// The staging stamp is the next odd value at or above both the local
    /// clock and `ts_in`; the clock fast-forwards to it. The front cache may
    /// invalidate if the entry sorts ahead of the current front.
    pub fn stage(&mut self, node: &Arc<QueueNode>, ts_in: Stamp) -> Result<Stamp> {
        if node.is_queued() {
            error!(
                target: "peerbus_core::queue",
                sender = %node.sender(),
                "stage of a node that is already linked"
            );
            return Err(BusError::fault("staged node is already linked in a queue"));
        }

        let ts_out = self.index.clock.max(ts_in).to_staging();
        self.index.clock = ts_out;
        node.set_stamp(ts_out);
        self.link(node);
        self.publish_front();
        metrics::record_staged();
        trace!(
            target: "peerbus_core::queue",
            sender = %node.sender(),
            stamp = %ts_out,
            "staged"
        );
        Ok(ts_out)
    }

    /// Re-link a staged entry at its commit stamp.
    ///
    /// `node` must be staged in this queue and `commit` must be an even stamp
    /// at or above the staging stamp. Wakes one waiter on `waitq` if the
    /// queue transitioned from unreadable to readable.
    ///
    /// Returns whether the queue became readable.
    pub fn commit_staged(
        &mut self,
        waitq: &WaitQueue,
        node: &Arc<QueueNode>,
        commit: Stamp,
    ) -> Result<bool> {
        if !commit.is_committed() {
            return Err(BusError::InvalidStamp {
                stamp: commit.get(),
                expected: "even commit stamp",
            });
        }
        let staged = node.stamp();
        if !node.is_queued() || !staged.is_staging() {
            error!(
                target: "peerbus_core::queue",
                sender = %node.sender(),
                stamp = %staged,
                "commit of a node that is not staged"
            );
            return Err(BusError::fault("commit of a node that is not staged"));
        }
        if commit < staged {
            return Err(BusError::InvalidStamp {
                stamp: commit.get(),
                expected: "commit stamp at or above the staging stamp",
            });
        }

        let key = Self::key_for(node);
        let Some(entry) = self.index.entries.remove(&key) else {
            error!(
                target: "peerbus_core::queue",
                sender = %node.sender(),
                stamp = %staged,
                "staged node is linked in another queue"
            );
            return Err(BusError::fault("staged node is linked in another queue"));
        };

        if commit < self.index.clock {
            // A racing transaction fast-forwarded this clock past our commit
            // stamp; its own commit stamp is strictly higher, so order holds.
            warn!(
                target: "peerbus_core::queue",
                clock = %self.index.clock,
                commit = %commit,
                "commit stamp behind fast-forwarded clock"
            );
        }
        self.index.clock = self.index.clock.max(commit);
        node.set_stamp(commit);
        self.index.entries.insert(Self::key_for(node), entry);

        let became_readable = self.publish_front();
        if became_readable {
            metrics::record_front_wake();
            waitq.wake_one();
        }
        metrics::record_committed();
        trace!(
            target: "peerbus_core::queue",
            sender = %node.sender(),
            staged = %staged,
            commit = %commit,
            became_readable,
            "committed"
        );
        Ok(became_readable)
    }

    /// Link `node` directly as a committed entry (single-destination path).
    ///
    /// Allocates the stamp from the local clock; same wake policy as
    /// [`commit_staged`](Self::commit_staged).
    pub fn commit_unstaged(&mut self, waitq: &WaitQueue, node: &Arc<QueueNode>) -> Result<Stamp> {
        if node.is_queued() {
            error!(
                target: "peerbus_core::queue",
                sender = %node.sender(),
                "unstaged commit of a node that is already linked"
            );
            return Err(BusError::fault(
                "unstaged commit of a node that is already linked",
            ));
        }

        let ts = self.tick();
        node.set_stamp(ts);
        self.link(node);
        if self.publish_front() {
            metrics::record_front_wake();
            waitq.wake_one();
        }
        metrics::record_committed();
        trace!(
            target: "peerbus_core::queue",
            sender = %node.sender(),
            stamp = %ts,
            "committed unstaged"
        );
        Ok(ts)
    }

    /// Unlink `node`, staged or committed; a no-op if it is not linked.
    ///
    /// Returns whether a previously unreadable queue became readable —
    /// removing a blocking staging entry can expose a committed follower —
    /// in which case one waiter on `waitq` is woken.
    pub fn remove(&mut self, waitq: &WaitQueue, node: &Arc<QueueNode>) -> bool {
        if !node.is_queued() {
            return false;
        }
        let key = Self::key_for(node);
        let Some(entry) = self.index.entries.remove(&key) else {
            debug_assert!(false, "remove of a node linked in another queue");
            return false;
        };
        node.set_queued(false);

        let became_readable = self.publish_front();
        if became_readable {
            metrics::record_front_wake();
            waitq.wake_one();
        }

        // Retire the index's strong reference: a lock-free reader pinned
        // while this entry backed the front cache must outlive it.
        let guard = reclaim::pin();
        guard.defer_retire(entry);
        guard.flush();
        became_readable
    }

    /// The front entry, if one is ready to be dequeued.
    #[must_use]
    pub fn peek(&self) -> Option<Peeked> {
        let (_, node) = self.index.entries.first_key_value()?;
        if !node.stamp().is_committed() {
            return None;
        }
        Some(Peeked {
            node: Arc::clone(node),
            more: self.index.entries.len() > 1,
        })
    }

    /// Unlink every entry and hand them to the caller for disposal.
    ///
    /// The clock is unaffected. The caller disposes the returned nodes
    /// outside the lock.
    pub fn flush(&mut self) -> Vec<Arc<QueueNode>> {
        let entries = std::mem::take(&mut self.index.entries);
        let mut drained = Vec::with_capacity(entries.len());
        for (_, node) in entries {
            node.set_queued(false);
            drained.push(node);
        }
        self.publish_front();
        if !drained.is_empty() {
            debug!(
                target: "peerbus_core::queue",
                count = drained.len(),
                "queue flushed"
            );
        }
        drained
    }

    fn key_for(node: &QueueNode) -> OrderKey {
        OrderKey {
            stamp: node.stamp(),
            sender: node.sender(),
            serial: node.order_serial(),
        }
    }

    fn link(&mut self, node: &Arc<QueueNode>) {
        let serial = self.index.next_serial;
        self.index.next_serial += 1;
        node.set_order_serial(serial);
        node.set_queued(true);
        let evicted = self.index.entries.insert(Self::key_for(node), Arc::clone(node));
        debug_assert!(evicted.is_none(), "order key collision on link");
    }

    /// Recompute and publish the front cache.
    ///
    /// Returns whether the queue transitioned from unreadable to readable.
    fn publish_front(&mut self) -> bool {
        let word = match self.index.entries.first_key_value() {
            Some((_, node)) if node.stamp().is_committed() => node.packed_word(),
            _ => 0,
        };
        let previous = self.queue.front.swap(word, Ordering::AcqRel);
        previous == 0 && word != 0
    }
}

impl std::fmt::Debug for QueueGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueGuard")
            .field("clock", &self.index.clock)
            .field("len", &self.index.entries.len())
            .finish_non_exhaustive()
    }
}
