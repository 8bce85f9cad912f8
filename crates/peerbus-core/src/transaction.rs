//! Multicast transactions: stage on every destination, then commit.
//!
//! A transaction delivers one logical message to a set of destination
//! queues. Staging links an odd-stamped entry into each destination while
//! tracking the highest stamp seen; the commit stamp is then allocated from
//! the sender's clock above that high-water and every entry is re-linked at
//! it. Staged entries are invisible to readers, so a racing reader never
//! observes a partially delivered multicast, and any mid-protocol failure
//! rolls every staged entry back before the error surfaces.
//!
//! Destinations are pinned through their active references for the whole
//! transaction; queue locks are taken one at a time, never nested.

use std::sync::Arc;

use peerbus_error::Result;
use peerbus_types::{NodeKind, Payload, PeerTag, Stamp};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::metrics;
use crate::node::QueueNode;
use crate::peer::{Peer, PeerGuard};

/// An in-flight multicast delivery.
///
/// Build with [`new`](Transaction::new), add destinations with
/// [`stage`](Transaction::stage), finish with [`commit`](Transaction::commit).
/// Dropping an uncommitted transaction rolls back every staged entry.
pub struct Transaction<'a> {
    origin: PeerGuard<'a>,
    kind: NodeKind,
    payload: Payload,
    /// Highest stamp observed: starts at the sender's clock, raised by every
    /// staging stamp returned.
    high_water: Stamp,
    entries: SmallVec<[TxnEntry<'a>; 4]>,
    committed: bool,
}

struct TxnEntry<'a> {
    guard: PeerGuard<'a>,
    node: Arc<QueueNode>,
}

impl<'a> Transaction<'a> {
    /// Begin a transaction on behalf of `origin`.
    ///
    /// Fails if the sender is not connected or shutting down. The sender is
    /// pinned until the transaction ends.
    pub fn new(origin: &'a Peer, kind: NodeKind, payload: Payload) -> Result<Self> {
        let guard = origin.try_acquire()?;
        let high_water = guard.queue().lock().clock();
        Ok(Self {
            origin: guard,
            kind,
            payload,
            high_water,
            entries: SmallVec::new(),
            committed: false,
        })
    }

    /// The sending peer's tag.
    #[must_use]
    pub fn sender(&self) -> PeerTag {
        self.origin.tag()
    }

    /// Number of destinations staged so far.
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.entries.len()
    }

    /// Stage the message on `dest`.
    ///
    /// Pins the destination, charges its pool, and links a staging entry.
    /// On failure the transaction is left consistent; dropping it rolls back
    /// the destinations staged so far.
    pub fn stage(&mut self, dest: &'a Peer) -> Result<()> {
        let guard = dest.try_acquire()?;
        guard.pool().charge(self.payload.len())?;

        let node = Arc::new(QueueNode::new(
            self.kind,
            self.origin.tag(),
            self.payload.clone(),
        ));
        let staged = match guard.queue().lock().stage(&node, self.high_water) {
            Ok(ts) => ts,
            Err(err) => {
                guard.pool().release(self.payload.len());
                return Err(err);
            }
        };
        self.high_water = self.high_water.max(staged);
        trace!(
            target: "peerbus_core::transaction",
            sender = %self.origin.tag(),
            dest = %guard.tag(),
            staged = %staged,
            "destination staged"
        );
        self.entries.push(TxnEntry { guard, node });
        Ok(())
    }

    /// Commit the message on every staged destination.
    ///
    /// Allocates the commit stamp from the sender's clock (above the staging
    /// high-water), re-links every entry at it, and wakes destinations whose
    /// queue became readable. Returns the commit stamp.
    pub fn commit(mut self) -> Result<Stamp> {
        let commit = self
            .origin
            .queue()
            .lock()
            .allocate_commit(self.high_water);

        for entry in &self.entries {
            entry
                .guard
                .queue()
                .lock()
                .commit_staged(entry.guard.waitq(), &entry.node, commit)?;
        }

        self.committed = true;
        debug!(
            target: "peerbus_core::transaction",
            sender = %self.origin.tag(),
            destinations = self.entries.len(),
            commit = %commit,
            "multicast committed"
        );
        Ok(commit)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut rolled_back = 0_usize;
        for entry in &self.entries {
            if entry.node.is_queued() && entry.node.is_staging() {
                entry
                    .guard
                    .queue()
                    .lock()
                    .remove(entry.guard.waitq(), &entry.node);
                entry.guard.pool().release(entry.node.payload().len());
                rolled_back += 1;
            }
        }
        if rolled_back > 0 {
            metrics::record_aborted();
            debug!(
                target: "peerbus_core::transaction",
                sender = %self.origin.tag(),
                rolled_back,
                "transaction aborted"
            );
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("sender", &self.origin.tag())
            .field("high_water", &self.high_water)
            .field("staged", &self.entries.len())
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}
