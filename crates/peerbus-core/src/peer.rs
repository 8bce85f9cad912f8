//! Peers: the acquire/release surface the IO layer consumes.
//!
//! A peer owns an [`Active`] lifecycle gate, a wait queue, and — behind a
//! shared-observable slot — its [`PeerInfo`] (queue plus pool). External
//! callers must acquire an active reference before touching the info; the
//! [`PeerGuard`] handle enforces that pairing. Disconnect deactivates and
//! drains: the release callback takes the info out, flushes the queue into a
//! disposal list, and tears the pool down, after which all waiters are woken
//! so blocked readers observe the shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use peerbus_error::{BusError, Result};
use peerbus_types::{ConnectParams, NodeKind, Payload, PeerTag, Stamp};
use smallvec::SmallVec;
use tracing::debug;

use crate::active::{Active, ActiveRef};
use crate::node::QueueNode;
use crate::pool::Pool;
use crate::queue::Queue;
use crate::transaction::Transaction;
use crate::waitq::{CancelToken, WaitQueue};

/// Process-wide tag allocator. The original derives tags from stable object
/// addresses; an increasing counter gives the same uniqueness explicitly.
static NEXT_PEER_TAG: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// PeerInfo
// ---------------------------------------------------------------------------

/// The dereferenced half of a peer: its queue and pool.
///
/// Only reachable through a [`PeerGuard`], i.e. while an active reference is
/// held.
#[derive(Debug)]
pub struct PeerInfo {
    queue: Queue,
    pool: Pool,
}

impl PeerInfo {
    /// The peer's message queue.
    #[must_use]
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// The peer's accounting pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

/// A bus peer.
#[derive(Debug)]
pub struct Peer {
    tag: PeerTag,
    active: Active,
    waitq: WaitQueue,
    info: RwLock<Option<Arc<PeerInfo>>>,
}

impl Default for Peer {
    fn default() -> Self {
        Self::new()
    }
}

impl Peer {
    /// Create a disconnected peer with a freshly allocated tag.
    #[must_use]
    pub fn new() -> Self {
        let raw = NEXT_PEER_TAG.fetch_add(1, Ordering::Relaxed);
        let tag = PeerTag::new(raw).expect("peer tag counter starts at 1 and only grows");
        Self::with_tag(tag)
    }

    /// Create a disconnected peer with a caller-assigned tag.
    ///
    /// The caller is responsible for tag uniqueness across the bus.
    #[must_use]
    pub fn with_tag(tag: PeerTag) -> Self {
        Self {
            tag,
            active: Active::new(),
            waitq: WaitQueue::new(),
            info: RwLock::new(None),
        }
    }

    /// The peer's tag.
    #[must_use]
    pub fn tag(&self) -> PeerTag {
        self.tag
    }

    /// The peer's wait queue, signaled on readability and disconnect.
    #[must_use]
    pub fn waitq(&self) -> &WaitQueue {
        &self.waitq
    }

    /// Connect the peer: install its queue and pool, then activate.
    ///
    /// The first call transitions the peer from new to active; a second call
    /// reports [`BusError::AlreadyConnected`], and connecting after a
    /// disconnect reports [`BusError::ShuttingDown`].
    pub fn connect(&self, params: ConnectParams) -> Result<()> {
        if params.pool_capacity == 0 {
            return Err(BusError::InvalidArgument {
                what: "pool capacity must be non-zero".into(),
            });
        }

        let mut slot = self.info.write();
        if self.active.is_active() {
            return Err(BusError::AlreadyConnected);
        }
        if !self.active.is_new() {
            return Err(BusError::ShuttingDown);
        }
        debug_assert!(slot.is_none(), "new peer already carries info");
        *slot = Some(Arc::new(PeerInfo {
            queue: Queue::new(),
            pool: Pool::new(params.pool_capacity),
        }));
        if !self.active.activate() {
            // Deactivate won the race between the state check and here.
            *slot = None;
            return Err(BusError::ShuttingDown);
        }
        debug!(
            target: "peerbus_core::peer",
            tag = %self.tag,
            pool_capacity = params.pool_capacity,
            "peer connected"
        );
        Ok(())
    }

    /// Disconnect the peer: deactivate, then drain.
    ///
    /// Idempotent and safe to call from multiple threads; blocks until every
    /// outstanding active reference is released. The queue is flushed and the
    /// pool discharged by whichever caller performs the release. All waiters
    /// are woken so blocked readers observe the shutdown.
    ///
    /// Returns true on the caller that performed the release.
    pub fn disconnect(&self) -> bool {
        self.active.deactivate();
        let released = self.active.drain(&self.waitq, || {
            let info = self.info.write().take();
            if let Some(info) = info {
                let flushed = info.queue.lock().flush();
                let discharged = info.pool.drain();
                debug!(
                    target: "peerbus_core::peer",
                    tag = %self.tag,
                    flushed = flushed.len(),
                    discharged,
                    "peer released"
                );
            }
        });
        self.waitq.wake_all();
        released
    }

    /// Acquire an active reference, or `None` if the peer is not active.
    #[must_use]
    pub fn acquire(&self) -> Option<PeerGuard<'_>> {
        let active = self.active.acquire(&self.waitq)?;
        let info = self.info.read().clone()?;
        Some(PeerGuard {
            peer: self,
            info,
            _active: active,
        })
    }

    /// Like [`acquire`](Peer::acquire), mapping failure to the liveness
    /// error: not-connected while new, shutting-down after deactivation.
    pub fn try_acquire(&self) -> Result<PeerGuard<'_>> {
        self.acquire().ok_or_else(|| self.liveness_error())
    }

    /// Poll status, mirroring the device poll surface: a new peer reports no
    /// events, a deactivated one reports hangup, an active one reports
    /// readability of its queue.
    #[must_use]
    pub fn events(&self) -> PeerEvents {
        if self.active.is_new() {
            return PeerEvents {
                readable: false,
                hung_up: false,
            };
        }
        match self.acquire() {
            None => PeerEvents {
                readable: false,
                hung_up: true,
            },
            Some(guard) => PeerEvents {
                readable: guard.queue().is_readable(),
                hung_up: false,
            },
        }
    }

    /// Send one message to `destinations`, multicast-atomically.
    ///
    /// Duplicate destinations are collapsed. A single destination takes the
    /// unstaged shortcut; larger sets run the stage/commit transaction. On
    /// any failure no destination observes the message.
    ///
    /// Returns the commit stamp.
    pub fn send<'a>(
        &'a self,
        destinations: &[&'a Peer],
        kind: NodeKind,
        payload: Payload,
    ) -> Result<Stamp> {
        if destinations.is_empty() {
            return Err(BusError::InvalidArgument {
                what: "empty destination set".into(),
            });
        }

        let mut seen: SmallVec<[PeerTag; 8]> = SmallVec::new();
        let mut unique: SmallVec<[&Peer; 8]> = SmallVec::new();
        for &dest in destinations {
            if !seen.contains(&dest.tag()) {
                seen.push(dest.tag());
                unique.push(dest);
            }
        }

        if unique.len() == 1 {
            return self.send_single(unique[0], kind, payload);
        }

        let mut txn = Transaction::new(self, kind, payload)?;
        for dest in unique {
            txn.stage(dest)?;
        }
        txn.commit()
    }

    /// Dequeue the front message of the own queue.
    ///
    /// Reports [`BusError::Empty`] when no entry is ready. Dequeuing syncs
    /// the local clock with the message's commit stamp, so later sends from
    /// this peer are ordered after everything it has observed.
    pub fn recv(&self) -> Result<Received> {
        let guard = self.try_acquire()?;
        let mut queue = guard.queue().lock();
        let Some(peeked) = queue.peek() else {
            return Err(BusError::Empty);
        };
        queue.remove(&self.waitq, &peeked.node);
        queue.sync(peeked.node.stamp())?;
        drop(queue);

        guard.pool().release(peeked.node.payload().len());
        Ok(Received {
            sender: peeked.node.sender(),
            kind: peeked.node.kind(),
            stamp: peeked.node.stamp(),
            payload: peeked.node.payload().clone(),
            more: peeked.more,
        })
    }

    /// Block until the queue is readable or the peer shuts down.
    ///
    /// Cancellation via `token` surfaces as [`BusError::Interrupted`];
    /// shutdown surfaces as the liveness error.
    pub fn wait_readable(&self, token: &CancelToken) -> Result<()> {
        self.waitq.wait_until_cancellable(token, || {
            !self.active.is_active() || self.readable_hint()
        })?;
        if self.active.is_active() {
            Ok(())
        } else {
            Err(self.liveness_error())
        }
    }

    fn readable_hint(&self) -> bool {
        self.info
            .read()
            .as_ref()
            .is_some_and(|info| info.queue.is_readable())
    }

    fn liveness_error(&self) -> BusError {
        if self.active.is_new() {
            BusError::NotConnected
        } else {
            BusError::ShuttingDown
        }
    }

    fn send_single(&self, dest: &Peer, kind: NodeKind, payload: Payload) -> Result<Stamp> {
        let sender = self.try_acquire()?;
        let guard = dest.try_acquire()?;

        // Carry causality across the unstaged shortcut: the destination clock
        // must not fall behind anything this sender has already observed.
        let basis = sender.queue().lock().clock().floor_even();

        let size = payload.len();
        guard.pool().charge(size)?;
        let node = Arc::new(QueueNode::new(kind, self.tag, payload));
        let mut queue = guard.queue().lock();
        let result = queue
            .sync(basis)
            .and_then(|_| queue.commit_unstaged(guard.waitq(), &node));
        drop(queue);
        match result {
            Ok(ts) => Ok(ts),
            Err(err) => {
                guard.pool().release(size);
                Err(err)
            }
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.disconnect();
        self.active.destroy();
    }
}

// ---------------------------------------------------------------------------
// PeerGuard
// ---------------------------------------------------------------------------

/// An acquired peer: active reference plus the dereferenced [`PeerInfo`].
///
/// Releases the active reference on drop.
#[derive(Debug)]
pub struct PeerGuard<'a> {
    peer: &'a Peer,
    info: Arc<PeerInfo>,
    _active: ActiveRef<'a>,
}

impl PeerGuard<'_> {
    /// The owning peer's tag.
    #[must_use]
    pub fn tag(&self) -> PeerTag {
        self.peer.tag
    }

    /// The peer's queue.
    #[must_use]
    pub fn queue(&self) -> &Queue {
        &self.info.queue
    }

    /// The peer's pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.info.pool
    }

    /// The peer's wait queue.
    #[must_use]
    pub fn waitq(&self) -> &WaitQueue {
        &self.peer.waitq
    }
}

impl std::ops::Deref for PeerGuard<'_> {
    type Target = PeerInfo;

    fn deref(&self) -> &Self::Target {
        &self.info
    }
}

// ---------------------------------------------------------------------------
// PeerEvents / Received
// ---------------------------------------------------------------------------

/// Poll-style status of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEvents {
    /// Whether the queue has an entry ready to be dequeued.
    pub readable: bool,
    /// Whether the peer was deactivated.
    pub hung_up: bool,
}

/// A dequeued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// Tag of the sending peer.
    pub sender: PeerTag,
    /// Node kind.
    pub kind: NodeKind,
    /// Commit stamp the message was delivered at.
    pub stamp: Stamp,
    /// Opaque message bytes.
    pub payload: Payload,
    /// Whether further entries remained beyond this one at dequeue time.
    pub more: bool,
}
