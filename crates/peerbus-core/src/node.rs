//! Queue nodes: reference-counted entries ordered by `(stamp, sender)`.
//!
//! A node packs its kind into the top two bits of an atomic word and its
//! Lamport stamp into the remaining 62, the same word the owning queue
//! publishes as its front cache. The kind never changes after construction;
//! the stamp only moves forward, and only under the owning queue's lock.
//! Reference counting is `Arc`: a node stays alive as long as it is linked
//! in a queue index, held by a transaction, or held by a dequeuer, whichever
//! is longest.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use peerbus_types::{
    KIND_MASK, KIND_SHIFT, NodeKind, Payload, PeerTag, STAMP_MASK, Stamp, pack_stamp_kind,
};

/// A single queue entry.
///
/// Stamp queries are meaningful only to callers that hold the owning queue's
/// lock or own the node exclusively; other threads may observe a node
/// mid-reorder.
#[derive(Debug)]
pub struct QueueNode {
    sender: PeerTag,
    payload: Payload,
    stamp_and_kind: AtomicU64,
    queued: AtomicBool,
    /// Queue-local insertion serial, assigned under the queue lock. Breaks
    /// index-key ties between two staged entries from the same sender that
    /// collide on one odd stamp.
    order_serial: AtomicU64,
}

impl QueueNode {
    /// Create an unqueued node with stamp zero and a single reference.
    #[must_use]
    pub fn new(kind: NodeKind, sender: PeerTag, payload: Payload) -> Self {
        Self {
            sender,
            payload,
            stamp_and_kind: AtomicU64::new(pack_stamp_kind(Stamp::ZERO, kind)),
            queued: AtomicBool::new(false),
            order_serial: AtomicU64::new(0),
        }
    }

    /// The node's kind, fixed at construction.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        let bits = (self.stamp_and_kind.load(Ordering::Acquire) & KIND_MASK)
            >> KIND_SHIFT;
        NodeKind::from_bits(bits).expect("kind bits were written from a valid NodeKind")
    }

    /// The sender tag, fixed at construction.
    #[must_use]
    pub fn sender(&self) -> PeerTag {
        self.sender
    }

    /// The message payload.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The node's current stamp.
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.stamp_and_kind.load(Ordering::Acquire) & STAMP_MASK)
            .expect("stamp bits fit the packed layout")
    }

    /// Whether the node is currently linked in a queue index.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }

    /// Whether the node is queued as a staging entry (odd stamp).
    #[must_use]
    pub fn is_staging(&self) -> bool {
        self.stamp().is_staging()
    }

    /// The packed stamp/kind word, as published in the front cache.
    #[must_use]
    pub(crate) fn packed_word(&self) -> u64 {
        self.stamp_and_kind.load(Ordering::Acquire)
    }

    /// Update the stamp, preserving the kind bits.
    ///
    /// Caller holds the owning queue's lock. Stamps only move forward.
    pub(crate) fn set_stamp(&self, stamp: Stamp) {
        let old = self.stamp_and_kind.load(Ordering::Acquire);
        debug_assert!(
            stamp.get() >= old & STAMP_MASK,
            "node stamp moved backwards: {} -> {}",
            old & STAMP_MASK,
            stamp
        );
        self.stamp_and_kind
            .store((old & KIND_MASK) | stamp.get(), Ordering::Release);
    }

    /// Mark index membership. Caller holds the owning queue's lock.
    pub(crate) fn set_queued(&self, queued: bool) {
        self.queued.store(queued, Ordering::Release);
    }

    /// The queue-local insertion serial.
    pub(crate) fn order_serial(&self) -> u64 {
        self.order_serial.load(Ordering::Acquire)
    }

    /// Assign the insertion serial. Caller holds the owning queue's lock.
    pub(crate) fn set_order_serial(&self, serial: u64) {
        self.order_serial.store(serial, Ordering::Release);
    }
}

impl Drop for QueueNode {
    fn drop(&mut self) {
        debug_assert!(
            !self.queued.load(Ordering::Acquire),
            "queue node dropped while still linked"
        );
    }
}

#[cfg(test)]
mod tests {
    use peerbus_types::{NodeKind, Payload, PeerTag, Stamp};

    use super::QueueNode;

    fn tag(raw: u64) -> PeerTag {
        PeerTag::new(raw).unwrap()
    }

    #[test]
    fn fresh_node_is_unstamped_and_unqueued() {
        let node = QueueNode::new(NodeKind::Message, tag(3), Payload::empty());
        assert_eq!(node.stamp(), Stamp::ZERO);
        assert_eq!(node.sender(), tag(3));
        assert!(!node.is_queued());
        assert!(!node.is_staging());
    }

    #[test]
    fn kind_survives_stamp_updates() {
        let node = QueueNode::new(NodeKind::HandleRelease, tag(9), Payload::empty());
        node.set_stamp(Stamp::new(5).unwrap());
        assert_eq!(node.kind(), NodeKind::HandleRelease);
        assert!(node.is_staging());

        node.set_stamp(Stamp::new(12).unwrap());
        assert_eq!(node.kind(), NodeKind::HandleRelease);
        assert!(!node.is_staging());
        assert_eq!(node.stamp().get(), 12);
    }

    #[test]
    fn packed_word_is_nonzero_once_stamped() {
        let node = QueueNode::new(NodeKind::Message, tag(1), Payload::empty());
        assert_eq!(node.packed_word(), 0);
        node.set_stamp(Stamp::new(2).unwrap());
        assert_ne!(node.packed_word(), 0);
    }
}
