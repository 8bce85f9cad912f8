//! Queue ordering scenarios with exact stamp arithmetic.
//!
//! Walks the staging/commit protocol through fixed interleavings and checks
//! every intermediate stamp:
//!   1. Single send: stage 1, commit 2, drain leaves the queue unreadable
//!   2. Two multicasts over disjoint clocks serialize as staged
//!   3. Tied commit stamps order by sender tag, identically everywhere
//!   4. A staging entry blocks the front until it commits
//!   5. Front only advances under commits
//!   6. Stage-then-remove leaves no trace

use std::sync::Arc;

use peerbus_core::{Peer, Queue, QueueNode, Transaction, WaitQueue};
use peerbus_error::BusError;
use peerbus_types::{ConnectParams, NodeKind, Payload, PeerTag, Stamp};

fn tag(raw: u64) -> PeerTag {
    PeerTag::new(raw).unwrap()
}

fn stamp(raw: u64) -> Stamp {
    Stamp::new(raw).unwrap()
}

fn connected(tag_raw: u64) -> Peer {
    let peer = Peer::with_tag(tag(tag_raw));
    peer.connect(ConnectParams::new(1 << 16)).unwrap();
    peer
}

fn message(sender: u64) -> Arc<QueueNode> {
    Arc::new(QueueNode::new(NodeKind::Message, tag(sender), Payload::empty()))
}

// ---------------------------------------------------------------------------
// Test 1: single send — stage 1, commit 2
// ---------------------------------------------------------------------------

#[test]
fn test_single_send_stamps() {
    let p1 = connected(1);
    let q2 = connected(2);

    let mut txn = Transaction::new(&p1, NodeKind::Message, Payload::from(vec![7u8])).unwrap();
    txn.stage(&q2).unwrap();
    let commit = txn.commit().unwrap();
    assert_eq!(commit, stamp(2), "clock 0 stages at 1 and commits at 2");

    let received = q2.recv().unwrap();
    assert_eq!(received.stamp, stamp(2));
    assert_eq!(received.sender, tag(1));
    assert!(!received.more);

    assert!(!q2.events().readable);
    assert_eq!(q2.recv(), Err(BusError::Empty));

    println!("[PASS] single send: staged at 1, committed at 2, drained to empty");
}

// ---------------------------------------------------------------------------
// Test 2: two multicasts, disjoint clocks
// ---------------------------------------------------------------------------

#[test]
fn test_multicast_serialization_over_disjoint_clocks() {
    let p1 = connected(1);
    let p4 = connected(4);
    let q2 = connected(2);
    let q3 = connected(3);

    // Preset clocks: P1 at 4, P4 at 6, Q3 at 10.
    p1.acquire().unwrap().queue().lock().sync(stamp(4)).unwrap();
    p4.acquire().unwrap().queue().lock().sync(stamp(6)).unwrap();
    q3.acquire().unwrap().queue().lock().sync(stamp(10)).unwrap();

    let mut m1 = Transaction::new(&p1, NodeKind::Message, Payload::empty()).unwrap();
    m1.stage(&q2).unwrap();
    m1.stage(&q3).unwrap();
    let m1_commit = m1.commit().unwrap();
    assert_eq!(m1_commit, stamp(12), "staging high-water 11 commits at 12");

    let mut m2 = Transaction::new(&p4, NodeKind::Message, Payload::empty()).unwrap();
    m2.stage(&q2).unwrap();
    m2.stage(&q3).unwrap();
    let m2_commit = m2.commit().unwrap();
    assert_eq!(m2_commit, stamp(14), "clocks fast-forwarded past M1 commit at 13");

    for dest in [&q2, &q3] {
        let first = dest.recv().unwrap();
        let second = dest.recv().unwrap();
        assert_eq!((first.sender, first.stamp), (tag(1), stamp(12)));
        assert_eq!((second.sender, second.stamp), (tag(4), stamp(14)));
    }

    println!("[PASS] disjoint clocks: M1@12 before M2@14 on both queues");
}

// ---------------------------------------------------------------------------
// Test 3: tied commit stamps order by sender tag
// ---------------------------------------------------------------------------

#[test]
fn test_tied_commit_orders_by_sender_tag() {
    let queue_a = Queue::new();
    let queue_b = Queue::new();
    let waitq = WaitQueue::new();

    // Stage the higher tag first on one queue and second on the other; the
    // dequeue order must not depend on staging order.
    let from_seven_a = message(7);
    let from_nine_a = message(9);
    let from_seven_b = message(7);
    let from_nine_b = message(9);

    {
        let mut guard = queue_a.lock();
        guard.stage(&from_nine_a, stamp(19)).unwrap();
        guard.stage(&from_seven_a, stamp(19)).unwrap();
        guard.commit_staged(&waitq, &from_nine_a, stamp(20)).unwrap();
        guard.commit_staged(&waitq, &from_seven_a, stamp(20)).unwrap();
    }
    {
        let mut guard = queue_b.lock();
        guard.stage(&from_seven_b, stamp(19)).unwrap();
        guard.stage(&from_nine_b, stamp(19)).unwrap();
        guard.commit_staged(&waitq, &from_seven_b, stamp(20)).unwrap();
        guard.commit_staged(&waitq, &from_nine_b, stamp(20)).unwrap();
    }

    for queue in [&queue_a, &queue_b] {
        let mut guard = queue.lock();
        let first = guard.peek().unwrap();
        assert_eq!(first.node.sender(), tag(7), "lower sender tag wins the tie");
        assert_eq!(first.node.stamp(), stamp(20));
        guard.remove(&waitq, &first.node);

        let second = guard.peek().unwrap();
        assert_eq!(second.node.sender(), tag(9));
        assert_eq!(second.node.stamp(), stamp(20));
    }

    println!("[PASS] tied commit at 20: sender 7 before sender 9 on both queues");
}

// ---------------------------------------------------------------------------
// Test 4: staging blocks the front
// ---------------------------------------------------------------------------

#[test]
fn test_staging_blocks_front() {
    let queue = Queue::new();
    let waitq = WaitQueue::new();

    let blocker = message(2);
    let resident = message(3);
    {
        let mut guard = queue.lock();
        guard.stage(&blocker, stamp(8)).unwrap();
        assert_eq!(blocker.stamp(), stamp(9));

        guard.stage(&resident, stamp(8)).unwrap();
        guard.commit_staged(&waitq, &resident, stamp(10)).unwrap();
        assert!(guard.peek().is_none(), "staged 9 blocks committed 10");
    }
    assert!(!queue.is_readable());

    {
        let mut guard = queue.lock();
        guard.commit_staged(&waitq, &blocker, stamp(22)).unwrap();
        let front = guard.peek().unwrap();
        assert_eq!(front.node.stamp(), stamp(10), "the earlier commit leads");
        guard.remove(&waitq, &front.node);
        assert_eq!(guard.peek().unwrap().node.stamp(), stamp(22));
    }
    assert!(queue.is_readable());

    println!("[PASS] staging at 9 gated the queue until commit at 22");
}

// ---------------------------------------------------------------------------
// Test 5: front monotonicity under commits
// ---------------------------------------------------------------------------

#[test]
fn test_front_monotonicity_under_commits() {
    // Stage three entries at 1, 3, 5 and commit them in staging order and in
    // reverse; either way the published front never moves backwards.
    for reverse in [false, true] {
        let queue = Queue::new();
        let waitq = WaitQueue::new();

        let nodes: Vec<Arc<QueueNode>> = (1..=3).map(message).collect();
        {
            let mut guard = queue.lock();
            for (i, node) in nodes.iter().enumerate() {
                guard.stage(node, stamp(2 * i as u64)).unwrap();
                assert_eq!(node.stamp(), stamp(2 * i as u64 + 1));
            }
        }

        let order: Vec<&Arc<QueueNode>> = if reverse {
            nodes.iter().rev().collect()
        } else {
            nodes.iter().collect()
        };

        let mut observed: Vec<Option<Stamp>> = vec![queue.front_snapshot().map(|(s, _)| s)];
        for node in order {
            let commit = node.stamp().commit_successor();
            queue.lock().commit_staged(&waitq, node, commit).unwrap();
            observed.push(queue.front_snapshot().map(|(s, _)| s));
        }

        for window in observed.windows(2) {
            match (window[0], window[1]) {
                (Some(previous), Some(next)) => {
                    assert!(next >= previous, "front moved backwards");
                }
                (Some(_), None) => panic!("front vanished under a commit"),
                (None, _) => {}
            }
        }
        assert_eq!(
            *observed.last().unwrap(),
            Some(stamp(2)),
            "all committed, earliest entry leads"
        );

        println!("[PASS] front stamps {observed:?} are monotone (reverse={reverse})");
    }
}

// ---------------------------------------------------------------------------
// Test 6: stage-then-remove round-trip
// ---------------------------------------------------------------------------

#[test]
fn test_stage_remove_leaves_no_trace() {
    let queue = Queue::new();
    let waitq = WaitQueue::new();

    let resident = message(5);
    {
        let mut guard = queue.lock();
        guard.stage(&resident, Stamp::ZERO).unwrap();
        guard.commit_staged(&waitq, &resident, stamp(2)).unwrap();
    }
    let front_before = queue.front_snapshot();
    let len_before = queue.lock().len();

    let transient = message(6);
    {
        let mut guard = queue.lock();
        guard.stage(&transient, stamp(40)).unwrap();
        assert!(transient.is_queued());
        guard.remove(&waitq, &transient);
        assert!(!transient.is_queued());
    }

    assert_eq!(queue.front_snapshot(), front_before);
    assert_eq!(queue.lock().len(), len_before);
    let front = queue.lock().peek().unwrap();
    assert_eq!(front.node.stamp(), stamp(2));
    assert!(!front.more);

    println!("[PASS] stage+remove round-trip: index and front equal pre-state");
}
