//! Concurrent multicast stress.
//!
//! Several sender threads multicast to the same destination set while reader
//! threads drain each destination. Checks the global-order contract:
//!   1. Readers only ever observe committed (even) stamps
//!   2. Per-queue dequeue keys are strictly increasing
//!   3. Program order per sender is preserved on every queue
//!   4. All queues observe the identical total order
//!   5. Nothing is lost and nothing is duplicated

use std::sync::{Arc, Barrier};
use std::thread;

use peerbus_core::{CancelToken, Peer};
use rand::Rng;
use peerbus_error::BusError;
use peerbus_types::{ConnectParams, NodeKind, Payload, PeerTag, Stamp};

const SENDERS: usize = 4;
const READERS: usize = 3;
const MESSAGES_PER_SENDER: usize = 100;

fn connected(tag_raw: u64) -> Arc<Peer> {
    let peer = Peer::with_tag(PeerTag::new(tag_raw).unwrap());
    peer.connect(ConnectParams::new(1 << 20)).unwrap();
    Arc::new(peer)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Observed {
    stamp: Stamp,
    sender: PeerTag,
    seq: u32,
}

#[test]
fn test_concurrent_multicast_global_order() {
    let readers: Vec<Arc<Peer>> = (1..=READERS as u64).map(connected).collect();
    let senders: Vec<Arc<Peer>> = (101..101 + SENDERS as u64).map(connected).collect();
    let barrier = Arc::new(Barrier::new(SENDERS + READERS));

    let mut sender_threads = Vec::new();
    for sender in &senders {
        let sender = Arc::clone(sender);
        let destinations: Vec<Arc<Peer>> = readers.to_vec();
        let start = Arc::clone(&barrier);
        sender_threads.push(thread::spawn(move || {
            let mut rng = rand::rng();
            start.wait();
            for seq in 0..MESSAGES_PER_SENDER as u32 {
                let payload = Payload::from(seq.to_le_bytes().to_vec());
                let dest_refs: Vec<&Peer> = destinations.iter().map(Arc::as_ref).collect();
                sender
                    .send(&dest_refs, NodeKind::Message, payload)
                    .expect("multicast must succeed while destinations live");
                // Scheduling jitter diversifies the stage/commit interleavings.
                if rng.random_ratio(1, 8) {
                    thread::yield_now();
                }
            }
        }));
    }

    let expected_total = SENDERS * MESSAGES_PER_SENDER;
    let mut reader_threads = Vec::new();
    for reader in &readers {
        let reader = Arc::clone(reader);
        let start = Arc::clone(&barrier);
        reader_threads.push(thread::spawn(move || {
            start.wait();
            let token = CancelToken::new();
            let mut log: Vec<Observed> = Vec::with_capacity(expected_total);
            while log.len() < expected_total {
                match reader.recv() {
                    Ok(received) => {
                        assert!(
                            received.stamp.is_committed(),
                            "reader observed a non-committed stamp {}",
                            received.stamp
                        );
                        let bytes: [u8; 4] =
                            received.payload.as_bytes().try_into().expect("seq payload");
                        log.push(Observed {
                            stamp: received.stamp,
                            sender: received.sender,
                            seq: u32::from_le_bytes(bytes),
                        });
                    }
                    Err(BusError::Empty) => {
                        reader.wait_readable(&token).expect("reader stays connected");
                    }
                    Err(other) => panic!("unexpected recv error: {other}"),
                }
            }
            assert_eq!(reader.recv(), Err(BusError::Empty));
            log
        }));
    }

    for sender_thread in sender_threads {
        sender_thread.join().unwrap();
    }
    let logs: Vec<Vec<Observed>> = reader_threads
        .into_iter()
        .map(|reader_thread| reader_thread.join().unwrap())
        .collect();

    for (queue_idx, log) in logs.iter().enumerate() {
        assert_eq!(log.len(), expected_total, "queue {queue_idx} lost messages");

        // Dequeue keys strictly increase: commits never tie on both stamp
        // and sender.
        for window in log.windows(2) {
            let (a, b) = (window[0], window[1]);
            assert!(
                (a.stamp, a.sender) < (b.stamp, b.sender),
                "queue {queue_idx}: key ({}, {}) not before ({}, {})",
                a.stamp,
                a.sender,
                b.stamp,
                b.sender
            );
        }

        // Program order per sender.
        for sender in &senders {
            let seqs: Vec<u32> = log
                .iter()
                .filter(|observed| observed.sender == sender.tag())
                .map(|observed| observed.seq)
                .collect();
            assert_eq!(seqs.len(), MESSAGES_PER_SENDER);
            assert!(
                seqs.windows(2).all(|pair| pair[0] < pair[1]),
                "queue {queue_idx}: sender {} out of program order",
                sender.tag()
            );
        }
    }

    // Every queue received both of any two messages, so the orders must be
    // identical everywhere.
    for other in &logs[1..] {
        assert_eq!(&logs[0], other, "queues disagree on the delivery order");
    }

    println!(
        "[PASS] concurrent multicast: {} messages x {} queues, identical order everywhere",
        expected_total, READERS
    );
}

#[test]
fn test_multicast_never_partially_visible() {
    // One sender multicasts while a prober hammers both destinations; at no
    // instant may exactly one destination hold a given message.
    let dest_a = connected(11);
    let dest_b = connected(12);
    let sender = connected(113);

    let rounds = 200u32;
    let prober_a = Arc::clone(&dest_a);
    let prober_b = Arc::clone(&dest_b);
    let prober = thread::spawn(move || {
        let mut drained = (0u32, 0u32);
        loop {
            let got_a = match prober_a.recv() {
                Ok(received) => {
                    assert!(received.stamp.is_committed());
                    drained.0 += 1;
                    true
                }
                Err(BusError::Empty) => false,
                Err(other) => panic!("unexpected recv error: {other}"),
            };
            let got_b = match prober_b.recv() {
                Ok(received) => {
                    assert!(received.stamp.is_committed());
                    drained.1 += 1;
                    true
                }
                Err(BusError::Empty) => false,
                Err(other) => panic!("unexpected recv error: {other}"),
            };
            if drained.0 == rounds && drained.1 == rounds {
                return drained;
            }
            if !got_a && !got_b {
                std::hint::spin_loop();
            }
        }
    });

    for _ in 0..rounds {
        sender
            .send(&[&*dest_a, &*dest_b], NodeKind::Message, Payload::empty())
            .unwrap();
    }

    let drained = prober.join().unwrap();
    assert_eq!(drained, (rounds, rounds));

    println!("[PASS] no partial visibility across {rounds} multicasts");
}
