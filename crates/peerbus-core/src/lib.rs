//! Core of the peerbus multicast message bus.
//!
//! Peers hold message queues; a send atomically delivers one message to a
//! chosen set of destination queues so that every peer observes a consistent
//! partial order of deliveries, without any global lock. Two subsystems do
//! the heavy lifting:
//!
//! - [`active`]: an atomic lifecycle counter that lets an arbitrary number of
//!   short-lived references coexist with a single, once-only teardown.
//! - [`queue`]: a per-peer ordered queue built on distributed Lamport clocks,
//!   with parity-encoded staging entries and a lock-free readable check.
//!
//! [`transaction`] composes them into the multi-queue stage/commit protocol,
//! and [`peer`] wraps everything behind the acquire/release contract the IO
//! layer consumes. Device glue, handle bookkeeping, and pool allocation live
//! outside this crate.

#![forbid(unsafe_code)]

pub mod active;
pub mod metrics;
pub mod node;
pub mod peer;
pub mod pool;
pub mod queue;
pub mod reclaim;
pub mod transaction;
pub mod waitq;

pub use active::{Active, ActiveRef};
pub use metrics::{BusMetrics, bus_metrics, reset_bus_metrics};
pub use node::QueueNode;
pub use peer::{Peer, PeerEvents, PeerGuard, PeerInfo, Received};
pub use pool::Pool;
pub use queue::{Peeked, Queue, QueueGuard};
pub use reclaim::ReclaimGuard;
pub use transaction::Transaction;
pub use waitq::{CancelToken, WaitQueue};
