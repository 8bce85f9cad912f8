//! Global bus metrics.
//!
//! Lock-free `AtomicU64` counters with `Relaxed` ordering — callers may
//! observe stale reads but never torn values. [`bus_metrics`] takes a
//! point-in-time snapshot; [`reset_bus_metrics`] zeroes everything for tests.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

static PEERBUS_MESSAGES_STAGED_TOTAL: AtomicU64 = AtomicU64::new(0);
static PEERBUS_MESSAGES_COMMITTED_TOTAL: AtomicU64 = AtomicU64::new(0);
static PEERBUS_TRANSACTIONS_ABORTED_TOTAL: AtomicU64 = AtomicU64::new(0);
static PEERBUS_NODES_RETIRED_TOTAL: AtomicU64 = AtomicU64::new(0);
static PEERBUS_DRAINS_TOTAL: AtomicU64 = AtomicU64::new(0);
static PEERBUS_FRONT_WAKES_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Serializable snapshot of the global bus counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusMetrics {
    /// Nodes staged on destination queues.
    pub peerbus_messages_staged_total: u64,
    /// Nodes committed (staged or unstaged path).
    pub peerbus_messages_committed_total: u64,
    /// Transactions rolled back before commit.
    pub peerbus_transactions_aborted_total: u64,
    /// Removed nodes handed to deferred reclamation.
    pub peerbus_nodes_retired_total: u64,
    /// Active objects drained (release callback executed).
    pub peerbus_drains_total: u64,
    /// Wakeups issued because a queue front became ready.
    pub peerbus_front_wakes_total: u64,
}

/// Read current bus metrics.
#[must_use]
pub fn bus_metrics() -> BusMetrics {
    BusMetrics {
        peerbus_messages_staged_total: PEERBUS_MESSAGES_STAGED_TOTAL.load(Ordering::Relaxed),
        peerbus_messages_committed_total: PEERBUS_MESSAGES_COMMITTED_TOTAL.load(Ordering::Relaxed),
        peerbus_transactions_aborted_total: PEERBUS_TRANSACTIONS_ABORTED_TOTAL
            .load(Ordering::Relaxed),
        peerbus_nodes_retired_total: PEERBUS_NODES_RETIRED_TOTAL.load(Ordering::Relaxed),
        peerbus_drains_total: PEERBUS_DRAINS_TOTAL.load(Ordering::Relaxed),
        peerbus_front_wakes_total: PEERBUS_FRONT_WAKES_TOTAL.load(Ordering::Relaxed),
    }
}

/// Reset all counters to zero (tests/diagnostics).
pub fn reset_bus_metrics() {
    PEERBUS_MESSAGES_STAGED_TOTAL.store(0, Ordering::Relaxed);
    PEERBUS_MESSAGES_COMMITTED_TOTAL.store(0, Ordering::Relaxed);
    PEERBUS_TRANSACTIONS_ABORTED_TOTAL.store(0, Ordering::Relaxed);
    PEERBUS_NODES_RETIRED_TOTAL.store(0, Ordering::Relaxed);
    PEERBUS_DRAINS_TOTAL.store(0, Ordering::Relaxed);
    PEERBUS_FRONT_WAKES_TOTAL.store(0, Ordering::Relaxed);
}

pub(crate) fn record_staged() {
    PEERBUS_MESSAGES_STAGED_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_committed() {
    PEERBUS_MESSAGES_COMMITTED_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_aborted() {
    PEERBUS_TRANSACTIONS_ABORTED_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_retired() {
    PEERBUS_NODES_RETIRED_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_drain() {
    PEERBUS_DRAINS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_front_wake() {
    PEERBUS_FRONT_WAKES_TOTAL.fetch_add(1, Ordering::Relaxed);
}
