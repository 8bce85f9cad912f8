//! Error types for peerbus operations.
//!
//! One enum covers the behavioral taxonomy of the bus core: liveness errors
//! (`NotConnected`, `ShuttingDown`, `AlreadyConnected`), parameter errors,
//! wait cancellation, the empty-queue indicator, transient resource
//! exhaustion, and internal faults. Callers match on variants; the
//! [`BusError::is_retryable`] helper classifies the transient band.

#![forbid(unsafe_code)]

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, BusError>;

/// Primary error type for peerbus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    // === Liveness ===
    /// Operation requires an activated peer; the peer was never connected.
    #[error("peer is not connected")]
    NotConnected,

    /// The peer is deactivated; no new active references can be acquired.
    #[error("peer is shutting down")]
    ShuttingDown,

    /// Connect was called on a peer that is already connected.
    #[error("peer is already connected")]
    AlreadyConnected,

    // === Parameters ===
    /// Malformed parameter.
    #[error("invalid argument: {what}")]
    InvalidArgument { what: String },

    /// A timestamp did not satisfy the parity or ordering required by the
    /// operation.
    #[error("invalid stamp {stamp}: expected {expected}")]
    InvalidStamp { stamp: u64, expected: &'static str },

    // === Waits ===
    /// A blocking wait was cancelled externally; the caller may retry.
    #[error("wait interrupted")]
    Interrupted,

    /// The queue has no entry ready to be dequeued.
    #[error("queue is empty")]
    Empty,

    // === Transient ===
    /// A destination pool has no room for the payload; the caller may retry
    /// after the destination drains.
    #[error("pool exhausted: need {needed} bytes, {available} available")]
    PoolExhausted { needed: usize, available: usize },

    // === Fatal ===
    /// Internal invariant violation; surfaced to the caller and logged.
    #[error("internal fault: {detail}")]
    Fault { detail: String },
}

impl BusError {
    /// Whether the caller may reasonably retry the failed operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Interrupted | Self::Empty | Self::PoolExhausted { .. }
        )
    }

    /// Shorthand for an internal fault with a formatted detail string.
    #[must_use]
    pub fn fault(detail: impl Into<String>) -> Self {
        Self::Fault {
            detail: detail.into(),
        }
    }
}
