//! Foundation types shared by every peerbus crate.
//!
//! Every identifier that crosses a crate boundary is a validated newtype:
//! [`PeerTag`] for sender identities, [`Stamp`] for Lamport timestamps,
//! [`NodeKind`] for the 2-bit queue-node type tag. The stamp/kind packing
//! helpers define the single `u64` layout shared by queue nodes and the
//! published front cache.

#![forbid(unsafe_code)]

use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Stamp/kind packing layout
// ---------------------------------------------------------------------------

/// Bit position of the node-kind tag inside a packed stamp/kind word.
pub const KIND_SHIFT: u32 = 62;

/// Mask selecting the node-kind tag of a packed word.
pub const KIND_MASK: u64 = 0b11 << KIND_SHIFT;

/// Mask selecting the timestamp of a packed word.
pub const STAMP_MASK: u64 = !KIND_MASK;

/// Pack a stamp and a node kind into one word.
///
/// The kind occupies the top two bits, the stamp the remaining 62. A packed
/// word is zero exactly when it holds `Stamp::ZERO` with the zero-valued
/// kind, which is why the published front cache can use `0` as "no front".
#[inline]
#[must_use]
pub const fn pack_stamp_kind(stamp: Stamp, kind: NodeKind) -> u64 {
    (kind.bits() << KIND_SHIFT) | stamp.get()
}

/// Split a packed word back into its stamp and kind.
///
/// Returns `None` if the kind bits hold an unassigned tag value.
#[inline]
#[must_use]
pub const fn unpack_stamp_kind(word: u64) -> Option<(Stamp, NodeKind)> {
    match NodeKind::from_bits((word & KIND_MASK) >> KIND_SHIFT) {
        Some(kind) => Some((Stamp(word & STAMP_MASK), kind)),
        None => None,
    }
}

// ---------------------------------------------------------------------------
// PeerTag
// ---------------------------------------------------------------------------

/// Stable, unique identity of a peer, used as the ordering tie-breaker.
///
/// Tags are never zero; zero is reserved so shared-memory and packed
/// encodings can use it as a sentinel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct PeerTag(NonZeroU64);

impl PeerTag {
    /// Construct a tag if `raw` is non-zero.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Raw tag value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for PeerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u64> for PeerTag {
    type Error = InvalidPeerTag;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidPeerTag)
    }
}

/// Error returned when attempting to construct a `PeerTag` from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidPeerTag;

impl fmt::Display for InvalidPeerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid peer tag 0 (tags are non-zero)")
    }
}

impl std::error::Error for InvalidPeerTag {}

// ---------------------------------------------------------------------------
// Stamp
// ---------------------------------------------------------------------------

/// A Lamport timestamp.
///
/// Clocks are 64-bit and monotonically non-decreasing; in practice they never
/// approach the 62-bit packing limit. Parity carries delivery state: odd
/// stamps mark staging entries, even non-zero stamps mark committed entries,
/// and `Stamp::ZERO` marks a node that was never queued.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct Stamp(u64);

impl Stamp {
    /// The never-queued stamp.
    pub const ZERO: Self = Self(0);

    /// Largest stamp representable in the packed layout.
    pub const MAX: Self = Self(STAMP_MASK);

    /// Construct a stamp, rejecting values that collide with the kind bits.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        if raw <= STAMP_MASK {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Raw stamp value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is an odd (staging) stamp.
    #[inline]
    #[must_use]
    pub const fn is_staging(self) -> bool {
        self.0 & 1 == 1
    }

    /// Whether this is an even, non-zero (committed) stamp.
    #[inline]
    #[must_use]
    pub const fn is_committed(self) -> bool {
        self.0 != 0 && self.0 & 1 == 0
    }

    /// The next odd stamp at or above `self`.
    #[inline]
    #[must_use]
    pub const fn to_staging(self) -> Self {
        Self(self.0 | 1)
    }

    /// The next even stamp strictly above `self`.
    ///
    /// This is the clock-tick step: from an even clock it advances by a full
    /// interval (+2); from an odd clock it lands on the next even value.
    #[inline]
    #[must_use]
    pub const fn next_even(self) -> Self {
        Self((self.0 + 2) & !1)
    }

    /// The smallest even stamp strictly above `self`.
    ///
    /// For an odd staging high-water this is its commit twin (`+1`); for an
    /// even value it is `+2`.
    #[inline]
    #[must_use]
    pub const fn commit_successor(self) -> Self {
        Self((self.0 | 1) + 1)
    }

    /// The largest even stamp at or below `self`.
    #[inline]
    #[must_use]
    pub const fn floor_even(self) -> Self {
        Self(self.0 & !1)
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// NodeKind
// ---------------------------------------------------------------------------

/// Type tag of a queue node, packed into the top two bits of the stamp word.
///
/// A node never changes its kind after construction. The handle-notification
/// kinds are carried for the (out-of-scope) handle layer; the core treats all
/// kinds uniformly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum NodeKind {
    /// An ordinary message carrying an opaque payload.
    Message,
    /// Notification that a node object was destroyed.
    HandleDestruction,
    /// Notification that a handle was released.
    HandleRelease,
}

impl NodeKind {
    /// The 2-bit encoding of this kind.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        match self {
            Self::Message => 0,
            Self::HandleDestruction => 1,
            Self::HandleRelease => 2,
        }
    }

    /// Decode a 2-bit tag value.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            0 => Some(Self::Message),
            1 => Some(Self::HandleDestruction),
            2 => Some(Self::HandleRelease),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Opaque message bytes.
///
/// Cheaply cloneable so a multicast can hand the same bytes to every
/// destination node without copying. The core never inspects the contents.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Payload(Arc<[u8]>);

impl Payload {
    /// An empty payload.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the payload bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").field("len", &self.0.len()).finish()
    }
}

// ---------------------------------------------------------------------------
// ConnectParams
// ---------------------------------------------------------------------------

/// Parameters for connecting a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConnectParams {
    /// Byte quota of the peer's incoming pool. Must be non-zero.
    pub pool_capacity: usize,
}

impl ConnectParams {
    /// Construct connect parameters with the given pool quota.
    #[must_use]
    pub const fn new(pool_capacity: usize) -> Self {
        Self { pool_capacity }
    }
}
