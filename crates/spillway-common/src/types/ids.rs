//! Identifier types for spillway.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of table ids and buffer identities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Table identifier assigned by the execution graph.
///
/// Used as the owner component of blob addresses. Several buffers may share
/// [`BufferId::NOT_IN_WORKFLOW`], so this id alone does not identify a buffer;
/// use [`BufferKey`] for that.
///
/// # Example
///
/// ```rust
/// use spillway_common::types::BufferId;
///
/// let id = BufferId::new(42);
/// assert!(id.is_in_workflow());
/// assert!(!BufferId::NOT_IN_WORKFLOW.is_in_workflow());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BufferId(i32);

impl BufferId {
    /// Id of a table created outside the engine's bookkeeping.
    pub const NOT_IN_WORKFLOW: Self = Self(-1);

    /// Creates a new `BufferId` from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns true unless this is [`BufferId::NOT_IN_WORKFLOW`].
    #[inline]
    #[must_use]
    pub const fn is_in_workflow(self) -> bool {
        self.0 != Self::NOT_IN_WORKFLOW.0
    }
}

impl Default for BufferId {
    fn default() -> Self {
        Self::NOT_IN_WORKFLOW
    }
}

impl fmt::Debug for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NOT_IN_WORKFLOW {
            write!(f, "BufferId(NOT_IN_WORKFLOW)")
        } else {
            write!(f, "BufferId({})", self.0)
        }
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for BufferId {
    #[inline]
    fn from(id: i32) -> Self {
        Self::new(id)
    }
}

impl From<BufferId> for i32 {
    #[inline]
    fn from(id: BufferId) -> Self {
        id.0
    }
}

/// Process-unique identity of a buffer.
///
/// Keys the buffer cache and distinguishes buffers that share a
/// [`BufferId`]. Never reused within a process.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BufferKey(u64);

impl BufferKey {
    /// Creates a key from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(key: u64) -> Self {
        Self(key)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferKey({})", self.0)
    }
}

impl fmt::Display for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BufferKey {
    #[inline]
    fn from(key: u64) -> Self {
        Self::new(key)
    }
}

/// Hands out monotonically increasing [`BufferKey`]s.
#[derive(Debug, Default)]
pub struct BufferKeyGenerator {
    next: AtomicU64,
}

impl BufferKeyGenerator {
    /// Creates a generator starting at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Returns the next unused key.
    pub fn next_key(&self) -> BufferKey {
        BufferKey(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
