//! Blob cells and blob addressing.
//!
//! A blob cell starts *unassigned*, carrying its payload inline. When a
//! buffer stores it, the buffer allocates a slot and replaces the cell with
//! an *addressed* wrapper: `(owner buffer id, slot)` plus a weak link to the
//! owner's blob storage. The wrapper resolves its payload lazily and fails
//! with a stale-address error once the owner has been cleared.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;

use super::ids::{BufferId, BufferKey};
use crate::error::{SpillError, SpillResult};

/// Location of a blob payload: owning buffer plus slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobAddress {
    buffer_id: BufferId,
    slot: u32,
}

impl BlobAddress {
    /// Creates an address.
    #[must_use]
    pub const fn new(buffer_id: BufferId, slot: u32) -> Self {
        Self { buffer_id, slot }
    }

    /// Returns the id of the owning buffer.
    #[must_use]
    pub const fn buffer_id(&self) -> BufferId {
        self.buffer_id
    }

    /// Returns the slot index within the owner.
    #[must_use]
    pub const fn slot(&self) -> u32 {
        self.slot
    }
}

impl fmt::Display for BlobAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.buffer_id, self.slot)
    }
}

/// Blob storage owned by a single buffer.
pub trait BlobSource: Send + Sync {
    /// Identity of the owning buffer.
    fn owner(&self) -> BufferKey;

    /// Returns true once the owner has released its storage.
    fn is_cleared(&self) -> bool;

    /// Reads the payload stored in `slot`.
    ///
    /// # Errors
    ///
    /// Returns `StaleBlobAddress` if the owner has been cleared, or an I/O
    /// error if the payload cannot be read.
    fn read(&self, slot: u32) -> SpillResult<Bytes>;
}

struct AddressedBlob {
    address: BlobAddress,
    owner: BufferKey,
    source: Weak<dyn BlobSource>,
    payload: OnceLock<Bytes>,
}

#[derive(Clone)]
enum BlobState {
    Unassigned(Bytes),
    Addressed(Arc<AddressedBlob>),
}

/// A cell holding a large binary payload.
///
/// Equality is structural: two blob cells are equal when their payloads are
/// equal, regardless of which buffer owns them. Use
/// [`BlobCell::same_instance`] to test identity.
#[derive(Clone)]
pub struct BlobCell {
    state: BlobState,
}

impl BlobCell {
    /// Creates an unassigned blob cell.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            state: BlobState::Unassigned(payload.into()),
        }
    }

    /// Creates a wrapper addressing a slot in `source`.
    ///
    /// `payload` pre-populates the wrapper when the caller already holds the
    /// bytes, e.g. right after allocating the slot.
    #[must_use]
    pub fn addressed(
        address: BlobAddress,
        source: &Arc<dyn BlobSource>,
        payload: Option<Bytes>,
    ) -> Self {
        let cached = OnceLock::new();
        if let Some(payload) = payload {
            let _ = cached.set(payload);
        }
        Self {
            state: BlobState::Addressed(Arc::new(AddressedBlob {
                address,
                owner: source.owner(),
                source: Arc::downgrade(source),
                payload: cached,
            })),
        }
    }

    /// Returns the address, or `None` while unassigned.
    #[must_use]
    pub fn address(&self) -> Option<BlobAddress> {
        match &self.state {
            BlobState::Unassigned(_) => None,
            BlobState::Addressed(blob) => Some(blob.address),
        }
    }

    /// Returns the identity of the owning buffer, or `None` while unassigned.
    #[must_use]
    pub fn owner(&self) -> Option<BufferKey> {
        match &self.state {
            BlobState::Unassigned(_) => None,
            BlobState::Addressed(blob) => Some(blob.owner),
        }
    }

    /// Returns true once a buffer owns this blob.
    #[must_use]
    pub fn is_addressed(&self) -> bool {
        matches!(self.state, BlobState::Addressed(_))
    }

    /// Returns the payload, reading it from the owner on first use.
    ///
    /// # Errors
    ///
    /// Returns `StaleBlobAddress` if the owning buffer has been cleared or
    /// dropped, or the owner's read error.
    pub fn payload(&self) -> SpillResult<Bytes> {
        match &self.state {
            BlobState::Unassigned(payload) => Ok(payload.clone()),
            BlobState::Addressed(blob) => {
                let stale = || SpillError::StaleBlobAddress {
                    address: blob.address,
                };
                let source = blob.source.upgrade().ok_or_else(stale)?;
                if source.is_cleared() {
                    return Err(stale());
                }
                if let Some(payload) = blob.payload.get() {
                    return Ok(payload.clone());
                }
                let payload = source.read(blob.address.slot())?;
                Ok(blob.payload.get_or_init(|| payload).clone())
            }
        }
    }

    /// Compares payloads, propagating resolution failures.
    ///
    /// # Errors
    ///
    /// Returns the error of whichever payload could not be resolved.
    pub fn content_eq(&self, other: &Self) -> SpillResult<bool> {
        Ok(self.payload()? == other.payload()?)
    }

    /// Returns true if both cells are the same wrapper instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        match (&self.state, &other.state) {
            (BlobState::Addressed(a), BlobState::Addressed(b)) => Arc::ptr_eq(a, b),
            (BlobState::Unassigned(a), BlobState::Unassigned(b)) => {
                a.as_ptr() == b.as_ptr() && a.len() == b.len()
            }
            _ => false,
        }
    }
}

impl PartialEq for BlobCell {
    fn eq(&self, other: &Self) -> bool {
        match self.content_eq(other) {
            Ok(equal) => equal,
            Err(_) => self.address() == other.address() && self.owner() == other.owner(),
        }
    }
}

impl fmt::Debug for BlobCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            BlobState::Unassigned(payload) => f
                .debug_struct("BlobCell")
                .field("state", &"unassigned")
                .field("len", &payload.len())
                .finish(),
            BlobState::Addressed(blob) => f
                .debug_struct("BlobCell")
                .field("address", &blob.address)
                .field("owner", &blob.owner)
                .field("resolved", &blob.payload.get().is_some())
                .finish(),
        }
    }
}
