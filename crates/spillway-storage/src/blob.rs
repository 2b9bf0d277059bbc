//! Per-buffer blob storage.
//!
//! Payloads are appended to one file per buffer and located through a slot
//! directory. Recently resolved payloads are kept in a small LRU so repeated
//! reads of the same cell do not touch the file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use spillway_cache::SyncLruCache;
use spillway_common::error::{SpillError, SpillResult};
use spillway_common::types::{BlobAddress, BlobSource, BufferId, BufferKey};

use crate::context::delete_file;

/// Location of one payload in the blob file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEntry {
    /// Byte offset of the payload.
    pub offset: u64,
    /// Payload length.
    pub len: u32,
}

struct BlobFile {
    handle: Option<File>,
    slots: Vec<SlotEntry>,
    end: u64,
}

/// Blob slots owned by one buffer.
pub struct BlobStore {
    owner: BufferKey,
    id: BufferId,
    path: PathBuf,
    file: Mutex<BlobFile>,
    cache: SyncLruCache<u32, Bytes>,
    cleared: AtomicBool,
}

impl BlobStore {
    /// Creates an empty store; the file is created on first allocation.
    pub fn new(owner: BufferKey, id: BufferId, path: PathBuf, cache_size: usize) -> Self {
        Self {
            owner,
            id,
            path,
            file: Mutex::new(BlobFile {
                handle: None,
                slots: Vec::new(),
                end: 0,
            }),
            cache: SyncLruCache::new(cache_size.max(1)),
            cleared: AtomicBool::new(false),
        }
    }

    /// Recreates a store from exported bytes and directory.
    pub fn import(
        owner: BufferKey,
        id: BufferId,
        path: PathBuf,
        cache_size: usize,
        bytes: &[u8],
        slots: Vec<SlotEntry>,
    ) -> SpillResult<Self> {
        let end = bytes.len() as u64;
        if let Some(bad) = slots
            .iter()
            .find(|slot| slot.offset + u64::from(slot.len) > end)
        {
            return Err(SpillError::corruption(format!(
                "blob slot at offset {} with length {} exceeds blob data of {end} bytes",
                bad.offset, bad.len
            )));
        }

        let handle = if slots.is_empty() && bytes.is_empty() {
            None
        } else {
            let mut handle = open_blob_file(&path)?;
            handle.write_all(bytes)?;
            Some(handle)
        };

        let store = Self::new(owner, id, path, cache_size);
        *store.file.lock() = BlobFile { handle, slots, end };
        Ok(store)
    }

    /// Returns the id used in addresses of this store's blobs.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Returns the blob file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of allocated slots.
    pub fn slot_count(&self) -> usize {
        self.file.lock().slots.len()
    }

    /// Returns the number of payload bytes stored.
    pub fn stored_bytes(&self) -> u64 {
        self.file.lock().end
    }

    /// Stores a payload and returns its slot.
    pub fn allocate(&self, payload: Bytes) -> SpillResult<u32> {
        if self.is_cleared() {
            return Err(SpillError::illegal_state(
                "cannot allocate a blob slot in a cleared buffer",
            ));
        }
        let len = u32::try_from(payload.len())
            .map_err(|_| SpillError::invalid_argument("blob payload exceeds 4 GiB"))?;

        let slot = {
            let mut file = self.file.lock();
            let BlobFile { handle, slots, end } = &mut *file;
            if handle.is_none() {
                *handle = Some(open_blob_file(&self.path)?);
            }
            let handle = handle
                .as_mut()
                .ok_or_else(|| SpillError::internal("blob file not open"))?;
            handle.seek(SeekFrom::Start(*end))?;
            handle.write_all(&payload)?;

            let slot = u32::try_from(slots.len())
                .map_err(|_| SpillError::internal("blob slot index overflow"))?;
            slots.push(SlotEntry { offset: *end, len });
            *end += u64::from(len);
            slot
        };

        self.cache.insert(slot, payload);
        Ok(slot)
    }

    /// Forces stored payloads to disk.
    pub fn sync(&self) -> SpillResult<()> {
        let mut file = self.file.lock();
        if let Some(handle) = file.handle.as_mut() {
            handle.flush()?;
            handle.sync_data()?;
        }
        Ok(())
    }

    /// Returns the raw blob file contents and the slot directory.
    pub fn export(&self) -> SpillResult<(Vec<u8>, Vec<SlotEntry>)> {
        if self.is_cleared() {
            return Err(SpillError::illegal_state("cannot export a cleared blob store"));
        }
        let mut file = self.file.lock();
        let end = file.end;
        let slots = file.slots.clone();
        let mut bytes = Vec::with_capacity(usize::try_from(end).unwrap_or(0));
        if let Some(handle) = file.handle.as_mut() {
            handle.seek(SeekFrom::Start(0))?;
            Read::by_ref(handle).take(end).read_to_end(&mut bytes)?;
        }
        Ok((bytes, slots))
    }

    /// Releases the storage; later reads fail with a stale address error.
    ///
    /// Idempotent.
    pub fn clear(&self) {
        if self.cleared.swap(true, Ordering::AcqRel) {
            return;
        }
        let had_file = {
            let mut file = self.file.lock();
            file.slots.clear();
            file.end = 0;
            file.handle.take().is_some()
        };
        self.cache.clear();
        if had_file {
            delete_file(&self.path);
        }
    }
}

impl BlobSource for BlobStore {
    fn owner(&self) -> BufferKey {
        self.owner
    }

    fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::Acquire)
    }

    fn read(&self, slot: u32) -> SpillResult<Bytes> {
        let stale = || SpillError::StaleBlobAddress {
            address: BlobAddress::new(self.id, slot),
        };
        if self.is_cleared() {
            return Err(stale());
        }
        if let Some(payload) = self.cache.get(&slot) {
            return Ok(payload);
        }

        let payload = {
            let mut file = self.file.lock();
            let entry = *file.slots.get(slot as usize).ok_or_else(stale)?;
            let handle = file.handle.as_mut().ok_or_else(stale)?;
            handle.seek(SeekFrom::Start(entry.offset))?;
            let mut bytes = vec![0u8; entry.len as usize];
            handle.read_exact(&mut bytes)?;
            Bytes::from(bytes)
        };
        self.cache.insert(slot, payload.clone());
        Ok(payload)
    }
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStore")
            .field("owner", &self.owner)
            .field("id", &self.id)
            .field("slots", &self.slot_count())
            .field("cleared", &self.is_cleared())
            .finish()
    }
}

fn open_blob_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_common::error::ErrorCode;

    fn store(dir: &Path, cache_size: usize) -> BlobStore {
        BlobStore::new(
            BufferKey::new(1),
            BufferId::new(4),
            dir.join("buffer-1.blobs"),
            cache_size,
        )
    }

    #[test]
    fn test_file_created_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 4);
        assert!(!store.path().exists());

        store.allocate(Bytes::from_static(b"abc")).unwrap();
        assert!(store.path().exists());
        assert_eq!(store.slot_count(), 1);
        assert_eq!(store.stored_bytes(), 3);
    }

    #[test]
    fn test_reads_survive_cache_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1);
        let slots: Vec<u32> = (0..5u8)
            .map(|i| store.allocate(Bytes::from(vec![i; 100])).unwrap())
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 4]);

        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(store.read(*slot).unwrap(), Bytes::from(vec![i as u8; 100]));
        }
    }

    #[test]
    fn test_clear_makes_addresses_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 4);
        let slot = store.allocate(Bytes::from_static(b"payload")).unwrap();

        store.clear();
        store.clear();
        assert!(store.is_cleared());
        assert!(!store.path().exists());

        let err = store.read(slot).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StaleBlobAddress);
        assert_eq!(
            err.to_string(),
            "blob address 4:0 is stale, its owning buffer has been cleared"
        );
        assert!(store.allocate(Bytes::from_static(b"x")).is_err());
    }

    #[test]
    fn test_export_import() {
        let dir = tempfile::tempdir().unwrap();
        let source = store(dir.path(), 2);
        source.allocate(Bytes::from_static(b"first")).unwrap();
        source.allocate(Bytes::from_static(b"second")).unwrap();
        source.sync().unwrap();

        let (bytes, slots) = source.export().unwrap();
        assert_eq!(bytes, b"firstsecond");

        let copy = BlobStore::import(
            BufferKey::new(2),
            BufferId::new(5),
            dir.path().join("buffer-2.blobs"),
            2,
            &bytes,
            slots.clone(),
        )
        .unwrap();
        assert_eq!(copy.read(1).unwrap(), Bytes::from_static(b"second"));
        assert_eq!(copy.read(0).unwrap(), Bytes::from_static(b"first"));

        let mut bad = slots;
        bad[1].len = 100;
        assert!(BlobStore::import(
            BufferKey::new(3),
            BufferId::new(6),
            dir.path().join("buffer-3.blobs"),
            2,
            &bytes,
            bad,
        )
        .is_err());
    }
}
