//! Row key uniqueness.
//!
//! Keys collect in a hash set. Once the set reaches its bound it is written,
//! sorted, to an anonymous temp file and only every `INDEX_STRIDE`th key of
//! that chunk stays in memory. A lookup then costs one short read per chunk
//! whose key range covers the key.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use spillway_common::error::{SpillError, SpillResult};
use spillway_common::types::RowKey;
use tracing::debug;

const INDEX_STRIDE: usize = 64;

/// Sorted keys on disk, each a little-endian `u32` length then UTF-8 bytes.
#[derive(Debug)]
struct SortedChunk {
    file: File,
    /// Every `INDEX_STRIDE`th key and its byte offset, starting with the first.
    index: Vec<(RowKey, u64)>,
    last: RowKey,
    len: usize,
}

impl SortedChunk {
    /// Writes `keys`, which must be sorted, into a new file under `dir`.
    fn write(dir: &Path, keys: &[RowKey]) -> io::Result<Self> {
        let Some(last) = keys.last().cloned() else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty key chunk"));
        };
        let mut file = tempfile::tempfile_in(dir)?;
        let mut index = Vec::with_capacity(keys.len() / INDEX_STRIDE + 1);
        let mut out = BufWriter::new(&mut file);
        let mut offset = 0u64;
        for (i, key) in keys.iter().enumerate() {
            if i % INDEX_STRIDE == 0 {
                index.push((key.clone(), offset));
            }
            let bytes = key.as_str().as_bytes();
            let len = u32::try_from(bytes.len())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "row key too long"))?;
            out.write_all(&len.to_le_bytes())?;
            out.write_all(bytes)?;
            offset += 4 + u64::from(len);
        }
        out.flush()?;
        drop(out);
        Ok(Self {
            file,
            index,
            last,
            len: keys.len(),
        })
    }

    fn contains(&self, key: &RowKey) -> io::Result<bool> {
        match self.index.first() {
            Some((first, _)) if first <= key && key <= &self.last => {}
            _ => return Ok(false),
        }
        let block = self.index.partition_point(|(k, _)| k <= key) - 1;
        let offset = self.index[block].1;
        let count = INDEX_STRIDE.min(self.len - block * INDEX_STRIDE);

        let mut input = BufReader::new(&self.file);
        input.seek(SeekFrom::Start(offset))?;
        let target = key.as_str().as_bytes();
        let mut len = [0u8; 4];
        let mut bytes = Vec::new();
        for _ in 0..count {
            input.read_exact(&mut len)?;
            bytes.resize(u32::from_le_bytes(len) as usize, 0);
            input.read_exact(&mut bytes)?;
            match bytes.as_slice().cmp(target) {
                std::cmp::Ordering::Less => {}
                std::cmp::Ordering::Equal => return Ok(true),
                std::cmp::Ordering::Greater => return Ok(false),
            }
        }
        Ok(false)
    }
}

#[derive(Debug)]
struct SpillTarget {
    dir: PathBuf,
    max_keys: usize,
}

/// Remembers every row key added to a container.
///
/// Built with [`new`](Self::new) it keeps every key in memory, roughly the
/// key length plus 40 bytes each. Built with [`spilling`](Self::spilling)
/// it holds at most `max_keys` keys in memory plus one index key in
/// `INDEX_STRIDE` (64) of those spilled to disk.
#[derive(Debug, Default)]
pub struct DuplicateChecker {
    keys: HashSet<RowKey>,
    chunks: Vec<SortedChunk>,
    spill: Option<SpillTarget>,
}

impl DuplicateChecker {
    /// Creates an empty checker holding all keys in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty checker that moves keys to files under `dir` once
    /// `max_keys` are held in memory.
    pub fn spilling(dir: impl Into<PathBuf>, max_keys: usize) -> Self {
        Self {
            spill: Some(SpillTarget {
                dir: dir.into(),
                max_keys: max_keys.max(1),
            }),
            ..Self::default()
        }
    }

    /// Records `key`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if it was recorded before; the set is unchanged.
    /// `Io` if spilled keys cannot be written or read back.
    pub fn add(&mut self, key: &RowKey) -> SpillResult<()> {
        if self.keys.contains(key) {
            return Err(SpillError::duplicate_key(key));
        }
        for chunk in &self.chunks {
            if chunk.contains(key)? {
                return Err(SpillError::duplicate_key(key));
            }
        }
        if matches!(&self.spill, Some(target) if self.keys.len() >= target.max_keys) {
            self.spill_keys()?;
        }
        self.keys.insert(key.clone());
        Ok(())
    }

    fn spill_keys(&mut self) -> SpillResult<()> {
        let Some(target) = &self.spill else {
            return Ok(());
        };
        let mut keys: Vec<RowKey> = self.keys.iter().cloned().collect();
        keys.sort_unstable();
        let chunk = SortedChunk::write(&target.dir, &keys)?;
        debug!(keys = chunk.len, chunks = self.chunks.len() + 1, "row keys spilled");
        self.chunks.push(chunk);
        self.keys.clear();
        self.keys.shrink_to_fit();
        Ok(())
    }

    /// Returns the number of recorded keys.
    pub fn len(&self) -> usize {
        self.keys.len() + self.chunks.iter().map(|c| c.len).sum::<usize>()
    }

    /// Returns true if no key was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently held in memory.
    pub fn keys_in_memory(&self) -> usize {
        self.keys.len()
    }

    /// Number of sorted key files written so far.
    pub fn spilled_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Forgets every key and removes the key files.
    pub fn clear(&mut self) {
        self.keys.clear();
        self.keys.shrink_to_fit();
        self.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: u32) -> RowKey {
        RowKey::new(format!("Row{i}"))
    }

    #[test]
    fn test_rejects_duplicates() {
        let mut checker = DuplicateChecker::new();
        checker.add(&RowKey::new("Row0")).unwrap();
        checker.add(&RowKey::new("Row1")).unwrap();

        let err = checker.add(&RowKey::new("Row0")).unwrap_err();
        assert!(matches!(err, SpillError::DuplicateKey { .. }));
        assert!(err.is_recoverable());
        assert_eq!(checker.len(), 2);

        checker.clear();
        assert!(checker.is_empty());
        checker.add(&RowKey::new("Row0")).unwrap();
    }

    #[test]
    fn test_memory_is_bounded_by_spilling() {
        let dir = tempfile::tempdir().unwrap();
        let mut checker = DuplicateChecker::spilling(dir.path(), 50);
        // Stride 7 over 1000 visits every key once, out of order.
        let order: Vec<u32> = (0..1000).map(|i| (i * 7) % 1000).collect();
        for &i in &order {
            checker.add(&key(i)).unwrap();
            assert!(checker.keys_in_memory() <= 50);
        }
        assert_eq!(checker.len(), 1000);
        assert!(checker.spilled_chunks() >= 19);

        for i in [0, 1, 63, 64, 65, 500, 998, 999] {
            let err = checker.add(&key(i)).unwrap_err();
            assert!(matches!(err, SpillError::DuplicateKey { .. }));
        }
        // Between, before and after every key range.
        for fresh in ["Row", "Row0a", "Row5000", "Rox", "A"] {
            checker.add(&RowKey::new(fresh)).unwrap();
        }
        assert_eq!(checker.len(), 1005);

        checker.clear();
        assert_eq!(checker.spilled_chunks(), 0);
        checker.add(&key(0)).unwrap();
    }

    #[test]
    fn test_chunk_lookup_across_index_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut keys: Vec<RowKey> = (0..200).map(|i| key(i * 2)).collect();
        keys.sort_unstable();
        let chunk = SortedChunk::write(dir.path(), &keys).unwrap();
        assert_eq!(chunk.index.len(), 4);

        for k in &keys {
            assert!(chunk.contains(k).unwrap(), "{k}");
        }
        for i in (0..200).map(|i| i * 2 + 1) {
            assert!(!chunk.contains(&key(i)).unwrap());
        }
        assert!(SortedChunk::write(dir.path(), &[]).is_err());
    }
}
