//! Residency policies applied when a buffer closes, finishes writing, or is
//! restored from disk.

use std::sync::Arc;

use spillway_common::config::StorageSettings;
use spillway_common::types::BufferKey;

use crate::context::{RowList, TableCache};

/// How a buffer moves between memory and disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Spill synchronously once the table outgrows memory; small tables stay
    /// hard-cached until an alert writes them out. A table read back into
    /// memory stays hard-cached until the next alert.
    MemorizeIfSmall,
    /// Keep tables in the recency-bounded cache, mirror them to disk, and
    /// restore them into memory on a cache miss.
    SoftRefLru,
}

/// What to do with a table at close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClosePlan {
    pub fits_into_memory: bool,
    pub restore_on_miss: bool,
    pub register_flusher: bool,
    pub write_now: bool,
}

impl Lifecycle {
    /// Picks the lifecycle configured by `settings`.
    pub fn for_settings(settings: &StorageSettings) -> Self {
        if settings.use_lru() {
            Self::SoftRefLru
        } else {
            Self::MemorizeIfSmall
        }
    }

    /// Returns true if the buffer spills while rows are still being added.
    pub fn spills_while_writing(self) -> bool {
        matches!(self, Self::MemorizeIfSmall)
    }

    pub(crate) fn plan_close(self, rows: usize, max_rows_in_memory: usize) -> ClosePlan {
        let small = rows <= max_rows_in_memory;
        match self {
            Self::MemorizeIfSmall => ClosePlan {
                fits_into_memory: small,
                restore_on_miss: false,
                register_flusher: small,
                write_now: !small,
            },
            Self::SoftRefLru => ClosePlan {
                fits_into_memory: true,
                restore_on_miss: true,
                register_flusher: small,
                write_now: !small,
            },
        }
    }

    /// Applied once the disk mirror is durable.
    pub(crate) fn after_write(self, cache: &TableCache, key: BufferKey) {
        match self {
            Self::MemorizeIfSmall => {
                cache.invalidate(key);
            }
            Self::SoftRefLru => cache.clear_for_garbage_collection(key),
        }
    }

    /// Applied once a restore has read every row back.
    pub(crate) fn after_restore(self, cache: &TableCache, key: BufferKey, rows: &Arc<RowList>) {
        match self {
            Self::MemorizeIfSmall => cache.put(key, Arc::clone(rows)),
            Self::SoftRefLru => {
                cache.put(key, Arc::clone(rows));
                cache.clear_for_garbage_collection(key);
            }
        }
    }

    /// Returns true if a restored list is dropped from the cache at the next
    /// memory alert.
    pub(crate) fn invalidates_restored(self) -> bool {
        matches!(self, Self::MemorizeIfSmall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_cache::Residency;

    #[test]
    fn test_for_settings() {
        let lru = StorageSettings::default();
        assert_eq!(Lifecycle::for_settings(&lru), Lifecycle::SoftRefLru);

        let plain = StorageSettings::builder().with_use_lru(false).build().unwrap();
        assert_eq!(Lifecycle::for_settings(&plain), Lifecycle::MemorizeIfSmall);
        assert!(Lifecycle::MemorizeIfSmall.spills_while_writing());
        assert!(!Lifecycle::SoftRefLru.spills_while_writing());
    }

    #[test]
    fn test_close_plans() {
        let small = Lifecycle::SoftRefLru.plan_close(10, 10);
        assert!(small.register_flusher && !small.write_now && small.restore_on_miss);

        let large = Lifecycle::SoftRefLru.plan_close(11, 10);
        assert!(!large.register_flusher && large.write_now && large.fits_into_memory);

        let memorized = Lifecycle::MemorizeIfSmall.plan_close(3, 10);
        assert!(memorized.register_flusher && !memorized.restore_on_miss);
    }

    #[test]
    fn test_after_write() {
        let cache = TableCache::new(4, true);
        let key = BufferKey::new(1);

        cache.put_pending(key, Arc::new(Vec::new()));
        Lifecycle::SoftRefLru.after_write(&cache, key);
        assert_eq!(cache.residency(key), Residency::Soft);

        Lifecycle::MemorizeIfSmall.after_write(&cache, key);
        assert_eq!(cache.residency(key), Residency::Absent);
    }

    #[test]
    fn test_after_restore() {
        let cache = TableCache::new(4, true);
        let key = BufferKey::new(2);
        let rows = Arc::new(Vec::new());

        Lifecycle::MemorizeIfSmall.after_restore(&cache, key, &rows);
        assert_eq!(cache.residency(key), Residency::Hard);
        assert!(Lifecycle::MemorizeIfSmall.invalidates_restored());
        assert!(!Lifecycle::SoftRefLru.invalidates_restored());

        Lifecycle::SoftRefLru.after_restore(&cache, key, &rows);
        assert_eq!(cache.residency(key), Residency::Soft);
        assert_eq!(cache.reclaim(), 1);
    }
}
