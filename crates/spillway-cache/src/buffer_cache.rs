//! Process-wide cache of in-memory row lists.
//!
//! ```text
//!              put / get (touch)
//!                     │
//!        ┌────────────▼────────────┐  capacity overflow,   ┌──────────────┐
//!        │ Hard  (recency list, k) │──────────────────────▶│ Soft         │
//!        │                         │  clear_for_gc         │ (revocable)  │
//!        └────────────▲────────────┘──────────────────────▶└──────┬───────┘
//!                     │          get promotes back                │ reclaim
//!                     └───────────────────────────────────────────┤
//!                                                                 ▼
//!                                                              Absent
//! ```
//!
//! Every entry is either hard-referenced, which keeps it resident until it is
//! invalidated or pushed out of the recency list, or soft, which keeps it
//! only until the next reclamation. Reclamation runs on memory alerts once
//! [`BufferCache::subscribe`] has been called, or on demand via
//! [`BufferCache::reclaim`].
//!
//! Entries stored with [`BufferCache::put_pending`] have no durable copy yet.
//! They may become soft but are not reclaimed before their owner calls
//! [`BufferCache::clear_for_garbage_collection`], which declares the copy
//! durable. The cache never re-derives data; that is the buffer's job.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use spillway_common::memory::{MemoryAlert, MemoryAlertListener, MemoryAlertSystem, Registration};
use spillway_common::types::BufferKey;
use tracing::debug;

use crate::lru::{LruCache, Pushed};
use crate::stats::CacheStats;

/// Residency of a buffer's row list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Resident until invalidated or pushed out of the recency list.
    Hard,
    /// Resident until the next reclamation.
    Soft,
    /// Not cached.
    Absent,
}

/// A best-effort handle the cache may revoke at any time.
struct SoftRef<V> {
    value: Option<Arc<V>>,
}

impl<V> SoftRef<V> {
    fn new(value: Arc<V>) -> Self {
        Self { value: Some(value) }
    }

    fn get(&self) -> Option<Arc<V>> {
        self.value.clone()
    }

    fn revoke(&mut self) {
        self.value = None;
    }
}

enum EntryState<V> {
    Hard(Arc<V>),
    Soft(SoftRef<V>),
}

struct Entry<V> {
    state: EntryState<V>,
    /// Whether the owner holds a durable copy elsewhere.
    backed: bool,
}

struct Inner<V> {
    entries: HashMap<BufferKey, Entry<V>>,
    /// Keys of hard entries, most recently used first.
    recency: LruCache<BufferKey, ()>,
    /// Whether the recency list bounds hard entries.
    bounded: bool,
}

impl<V> Inner<V> {
    /// Makes `key` the most recently used hard entry, demoting whatever the
    /// recency list displaces.
    fn touch_hard(&mut self, key: BufferKey, stats: &CacheStats) {
        if !self.bounded {
            return;
        }
        if let Pushed::Displaced(displaced, ()) = self.recency.push(key, ()) {
            self.demote(displaced, stats);
        }
    }

    fn demote(&mut self, key: BufferKey, stats: &CacheStats) {
        if let Some(entry) = self.entries.get_mut(&key) {
            if let EntryState::Hard(value) = &entry.state {
                entry.state = EntryState::Soft(SoftRef::new(Arc::clone(value)));
                stats.record_demotion();
            }
        }
        self.recency.remove(&key);
    }
}

/// Row lists keyed by buffer identity.
///
/// All operations take one internal lock; per-entry work under the lock is
/// O(1) except [`BufferCache::reclaim`], which scans the soft entries.
pub struct BufferCache<V> {
    inner: Mutex<Inner<V>>,
    stats: CacheStats,
}

impl<V: Send + Sync + 'static> BufferCache<V> {
    /// Creates a cache holding at most `capacity` hard entries.
    ///
    /// With `use_lru` unset the recency list is not applied and every entry
    /// stays hard until invalidated.
    pub fn new(capacity: usize, use_lru: bool) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: LruCache::new(capacity),
                bounded: use_lru,
            }),
            stats: CacheStats::new(),
        }
    }

    /// Registers a listener that reclaims soft entries on every alert.
    ///
    /// The listener lives as long as the returned registration.
    pub fn subscribe(self: &Arc<Self>, alerts: &Arc<MemoryAlertSystem>) -> Registration {
        alerts.register_guarded(Arc::new(Reclaimer {
            cache: Arc::downgrade(self),
        }))
    }

    /// Caches a row list the owner can re-derive.
    pub fn put(&self, key: BufferKey, rows: Arc<V>) {
        self.insert(key, rows, true);
    }

    /// Caches a row list that exists nowhere else yet.
    pub fn put_pending(&self, key: BufferKey, rows: Arc<V>) {
        self.insert(key, rows, false);
    }

    /// Returns the row list and marks it most recently used.
    ///
    /// A soft entry that has not been reclaimed becomes hard again.
    pub fn get(&self, key: BufferKey) -> Option<Arc<V>> {
        self.stats.record_access();
        let mut inner = self.inner.lock();
        let (value, promote) = match inner.entries.get(&key) {
            Some(Entry {
                state: EntryState::Hard(value),
                ..
            }) => (Some(Arc::clone(value)), false),
            Some(Entry {
                state: EntryState::Soft(soft),
                ..
            }) => (soft.get(), true),
            None => (None, false),
        };

        match value {
            Some(value) => {
                self.stats.record_hit();
                if promote && inner.bounded {
                    if let Some(entry) = inner.entries.get_mut(&key) {
                        entry.state = EntryState::Hard(Arc::clone(&value));
                    }
                    self.stats.record_promotion();
                }
                inner.touch_hard(key, &self.stats);
                Some(value)
            }
            None => {
                self.stats.record_miss();
                if promote {
                    // Revoked soft entry: forget it entirely.
                    inner.entries.remove(&key);
                }
                None
            }
        }
    }

    /// Returns the row list without touching recency or residency.
    pub fn get_silent(&self, key: BufferKey) -> Option<Arc<V>> {
        let inner = self.inner.lock();
        match &inner.entries.get(&key)?.state {
            EntryState::Hard(value) => Some(Arc::clone(value)),
            EntryState::Soft(soft) => soft.get(),
        }
    }

    /// Returns true if a row list is cached for `key`.
    pub fn contains(&self, key: BufferKey) -> bool {
        self.residency(key) != Residency::Absent
    }

    /// Returns the residency of `key`.
    pub fn residency(&self, key: BufferKey) -> Residency {
        let inner = self.inner.lock();
        match inner.entries.get(&key).map(|entry| &entry.state) {
            Some(EntryState::Hard(_)) => Residency::Hard,
            Some(EntryState::Soft(soft)) if soft.value.is_some() => Residency::Soft,
            _ => Residency::Absent,
        }
    }

    /// Removes the entry for `key`.
    ///
    /// Returns true if something was removed.
    pub fn invalidate(&self, key: BufferKey) -> bool {
        let mut inner = self.inner.lock();
        inner.recency.remove(&key);
        let removed = inner.entries.remove(&key).is_some();
        if removed {
            self.stats.record_removal();
        }
        removed
    }

    /// Demotes the entry to soft and declares the owner's copy durable.
    pub fn clear_for_garbage_collection(&self, key: BufferKey) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.backed = true;
        }
        inner.demote(key, &self.stats);
    }

    /// Revokes every soft entry whose owner holds a durable copy.
    ///
    /// Returns the number of entries reclaimed.
    pub fn reclaim(&self) -> usize {
        let mut inner = self.inner.lock();
        let mut reclaimed = Vec::new();
        for (key, entry) in &mut inner.entries {
            if let EntryState::Soft(soft) = &mut entry.state {
                if entry.backed {
                    soft.revoke();
                    reclaimed.push(*key);
                }
            }
        }
        for key in &reclaimed {
            inner.entries.remove(key);
        }
        drop(inner);

        if !reclaimed.is_empty() {
            self.stats.record_reclaims(reclaimed.len() as u64);
            debug!(count = reclaimed.len(), "reclaimed soft cache entries");
        }
        reclaimed.len()
    }

    /// Changes the recency list size, demoting entries that no longer fit.
    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        let displaced = inner.recency.set_capacity(capacity);
        for (key, ()) in displaced {
            inner.demote(key, &self.stats);
        }
    }

    /// Returns the recency list size.
    pub fn capacity(&self) -> usize {
        self.inner.lock().recency.capacity()
    }

    /// Returns the number of cached entries, hard and soft.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of hard entries.
    pub fn hard_len(&self) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|entry| matches!(entry.state, EntryState::Hard(_)))
            .count()
    }

    /// Drops every entry. Intended for shutdown and test isolation.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    // =========================================================================
    // Private helpers
    // =========================================================================

    fn insert(&self, key: BufferKey, rows: Arc<V>, backed: bool) {
        self.stats.record_insert();
        let mut inner = self.inner.lock();
        inner.entries.insert(
            key,
            Entry {
                state: EntryState::Hard(rows),
                backed,
            },
        );
        inner.touch_hard(key, &self.stats);
    }
}

impl<V> fmt::Debug for BufferCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BufferCache")
            .field("entries", &inner.entries.len())
            .field("hard", &inner.recency.len())
            .field("capacity", &inner.recency.capacity())
            .field("bounded", &inner.bounded)
            .finish()
    }
}

/// Alert listener that reclaims soft entries.
struct Reclaimer<V> {
    cache: Weak<BufferCache<V>>,
}

impl<V: Send + Sync + 'static> MemoryAlertListener for Reclaimer<V> {
    fn memory_alert(&self, _alert: &MemoryAlert) -> bool {
        match self.cache.upgrade() {
            Some(cache) => {
                cache.reclaim();
                false
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: u64) -> BufferKey {
        BufferKey::new(i)
    }

    fn rows(i: u64) -> Arc<Vec<u64>> {
        Arc::new(vec![i; 4])
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = BufferCache::new(4, true);
        cache.put(key(1), rows(1));

        assert_eq!(cache.get(key(1)).as_deref(), Some(&vec![1; 4]));
        assert!(cache.contains(key(1)));
        assert!(cache.invalidate(key(1)));
        assert!(!cache.invalidate(key(1)));
        assert!(cache.get(key(1)).is_none());
        assert!(!cache.contains(key(1)));
    }

    #[test]
    fn test_overflow_demotes_least_recent() {
        let cache = BufferCache::new(2, true);
        cache.put(key(0), rows(0));
        cache.put(key(1), rows(1));
        cache.put(key(2), rows(2));

        assert_eq!(cache.residency(key(0)), Residency::Soft);
        assert_eq!(cache.residency(key(1)), Residency::Hard);
        assert_eq!(cache.residency(key(2)), Residency::Hard);
        assert_eq!(cache.hard_len(), 2);
        assert_eq!(cache.stats().demotions(), 1);
    }

    #[test]
    fn test_recency_scenario() {
        let k = 10;
        let cache = BufferCache::new(k, true);
        for i in 0..k as u64 {
            cache.put(key(i), rows(i));
        }
        for i in 0..k as u64 {
            assert!(cache.get(key(i)).is_some());
        }
        cache.put(key(10), rows(10));

        // Each get of a soft entry promotes it and demotes the next one.
        for i in 0..k as u64 {
            assert!(cache.get(key(i)).is_some(), "buffer {i} missing");
        }
        assert_eq!(cache.residency(key(10)), Residency::Soft);

        cache.reclaim();
        assert!(cache.get(key(10)).is_none());
        for i in 0..k as u64 {
            assert!(cache.get(key(i)).is_some(), "buffer {i} reclaimed");
        }
    }

    #[test]
    fn test_clear_for_gc_demotes_immediately() {
        let cache = BufferCache::new(4, true);
        cache.put_pending(key(1), rows(1));
        cache.clear_for_garbage_collection(key(1));
        assert_eq!(cache.residency(key(1)), Residency::Soft);

        // get_silent neither promotes nor touches
        assert!(cache.get_silent(key(1)).is_some());
        assert_eq!(cache.residency(key(1)), Residency::Soft);

        assert_eq!(cache.reclaim(), 1);
        assert_eq!(cache.residency(key(1)), Residency::Absent);
        assert!(cache.get_silent(key(1)).is_none());
    }

    #[test]
    fn test_pending_entries_survive_reclaim() {
        let cache = BufferCache::new(1, true);
        cache.put_pending(key(1), rows(1));
        cache.put(key(2), rows(2));
        assert_eq!(cache.residency(key(1)), Residency::Soft);

        assert_eq!(cache.reclaim(), 0);
        assert!(cache.contains(key(1)));

        cache.clear_for_garbage_collection(key(1));
        assert_eq!(cache.reclaim(), 1);
        assert!(!cache.contains(key(1)));
    }

    #[test]
    fn test_reclaim_drops_last_reference() {
        let cache = BufferCache::new(4, true);
        let list = rows(7);
        let weak = Arc::downgrade(&list);
        cache.put(key(7), list);
        cache.clear_for_garbage_collection(key(7));
        assert!(weak.upgrade().is_some());

        cache.reclaim();
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_unbounded_mode_keeps_entries_hard() {
        let cache = BufferCache::new(1, false);
        for i in 0..5 {
            cache.put(key(i), rows(i));
        }
        assert_eq!(cache.hard_len(), 5);
        assert_eq!(cache.reclaim(), 0);

        cache.clear_for_garbage_collection(key(3));
        assert_eq!(cache.residency(key(3)), Residency::Soft);
        // Without a recency list a soft hit stays soft.
        assert!(cache.get(key(3)).is_some());
        assert_eq!(cache.residency(key(3)), Residency::Soft);
    }

    #[test]
    fn test_set_capacity_demotes() {
        let cache = BufferCache::new(4, true);
        for i in 0..4 {
            cache.put(key(i), rows(i));
        }
        cache.set_capacity(2);
        assert_eq!(cache.capacity(), 2);
        assert_eq!(cache.hard_len(), 2);
        assert_eq!(cache.residency(key(0)), Residency::Soft);
        assert_eq!(cache.residency(key(3)), Residency::Hard);
    }

    #[test]
    fn test_subscribed_cache_reclaims_on_alert() {
        let alerts = Arc::new(MemoryAlertSystem::new());
        let cache = Arc::new(BufferCache::new(4, true));
        let registration = cache.subscribe(&alerts);

        cache.put(key(1), rows(1));
        cache.clear_for_garbage_collection(key(1));
        alerts.send_alert();
        assert!(!cache.contains(key(1)));

        // The reclaimer stays registered across alerts.
        assert_eq!(alerts.number_of_listeners(), 1);
        drop(registration);
        assert_eq!(alerts.number_of_listeners(), 0);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(BufferCache::new(8, true));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200u64 {
                        let k = key(t * 1000 + i % 16);
                        cache.put(k, rows(i));
                        let _ = cache.get(k);
                        if i % 7 == 0 {
                            cache.clear_for_garbage_collection(k);
                            cache.reclaim();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.hard_len() <= 8);
    }
}
