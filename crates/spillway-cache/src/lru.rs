//! Recency ordering with displacement reporting.
//!
//! Entries live in a slab and are chained most recently used first through
//! slab indices, so every operation is O(1) and no pointer juggling is
//! needed. [`LruCache::push`] returns the entry it pushed out; the buffer
//! cache demotes that entry instead of dropping it.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

use crate::stats::CacheStats;

/// Outcome of [`LruCache::push`].
#[derive(Debug, PartialEq, Eq)]
pub enum Pushed<K, V> {
    /// New key, and there was room.
    Inserted,
    /// Existing key; the previous value.
    Replaced(V),
    /// New key; the least recently used entry that made room.
    Displaced(K, V),
}

struct Slot<K, V> {
    key: K,
    value: V,
    newer: Option<usize>,
    older: Option<usize>,
}

/// A bounded map ordered by recency of use.
///
/// ```
/// use spillway_cache::lru::{LruCache, Pushed};
///
/// let mut recency = LruCache::new(2);
/// recency.insert("a", 1);
/// recency.insert("b", 2);
/// recency.get(&"a");
/// assert_eq!(recency.push("c", 3), Pushed::Displaced("b", 2));
/// ```
pub struct LruCache<K, V> {
    capacity: usize,
    index: HashMap<K, usize>,
    slots: Vec<Option<Slot<K, V>>>,
    vacant: Vec<usize>,
    /// Most recently used.
    newest: Option<usize>,
    /// Least recently used.
    oldest: Option<usize>,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// Creates a list holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            vacant: Vec::new(),
            newest: None,
            oldest: None,
            stats: CacheStats::new(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the value for `key` and makes it the most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.stats.record_access();
        let Some(&at) = self.index.get(key) else {
            self.stats.record_miss();
            return None;
        };
        self.stats.record_hit();
        self.detach(at);
        self.attach_newest(at);
        self.slots[at].as_ref().map(|slot| &slot.value)
    }

    /// Returns the value for `key` without changing the order.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let at = *self.index.get(key)?;
        self.slots[at].as_ref().map(|slot| &slot.value)
    }

    /// Returns true if `key` is present; the order is unchanged.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Inserts `value`, returning the value it replaced.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.push(key, value) {
            Pushed::Replaced(old) => Some(old),
            Pushed::Inserted | Pushed::Displaced(..) => None,
        }
    }

    /// Inserts `value` as the most recently used entry.
    pub fn push(&mut self, key: K, value: V) -> Pushed<K, V> {
        self.stats.record_insert();

        if let Some(&at) = self.index.get(&key) {
            self.detach(at);
            self.attach_newest(at);
            return match self.slots[at].as_mut() {
                Some(slot) => Pushed::Replaced(std::mem::replace(&mut slot.value, value)),
                None => Pushed::Inserted,
            };
        }

        let displaced = if self.index.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };

        let slot = Slot {
            key: key.clone(),
            value,
            newer: None,
            older: None,
        };
        let at = match self.vacant.pop() {
            Some(at) => {
                self.slots[at] = Some(slot);
                at
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, at);
        self.attach_newest(at);

        match displaced {
            Some((key, value)) => Pushed::Displaced(key, value),
            None => Pushed::Inserted,
        }
    }

    /// Removes `key`.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let at = self.index.remove(key)?;
        self.take(at).map(|(_, value)| value)
    }

    /// Removes the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let at = self.oldest?;
        let entry = self.take(at)?;
        self.index.remove(&entry.0);
        Some(entry)
    }

    /// Changes the capacity, returning the entries that no longer fit,
    /// least recently used first.
    pub fn set_capacity(&mut self, capacity: usize) -> Vec<(K, V)> {
        self.capacity = capacity.max(1);
        let mut displaced = Vec::new();
        while self.index.len() > self.capacity {
            match self.evict_oldest() {
                Some(entry) => displaced.push(entry),
                None => break,
            }
        }
        displaced
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.newest;
        while let Some(slot) = cursor.and_then(|at| self.slots[at].as_ref()) {
            keys.push(slot.key.clone());
            cursor = slot.older;
        }
        keys
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.vacant.clear();
        self.newest = None;
        self.oldest = None;
    }

    /// Operation counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn evict_oldest(&mut self) -> Option<(K, V)> {
        let entry = self.pop_lru()?;
        self.stats.record_eviction();
        Some(entry)
    }

    /// Unchains and frees slot `at`; the index is left to the caller.
    fn take(&mut self, at: usize) -> Option<(K, V)> {
        self.detach(at);
        let slot = self.slots[at].take()?;
        self.vacant.push(at);
        Some((slot.key, slot.value))
    }

    fn detach(&mut self, at: usize) {
        let Some((newer, older)) = self.slots[at].as_ref().map(|s| (s.newer, s.older)) else {
            return;
        };
        match newer {
            Some(n) => self.link(n, |s| s.older = older),
            None => self.newest = older,
        }
        match older {
            Some(o) => self.link(o, |s| s.newer = newer),
            None => self.oldest = newer,
        }
        self.link(at, |s| {
            s.newer = None;
            s.older = None;
        });
    }

    fn attach_newest(&mut self, at: usize) {
        let previous = self.newest;
        self.link(at, |s| {
            s.newer = None;
            s.older = previous;
        });
        if let Some(p) = previous {
            self.link(p, |s| s.newer = Some(at));
        }
        self.newest = Some(at);
        if self.oldest.is_none() {
            self.oldest = Some(at);
        }
    }

    fn link(&mut self, at: usize, update: impl FnOnce(&mut Slot<K, V>)) {
        if let Some(slot) = self.slots[at].as_mut() {
            update(slot);
        }
    }
}

/// An [`LruCache`] behind a mutex, handing out clones.
pub struct SyncLruCache<K, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> SyncLruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns a clone of the value for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().get(key).cloned()
    }

    /// Inserts `value`, returning the value it replaced.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.lock().insert(key, value)
    }

    /// Removes `key`.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().remove(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl<K, V> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("len", &self.index.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
