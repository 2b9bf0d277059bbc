//! Operation counters for the caches.
//!
//! Counters are relaxed atomics: they are taken for diagnostics and tests,
//! never to make decisions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Something a cache counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    /// Lookup of any kind.
    Access,
    /// Lookup that found a value.
    Hit,
    /// Lookup that found nothing.
    Miss,
    /// Insert or replace.
    Insert,
    /// Entry pushed out by capacity.
    Eviction,
    /// Explicit removal.
    Removal,
    /// Hard entry made soft.
    Demotion,
    /// Soft entry made hard again.
    Promotion,
    /// Soft entry dropped.
    Reclaim,
}

impl CacheEvent {
    const COUNT: usize = 9;

    fn slot(self) -> usize {
        self as usize
    }
}

/// Counters for one cache.
#[derive(Default)]
pub struct CacheStats {
    counts: [AtomicU64; CacheEvent::COUNT],
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Lookups.
    pub accesses: u64,
    /// Lookups that found a value.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Inserts.
    pub inserts: u64,
    /// Capacity evictions.
    pub evictions: u64,
    /// Explicit removals.
    pub removals: u64,
    /// Hard to soft transitions.
    pub demotions: u64,
    /// Soft to hard transitions.
    pub promotions: u64,
    /// Soft entries dropped.
    pub reclaims: u64,
}

impl StatsSnapshot {
    /// Fraction of lookups that hit, 0 when nothing was looked up.
    pub fn hit_ratio(&self) -> f64 {
        if self.accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.accesses as f64
        }
    }
}

impl CacheStats {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` occurrences of `event`.
    #[inline]
    pub fn add(&self, event: CacheEvent, n: u64) {
        self.counts[event.slot()].fetch_add(n, Ordering::Relaxed);
    }

    /// Current count of `event`.
    pub fn count(&self, event: CacheEvent) -> u64 {
        self.counts[event.slot()].load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn record_access(&self) {
        self.add(CacheEvent::Access, 1);
    }

    #[inline]
    pub(crate) fn record_hit(&self) {
        self.add(CacheEvent::Hit, 1);
    }

    #[inline]
    pub(crate) fn record_miss(&self) {
        self.add(CacheEvent::Miss, 1);
    }

    #[inline]
    pub(crate) fn record_insert(&self) {
        self.add(CacheEvent::Insert, 1);
    }

    #[inline]
    pub(crate) fn record_eviction(&self) {
        self.add(CacheEvent::Eviction, 1);
    }

    #[inline]
    pub(crate) fn record_removal(&self) {
        self.add(CacheEvent::Removal, 1);
    }

    #[inline]
    pub(crate) fn record_demotion(&self) {
        self.add(CacheEvent::Demotion, 1);
    }

    #[inline]
    pub(crate) fn record_promotion(&self) {
        self.add(CacheEvent::Promotion, 1);
    }

    #[inline]
    pub(crate) fn record_reclaims(&self, count: u64) {
        self.add(CacheEvent::Reclaim, count);
    }

    /// Lookups that found a value.
    pub fn hits(&self) -> u64 {
        self.count(CacheEvent::Hit)
    }

    /// Lookups that found nothing.
    pub fn misses(&self) -> u64 {
        self.count(CacheEvent::Miss)
    }

    /// Capacity evictions.
    pub fn evictions(&self) -> u64 {
        self.count(CacheEvent::Eviction)
    }

    /// Hard to soft transitions.
    pub fn demotions(&self) -> u64 {
        self.count(CacheEvent::Demotion)
    }

    /// Soft to hard transitions.
    pub fn promotions(&self) -> u64 {
        self.count(CacheEvent::Promotion)
    }

    /// Soft entries dropped.
    pub fn reclaims(&self) -> u64 {
        self.count(CacheEvent::Reclaim)
    }

    /// Copies every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accesses: self.count(CacheEvent::Access),
            hits: self.count(CacheEvent::Hit),
            misses: self.count(CacheEvent::Miss),
            inserts: self.count(CacheEvent::Insert),
            evictions: self.count(CacheEvent::Eviction),
            removals: self.count(CacheEvent::Removal),
            demotions: self.count(CacheEvent::Demotion),
            promotions: self.count(CacheEvent::Promotion),
            reclaims: self.count(CacheEvent::Reclaim),
        }
    }

    /// Sets every counter back to zero.
    pub fn reset(&self) {
        self.counts
            .iter()
            .for_each(|c| c.store(0, Ordering::Relaxed));
    }
}

impl fmt::Debug for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.snapshot(), f)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lookups ({:.1}% hit), {} demoted, {} promoted, {} reclaimed",
            self.accesses,
            self.hit_ratio() * 100.0,
            self.demotions,
            self.promotions,
            self.reclaims
        )
    }
}
