//! Caching for spillway.
//!
//! This crate provides the caches that decide which tables stay in memory:
//!
//! - **LRU list**: slab-backed recency map with O(1) operations,
//!   reporting the entries it displaces
//! - **Buffer cache**: row lists keyed by buffer identity, hard-referenced
//!   while recently used and demoted to a reclaimable soft state otherwise
//! - **Statistics**: atomic counters for monitoring
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use spillway_cache::{BufferCache, Residency};
//! use spillway_common::types::BufferKey;
//!
//! let cache: BufferCache<Vec<u32>> = BufferCache::new(2, true);
//! let key = BufferKey::new(1);
//! cache.put(key, Arc::new(vec![1, 2, 3]));
//! assert_eq!(cache.residency(key), Residency::Hard);
//!
//! cache.clear_for_garbage_collection(key);
//! assert_eq!(cache.residency(key), Residency::Soft);
//!
//! cache.reclaim();
//! assert!(!cache.contains(key));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer_cache;
pub mod lru;
pub mod stats;

pub use buffer_cache::{BufferCache, Residency};
pub use lru::{LruCache, Pushed, SyncLruCache};
pub use stats::{CacheEvent, CacheStats, StatsSnapshot};
