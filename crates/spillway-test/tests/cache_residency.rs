//! Hard and soft residency in the buffer cache.

use std::sync::Arc;

use spillway_cache::{BufferCache, Residency};
use spillway_common::memory::MemoryAlertSystem;
use spillway_common::types::BufferKey;

fn key(i: u64) -> BufferKey {
    BufferKey::from(i)
}

#[test]
fn test_recently_used_entries_survive_reclamation() {
    let cache: BufferCache<Vec<u64>> = BufferCache::new(10, true);
    for i in 0..10 {
        cache.put(key(i), Arc::new(vec![i]));
    }
    for i in 0..10 {
        assert!(cache.get(key(i)).is_some());
    }
    cache.put(key(10), Arc::new(vec![10]));

    for i in 0..10 {
        assert_eq!(cache.get(key(i)).as_deref(), Some(&vec![i]), "buffer {i}");
    }
    assert_eq!(cache.residency(key(10)), Residency::Soft);

    cache.reclaim();
    assert!(cache.get(key(10)).is_none());
    assert!(!cache.contains(key(10)));
    for i in 0..10 {
        assert_eq!(cache.residency(key(i)), Residency::Hard, "buffer {i}");
    }
}

#[test]
fn test_cleared_entry_reclaimed_on_alert() {
    let alerts = Arc::new(MemoryAlertSystem::new());
    let cache: Arc<BufferCache<Vec<u64>>> = Arc::new(BufferCache::new(4, true));
    let _registration = cache.subscribe(&alerts);

    cache.put(key(1), Arc::new(vec![1]));
    cache.put(key(2), Arc::new(vec![2]));
    cache.clear_for_garbage_collection(key(1));
    assert_eq!(cache.residency(key(1)), Residency::Soft);
    assert!(cache.contains(key(1)));

    alerts.send_alert();
    assert!(cache.get(key(1)).is_none());
    assert_eq!(cache.get(key(2)).as_deref(), Some(&vec![2]));
}

#[test]
fn test_pending_entries_are_never_reclaimed() {
    let cache: BufferCache<Vec<u64>> = BufferCache::new(1, true);
    cache.put_pending(key(1), Arc::new(vec![1]));
    cache.put(key(2), Arc::new(vec![2]));
    assert_eq!(cache.residency(key(1)), Residency::Soft);

    cache.reclaim();
    assert_eq!(cache.residency(key(1)), Residency::Soft);

    // Declared durable: now reclaimable.
    cache.clear_for_garbage_collection(key(1));
    cache.reclaim();
    assert_eq!(cache.residency(key(1)), Residency::Absent);
}

#[test]
fn test_reclaimed_entry_behaves_like_invalidated() {
    let cache: BufferCache<Vec<u64>> = BufferCache::new(4, true);
    cache.put(key(1), Arc::new(vec![1]));
    cache.put(key(2), Arc::new(vec![2]));

    cache.clear_for_garbage_collection(key(1));
    cache.reclaim();
    cache.invalidate(key(2));

    for k in [key(1), key(2)] {
        assert!(cache.get(k).is_none());
        assert!(!cache.contains(k));
        assert_eq!(cache.residency(k), Residency::Absent);
    }
}

#[test]
fn test_concurrent_access() {
    let cache: Arc<BufferCache<Vec<u64>>> = Arc::new(BufferCache::new(8, true));
    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let k = key(t * 1000 + i % 16);
                    cache.put(k, Arc::new(vec![i]));
                    let _ = cache.get(k);
                    if i % 5 == 0 {
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
