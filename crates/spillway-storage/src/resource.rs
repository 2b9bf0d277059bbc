//! Per-buffer registry of resources held on behalf of readers.
//!
//! Every open table stream and every listener registered for an iterator is
//! recorded here under a fresh id. Release happens exactly once per id,
//! whichever comes first: the owning [`ResourceHandle`] being dropped, a
//! listener releasing itself, or the buffer releasing everything on clear.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use spillway_common::memory::{ListenerId, MemoryAlertListener, MemoryAlertSystem};
use tracing::trace;

use crate::file::TableReader;

/// Shared slot of an open table reader; emptied on release.
pub type StreamSlot = Arc<Mutex<Option<TableReader>>>;

/// Identifier of a registered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Returns the raw id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

enum Resource {
    Stream(StreamSlot),
    Listener {
        /// Set once the listener is registered.
        id: Option<ListenerId>,
        alerts: Weak<MemoryAlertSystem>,
    },
}

/// Kind of a registered resource, for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// An open table file stream.
    Stream,
    /// A registered memory alert listener.
    Listener,
}

/// Resources held against one buffer.
#[derive(Default)]
pub struct ResourceRegistry {
    entries: Mutex<HashMap<ResourceId, Resource>>,
    next_id: AtomicU64,
    open_streams: AtomicUsize,
}

impl ResourceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an open stream.
    pub fn register_stream(self: &Arc<Self>, slot: StreamSlot) -> ResourceHandle {
        let id = self.allocate_id();
        self.entries.lock().insert(id, Resource::Stream(slot));
        self.open_streams.fetch_add(1, Ordering::AcqRel);
        trace!(id = id.0, "registered stream");
        self.handle(id)
    }

    /// Registers a listener with `alerts` and records it.
    ///
    /// `make` receives the resource id so the listener can release itself.
    /// The entry exists before the listener can receive its first alert.
    pub fn register_listener<F>(
        self: &Arc<Self>,
        alerts: &Arc<MemoryAlertSystem>,
        make: F,
    ) -> ResourceHandle
    where
        F: FnOnce(ResourceId) -> Arc<dyn MemoryAlertListener>,
    {
        let id = self.allocate_id();
        self.entries.lock().insert(
            id,
            Resource::Listener {
                id: None,
                alerts: Arc::downgrade(alerts),
            },
        );

        let listener_id = alerts.register(make(id));

        let still_held = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&id) {
                Some(Resource::Listener { id: slot, .. }) => {
                    *slot = Some(listener_id);
                    true
                }
                _ => false,
            }
        };
        if !still_held {
            // Released while registering; the listener must not outlive it.
            alerts.unregister(listener_id);
        }
        trace!(id = id.0, "registered listener");
        self.handle(id)
    }

    /// Releases one resource.
    ///
    /// Returns false if it was already released.
    pub fn release(&self, id: ResourceId) -> bool {
        let Some(resource) = self.entries.lock().remove(&id) else {
            return false;
        };
        self.dispose(resource);
        trace!(id = id.0, "released resource");
        true
    }

    /// Releases every resource, returning how many were held.
    pub fn release_all(&self) -> usize {
        let drained: Vec<Resource> = self.entries.lock().drain().map(|(_, r)| r).collect();
        let count = drained.len();
        for resource in drained {
            self.dispose(resource);
        }
        count
    }

    /// Returns true if `id` is still held.
    pub fn is_held(&self, id: ResourceId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Returns the number of resources held.
    pub fn open_resources(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns the number of open streams.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::Acquire)
    }

    /// Returns the number of held resources of `kind`.
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|resource| match resource {
                Resource::Stream(_) => kind == ResourceKind::Stream,
                Resource::Listener { .. } => kind == ResourceKind::Listener,
            })
            .count()
    }

    fn allocate_id(&self) -> ResourceId {
        ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn handle(self: &Arc<Self>, id: ResourceId) -> ResourceHandle {
        ResourceHandle {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Runs outside the entry lock: unregistering may re-enter the alert
    /// system, and dropping a reader closes a file.
    fn dispose(&self, resource: Resource) {
        match resource {
            Resource::Stream(slot) => {
                slot.lock().take();
                self.open_streams.fetch_sub(1, Ordering::AcqRel);
            }
            Resource::Listener { id, alerts } => {
                if let (Some(id), Some(alerts)) = (id, alerts.upgrade()) {
                    alerts.unregister(id);
                }
            }
        }
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("open_resources", &self.open_resources())
            .field("open_streams", &self.open_streams())
            .finish()
    }
}

/// Releases its resource when dropped.
#[derive(Debug)]
pub struct ResourceHandle {
    id: ResourceId,
    registry: Weak<ResourceRegistry>,
}

impl ResourceHandle {
    /// Returns the resource id.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Returns true if the resource has not been released yet.
    pub fn is_held(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.is_held(self.id))
    }

    /// Releases the resource now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_common::memory::MemoryAlert;

    struct Releasing {
        registry: Weak<ResourceRegistry>,
        id: ResourceId,
    }

    impl MemoryAlertListener for Releasing {
        fn memory_alert(&self, _alert: &MemoryAlert) -> bool {
            if let Some(registry) = self.registry.upgrade() {
                registry.release(self.id);
            }
            true
        }
    }

    fn releasing(
        registry: &Arc<ResourceRegistry>,
    ) -> impl FnOnce(ResourceId) -> Arc<dyn MemoryAlertListener> {
        let registry = Arc::downgrade(registry);
        move |id| -> Arc<dyn MemoryAlertListener> { Arc::new(Releasing { registry, id }) }
    }

    #[test]
    fn test_stream_released_once() {
        let registry = Arc::new(ResourceRegistry::new());
        let handle = registry.register_stream(Arc::new(Mutex::new(None)));
        assert_eq!(registry.open_streams(), 1);
        assert_eq!(registry.open_resources(), 1);

        let id = handle.id();
        drop(handle);
        assert_eq!(registry.open_streams(), 0);
        assert!(!registry.release(id));
        assert_eq!(registry.open_streams(), 0);
    }

    #[test]
    fn test_listener_released_by_handle() {
        let alerts = Arc::new(MemoryAlertSystem::new());
        let registry = Arc::new(ResourceRegistry::new());
        let handle = registry.register_listener(&alerts, releasing(&registry));
        assert_eq!(alerts.number_of_listeners(), 1);
        assert_eq!(registry.count(ResourceKind::Listener), 1);

        drop(handle);
        assert_eq!(alerts.number_of_listeners(), 0);
        assert_eq!(registry.open_resources(), 0);
    }

    #[test]
    fn test_listener_releases_itself_on_alert() {
        let alerts = Arc::new(MemoryAlertSystem::new());
        let registry = Arc::new(ResourceRegistry::new());
        let handle = registry.register_listener(&alerts, releasing(&registry));

        alerts.send_alert();
        assert_eq!(alerts.number_of_listeners(), 0);
        assert!(!handle.is_held());
        drop(handle);
        assert_eq!(registry.open_resources(), 0);
    }

    #[test]
    fn test_release_all() {
        let alerts = Arc::new(MemoryAlertSystem::new());
        let registry = Arc::new(ResourceRegistry::new());
        let stream = registry.register_stream(Arc::new(Mutex::new(None)));
        let listener = registry.register_listener(&alerts, releasing(&registry));

        assert_eq!(registry.release_all(), 2);
        assert_eq!(registry.open_streams(), 0);
        assert_eq!(alerts.number_of_listeners(), 0);

        // Late handle drops are no-ops.
        drop(stream);
        drop(listener);
        assert_eq!(registry.open_resources(), 0);
        assert_eq!(registry.open_streams(), 0);
    }
}
