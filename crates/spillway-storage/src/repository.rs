//! Lookup of tables by id across execution contexts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use spillway_common::types::BufferId;

use crate::buffer::Buffer;

/// Hands out table ids and resolves them to live buffers.
pub trait DataRepository: Send + Sync {
    /// Reserves an id for a new table.
    fn next_table_id(&self) -> BufferId;

    /// Makes `table` reachable under `id`.
    fn add_table(&self, id: BufferId, table: &Arc<Buffer>);

    /// Returns the live table registered under `id`.
    fn get_table(&self, id: BufferId) -> Option<Arc<Buffer>>;

    /// Forgets `id`. Returns false if it was not registered.
    fn remove_table(&self, id: BufferId) -> bool;
}

/// Repository of one execution context.
///
/// Holds tables weakly: a table dropped by its owner disappears from the
/// repository without an explicit removal.
#[derive(Debug, Default)]
pub struct LocalDataRepository {
    next_id: AtomicI32,
    tables: RwLock<HashMap<BufferId, Weak<Buffer>>>,
}

impl LocalDataRepository {
    /// Creates an empty repository handing out ids from zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered tables that are still alive.
    pub fn len(&self) -> usize {
        self.tables
            .read()
            .values()
            .filter(|table| table.strong_count() > 0)
            .count()
    }

    /// Returns true if no live table is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DataRepository for LocalDataRepository {
    fn next_table_id(&self) -> BufferId {
        BufferId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn add_table(&self, id: BufferId, table: &Arc<Buffer>) {
        let mut tables = self.tables.write();
        tables.retain(|_, table| table.strong_count() > 0);
        tables.insert(id, Arc::downgrade(table));
    }

    fn get_table(&self, id: BufferId) -> Option<Arc<Buffer>> {
        self.tables.read().get(&id).and_then(Weak::upgrade)
    }

    fn remove_table(&self, id: BufferId) -> bool {
        self.tables.write().remove(&id).is_some()
    }
}

/// Repository for tables created outside any execution context.
///
/// Every id is [`BufferId::NOT_IN_WORKFLOW`] and nothing is retained.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotInWorkflow;

impl DataRepository for NotInWorkflow {
    fn next_table_id(&self) -> BufferId {
        BufferId::NOT_IN_WORKFLOW
    }

    fn add_table(&self, _id: BufferId, _table: &Arc<Buffer>) {}

    fn get_table(&self, _id: BufferId) -> Option<Arc<Buffer>> {
        None
    }

    fn remove_table(&self, _id: BufferId) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StorageContext;
    use spillway_common::types::{ColumnSpec, DataType, TableSpec};

    fn buffer(ctx: &Arc<StorageContext>, id: BufferId) -> Arc<Buffer> {
        let spec = TableSpec::new(vec![ColumnSpec::new("x", DataType::Int)]).unwrap();
        Buffer::new(ctx, id, spec, ctx.settings().clone())
    }

    #[test]
    fn test_local_repository() {
        let ctx = StorageContext::for_testing().unwrap();
        let repo = LocalDataRepository::new();
        let a = repo.next_table_id();
        let b = repo.next_table_id();
        assert_ne!(a, b);
        assert!(a.is_in_workflow());

        let table = buffer(&ctx, a);
        repo.add_table(a, &table);
        assert!(repo.get_table(a).is_some_and(|t| Arc::ptr_eq(&t, &table)));
        assert_eq!(repo.len(), 1);

        drop(table);
        assert!(repo.get_table(a).is_none());
        assert!(repo.is_empty());
        assert!(repo.remove_table(a));
        assert!(!repo.remove_table(a));
    }

    #[test]
    fn test_not_in_workflow() {
        let ctx = StorageContext::for_testing().unwrap();
        let repo = NotInWorkflow;
        let id = repo.next_table_id();
        assert_eq!(id, BufferId::NOT_IN_WORKFLOW);
        let table = buffer(&ctx, id);
        repo.add_table(id, &table);
        assert!(repo.get_table(id).is_none());
    }
}
