//! Read-only table handed out by a closed container.

use std::path::Path;
use std::sync::Arc;

use spillway_common::error::{SpillError, SpillResult};
use spillway_common::types::{BufferId, Row, TableSpec};

use crate::archive::{read_archive, write_archive};
use crate::buffer::{Buffer, BufferIterator, TableFilter};
use crate::context::StorageContext;
use crate::repository::DataRepository;

/// A closed table backed by one [`Buffer`].
///
/// Cloning is cheap; clones share the buffer.
#[derive(Debug, Clone)]
pub struct ContainerTable {
    buffer: Arc<Buffer>,
}

impl ContainerTable {
    /// Wraps a closed buffer.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` unless the buffer is closed.
    pub fn new(buffer: Arc<Buffer>) -> SpillResult<Self> {
        if !buffer.is_closed() {
            return Err(SpillError::illegal_state(format!(
                "buffer {} is not closed",
                buffer.id()
            )));
        }
        Ok(Self { buffer })
    }

    /// Returns the table id.
    pub fn id(&self) -> BufferId {
        self.buffer.id()
    }

    /// Returns the schema including column domains.
    pub fn spec(&self) -> TableSpec {
        self.buffer.spec()
    }

    /// Returns the number of rows.
    pub fn row_count(&self) -> u64 {
        self.buffer.size()
    }

    /// Returns the backing buffer.
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Iterates over every row.
    pub fn iter(&self) -> SpillResult<BufferIterator> {
        self.buffer.iterator()
    }

    /// Iterates over the rows selected by `filter`.
    pub fn iter_filtered(&self, filter: TableFilter) -> SpillResult<BufferIterator> {
        self.buffer.iterator_filtered(filter)
    }

    /// Collects every row.
    pub fn rows(&self) -> SpillResult<Vec<Row>> {
        self.buffer.rows()
    }

    /// Releases the table's storage. Idempotent.
    pub fn clear(&self) {
        self.buffer.clear();
    }

    /// Exports the table into a single archive file.
    ///
    /// # Errors
    ///
    /// Re-raises a failed asynchronous write of the table.
    pub fn write_to_archive(&self, path: &Path) -> SpillResult<()> {
        let export = self.buffer.export()?;
        write_archive(path, self.id(), &export)
    }

    /// Imports a table written by [`ContainerTable::write_to_archive`].
    ///
    /// The table gets a fresh id from `repository` and is registered there.
    /// It is disk-backed; if it was in memory when exported it is read back
    /// into memory on first iteration.
    pub fn read_from_archive(
        ctx: &Arc<StorageContext>,
        path: &Path,
        repository: &dyn DataRepository,
    ) -> SpillResult<Self> {
        let (_meta, parts) = read_archive(path)?;
        let id = repository.next_table_id();
        let buffer = Buffer::from_archive(ctx, id, parts)?;
        repository.add_table(id, &buffer);
        Ok(Self { buffer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{LocalDataRepository, NotInWorkflow};
    use spillway_common::types::{Cell, ColumnSpec, DataType};

    fn table(ctx: &Arc<StorageContext>, rows: usize) -> ContainerTable {
        let spec = TableSpec::new(vec![
            ColumnSpec::new("s", DataType::String),
            ColumnSpec::new("d", DataType::Double),
        ])
        .unwrap();
        let buffer = Buffer::new(ctx, BufferId::new(3), spec, ctx.settings().clone());
        for i in 0..rows {
            let value = if i % 3 == 0 { Cell::Missing } else { Cell::Double(i as f64 / 2.0) };
            buffer
                .add_row(Row::new(format!("Row{i}"), vec![Cell::from(format!("s{i}")), value]))
                .unwrap();
        }
        buffer.close().unwrap();
        ContainerTable::new(buffer).unwrap()
    }

    #[test]
    fn test_requires_closed_buffer() {
        let ctx = StorageContext::for_testing().unwrap();
        let spec = TableSpec::new(vec![ColumnSpec::new("x", DataType::Int)]).unwrap();
        let buffer = Buffer::new(&ctx, BufferId::new(1), spec, ctx.settings().clone());
        assert!(matches!(
            ContainerTable::new(buffer),
            Err(SpillError::IllegalState { .. })
        ));
    }

    #[test]
    fn test_archive_round_trip_in_memory_table() {
        let ctx = StorageContext::for_testing().unwrap();
        let original = table(&ctx, 20);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.spwa");
        original.write_to_archive(&path).unwrap();

        let repo = LocalDataRepository::new();
        let copy = ContainerTable::read_from_archive(&ctx, &path, &repo).unwrap();
        assert!(repo.get_table(copy.id()).is_some());
        assert_eq!(copy.row_count(), 20);
        assert_eq!(copy.rows().unwrap(), original.rows().unwrap());
        assert_eq!(copy.spec(), original.spec());
    }

    #[test]
    fn test_archive_round_trip_disk_table() {
        let ctx = StorageContext::for_testing().unwrap();
        let original = table(&ctx, 120);
        assert!(original.buffer().wait_for_durable().unwrap());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.spwa");
        original.write_to_archive(&path).unwrap();

        let copy = ContainerTable::read_from_archive(&ctx, &path, &NotInWorkflow).unwrap();
        assert_eq!(copy.id(), BufferId::NOT_IN_WORKFLOW);
        assert!(copy.buffer().is_flushed_to_disk());
        assert_eq!(copy.rows().unwrap(), original.rows().unwrap());
    }

    #[test]
    fn test_filtered_iteration() {
        let ctx = StorageContext::for_testing().unwrap();
        let t = table(&ctx, 10);
        let rows: Vec<Row> = t
            .iter_filtered(TableFilter::range(2, 4).unwrap())
            .unwrap()
            .collect::<SpillResult<_>>()
            .unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.key().as_str()).collect();
        assert_eq!(keys, ["Row2", "Row3", "Row4"]);
    }
}
