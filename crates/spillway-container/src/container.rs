//! The row ingestion front end.
//!
//! ```text
//!   add_row_to_table ──► validate ──► unique key ──► domains ──► pending batch
//!                                                                   │ row_batch_size
//!                                                                   ▼
//!                                                   BatchWriter ──► Buffer
//!   close ──► flush batches ──► finish domains ──► Buffer::close_with_spec
//! ```
//!
//! A memory alert while the container is open sets a flag; the next batch
//! applied to the buffer then writes its rows to disk.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use spillway_common::config::{ContainerSettings, StorageSettings};
use spillway_common::error::{SpillError, SpillResult};
use spillway_common::memory::{MemoryAlert, MemoryAlertListener, Registration};
use spillway_common::types::{BufferId, Row, TableSpec};
use spillway_storage::{Buffer, ContainerTable, DataRepository, NotInWorkflow, StorageContext};
use tracing::{debug, trace};

use crate::domain::DomainCreator;
use crate::duplicate::DuplicateChecker;
use crate::writer::BatchWriter;

/// Raises the container's low-memory flag.
struct MemoryLow {
    flag: Weak<AtomicBool>,
}

impl MemoryAlertListener for MemoryLow {
    fn memory_alert(&self, _alert: &MemoryAlert) -> bool {
        match self.flag.upgrade() {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                false
            }
            None => true,
        }
    }
}

/// Collects rows into a table.
///
/// Rows are added while the container is open; [`close`](Self::close)
/// freezes them into a [`ContainerTable`] whose schema carries the observed
/// column domains.
pub struct DataContainer {
    spec: TableSpec,
    settings: StorageSettings,
    buffer: Arc<Buffer>,
    writer: BatchWriter,
    pending: Vec<Row>,
    domains: DomainCreator,
    duplicates: Option<DuplicateChecker>,
    size: u64,
    repository: Arc<dyn DataRepository>,
    registration: Option<Registration>,
    table: Option<ContainerTable>,
}

impl DataContainer {
    /// Creates a container outside any workflow.
    pub fn new(
        ctx: &Arc<StorageContext>,
        spec: TableSpec,
        settings: &ContainerSettings,
    ) -> SpillResult<Self> {
        Self::with_repository(ctx, spec, settings, Arc::new(NotInWorkflow))
    }

    /// Creates a container whose table is registered with `repository` on close.
    pub fn with_repository(
        ctx: &Arc<StorageContext>,
        spec: TableSpec,
        settings: &ContainerSettings,
        repository: Arc<dyn DataRepository>,
    ) -> SpillResult<Self> {
        let settings = ctx.settings().with_overrides(settings);
        settings.validate()?;

        let id = repository.next_table_id();
        let buffer = Buffer::new(ctx, id, spec.clone(), settings.clone());

        let memory_low = Arc::new(AtomicBool::new(false));
        let registration = ctx.alerts().register_guarded(Arc::new(MemoryLow {
            flag: Arc::downgrade(&memory_low),
        }));
        let writer = BatchWriter::new(
            buffer.clone(),
            memory_low,
            settings.max_pending_batches(),
            settings.sequential_io(),
        );

        debug!(table = %id, columns = spec.num_columns(), "data container opened");
        Ok(Self {
            domains: DomainCreator::new(
                &spec,
                settings.init_domain(),
                settings.max_possible_values(),
            ),
            duplicates: settings.enforce_unique_keys().then(|| {
                DuplicateChecker::spilling(ctx.temp_dir(), settings.max_cells_in_memory())
            }),
            pending: Vec::with_capacity(settings.row_batch_size()),
            spec,
            settings,
            buffer,
            writer,
            size: 0,
            repository,
            registration: Some(registration),
            table: None,
        })
    }

    /// Adds a row.
    ///
    /// # Errors
    ///
    /// `SchemaMismatch` and `DuplicateKey` reject only this row; the
    /// container stays usable. `IllegalState` after close. A failed
    /// background write is reported by the next call.
    pub fn add_row_to_table(&mut self, row: Row) -> SpillResult<()> {
        if self.table.is_some() {
            return Err(SpillError::illegal_state(format!(
                "container {} is closed",
                self.buffer.id()
            )));
        }
        self.writer.check()?;
        self.spec.validate_row(&row)?;
        if let Some(duplicates) = &mut self.duplicates {
            duplicates.add(row.key())?;
        }
        self.domains.update(&row);

        self.pending.push(row);
        self.size += 1;
        if self.pending.len() >= self.settings.row_batch_size().max(1) {
            self.commit()?;
        }
        Ok(())
    }

    fn commit(&mut self) -> SpillResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.settings.row_batch_size()),
        );
        trace!(table = %self.buffer.id(), rows = batch.len(), "committing batch");
        self.writer.submit(batch)
    }

    /// Freezes the container into its table. Idempotent.
    pub fn close(&mut self) -> SpillResult<()> {
        if self.table.is_some() {
            return Ok(());
        }
        self.commit()?;
        self.writer.flush()?;

        let spec = self.domains.finish(&self.spec)?;
        self.buffer.close_with_spec(spec)?;
        let table = ContainerTable::new(self.buffer.clone())?;
        self.repository.add_table(table.id(), &self.buffer);

        self.registration = None;
        self.duplicates = None;
        debug!(table = %self.buffer.id(), rows = self.size, "data container closed");
        self.table = Some(table);
        Ok(())
    }

    /// Returns the table.
    ///
    /// # Errors
    ///
    /// `IllegalState` before [`close`](Self::close).
    pub fn get_table(&self) -> SpillResult<ContainerTable> {
        self.table.clone().ok_or_else(|| {
            SpillError::illegal_state(format!(
                "container {} must be closed before its table is read",
                self.buffer.id()
            ))
        })
    }

    /// Number of rows added.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns true until [`close`](Self::close) succeeds.
    pub fn is_open(&self) -> bool {
        self.table.is_none()
    }

    /// Returns true once [`close`](Self::close) succeeded.
    pub fn is_closed(&self) -> bool {
        self.table.is_some()
    }

    /// Incoming schema, without domains.
    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    /// Id of the table under construction; owner id of its blobs.
    pub fn table_id(&self) -> BufferId {
        self.buffer.id()
    }

    /// Changes the possible-values cap while rows are still coming in.
    pub fn set_max_possible_values(&mut self, max: usize) {
        self.domains.set_max_possible_values(max);
    }

    /// Settings resolved for this container.
    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }
}

impl Drop for DataContainer {
    fn drop(&mut self) {
        if self.table.is_none() {
            // Abandoned while open.
            let _ = self.writer.flush();
            self.buffer.clear();
        }
    }
}

impl fmt::Debug for DataContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataContainer")
            .field("table", &self.buffer.id())
            .field("size", &self.size)
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Creates containers sharing one context and repository.
#[derive(Clone)]
pub struct ContainerFactory {
    ctx: Arc<StorageContext>,
    repository: Arc<dyn DataRepository>,
}

impl ContainerFactory {
    /// Creates a factory registering every table with `repository`.
    pub fn new(ctx: Arc<StorageContext>, repository: Arc<dyn DataRepository>) -> Self {
        Self { ctx, repository }
    }

    /// Opens a new container.
    pub fn create_data_container(
        &self,
        spec: TableSpec,
        settings: &ContainerSettings,
    ) -> SpillResult<DataContainer> {
        DataContainer::with_repository(&self.ctx, spec, settings, self.repository.clone())
    }

    /// Looks up a closed table by id.
    pub fn table(&self, id: BufferId) -> SpillResult<Option<ContainerTable>> {
        self.repository
            .get_table(id)
            .map(ContainerTable::new)
            .transpose()
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<StorageContext> {
        &self.ctx
    }
}

impl fmt::Debug for ContainerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerFactory").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_common::types::{Cell, ColumnSpec, DataType, DomainValue, RowKey};
    use spillway_storage::LocalDataRepository;

    fn spec() -> TableSpec {
        TableSpec::new(vec![
            ColumnSpec::new("name", DataType::String),
            ColumnSpec::new("value", DataType::Int),
        ])
        .unwrap()
    }

    fn row(i: i32) -> Row {
        Row::new(format!("Row{i}"), vec![Cell::from(format!("n{}", i % 3)), Cell::Int(i)])
    }

    fn values(table: &ContainerTable) -> Vec<i32> {
        table
            .rows()
            .unwrap()
            .iter()
            .map(|row| match row.cell(1) {
                Some(Cell::Int(v)) => *v,
                other => panic!("unexpected cell {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_small_container() {
        let ctx = StorageContext::for_testing().unwrap();
        let mut container = DataContainer::new(&ctx, spec(), &ContainerSettings::default()).unwrap();
        for i in 0..5 {
            container.add_row_to_table(row(i)).unwrap();
        }
        container.close().unwrap();

        let table = container.get_table().unwrap();
        assert_eq!(table.row_count(), 5);
        assert!(table.buffer().is_held_in_memory());
        assert_eq!(values(&table), vec![0, 1, 2, 3, 4]);
        assert_eq!(table.id(), BufferId::NOT_IN_WORKFLOW);
    }

    #[test]
    fn test_close_is_idempotent() {
        let ctx = StorageContext::for_testing().unwrap();
        let mut container = DataContainer::new(&ctx, spec(), &ContainerSettings::default()).unwrap();
        for i in 0..25 {
            container.add_row_to_table(row(i)).unwrap();
        }
        container.close().unwrap();
        container.close().unwrap();
        assert_eq!(container.get_table().unwrap().row_count(), 25);
        assert!(container.add_row_to_table(row(99)).is_err());
    }

    #[test]
    fn test_get_table_before_close() {
        let ctx = StorageContext::for_testing().unwrap();
        let container = DataContainer::new(&ctx, spec(), &ContainerSettings::default()).unwrap();
        let err = container.get_table().unwrap_err();
        assert!(matches!(err, SpillError::IllegalState { .. }));
    }

    #[test]
    fn test_duplicate_key_is_recoverable() {
        let ctx = StorageContext::for_testing().unwrap();
        let mut container = DataContainer::new(&ctx, spec(), &ContainerSettings::default()).unwrap();
        container.add_row_to_table(row(1)).unwrap();

        let err = container.add_row_to_table(row(1)).unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(err, SpillError::DuplicateKey { ref key } if *key == RowKey::new("Row1")));

        container.add_row_to_table(row(2)).unwrap();
        container.close().unwrap();
        assert_eq!(values(&container.get_table().unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_key_found_after_keys_spilled() {
        let ctx = StorageContext::for_testing().unwrap();
        let mut container = DataContainer::new(&ctx, spec(), &ContainerSettings::default()).unwrap();
        for i in 0..250 {
            container.add_row_to_table(row(i)).unwrap();
        }
        let checker = container.duplicates.as_ref().unwrap();
        assert!(checker.spilled_chunks() > 0);
        assert!(checker.keys_in_memory() <= ctx.settings().max_cells_in_memory());

        let err = container.add_row_to_table(row(3)).unwrap_err();
        assert!(matches!(err, SpillError::DuplicateKey { .. }));
        container.add_row_to_table(row(250)).unwrap();
        container.close().unwrap();
        assert_eq!(container.size(), 251);
    }

    #[test]
    fn test_duplicates_allowed_when_not_enforced() {
        let ctx = StorageContext::for_testing().unwrap();
        let settings = ContainerSettings::builder()
            .with_enforce_unique_keys(false)
            .build()
            .unwrap();
        let mut container = DataContainer::new(&ctx, spec(), &settings).unwrap();
        container.add_row_to_table(row(1)).unwrap();
        container.add_row_to_table(row(1)).unwrap();
        assert_eq!(container.size(), 2);
    }

    #[test]
    fn test_schema_mismatch_is_recoverable() {
        let ctx = StorageContext::for_testing().unwrap();
        let mut container = DataContainer::new(&ctx, spec(), &ContainerSettings::default()).unwrap();

        let short = Row::new("Row0", vec![Cell::from("a")]);
        assert!(matches!(
            container.add_row_to_table(short),
            Err(SpillError::SchemaMismatch { .. })
        ));
        let wrong_type = Row::new("Row0", vec![Cell::Int(1), Cell::Int(1)]);
        assert!(container.add_row_to_table(wrong_type).unwrap_err().is_recoverable());

        // The rejected key was never recorded.
        container.add_row_to_table(row(0)).unwrap();
        assert_eq!(container.size(), 1);
    }

    #[test]
    fn test_large_container_keeps_order() {
        let ctx = StorageContext::for_testing().unwrap();
        let mut container = DataContainer::new(&ctx, spec(), &ContainerSettings::default()).unwrap();
        for i in 0..500 {
            container.add_row_to_table(row(i)).unwrap();
        }
        container.close().unwrap();

        let table = container.get_table().unwrap();
        table.buffer().wait_for_durable().unwrap();
        assert!(table.buffer().is_flushed_to_disk());
        assert_eq!(values(&table), (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_sequential_io() {
        let ctx = StorageContext::for_testing().unwrap();
        let settings = ContainerSettings::builder()
            .with_sequential_io(true)
            .with_row_batch_size(7)
            .build()
            .unwrap();
        let mut container = DataContainer::new(&ctx, spec(), &settings).unwrap();
        for i in 0..100 {
            container.add_row_to_table(row(i)).unwrap();
        }
        // 14 full batches applied inline.
        assert_eq!(container.buffer.size(), 98);
        container.close().unwrap();
        assert_eq!(values(&container.get_table().unwrap()), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_memory_alert_while_writing_flushes() {
        let ctx = StorageContext::for_testing().unwrap();
        let settings = ContainerSettings::builder()
            .with_sequential_io(true)
            .build()
            .unwrap();
        let mut container = DataContainer::new(&ctx, spec(), &settings).unwrap();
        for i in 0..10 {
            container.add_row_to_table(row(i)).unwrap();
        }
        assert!(!container.buffer.file_path().exists());

        ctx.alerts().send_alert();
        for i in 10..20 {
            container.add_row_to_table(row(i)).unwrap();
        }
        assert!(container.buffer.file_path().exists());

        container.close().unwrap();
        let table = container.get_table().unwrap();
        assert!(table.buffer().is_flushed_to_disk());
        assert_eq!(values(&table), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_domains_in_output_spec() {
        let ctx = StorageContext::for_testing().unwrap();
        let mut container = DataContainer::new(&ctx, spec(), &ContainerSettings::default()).unwrap();
        for i in 0..9 {
            container.add_row_to_table(row(i)).unwrap();
        }
        container.close().unwrap();

        let spec = container.get_table().unwrap().spec();
        let name = &spec.columns()[0].domain;
        assert_eq!(name.possible_values.as_ref().map(Vec::len), Some(3));
        let value = &spec.columns()[1].domain;
        assert_eq!(value.lower, Some(DomainValue::Int(0)));
        assert_eq!(value.upper, Some(DomainValue::Int(8)));
    }

    #[test]
    fn test_factory_registers_tables() {
        let ctx = StorageContext::for_testing().unwrap();
        let factory = ContainerFactory::new(ctx.clone(), Arc::new(LocalDataRepository::new()));
        let mut container = factory
            .create_data_container(spec(), &ContainerSettings::default())
            .unwrap();
        let id = container.table_id();
        assert!(id.is_in_workflow());
        assert!(factory.table(id).unwrap().is_none());

        container.add_row_to_table(row(0)).unwrap();
        container.close().unwrap();
        let table = factory.table(id).unwrap().unwrap();
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_drop_while_open_releases_listener() {
        let ctx = StorageContext::for_testing().unwrap();
        let before = ctx.alerts().number_of_listeners();
        let mut container = DataContainer::new(&ctx, spec(), &ContainerSettings::default()).unwrap();
        container.add_row_to_table(row(0)).unwrap();
        assert_eq!(ctx.alerts().number_of_listeners(), before + 1);
        drop(container);
        assert_eq!(ctx.alerts().number_of_listeners(), before);
    }
}
