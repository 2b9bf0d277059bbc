//! Storage unit of one table.
//!
//! A buffer accepts rows while *writing*, is frozen by `close()`, and is
//! then read through any number of [`BufferIterator`]s until it is cleared.
//!
//! # Residency
//!
//! ```text
//!            add_row (write-through once spilled)
//!   Writing ─────────────────────────────────────┐
//!      │ close                                   │
//!      ▼                                         ▼
//!   Closed, in memory ──write──▶ Closed, mirrored ──reclaim──▶ Closed, on disk
//!      (pinned)                   (soft cache entry)                │
//!                                        ▲                          │
//!                                        └────── restore ◀──────────┘
//!
//!   any ──clear──▶ Cleared
//! ```
//!
//! The closed row list stays *pinned* by the buffer until its disk mirror is
//! durable, so reclamation never touches the only copy of a table. After
//! that the list is held by the shared [`TableCache`](crate::context::TableCache)
//! alone and may disappear at any memory alert; readers then fall back to
//! the file at the row they had reached.
//!
//! # Locking
//!
//! Lock order is restore, stream slot, buffer state, cache. The buffer never
//! calls into a restore or opens a stream while it holds its state lock.

mod filter;
mod iterator;
mod lifecycle;
mod restore;
mod stream;

pub use filter::TableFilter;
pub use iterator::{BufferIterator, IterMode};
pub use lifecycle::Lifecycle;

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use spillway_common::config::{Compression, StorageSettings};
use spillway_common::error::{SpillError, SpillResult};
use spillway_common::memory::{MemoryAlert, MemoryAlertListener, Registration};
use spillway_common::types::{
    BlobAddress, BlobCell, BlobSource, BufferId, BufferKey, Cell, Row, TableSpec,
};
use tracing::{debug, error, info, warn};

use crate::blob::{BlobStore, SlotEntry};
use crate::context::{delete_file, RowList, StorageContext};
use crate::file::{encode_row, BlobBinding, TableWriter};
use crate::resource::ResourceRegistry;

use iterator::Start;
use restore::Restore;
use stream::TableStream;

/// Lifecycle phase of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPhase {
    /// Accepting rows.
    Writing,
    /// Frozen and readable.
    Closed,
    /// All storage released.
    Cleared,
}

/// State of the disk mirror of a closed table.
enum Mirror {
    Absent,
    /// Carries the cancellation flag of the running write.
    InFlight(Arc<AtomicBool>),
    Complete,
    Failed,
}

struct BufferState {
    phase: BufferPhase,
    spec: TableSpec,
    rows: Vec<Row>,
    writer: Option<TableWriter<BufWriter<File>>>,
    size: u64,
    mirror: Mirror,
    fits_into_memory: bool,
    restore_on_miss: bool,
    pinned: Option<Arc<RowList>>,
    restore: Weak<Restore>,
    flusher: Option<Registration>,
    /// Drops a restored list from the cache at the next alert.
    invalidator: Option<Registration>,
    write_error: Option<Arc<SpillError>>,
    copied_blobs: HashMap<(BufferKey, u32), u32>,
}

/// Snapshot of a buffer's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferStats {
    /// External id.
    pub id: BufferId,
    /// Cache identity.
    pub key: BufferKey,
    /// Current phase.
    pub phase: BufferPhase,
    /// Number of rows added.
    pub rows: u64,
    /// Whether the rows are resident in memory.
    pub held_in_memory: bool,
    /// Whether a complete disk mirror exists.
    pub flushed_to_disk: bool,
    /// Reader resources currently held.
    pub open_resources: usize,
    /// Open table file streams.
    pub open_streams: usize,
    /// Allocated blob slots.
    pub blob_slots: usize,
    /// Bytes in the blob file.
    pub blob_bytes: u64,
    /// Whether a flusher waits for the next memory alert.
    pub has_flusher: bool,
}

/// Everything needed to rebuild a closed buffer elsewhere.
#[derive(Debug)]
pub(crate) struct BufferExport {
    pub spec: TableSpec,
    pub row_count: u64,
    pub compression: Compression,
    pub was_in_memory: bool,
    pub data: Vec<u8>,
    pub blob_bytes: Vec<u8>,
    pub slots: Vec<SlotEntry>,
}

/// The storage unit of one table.
pub struct Buffer {
    key: BufferKey,
    id: BufferId,
    ctx: Arc<StorageContext>,
    settings: StorageSettings,
    lifecycle: Lifecycle,
    max_rows_in_memory: usize,
    file_path: PathBuf,
    blobs: Arc<BlobStore>,
    binding: BlobBinding,
    registry: Arc<ResourceRegistry>,
    stream: Mutex<Weak<TableStream>>,
    state: Mutex<BufferState>,
    write_done: Condvar,
    this: Weak<Buffer>,
}

impl Buffer {
    /// Creates an empty buffer in the writing phase.
    ///
    /// `settings` are the resolved settings of the producing container; the
    /// cache and pool always come from `ctx`.
    pub fn new(
        ctx: &Arc<StorageContext>,
        id: BufferId,
        spec: TableSpec,
        settings: StorageSettings,
    ) -> Arc<Self> {
        let key = ctx.next_buffer_key();
        let blobs = BlobStore::new(
            key,
            id,
            ctx.blob_file_path(key),
            settings.blob_cache_size(),
        );
        Self::assemble(ctx, key, id, spec, settings, blobs, BufferPhase::Writing)
    }

    /// Rebuilds a closed, disk-backed buffer from archived parts.
    pub(crate) fn from_archive(
        ctx: &Arc<StorageContext>,
        id: BufferId,
        parts: BufferExport,
    ) -> SpillResult<Arc<Self>> {
        let settings = ctx
            .settings()
            .to_builder()
            .with_compression(parts.compression)
            .build()?;
        let key = ctx.next_buffer_key();
        let blobs = BlobStore::import(
            key,
            id,
            ctx.blob_file_path(key),
            settings.blob_cache_size(),
            &parts.blob_bytes,
            parts.slots,
        )?;
        let buffer = Self::assemble(ctx, key, id, parts.spec, settings, blobs, BufferPhase::Closed);

        std::fs::write(&buffer.file_path, &parts.data)?;
        {
            let mut st = buffer.state.lock();
            st.size = parts.row_count;
            st.mirror = Mirror::Complete;
            st.restore_on_miss = parts.was_in_memory;
            st.fits_into_memory = parts.was_in_memory;
        }
        debug!(buffer = %id, rows = parts.row_count, "buffer read from archive");
        Ok(buffer)
    }

    fn assemble(
        ctx: &Arc<StorageContext>,
        key: BufferKey,
        id: BufferId,
        spec: TableSpec,
        settings: StorageSettings,
        blobs: BlobStore,
        phase: BufferPhase,
    ) -> Arc<Self> {
        let blobs = Arc::new(blobs);
        let source: Arc<dyn BlobSource> = Arc::clone(&blobs) as Arc<dyn BlobSource>;
        let lifecycle = Lifecycle::for_settings(&settings);
        let max_rows_in_memory = settings.max_rows_in_memory(spec.num_columns());
        let file_path = ctx.table_file_path(key, settings.compression());

        Arc::new_cyclic(|this| Self {
            key,
            id,
            ctx: Arc::clone(ctx),
            lifecycle,
            max_rows_in_memory,
            file_path,
            binding: BlobBinding::new(id, source),
            blobs,
            registry: Arc::new(ResourceRegistry::new()),
            stream: Mutex::new(Weak::new()),
            state: Mutex::new(BufferState {
                phase,
                spec,
                rows: Vec::new(),
                writer: None,
                size: 0,
                mirror: Mirror::Absent,
                fits_into_memory: false,
                restore_on_miss: false,
                pinned: None,
                restore: Weak::new(),
                flusher: None,
                invalidator: None,
                write_error: None,
                copied_blobs: HashMap::new(),
            }),
            write_done: Condvar::new(),
            settings,
            this: this.clone(),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the external id.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Returns the cache identity.
    pub fn key(&self) -> BufferKey {
        self.key
    }

    /// Returns the schema; after close it carries the column domains.
    pub fn spec(&self) -> TableSpec {
        self.state.lock().spec.clone()
    }

    /// Returns the number of rows added.
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    /// Returns the current phase.
    pub fn phase(&self) -> BufferPhase {
        self.state.lock().phase
    }

    /// Returns the residency policy.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Returns the number of rows kept in memory before spilling.
    pub fn max_rows_in_memory(&self) -> usize {
        self.max_rows_in_memory
    }

    /// Returns the table file path, whether or not the file exists.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Returns the storage context.
    pub fn context(&self) -> &Arc<StorageContext> {
        &self.ctx
    }

    pub(crate) fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Appends a row.
    ///
    /// Blob cells are adopted: unassigned blobs get a slot here, blobs owned
    /// by another buffer are copied into a new slot.
    pub fn add_row(&self, row: Row) -> SpillResult<()> {
        let mut guard = self.state.lock();
        self.add_row_locked(&mut guard, row)
    }

    /// Appends rows in order.
    pub fn add_rows<I>(&self, rows: I) -> SpillResult<()>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut guard = self.state.lock();
        for row in rows {
            self.add_row_locked(&mut guard, row)?;
        }
        Ok(())
    }

    fn add_row_locked(&self, st: &mut BufferState, row: Row) -> SpillResult<()> {
        if st.phase != BufferPhase::Writing {
            return Err(SpillError::illegal_state(format!(
                "cannot add rows to buffer {} after close",
                self.id
            )));
        }
        let row = self.adopt_blobs(st, row)?;
        if let Some(writer) = st.writer.as_mut() {
            writer.write_row(encode_row(&row, self.key)?)?;
        } else {
            st.rows.push(row);
        }
        st.size += 1;

        if self.lifecycle.spills_while_writing() && st.rows.len() > self.max_rows_in_memory {
            self.spill_locked(st)?;
        }
        Ok(())
    }

    fn adopt_blobs(&self, st: &mut BufferState, row: Row) -> SpillResult<Row> {
        if !row.has_blobs() {
            return Ok(row);
        }
        let (key, cells) = row.into_parts();
        let cells = cells
            .into_iter()
            .map(|cell| match cell {
                Cell::Blob(blob) => self.adopt_blob(st, blob).map(Cell::Blob),
                other => Ok(other),
            })
            .collect::<SpillResult<Vec<_>>>()?;
        Ok(Row::new(key, cells))
    }

    fn adopt_blob(&self, st: &mut BufferState, blob: BlobCell) -> SpillResult<BlobCell> {
        if blob.owner() == Some(self.key) {
            return Ok(blob);
        }

        let origin = blob.owner().zip(blob.address()).map(|(owner, a)| (owner, a.slot()));
        if let Some(slot) = origin.and_then(|origin| st.copied_blobs.get(&origin).copied()) {
            return Ok(self.addressed(slot, None));
        }

        let payload = if blob.is_addressed() {
            Bytes::copy_from_slice(&blob.payload()?)
        } else {
            blob.payload()?
        };
        let slot = self.blobs.allocate(payload.clone())?;
        if let Some(origin) = origin {
            st.copied_blobs.insert(origin, slot);
        }
        Ok(self.addressed(slot, Some(payload)))
    }

    fn addressed(&self, slot: u32, payload: Option<Bytes>) -> BlobCell {
        BlobCell::addressed(BlobAddress::new(self.id, slot), &self.binding.source, payload)
    }

    /// Writes the rows held so far to disk; later rows are written through.
    ///
    /// Returns false if the buffer is not writing or nothing was held.
    pub fn flush_to_disk(&self) -> SpillResult<bool> {
        let mut guard = self.state.lock();
        if guard.phase != BufferPhase::Writing || (guard.rows.is_empty() && guard.writer.is_some()) {
            return Ok(false);
        }
        self.spill_locked(&mut guard)?;
        Ok(true)
    }

    fn spill_locked(&self, st: &mut BufferState) -> SpillResult<()> {
        if st.writer.is_none() {
            let file = File::create(&self.file_path)?;
            st.writer = Some(TableWriter::new(
                BufWriter::new(file),
                self.settings.compression(),
                self.settings.rows_per_segment(),
            )?);
        }
        info!(buffer = %self.id, rows = st.rows.len(), "writing rows to free memory");
        let writer = st
            .writer
            .as_mut()
            .ok_or_else(|| SpillError::internal("spill writer missing"))?;
        for row in &st.rows {
            writer.write_row(encode_row(row, self.key)?)?;
        }
        st.rows.clear();
        st.rows.shrink_to_fit();
        Ok(())
    }

    // =========================================================================
    // Closing
    // =========================================================================

    /// Freezes the buffer. Idempotent.
    pub fn close(&self) -> SpillResult<()> {
        self.close_inner(None)
    }

    /// Freezes the buffer, replacing its schema with `spec` (typically the
    /// same schema carrying column domains).
    pub fn close_with_spec(&self, spec: TableSpec) -> SpillResult<()> {
        self.close_inner(Some(spec))
    }

    fn close_inner(&self, spec: Option<TableSpec>) -> SpillResult<()> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if st.phase != BufferPhase::Writing {
            // A table left with neither rows in memory nor a usable file
            // keeps failing.
            if let (BufferPhase::Closed, Mirror::Failed, None, Some(e)) =
                (st.phase, &st.mirror, &st.pinned, &st.write_error)
            {
                return Err(SpillError::async_write(
                    format!("buffer {} has no readable rows", self.id),
                    Arc::clone(e),
                ));
            }
            return Ok(());
        }
        if let Some(spec) = spec {
            st.spec = spec;
        }
        st.phase = BufferPhase::Closed;

        if let Some(writer) = st.writer.take() {
            if let Err(e) = self.finish_spilled(writer, &st.rows) {
                let e = Arc::new(e);
                st.mirror = Mirror::Failed;
                st.write_error = Some(Arc::clone(&e));
                return Err(SpillError::async_write(
                    format!("finishing table file of buffer {} failed", self.id),
                    e,
                ));
            }
            st.rows = Vec::new();
            st.mirror = Mirror::Complete;
            debug!(buffer = %self.id, rows = st.size, "closed spilled buffer");
            return Ok(());
        }

        let list = Arc::new(std::mem::take(&mut st.rows));
        let plan = self.lifecycle.plan_close(list.len(), self.max_rows_in_memory);
        self.ctx.cache().put_pending(self.key, Arc::clone(&list));
        st.pinned = Some(list);
        st.fits_into_memory = plan.fits_into_memory;
        st.restore_on_miss = plan.restore_on_miss;

        if plan.register_flusher {
            let flusher = Arc::new(Flusher {
                buffer: self.this.clone(),
            });
            st.flusher = Some(self.ctx.alerts().register_guarded(flusher));
        }
        if plan.write_now {
            self.start_async_write_locked(st)?;
        }
        debug!(buffer = %self.id, rows = st.size, ?plan, "closed buffer");
        Ok(())
    }

    fn finish_spilled(
        &self,
        mut writer: TableWriter<BufWriter<File>>,
        rows: &[Row],
    ) -> SpillResult<()> {
        for row in rows {
            writer.write_row(encode_row(row, self.key)?)?;
        }
        let out = writer.finish()?;
        out.get_ref().sync_data()?;
        self.blobs.sync()
    }

    // =========================================================================
    // Asynchronous writes
    // =========================================================================

    fn start_async_write_locked(&self, st: &mut BufferState) -> SpillResult<()> {
        let rows = st
            .pinned
            .clone()
            .ok_or_else(|| SpillError::internal("no pinned rows to write"))?;
        let cancel = Arc::new(AtomicBool::new(false));
        st.mirror = Mirror::InFlight(Arc::clone(&cancel));

        let job = WriteJob {
            buffer: self.this.clone(),
            rows,
            path: self.file_path.clone(),
            key: self.key,
            compression: self.settings.compression(),
            rows_per_segment: self.settings.rows_per_segment(),
            blobs: Arc::clone(&self.blobs),
            cancel,
        };
        if let Err(e) = self.ctx.pool().submit(move || job.run()) {
            st.mirror = Mirror::Absent;
            return Err(e);
        }
        debug!(buffer = %self.id, "scheduled asynchronous write");
        Ok(())
    }

    fn finish_async_write(&self, result: SpillResult<bool>, cancel: &AtomicBool) {
        let mut registration = None;
        let mut delete = false;
        {
            let mut st = self.state.lock();
            if cancel.load(Ordering::Acquire) || st.phase == BufferPhase::Cleared {
                delete = true;
            } else {
                match result {
                    Ok(true) => {
                        st.mirror = Mirror::Complete;
                        registration = st.flusher.take();
                        st.pinned = None;
                        self.lifecycle.after_write(self.ctx.cache(), self.key);
                        debug!(buffer = %self.id, rows = st.size, "disk mirror complete");
                    }
                    Ok(false) => {
                        st.mirror = Mirror::Absent;
                        delete = true;
                    }
                    Err(e) => {
                        error!(buffer = %self.id, error = %e, "asynchronous write failed");
                        st.mirror = Mirror::Failed;
                        st.write_error = Some(Arc::new(e));
                        registration = st.flusher.take();
                        delete = true;
                    }
                }
            }
        }
        self.write_done.notify_all();
        drop(registration);
        if delete {
            delete_file(&self.file_path);
        }
    }

    fn flush_on_alert(&self) {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let registration = st.flusher.take();
        let idle = matches!(st.mirror, Mirror::Absent);
        if st.phase == BufferPhase::Closed && idle && st.pinned.is_some() {
            if let Err(e) = self.start_async_write_locked(st) {
                warn!(buffer = %self.id, error = %e, "could not schedule write on memory alert");
            }
        }
        drop(guard);
        drop(registration);
    }

    /// Blocks until no write for this buffer is in flight.
    pub fn wait_for_write(&self) {
        let mut st = self.state.lock();
        while matches!(st.mirror, Mirror::InFlight(_)) {
            self.write_done.wait(&mut st);
        }
    }

    /// Blocks until no write is in flight and reports whether the disk
    /// mirror is complete.
    ///
    /// # Errors
    ///
    /// Re-raises a failed asynchronous write.
    pub fn wait_for_durable(&self) -> SpillResult<bool> {
        let mut st = self.state.lock();
        while matches!(st.mirror, Mirror::InFlight(_)) {
            self.write_done.wait(&mut st);
        }
        if let Some(e) = &st.write_error {
            return Err(SpillError::async_write(
                format!("writing buffer {} failed", self.id),
                Arc::clone(e),
            ));
        }
        Ok(matches!(st.mirror, Mirror::Complete))
    }

    /// Returns the failure of the last asynchronous write, if any.
    pub fn write_error(&self) -> Option<Arc<SpillError>> {
        self.state.lock().write_error.clone()
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Iterates over every row.
    pub fn iterator(self: &Arc<Self>) -> SpillResult<BufferIterator> {
        self.iterator_filtered(TableFilter::all())
    }

    /// Iterates over the rows selected by `filter`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` before close or after clear.
    pub fn iterator_filtered(self: &Arc<Self>, filter: TableFilter) -> SpillResult<BufferIterator> {
        let (start, size) = {
            let st = self.state.lock();
            match st.phase {
                BufferPhase::Writing => {
                    return Err(SpillError::illegal_state(format!(
                        "buffer {} has not been closed",
                        self.id
                    )))
                }
                BufferPhase::Cleared => {
                    return Err(SpillError::illegal_state(format!(
                        "buffer {} has been cleared",
                        self.id
                    )))
                }
                BufferPhase::Closed => {}
            }

            let resident = st
                .pinned
                .clone()
                .or_else(|| self.ctx.cache().get(self.key));
            let start = match resident {
                Some(list) => Some(Start::Memory(Arc::downgrade(&list))),
                None if st.restore_on_miss => {
                    st.restore.upgrade().map(Start::Restore)
                }
                None => Some(Start::Disk),
            };
            (start, st.size)
        };

        let start = match start {
            Some(start) => start,
            None => Start::Restore(self.start_restore(size)?),
        };
        Ok(BufferIterator::new(Arc::clone(self), start, filter, size))
    }

    /// Collects every row.
    pub fn rows(self: &Arc<Self>) -> SpillResult<Vec<Row>> {
        self.iterator()?.collect()
    }

    fn start_restore(self: &Arc<Self>, size: u64) -> SpillResult<Arc<Restore>> {
        let stream = self.acquire_stream()?;
        let restore = Arc::new(Restore::new(Arc::downgrade(self), stream, size));
        let mut st = self.state.lock();
        if let Some(existing) = st.restore.upgrade() {
            return Ok(existing);
        }
        st.restore = Arc::downgrade(&restore);
        debug!(buffer = %self.id, rows = size, "restoring table into memory");
        Ok(restore)
    }

    /// Returns the shared file stream, opening it if no reader holds it.
    ///
    /// Waits for an in-flight write first.
    pub(crate) fn acquire_stream(&self) -> SpillResult<Arc<TableStream>> {
        self.wait_for_durable()?;
        let mut slot = self.stream.lock();
        if let Some(stream) = slot.upgrade() {
            return Ok(stream);
        }
        {
            let st = self.state.lock();
            if st.phase == BufferPhase::Cleared {
                return Err(SpillError::illegal_state(format!(
                    "buffer {} has been cleared",
                    self.id
                )));
            }
            if !matches!(st.mirror, Mirror::Complete) {
                return Err(SpillError::illegal_state(format!(
                    "buffer {} has no disk mirror to read from",
                    self.id
                )));
            }
        }
        let stream = Arc::new(TableStream::open(
            &self.file_path,
            self.binding.clone(),
            &self.registry,
        )?);
        *slot = Arc::downgrade(&stream);
        Ok(stream)
    }

    pub(crate) fn restore_completed(&self, rows: &Arc<RowList>) {
        let mut st = self.state.lock();
        if st.phase != BufferPhase::Closed {
            return;
        }
        self.lifecycle.after_restore(self.ctx.cache(), self.key, rows);
        if self.lifecycle.invalidates_restored() && st.invalidator.is_none() {
            let invalidator = Arc::new(CacheInvalidator {
                buffer: self.this.clone(),
            });
            st.invalidator = Some(self.ctx.alerts().register_guarded(invalidator));
        }
    }

    fn invalidate_on_alert(&self) {
        let registration = self.state.lock().invalidator.take();
        self.ctx.cache().invalidate(self.key);
        debug!(buffer = %self.id, rows = self.size(), "dropped restored rows to free memory");
        drop(registration);
    }

    // =========================================================================
    // Clearing
    // =========================================================================

    /// Releases all storage. Idempotent.
    ///
    /// Outstanding iterators fail on their next disk read; blob cells
    /// addressing this buffer become stale.
    pub fn clear(&self) {
        let (flusher, invalidator, writer, pinned, rows) = {
            let mut st = self.state.lock();
            if st.phase == BufferPhase::Cleared {
                return;
            }
            st.phase = BufferPhase::Cleared;
            if let Mirror::InFlight(cancel) = &st.mirror {
                cancel.store(true, Ordering::Release);
            }
            st.mirror = Mirror::Absent;
            st.restore = Weak::new();
            st.copied_blobs.clear();
            (
                st.flusher.take(),
                st.invalidator.take(),
                st.writer.take(),
                st.pinned.take(),
                std::mem::take(&mut st.rows),
            )
        };
        self.write_done.notify_all();
        drop((flusher, invalidator, writer, pinned, rows));

        let released = {
            let mut slot = self.stream.lock();
            let released = self.registry.release_all();
            *slot = Weak::new();
            released
        };
        self.ctx.cache().invalidate(self.key);
        delete_file(&self.file_path);
        self.blobs.clear();
        debug!(buffer = %self.id, released, "buffer cleared");
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Returns true if the rows are resident in memory.
    pub fn is_held_in_memory(&self) -> bool {
        let st = self.state.lock();
        self.held_locked(&st)
    }

    fn held_locked(&self, st: &BufferState) -> bool {
        match st.phase {
            BufferPhase::Writing => st.writer.is_none(),
            BufferPhase::Closed => {
                st.fits_into_memory && (st.pinned.is_some() || self.ctx.cache().contains(self.key))
            }
            BufferPhase::Cleared => false,
        }
    }

    /// Returns true once a complete disk mirror exists.
    pub fn is_flushed_to_disk(&self) -> bool {
        matches!(self.state.lock().mirror, Mirror::Complete)
    }

    /// Returns true after close (and until clear).
    pub fn is_closed(&self) -> bool {
        self.phase() == BufferPhase::Closed
    }

    /// Returns true after clear.
    pub fn is_cleared(&self) -> bool {
        self.phase() == BufferPhase::Cleared
    }

    /// Returns true while a flusher waits for the next memory alert.
    pub fn has_flusher(&self) -> bool {
        self.state.lock().flusher.is_some()
    }

    /// Returns true while a restored list waits to be dropped at the next
    /// memory alert.
    pub fn has_invalidator(&self) -> bool {
        self.state.lock().invalidator.is_some()
    }

    /// Number of reader resources (streams and listeners) currently held.
    pub fn nr_open_resources(&self) -> usize {
        self.registry.open_resources()
    }

    /// Number of open table file streams.
    pub fn nr_open_input_streams(&self) -> usize {
        self.registry.open_streams()
    }

    /// Segments decoded through the open table file stream; 0 while none
    /// is open.
    pub fn nr_segments_decoded(&self) -> u64 {
        let stream = self.stream.lock().upgrade();
        stream.map_or(0, |s| s.segments_decoded())
    }

    /// Returns a snapshot of this buffer's state.
    pub fn stats(&self) -> BufferStats {
        let st = self.state.lock();
        BufferStats {
            id: self.id,
            key: self.key,
            phase: st.phase,
            rows: st.size,
            held_in_memory: self.held_locked(&st),
            flushed_to_disk: matches!(st.mirror, Mirror::Complete),
            open_resources: self.registry.open_resources(),
            open_streams: self.registry.open_streams(),
            blob_slots: self.blobs.slot_count(),
            blob_bytes: self.blobs.stored_bytes(),
            has_flusher: st.flusher.is_some(),
        }
    }

    // =========================================================================
    // Export
    // =========================================================================

    pub(crate) fn export(&self) -> SpillResult<BufferExport> {
        let durable = self.wait_for_durable()?;
        let (spec, row_count, was_in_memory, list) = {
            let st = self.state.lock();
            if st.phase != BufferPhase::Closed {
                return Err(SpillError::illegal_state(format!(
                    "buffer {} must be closed to be exported",
                    self.id
                )));
            }
            let list = if durable {
                None
            } else {
                st.pinned.clone().or_else(|| self.ctx.cache().get_silent(self.key))
            };
            (st.spec.clone(), st.size, st.fits_into_memory, list)
        };

        let data = match list {
            Some(list) => {
                let mut writer = TableWriter::new(
                    Vec::new(),
                    self.settings.compression(),
                    self.settings.rows_per_segment(),
                )?;
                for row in list.iter() {
                    writer.write_row(encode_row(row, self.key)?)?;
                }
                writer.finish()?
            }
            None if durable => std::fs::read(&self.file_path)?,
            None => {
                return Err(SpillError::internal(format!(
                    "buffer {} has neither rows in memory nor a disk mirror",
                    self.id
                )))
            }
        };
        let (blob_bytes, slots) = self.blobs.export()?;

        Ok(BufferExport {
            spec,
            row_count,
            compression: self.settings.compression(),
            was_in_memory,
            data,
            blob_bytes,
            slots,
        })
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("lifecycle", &self.lifecycle)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Writes a small closed table at the next memory alert.
struct Flusher {
    buffer: Weak<Buffer>,
}

impl MemoryAlertListener for Flusher {
    fn memory_alert(&self, _alert: &MemoryAlert) -> bool {
        if let Some(buffer) = self.buffer.upgrade() {
            buffer.flush_on_alert();
        }
        true
    }
}

/// Drops a buffer's restored rows from the cache at the next memory alert.
struct CacheInvalidator {
    buffer: Weak<Buffer>,
}

impl MemoryAlertListener for CacheInvalidator {
    fn memory_alert(&self, _alert: &MemoryAlert) -> bool {
        if let Some(buffer) = self.buffer.upgrade() {
            buffer.invalidate_on_alert();
        }
        true
    }
}

/// Background write of a closed table's rows.
struct WriteJob {
    buffer: Weak<Buffer>,
    rows: Arc<RowList>,
    path: PathBuf,
    key: BufferKey,
    compression: Compression,
    rows_per_segment: usize,
    blobs: Arc<BlobStore>,
    cancel: Arc<AtomicBool>,
}

impl WriteJob {
    fn run(self) {
        let result = self.write();
        // Waiters woken by the completion must not find the list still held.
        drop(self.rows);
        match self.buffer.upgrade() {
            Some(buffer) => buffer.finish_async_write(result, &self.cancel),
            None => delete_file(&self.path),
        }
    }

    /// Returns false if cancelled before the file was complete.
    fn write(&self) -> SpillResult<bool> {
        if self.cancelled() {
            return Ok(false);
        }
        let file = File::create(&self.path)?;
        let mut writer = TableWriter::new(BufWriter::new(file), self.compression, self.rows_per_segment)?;
        for row in self.rows.iter() {
            if self.cancelled() {
                return Ok(false);
            }
            writer.write_row(encode_row(row, self.key)?)?;
        }
        let out = writer.finish()?;
        out.get_ref().sync_data()?;
        self.blobs.sync()?;
        Ok(!self.cancelled())
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}
