//! Ordered batch writes on the shared writer pool.
//!
//! Batches from one container are applied to its buffer strictly in
//! submission order: at most one drain job per writer is queued on the pool
//! at any time, and it pops batches from the front of the writer's own
//! queue. Different containers drain concurrently.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use spillway_common::error::{SpillError, SpillResult};
use spillway_common::types::Row;
use spillway_storage::Buffer;
use tracing::{debug, error};

#[derive(Debug, Default)]
struct LaneState {
    /// Batches not yet picked up by the drain job.
    queue: VecDeque<Vec<Row>>,
    /// Whether a drain job is queued or running.
    running: bool,
    /// Batches queued or being applied.
    in_flight: usize,
    /// First failure; every later submit reports it.
    error: Option<Arc<SpillError>>,
}

struct Lane {
    state: Mutex<LaneState>,
    changed: Condvar,
    buffer: Arc<Buffer>,
    memory_low: Arc<AtomicBool>,
    max_pending: usize,
}

impl Lane {
    /// Applies one batch, then honours a pending low-memory request.
    fn apply(&self, batch: Vec<Row>) -> SpillResult<()> {
        let rows = batch.len();
        let result = catch_unwind(AssertUnwindSafe(|| -> SpillResult<()> {
            self.buffer.add_rows(batch)?;
            if self.memory_low.swap(false, Ordering::AcqRel) && self.buffer.flush_to_disk()? {
                debug!(buffer = %self.buffer.id(), "flushed buffer on memory alert");
            }
            Ok(())
        }));
        match result {
            Ok(result) => result,
            Err(_) => Err(SpillError::internal(format!(
                "writing a batch of {rows} rows panicked"
            ))),
        }
    }

    fn drain(self: Arc<Self>) {
        loop {
            let batch = {
                let mut st = self.state.lock();
                match st.queue.pop_front() {
                    Some(batch) => batch,
                    None => {
                        st.running = false;
                        self.changed.notify_all();
                        return;
                    }
                }
            };

            let result = self.apply(batch);

            let mut st = self.state.lock();
            st.in_flight -= 1;
            if let Err(e) = result {
                error!(buffer = %self.buffer.id(), error = %e, "background batch write failed");
                let dropped = st.queue.len();
                st.in_flight -= dropped;
                st.queue.clear();
                st.error.get_or_insert_with(|| Arc::new(e));
            }
            self.changed.notify_all();
        }
    }
}

/// Applies row batches to a buffer, inline or on the writer pool.
pub struct BatchWriter {
    lane: Arc<Lane>,
    sequential: bool,
}

impl BatchWriter {
    /// Creates a writer for `buffer`.
    ///
    /// At most `max_pending` batches are queued before [`submit`](Self::submit)
    /// blocks. With `sequential`, batches are applied on the calling thread.
    /// Setting `memory_low` makes the next applied batch flush the buffer.
    pub fn new(
        buffer: Arc<Buffer>,
        memory_low: Arc<AtomicBool>,
        max_pending: usize,
        sequential: bool,
    ) -> Self {
        Self {
            lane: Arc::new(Lane {
                state: Mutex::new(LaneState::default()),
                changed: Condvar::new(),
                buffer,
                memory_low,
                max_pending: max_pending.max(1),
            }),
            sequential,
        }
    }

    /// Hands `batch` over for writing.
    ///
    /// Fails with the first error of an earlier batch, if any.
    pub fn submit(&self, batch: Vec<Row>) -> SpillResult<()> {
        if batch.is_empty() {
            return self.check();
        }
        if self.sequential {
            self.check()?;
            return self.lane.apply(batch).map_err(|e| {
                let e = Arc::new(e);
                self.lane.state.lock().error = Some(e.clone());
                SpillError::async_write("batch write failed", e)
            });
        }

        let mut st = self.lane.state.lock();
        while st.error.is_none() && st.in_flight >= self.lane.max_pending {
            self.lane.changed.wait(&mut st);
        }
        if let Some(e) = &st.error {
            return Err(SpillError::async_write("an earlier batch write failed", e.clone()));
        }
        st.queue.push_back(batch);
        st.in_flight += 1;
        if st.running {
            return Ok(());
        }
        st.running = true;
        drop(st);

        let lane = self.lane.clone();
        if let Err(e) = self
            .lane
            .buffer
            .context()
            .pool()
            .submit(move || lane.drain())
        {
            let mut st = self.lane.state.lock();
            st.running = false;
            let dropped = st.queue.len();
            st.in_flight -= dropped;
            st.queue.clear();
            self.lane.changed.notify_all();
            return Err(e);
        }
        Ok(())
    }

    /// Blocks until every submitted batch is applied.
    ///
    /// Returns the first error of any batch.
    pub fn flush(&self) -> SpillResult<()> {
        let mut st = self.lane.state.lock();
        while st.running || st.in_flight > 0 {
            self.lane.changed.wait(&mut st);
        }
        drop(st);
        self.check()
    }

    /// Returns the first error of any batch so far.
    pub fn check(&self) -> SpillResult<()> {
        match &self.lane.state.lock().error {
            Some(e) => Err(SpillError::async_write("an earlier batch write failed", e.clone())),
            None => Ok(()),
        }
    }

    /// Number of batches queued or being applied.
    pub fn pending(&self) -> usize {
        self.lane.state.lock().in_flight
    }
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("buffer", &self.lane.buffer.id())
            .field("pending", &self.pending())
            .field("sequential", &self.sequential)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_common::config::StorageSettings;
    use spillway_common::types::{BufferId, Cell, ColumnSpec, DataType, TableSpec};
    use spillway_storage::StorageContext;

    fn buffer(ctx: &Arc<StorageContext>) -> Arc<Buffer> {
        let spec = TableSpec::new(vec![ColumnSpec::new("n", DataType::Int)]).unwrap();
        Buffer::new(ctx, BufferId::new(1), spec, ctx.settings().clone())
    }

    fn batch(from: i32, to: i32) -> Vec<Row> {
        (from..to)
            .map(|i| Row::new(format!("Row{i}"), vec![Cell::Int(i)]))
            .collect()
    }

    fn values(buffer: &Arc<Buffer>) -> Vec<i32> {
        buffer
            .rows()
            .unwrap()
            .iter()
            .map(|row| match row.cell(0) {
                Some(Cell::Int(v)) => *v,
                other => panic!("unexpected cell {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_batches_applied_in_order() {
        let ctx = StorageContext::for_testing().unwrap();
        let buffer = buffer(&ctx);
        let writer = BatchWriter::new(buffer.clone(), Arc::new(AtomicBool::new(false)), 2, false);

        for start in (0..200).step_by(10) {
            writer.submit(batch(start, start + 10)).unwrap();
        }
        writer.flush().unwrap();
        assert_eq!(writer.pending(), 0);

        buffer.close().unwrap();
        assert_eq!(values(&buffer), (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_sequential_applies_inline() {
        let ctx = StorageContext::for_testing().unwrap();
        let buffer = buffer(&ctx);
        let writer = BatchWriter::new(buffer.clone(), Arc::new(AtomicBool::new(false)), 1, true);

        writer.submit(batch(0, 5)).unwrap();
        assert_eq!(buffer.size(), 5);
        assert_eq!(writer.pending(), 0);
    }

    #[test]
    fn test_memory_low_flushes_buffer() {
        let ctx = StorageContext::for_testing().unwrap();
        let buffer = buffer(&ctx);
        let low = Arc::new(AtomicBool::new(false));
        let writer = BatchWriter::new(buffer.clone(), low.clone(), 1, true);

        writer.submit(batch(0, 5)).unwrap();
        assert!(!buffer.file_path().exists());

        low.store(true, Ordering::SeqCst);
        writer.submit(batch(5, 10)).unwrap();
        assert!(!low.load(Ordering::SeqCst));
        assert!(buffer.file_path().exists());

        buffer.close().unwrap();
        assert_eq!(values(&buffer), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_failure_is_sticky() {
        let ctx = StorageContext::for_testing().unwrap();
        let buffer = buffer(&ctx);
        let writer = BatchWriter::new(buffer.clone(), Arc::new(AtomicBool::new(false)), 2, false);

        buffer.close().unwrap();
        writer.submit(batch(0, 3)).unwrap();
        let err = writer.flush().unwrap_err();
        assert!(matches!(err, SpillError::AsyncWrite { .. }));
        assert!(writer.submit(batch(3, 6)).is_err());
    }
}
