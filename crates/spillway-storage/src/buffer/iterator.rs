//! Row iterators over a closed buffer.
//!
//! ```text
//!   InMemory ──evicted──▶ DiskBacked
//!                              ▲
//!  Resurrected ──detached──────┘
//!       │
//!       └──restored──▶ InMemory
//!
//!  any ──exhausted / closed──▶ Closed
//! ```
//!
//! An iterator never changes position when it changes state: row `i` is
//! read from whichever source is current when `i` is requested, and every
//! source yields identical rows. The disk stream is opened on the first read
//! that needs it.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use spillway_common::error::{SpillError, SpillResult};
use spillway_common::memory::{MemoryAlert, MemoryAlertListener};
use spillway_common::types::Row;
use tracing::trace;

use super::filter::TableFilter;
use super::restore::Restore;
use super::stream::DiskCursor;
use super::Buffer;
use crate::context::RowList;
use crate::resource::{ResourceHandle, ResourceId, ResourceRegistry};

/// Restore an iterator reads from; emptied by its dropper.
type RestoreSlot = Arc<Mutex<Option<Arc<Restore>>>>;

/// Source an iterator is currently reading from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterMode {
    /// Reading the resident row list.
    InMemory,
    /// Reading a restore in progress.
    Resurrected,
    /// Reading the disk mirror.
    DiskBacked,
    /// Exhausted or closed.
    Closed,
}

pub(crate) enum IterState {
    InMemory {
        rows: Weak<RowList>,
    },
    Resurrected {
        slot: RestoreSlot,
        _dropper: ResourceHandle,
    },
    DiskBacked {
        cursor: DiskCursor,
    },
    Closed,
}

#[derive(Debug)]
pub(crate) enum IterEvent {
    /// The resident list is gone.
    Evicted,
    /// The dropper took the restore away.
    Detached,
    /// The restore finished; read its list from now on.
    Restored(Weak<RowList>),
    /// No rows left.
    Exhausted,
    /// Closed by the consumer.
    Closed,
}

impl IterState {
    pub(crate) fn mode(&self) -> IterMode {
        match self {
            Self::InMemory { .. } => IterMode::InMemory,
            Self::Resurrected { .. } => IterMode::Resurrected,
            Self::DiskBacked { .. } => IterMode::DiskBacked,
            Self::Closed => IterMode::Closed,
        }
    }

    /// Transition function. Leaving a state drops what it holds.
    pub(crate) fn on(self, event: IterEvent) -> Self {
        match (self, event) {
            (_, IterEvent::Exhausted | IterEvent::Closed) | (Self::Closed, _) => Self::Closed,
            (Self::InMemory { .. }, IterEvent::Evicted)
            | (Self::Resurrected { .. }, IterEvent::Detached) => Self::DiskBacked {
                cursor: DiskCursor::default(),
            },
            (Self::Resurrected { .. }, IterEvent::Restored(rows)) => Self::InMemory { rows },
            (state, _) => state,
        }
    }
}

/// Releases an iterator's hold on a restore at the next memory alert.
struct Dropper {
    slot: Weak<Mutex<Option<Arc<Restore>>>>,
    registry: Weak<ResourceRegistry>,
    id: ResourceId,
}

impl MemoryAlertListener for Dropper {
    fn memory_alert(&self, _alert: &MemoryAlert) -> bool {
        if let Some(slot) = self.slot.upgrade() {
            let restore = slot.lock().take();
            drop(restore);
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.release(self.id);
        }
        true
    }
}

/// Where a new iterator starts.
pub(crate) enum Start {
    Memory(Weak<RowList>),
    Restore(Arc<Restore>),
    Disk,
}

enum Step {
    Row(Row),
    RowThen(Row, IterEvent),
    End,
    Transition(IterEvent),
    Fail(SpillError),
}

/// Iterator over the rows of a closed buffer.
///
/// Yields rows in insertion order. Dropping the iterator releases every
/// resource it holds, exactly as [`BufferIterator::close`] does.
pub struct BufferIterator {
    buffer: Arc<Buffer>,
    state: IterState,
    next_index: u64,
    end: u64,
}

impl BufferIterator {
    pub(crate) fn new(buffer: Arc<Buffer>, start: Start, filter: TableFilter, size: u64) -> Self {
        let state = match start {
            Start::Memory(rows) => IterState::InMemory { rows },
            Start::Disk => IterState::DiskBacked {
                cursor: DiskCursor::default(),
            },
            Start::Restore(restore) => {
                let slot: RestoreSlot = Arc::new(Mutex::new(Some(restore)));
                let weak_slot = Arc::downgrade(&slot);
                let registry = Arc::clone(buffer.registry());
                let weak_registry = Arc::downgrade(&registry);
                let dropper = registry.register_listener(
                    buffer.context().alerts(),
                    move |id| -> Arc<dyn MemoryAlertListener> {
                        Arc::new(Dropper {
                            slot: weak_slot,
                            registry: weak_registry,
                            id,
                        })
                    },
                );
                IterState::Resurrected {
                    slot,
                    _dropper: dropper,
                }
            }
        };
        Self {
            buffer,
            state,
            next_index: filter.first(),
            end: filter.end(size),
        }
    }

    /// Index of the next row to be returned.
    pub fn position(&self) -> u64 {
        self.next_index
    }

    /// Source currently read from.
    pub fn mode(&self) -> IterMode {
        self.state.mode()
    }

    /// Returns true once the iterator is exhausted or closed.
    pub fn is_closed(&self) -> bool {
        self.mode() == IterMode::Closed
    }

    /// Releases every resource this iterator holds. Idempotent.
    pub fn close(&mut self) {
        self.apply(IterEvent::Closed);
    }

    fn apply(&mut self, event: IterEvent) {
        let before = self.state.mode();
        let state = std::mem::replace(&mut self.state, IterState::Closed);
        self.state = state.on(event);
        let after = self.state.mode();
        if before != after {
            trace!(
                buffer = %self.buffer.id(),
                position = self.next_index,
                ?before,
                ?after,
                "iterator changed source"
            );
        }
    }

    fn step(&mut self) -> Step {
        let index = self.next_index;
        match &mut self.state {
            IterState::Closed => Step::End,
            IterState::InMemory { rows } => match rows.upgrade() {
                Some(list) => match usize::try_from(index).ok().and_then(|i| list.get(i)) {
                    Some(row) => Step::Row(row.clone()),
                    None => Step::End,
                },
                None => Step::Transition(IterEvent::Evicted),
            },
            IterState::Resurrected { slot, .. } => {
                let restore = slot.lock().clone();
                let Some(restore) = restore else {
                    return Step::Transition(IterEvent::Detached);
                };
                match restore.row(index) {
                    Ok(Some(row)) => match restore.completed() {
                        Some(list) => Step::RowThen(row, IterEvent::Restored(Arc::downgrade(&list))),
                        None => Step::Row(row),
                    },
                    Ok(None) => Step::End,
                    Err(e) => Step::Fail(e),
                }
            }
            IterState::DiskBacked { cursor } => match cursor.read(&self.buffer, index) {
                Ok(Some(row)) => Step::Row(row),
                Ok(None) => Step::End,
                Err(e) => Step::Fail(e),
            },
        }
    }
}

impl Iterator for BufferIterator {
    type Item = SpillResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.next_index >= self.end {
                self.apply(IterEvent::Exhausted);
                return None;
            }
            match self.step() {
                Step::Row(row) => {
                    self.next_index += 1;
                    return Some(Ok(row));
                }
                Step::RowThen(row, event) => {
                    self.next_index += 1;
                    self.apply(event);
                    return Some(Ok(row));
                }
                Step::End => {
                    self.apply(IterEvent::Exhausted);
                    return None;
                }
                Step::Transition(event) => self.apply(event),
                Step::Fail(e) => {
                    self.apply(IterEvent::Closed);
                    return Some(Err(e));
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.is_closed() {
            return (0, Some(0));
        }
        let remaining = usize::try_from(self.end.saturating_sub(self.next_index)).ok();
        (0, remaining)
    }
}

impl Drop for BufferIterator {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for BufferIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferIterator")
            .field("buffer", &self.buffer.id())
            .field("mode", &self.mode())
            .field("position", &self.next_index)
            .field("end", &self.end)
            .finish()
    }
}
