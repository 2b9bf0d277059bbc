//! Reading an evicted table back into memory.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use spillway_common::error::{SpillError, SpillResult};
use spillway_common::types::Row;
use tracing::debug;

use super::stream::TableStream;
use super::Buffer;
use crate::context::RowList;

struct RestoreState {
    rows: Vec<Row>,
    stream: Option<Arc<TableStream>>,
    complete: Option<Arc<RowList>>,
}

/// A growing in-memory copy of a table read from its disk mirror.
///
/// Any number of iterators consume the copy while it grows. Rows are read on
/// demand; whoever asks for a row not yet read reads up to it. Once the last
/// row is in, the list is handed to the buffer's lifecycle and the stream is
/// dropped.
pub(crate) struct Restore {
    buffer: Weak<Buffer>,
    expected_rows: u64,
    state: Mutex<RestoreState>,
}

impl Restore {
    pub(crate) fn new(buffer: Weak<Buffer>, stream: Arc<TableStream>, expected_rows: u64) -> Self {
        Self {
            buffer,
            expected_rows,
            state: Mutex::new(RestoreState {
                rows: Vec::with_capacity(usize::try_from(expected_rows).unwrap_or(0)),
                stream: Some(stream),
                complete: None,
            }),
        }
    }

    /// Returns row `index`, reading from disk as far as needed.
    pub(crate) fn row(&self, index: u64) -> SpillResult<Option<Row>> {
        let mut state = self.state.lock();
        if let Some(list) = &state.complete {
            return Ok(list.get(index as usize).cloned());
        }

        while (state.rows.len() as u64) <= index && (state.rows.len() as u64) < self.expected_rows {
            let position = state.rows.len() as u64;
            let segment = state
                .stream
                .as_ref()
                .ok_or_else(|| SpillError::internal("restore lost its stream"))?
                .read_segment(position)?;
            match segment {
                Some(segment) if segment.end() > position => {
                    state.rows.extend(segment.rows_from(position));
                }
                _ => break,
            }
        }

        let row = state.rows.get(index as usize).cloned();
        if row.is_none() || state.rows.len() as u64 >= self.expected_rows {
            self.complete(&mut state);
        }
        Ok(row)
    }

    /// Returns the full list once every row has been read.
    pub(crate) fn completed(&self) -> Option<Arc<RowList>> {
        self.state.lock().complete.clone()
    }

    fn complete(&self, state: &mut RestoreState) {
        let list = Arc::new(std::mem::take(&mut state.rows));
        state.stream = None;
        state.complete = Some(Arc::clone(&list));
        debug!(rows = list.len(), "restored table into memory");
        if let Some(buffer) = self.buffer.upgrade() {
            buffer.restore_completed(&list);
        }
    }
}
