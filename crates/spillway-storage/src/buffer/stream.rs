//! Table file stream shared by the readers of one buffer.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use spillway_common::error::{SpillError, SpillResult};
use spillway_common::types::Row;

use crate::file::{decode_row, BlobBinding, TableReader};
use crate::resource::{ResourceHandle, ResourceRegistry, StreamSlot};

/// One open table file, positioned per call.
///
/// Readers share the file handle but not a position: each asks for the
/// segment holding the row it wants and keeps the decoded segment itself.
/// The stream closes when its last holder drops it or the owning buffer
/// releases its resources.
pub(crate) struct TableStream {
    reader: StreamSlot,
    binding: BlobBinding,
    _handle: ResourceHandle,
}

/// Decoded rows of one segment, owned by a single reader.
#[derive(Debug)]
pub(crate) struct Segment {
    start: u64,
    rows: Vec<Row>,
}

impl Segment {
    /// Row `index` if this segment holds it.
    pub(crate) fn row(&self, index: u64) -> Option<&Row> {
        let offset = usize::try_from(index.checked_sub(self.start)?).ok()?;
        self.rows.get(offset)
    }

    /// Index one past the last row.
    pub(crate) fn end(&self) -> u64 {
        self.start + self.rows.len() as u64
    }

    /// Consumes the segment, keeping rows from `index` on.
    pub(crate) fn rows_from(self, index: u64) -> Vec<Row> {
        let skip = usize::try_from(index.saturating_sub(self.start)).unwrap_or(usize::MAX);
        self.rows.into_iter().skip(skip).collect()
    }
}

impl TableStream {
    pub(crate) fn open(
        path: &Path,
        binding: BlobBinding,
        registry: &Arc<ResourceRegistry>,
    ) -> SpillResult<Self> {
        let reader = TableReader::open(path)?;
        let slot: StreamSlot = Arc::new(Mutex::new(Some(reader)));
        let handle = registry.register_stream(Arc::clone(&slot));
        Ok(Self {
            reader: slot,
            binding,
            _handle: handle,
        })
    }

    /// Segment payloads decoded through this stream.
    pub(crate) fn segments_decoded(&self) -> u64 {
        self.reader
            .lock()
            .as_ref()
            .map_or(0, TableReader::segments_decoded)
    }

    /// Decodes the segment holding row `index`, or `None` past the end.
    pub(crate) fn read_segment(&self, index: u64) -> SpillResult<Option<Segment>> {
        let stored = {
            let mut guard = self.reader.lock();
            let reader = guard
                .as_mut()
                .ok_or_else(|| SpillError::illegal_state("table stream has been released"))?;
            reader.read_segment(index)?
        };
        Ok(stored.map(|(start, rows)| Segment {
            start,
            rows: rows
                .into_iter()
                .map(|row| decode_row(row, &self.binding))
                .collect(),
        }))
    }
}

/// A reader's position-independent view of the shared stream.
///
/// The stream is opened on the first read; the decoded segment is reused
/// until a row outside it is asked for.
#[derive(Default)]
pub(crate) struct DiskCursor {
    stream: Option<Arc<TableStream>>,
    segment: Option<Segment>,
}

impl DiskCursor {
    pub(crate) fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Reads row `index` of `buffer`'s disk mirror.
    pub(crate) fn read(&mut self, buffer: &super::Buffer, index: u64) -> SpillResult<Option<Row>> {
        if let Some(row) = self.segment.as_ref().and_then(|s| s.row(index)) {
            return Ok(Some(row.clone()));
        }
        let stream = match &self.stream {
            Some(stream) => Arc::clone(stream),
            None => {
                let stream = buffer.acquire_stream()?;
                self.stream = Some(Arc::clone(&stream));
                stream
            }
        };
        self.segment = stream.read_segment(index)?;
        Ok(self.segment.as_ref().and_then(|s| s.row(index)).cloned())
    }
}
