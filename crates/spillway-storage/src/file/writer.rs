//! Streaming table file writer.

use std::io::Write;

use spillway_common::config::Compression;

use super::compression::{codec_for, CompressionCodec};
use super::error::{FormatError, FormatResult};
use super::format::{FileHeader, SegmentHeader, StoredRow};

/// Writes rows into a table file, one compressed segment at a time.
///
/// [`TableWriter::finish`] must be called to append the terminator; a file
/// without one is rejected by readers as truncated.
pub struct TableWriter<W: Write> {
    out: W,
    codec: &'static dyn CompressionCodec,
    rows_per_segment: usize,
    pending: Vec<StoredRow>,
    rows_written: u64,
    bytes_written: u64,
    segments_written: u64,
}

impl<W: Write> TableWriter<W> {
    /// Creates a writer and emits the file header.
    pub fn new(mut out: W, compression: Compression, rows_per_segment: usize) -> FormatResult<Self> {
        let header = FileHeader::new(compression).encode();
        out.write_all(&header)?;
        Ok(Self {
            out,
            codec: codec_for(compression),
            rows_per_segment: rows_per_segment.max(1),
            pending: Vec::with_capacity(rows_per_segment.max(1)),
            rows_written: 0,
            bytes_written: header.len() as u64,
            segments_written: 0,
        })
    }

    /// Appends a row, emitting a segment once enough rows are pending.
    pub fn write_row(&mut self, row: StoredRow) -> FormatResult<()> {
        self.pending.push(row);
        if self.pending.len() >= self.rows_per_segment {
            self.flush_segment()?;
        }
        Ok(())
    }

    /// Emits pending rows as a segment.
    pub fn flush_segment(&mut self) -> FormatResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let raw = bincode::serialize(&self.pending).map_err(|e| FormatError::Encode {
            message: e.to_string(),
        })?;
        let stored = self.codec.compress(&raw);
        let header = SegmentHeader {
            row_count: len_u32(self.pending.len())?,
            raw_len: len_u32(raw.len())?,
            stored_len: len_u32(stored.len())?,
            checksum: crc32fast::hash(&stored),
        };
        self.out.write_all(&header.encode())?;
        self.out.write_all(&stored)?;

        self.rows_written += self.pending.len() as u64;
        self.bytes_written += (header.encode().len() + stored.len()) as u64;
        self.segments_written += 1;
        self.pending.clear();
        Ok(())
    }

    /// Returns the number of rows accepted so far.
    pub fn rows_written(&self) -> u64 {
        self.rows_written + self.pending.len() as u64
    }

    /// Returns the number of bytes emitted so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Returns the number of segments emitted so far.
    pub fn segments_written(&self) -> u64 {
        self.segments_written
    }

    /// Flushes pending rows, appends the terminator, and returns the sink.
    pub fn finish(mut self) -> FormatResult<W> {
        self.flush_segment()?;
        self.out.write_all(&SegmentHeader::terminator().encode())?;
        self.out.write_all(&self.rows_written.to_le_bytes())?;
        self.out.flush()?;
        Ok(self.out)
    }
}

fn len_u32(len: usize) -> FormatResult<u32> {
    u32::try_from(len).map_err(|_| FormatError::SegmentTooLarge {
        size: len,
        max: u32::MAX as usize,
    })
}

impl<W: Write> std::fmt::Debug for TableWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableWriter")
            .field("compression", &self.codec.compression())
            .field("rows_written", &self.rows_written())
            .field("segments_written", &self.segments_written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FILE_HEADER_LEN, SEGMENT_HEADER_LEN};
    use crate::file::format::StoredCell;

    fn row(i: u32) -> StoredRow {
        StoredRow {
            key: format!("Row{i}"),
            cells: vec![StoredCell::Int(i as i32)],
        }
    }

    #[test]
    fn test_empty_file_layout() {
        let writer = TableWriter::new(Vec::new(), Compression::None, 4).unwrap();
        let bytes = writer.finish().unwrap();
        assert_eq!(bytes.len(), FILE_HEADER_LEN + SEGMENT_HEADER_LEN + 8);
        assert_eq!(&bytes[..4], b"SPWT");
    }

    #[test]
    fn test_segments_cut_at_row_limit() {
        let mut writer = TableWriter::new(Vec::new(), Compression::Lz4, 4).unwrap();
        for i in 0..10 {
            writer.write_row(row(i)).unwrap();
        }
        assert_eq!(writer.segments_written(), 2);
        assert_eq!(writer.rows_written(), 10);

        let bytes = writer.finish().unwrap();
        let total = u64::from_le_bytes(bytes[bytes.len() - 8..].try_into().unwrap());
        assert_eq!(total, 10);
    }
}
