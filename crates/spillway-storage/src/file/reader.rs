//! Seekable table file reader.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::compression::{codec_for, CompressionCodec};
use super::error::{FormatError, FormatResult};
use super::format::{FileHeader, SegmentHeader, StoredRow};
use super::{FILE_HEADER_LEN, SEGMENT_HEADER_LEN};

/// Where one segment sits in the file.
#[derive(Debug, Clone, Copy)]
struct SegmentEntry {
    first_row: u64,
    /// File offset of the segment header.
    offset: u64,
    header: SegmentHeader,
}

impl SegmentEntry {
    fn end_row(&self) -> u64 {
        self.first_row + u64::from(self.header.row_count)
    }
}

/// Reads rows from a table file by index.
///
/// Segment headers are indexed as they are first passed, so positioning to
/// any row already scanned costs one seek. The reader keeps one decoded
/// segment for [`TableReader::next_row`]; [`TableReader::read_segment`]
/// hands a decoded segment to the caller instead.
pub struct TableReader<R: Read + Seek = BufReader<File>> {
    input: R,
    header: FileHeader,
    codec: &'static dyn CompressionCodec,
    /// Rows of the decoded segment.
    segment: Vec<StoredRow>,
    /// Index of the first row in `segment`.
    segment_start: u64,
    /// Index of the next row to return.
    position: u64,
    /// Segments scanned so far, in file order.
    directory: Vec<SegmentEntry>,
    /// File offset of the first header not yet scanned.
    scan_offset: u64,
    /// Total rows, known once the terminator has been read.
    total_rows: Option<u64>,
    decoded: u64,
}

impl TableReader<BufReader<File>> {
    /// Opens a table file.
    pub fn open(path: &Path) -> FormatResult<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> TableReader<R> {
    /// Creates a reader, validating the file header.
    pub fn new(mut input: R) -> FormatResult<Self> {
        input.seek(SeekFrom::Start(0))?;
        let mut bytes = [0u8; FILE_HEADER_LEN];
        input
            .read_exact(&mut bytes)
            .map_err(|e| FormatError::from_read(e, "file header"))?;
        let header = FileHeader::decode(&bytes)?;
        Ok(Self {
            input,
            header,
            codec: codec_for(header.compression),
            segment: Vec::new(),
            segment_start: 0,
            position: 0,
            directory: Vec::new(),
            scan_offset: FILE_HEADER_LEN as u64,
            total_rows: None,
            decoded: 0,
        })
    }

    /// Returns the file header.
    pub fn header(&self) -> FileHeader {
        self.header
    }

    /// Returns the index of the next row to be read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the total row count if the end has been reached.
    pub fn total_rows(&self) -> Option<u64> {
        self.total_rows
    }

    /// Number of segment payloads decoded so far.
    pub fn segments_decoded(&self) -> u64 {
        self.decoded
    }

    /// Reads the next row, or `None` at the end of the table.
    pub fn next_row(&mut self) -> FormatResult<Option<StoredRow>> {
        if !self.in_segment(self.position) {
            match self.read_segment(self.position)? {
                Some((start, rows)) => {
                    self.segment = rows;
                    self.segment_start = start;
                }
                None => {
                    self.segment.clear();
                    return Ok(None);
                }
            }
        }
        let offset = (self.position - self.segment_start) as usize;
        let row = self.segment[offset].clone();
        self.position += 1;
        Ok(Some(row))
    }

    /// Positions the reader so the next row returned is `index`.
    ///
    /// Seeking past the end is allowed; the next read then returns `None`.
    pub fn seek_to_row(&mut self, index: u64) {
        self.position = index;
    }

    /// Decodes the segment holding row `index`.
    ///
    /// Returns the index of the segment's first row with its rows, or `None`
    /// if the table ends before `index`. The reader's own position is not
    /// moved.
    pub fn read_segment(&mut self, index: u64) -> FormatResult<Option<(u64, Vec<StoredRow>)>> {
        let Some(entry) = self.locate(index)? else {
            return Ok(None);
        };
        self.input
            .seek(SeekFrom::Start(entry.offset + SEGMENT_HEADER_LEN as u64))?;
        let rows = self.decode_segment(&entry.header, entry.first_row)?;
        Ok(Some((entry.first_row, rows)))
    }

    /// Reads every remaining row.
    pub fn read_to_end(&mut self) -> FormatResult<Vec<StoredRow>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Consumes the reader and returns the underlying input.
    pub fn into_inner(self) -> R {
        self.input
    }

    fn in_segment(&self, index: u64) -> bool {
        index >= self.segment_start && index < self.segment_start + self.segment.len() as u64
    }

    /// Finds the segment holding `index`, scanning further headers if needed.
    fn locate(&mut self, index: u64) -> FormatResult<Option<SegmentEntry>> {
        let known = self.directory.partition_point(|e| e.end_row() <= index);
        if let Some(entry) = self.directory.get(known) {
            return Ok(Some(*entry));
        }
        while let Some(entry) = self.scan_header()? {
            if entry.end_row() > index {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Indexes the next unscanned header; `None` once the terminator is read.
    fn scan_header(&mut self) -> FormatResult<Option<SegmentEntry>> {
        if self.total_rows.is_some() {
            return Ok(None);
        }
        let first_row = self.directory.last().map_or(0, SegmentEntry::end_row);

        self.input.seek(SeekFrom::Start(self.scan_offset))?;
        let mut bytes = [0u8; SEGMENT_HEADER_LEN];
        self.input
            .read_exact(&mut bytes)
            .map_err(|e| FormatError::from_read(e, "segment header"))?;
        let header = SegmentHeader::decode(&bytes)?;

        if header.is_terminator() {
            let mut total = [0u8; 8];
            self.input
                .read_exact(&mut total)
                .map_err(|e| FormatError::from_read(e, "terminator"))?;
            let total = u64::from_le_bytes(total);
            if total != first_row {
                return Err(FormatError::RowCountMismatch {
                    expected: total,
                    actual: first_row,
                });
            }
            self.total_rows = Some(total);
            return Ok(None);
        }

        let entry = SegmentEntry {
            first_row,
            offset: self.scan_offset,
            header,
        };
        self.scan_offset += SEGMENT_HEADER_LEN as u64 + u64::from(header.stored_len);
        self.directory.push(entry);
        Ok(Some(entry))
    }

    fn decode_segment(&mut self, header: &SegmentHeader, first_row: u64) -> FormatResult<Vec<StoredRow>> {
        let mut stored = vec![0u8; header.stored_len as usize];
        self.input
            .read_exact(&mut stored)
            .map_err(|e| FormatError::from_read(e, "segment payload"))?;

        let actual = crc32fast::hash(&stored);
        if actual != header.checksum {
            return Err(FormatError::ChecksumMismatch {
                first_row,
                expected: header.checksum,
                actual,
            });
        }

        let raw = self.codec.decompress(&stored, header.raw_len as usize)?;
        let rows: Vec<StoredRow> = bincode::deserialize(&raw)?;
        if rows.len() != header.row_count as usize {
            return Err(FormatError::SegmentRowCount {
                first_row,
                expected: header.row_count,
                actual: rows.len(),
            });
        }
        self.decoded += 1;
        Ok(rows)
    }
}

impl<R: Read + Seek> std::fmt::Debug for TableReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableReader")
            .field("compression", &self.header.compression)
            .field("position", &self.position)
            .field("total_rows", &self.total_rows)
            .finish()
    }
}
