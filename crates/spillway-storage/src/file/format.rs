//! Fixed binary headers and the stored row representation.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use spillway_common::config::Compression;
use spillway_common::constants::{MAX_SEGMENT_SIZE, TABLE_FILE_MAGIC, TABLE_FILE_VERSION};

use super::error::{FormatError, FormatResult};
use super::{FILE_HEADER_LEN, SEGMENT_HEADER_LEN};

/// Header at the start of every table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version.
    pub version: u16,
    /// Codec used for segment payloads.
    pub compression: Compression,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

impl FileHeader {
    /// Creates a header for the current format version.
    pub fn new(compression: Compression) -> Self {
        Self {
            version: TABLE_FILE_VERSION,
            compression,
        }
    }

    /// Serializes the header.
    pub fn encode(&self) -> [u8; FILE_HEADER_LEN] {
        let mut out = [0u8; FILE_HEADER_LEN];
        let mut buf = &mut out[..];
        buf.put_slice(&TABLE_FILE_MAGIC);
        buf.put_u16_le(self.version);
        buf.put_u8(self.compression.tag());
        buf.put_u8(0);
        out
    }

    /// Parses and validates a header.
    pub fn decode(bytes: &[u8; FILE_HEADER_LEN]) -> FormatResult<Self> {
        let mut buf = &bytes[..];
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != TABLE_FILE_MAGIC {
            return Err(FormatError::BadMagic {
                found: magic.to_vec(),
            });
        }
        let version = buf.get_u16_le();
        if version != TABLE_FILE_VERSION {
            return Err(FormatError::UnsupportedVersion { version });
        }
        let tag = buf.get_u8();
        let compression =
            Compression::from_tag(tag).ok_or(FormatError::UnknownCompression { tag })?;
        Ok(Self {
            version,
            compression,
        })
    }
}

/// Header preceding every segment payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Rows in the segment; zero marks the terminator.
    pub row_count: u32,
    /// Length of the uncompressed payload.
    pub raw_len: u32,
    /// Length of the payload as stored.
    pub stored_len: u32,
    /// CRC32 of the stored payload.
    pub checksum: u32,
}

impl SegmentHeader {
    /// The terminator header.
    pub const fn terminator() -> Self {
        Self {
            row_count: 0,
            raw_len: 0,
            stored_len: 0,
            checksum: 0,
        }
    }

    /// Returns true if this header ends the segment sequence.
    pub const fn is_terminator(&self) -> bool {
        self.row_count == 0
    }

    /// Serializes the header.
    pub fn encode(&self) -> [u8; SEGMENT_HEADER_LEN] {
        let mut out = [0u8; SEGMENT_HEADER_LEN];
        let mut buf = &mut out[..];
        buf.put_u32_le(self.row_count);
        buf.put_u32_le(self.raw_len);
        buf.put_u32_le(self.stored_len);
        buf.put_u32_le(self.checksum);
        out
    }

    /// Parses a header, rejecting lengths beyond the format limit.
    pub fn decode(bytes: &[u8; SEGMENT_HEADER_LEN]) -> FormatResult<Self> {
        let mut buf = &bytes[..];
        let header = Self {
            row_count: buf.get_u32_le(),
            raw_len: buf.get_u32_le(),
            stored_len: buf.get_u32_le(),
            checksum: buf.get_u32_le(),
        };
        for len in [header.raw_len, header.stored_len] {
            let len = len as usize;
            if len > MAX_SEGMENT_SIZE {
                return Err(FormatError::SegmentTooLarge {
                    size: len,
                    max: MAX_SEGMENT_SIZE,
                });
            }
        }
        Ok(header)
    }
}

/// A cell as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredCell {
    /// Missing value marker.
    Missing,
    /// Boolean value.
    Boolean(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// Double-precision float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Slot in the owning buffer's blob file.
    Blob {
        /// Slot index.
        slot: u32,
    },
}

/// A row as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    /// Row key.
    pub key: String,
    /// Cells in column order.
    pub cells: Vec<StoredCell>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_header_codec() {
        let header = FileHeader::new(Compression::None);
        let bytes = header.encode();
        assert_eq!(&bytes[..4], b"SPWT");
        assert_eq!(FileHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_file_header_rejects_garbage() {
        let mut bytes = FileHeader::default().encode();
        bytes[0] = b'X';
        assert!(matches!(
            FileHeader::decode(&bytes),
            Err(FormatError::BadMagic { .. })
        ));

        let mut bytes = FileHeader::default().encode();
        bytes[4] = 99;
        assert!(matches!(
            FileHeader::decode(&bytes),
            Err(FormatError::UnsupportedVersion { version: 99 })
        ));

        let mut bytes = FileHeader::default().encode();
        bytes[6] = 42;
        assert!(matches!(
            FileHeader::decode(&bytes),
            Err(FormatError::UnknownCompression { tag: 42 })
        ));
    }

    #[test]
    fn test_segment_header_limits() {
        let header = SegmentHeader {
            row_count: 3,
            raw_len: 100,
            stored_len: 60,
            checksum: 0xdead_beef,
        };
        assert_eq!(SegmentHeader::decode(&header.encode()).unwrap(), header);
        assert!(SegmentHeader::terminator().is_terminator());

        let huge = SegmentHeader {
            raw_len: u32::MAX,
            ..header
        };
        assert!(matches!(
            SegmentHeader::decode(&huge.encode()),
            Err(FormatError::SegmentTooLarge { .. })
        ));
    }
}
