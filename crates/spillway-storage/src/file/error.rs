//! Error types for the table file format.

use std::io;

use spillway_common::error::SpillError;
use thiserror::Error;

/// Result type for table file operations.
pub type FormatResult<T> = Result<T, FormatError>;

/// Errors raised while reading or writing table files.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum FormatError {
    /// Standard I/O error.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// The file does not start with the table file magic.
    #[error("not a table file: bad magic {found:02x?}")]
    BadMagic { found: Vec<u8> },

    /// The file was written by an unknown format version.
    #[error("unsupported table file version {version}")]
    UnsupportedVersion { version: u16 },

    /// The header names an unknown compression codec.
    #[error("unknown compression tag {tag}")]
    UnknownCompression { tag: u8 },

    /// Segment payload failed its checksum.
    #[error("segment at row {first_row} checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        first_row: u64,
        expected: u32,
        actual: u32,
    },

    /// Segment length exceeds the format limit.
    #[error("segment of {size} bytes exceeds limit of {max} bytes")]
    SegmentTooLarge { size: usize, max: usize },

    /// The file ended before the terminator.
    #[error("table file truncated while reading {context}")]
    Truncated { context: &'static str },

    /// Terminator total disagrees with the rows read.
    #[error("row count mismatch: terminator says {expected}, segments hold {actual}")]
    RowCountMismatch { expected: u64, actual: u64 },

    /// A segment decoded to a different number of rows than its header says.
    #[error("segment at row {first_row} holds {actual} rows, header says {expected}")]
    SegmentRowCount {
        first_row: u64,
        expected: u32,
        actual: usize,
    },

    /// A blob cell is not owned by the buffer being written.
    #[error("row '{key}' carries a blob not owned by the buffer being written")]
    ForeignBlob { key: String },

    /// Encoding rows failed.
    #[error("encoding failed: {message}")]
    Encode { message: String },

    /// Decoding rows failed.
    #[error("decoding failed: {message}")]
    Decode { message: String },

    /// Decompression failed.
    #[error("decompression failed: {message}")]
    Decompress { message: String },

    /// Operation on a writer that has already been finished.
    #[error("table writer already finished")]
    Finished,
}

impl FormatError {
    /// Creates a Truncated error, mapping unexpected EOF.
    pub fn from_read(source: io::Error, context: &'static str) -> Self {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated { context }
        } else {
            Self::Io { source }
        }
    }

    /// Returns true if this error indicates corrupted content.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::BadMagic { .. }
                | Self::ChecksumMismatch { .. }
                | Self::SegmentTooLarge { .. }
                | Self::Truncated { .. }
                | Self::RowCountMismatch { .. }
                | Self::SegmentRowCount { .. }
                | Self::Decode { .. }
                | Self::Decompress { .. }
        )
    }
}

impl From<bincode::Error> for FormatError {
    fn from(err: bincode::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}

impl From<FormatError> for SpillError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::Io { source } => SpillError::Io { source },
            FormatError::ChecksumMismatch {
                expected, actual, ..
            } => SpillError::ChecksumMismatch { expected, actual },
            FormatError::Encode { message } => SpillError::Serialization { message },
            FormatError::ForeignBlob { .. } | FormatError::Finished => {
                SpillError::internal(err.to_string())
            }
            other => SpillError::corruption(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_common::error::ErrorCode;

    #[test]
    fn test_eof_maps_to_truncated() {
        let err = FormatError::from_read(
            io::Error::new(io::ErrorKind::UnexpectedEof, "eof"),
            "segment header",
        );
        assert!(matches!(err, FormatError::Truncated { .. }));
        assert!(err.is_corruption());

        let err = FormatError::from_read(io::Error::new(io::ErrorKind::Other, "x"), "payload");
        assert!(matches!(err, FormatError::Io { .. }));
    }

    #[test]
    fn test_conversion_to_spill_error() {
        let err: SpillError = FormatError::ChecksumMismatch {
            first_row: 0,
            expected: 1,
            actual: 2,
        }
        .into();
        assert_eq!(err.code(), ErrorCode::Corruption);

        let err: SpillError = FormatError::BadMagic { found: vec![0; 4] }.into();
        assert_eq!(err.code(), ErrorCode::Corruption);

        let err: SpillError = FormatError::Finished.into();
        assert_eq!(err.code(), ErrorCode::Internal);
    }
}
