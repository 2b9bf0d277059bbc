//! Table file format.
//!
//! A table file is written once, front to back, and read back sequentially
//! by any number of readers:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ SPWT │ version │ codec │ 0   │  file header, 8 bytes
//! ├──────────────────────────────┤
//! │ rows │ raw │ stored │ crc32  │  segment header, 16 bytes
//! │ payload (stored bytes)       │  bincode rows, compressed
//! ├──────────────────────────────┤
//! │ ...                          │
//! ├──────────────────────────────┤
//! │ 0 │ 0 │ 0 │ 0 │ total rows   │  terminator
//! └──────────────────────────────┘
//! ```
//!
//! Blob cells are stored as slot references into the owning buffer's blob
//! file; [`codec::decode_row`] rebinds them to a [`codec::BlobBinding`].

pub mod codec;
pub mod compression;
mod error;
pub mod format;
mod reader;
mod writer;

pub use codec::{decode_row, encode_row, BlobBinding};
pub use compression::{codec_for, CompressionCodec};
pub use error::{FormatError, FormatResult};
pub use format::{FileHeader, SegmentHeader, StoredCell, StoredRow};
pub use reader::TableReader;
pub use writer::TableWriter;

/// Size of the file header in bytes.
pub const FILE_HEADER_LEN: usize = 8;

/// Size of a segment header in bytes.
pub const SEGMENT_HEADER_LEN: usize = 16;
