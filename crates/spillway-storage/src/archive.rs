//! Single-file export of a closed table.
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ SPWARCH\0 │ version u32            │
//! ├────────────────────────────────────┤
//! │ tag u8 │ len u64 │ crc32 u32 │ ... │  META, DATA, BLOBS, BLOB_DIR
//! ├────────────────────────────────────┤
//! │ END │ 8 │ crc32 │ row count u64    │
//! └────────────────────────────────────┘
//! ```
//!
//! META is json, DATA is a complete table file, BLOBS the raw blob file and
//! BLOB_DIR its bincode slot directory. Every section is checksummed.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use spillway_common::config::Compression;
use spillway_common::constants::{ARCHIVE_MAGIC, ARCHIVE_VERSION};
use spillway_common::error::{SpillError, SpillResult};
use spillway_common::types::{BufferId, TableSpec};
use tracing::debug;

use crate::blob::SlotEntry;
use crate::buffer::BufferExport;
use crate::file::TableReader;

const HEADER_LEN: usize = ARCHIVE_MAGIC.len() + 4;
const SECTION_HEADER_LEN: usize = 1 + 8 + 4;

/// Descriptor stored in the META section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    /// Archive format version.
    pub format_version: u32,
    /// Id of the exported buffer.
    pub buffer_id: BufferId,
    /// Number of rows in DATA.
    pub row_count: u64,
    /// Compression of DATA.
    pub compression: Compression,
    /// Whether the table fit into memory when exported.
    pub was_in_memory: bool,
    /// Schema including column domains.
    pub spec: TableSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    End,
    Meta,
    Data,
    Blobs,
    BlobDir,
}

impl Section {
    fn tag(self) -> u8 {
        match self {
            Self::End => 0,
            Self::Meta => 1,
            Self::Data => 2,
            Self::Blobs => 3,
            Self::BlobDir => 4,
        }
    }

    fn from_tag(tag: u8) -> SpillResult<Self> {
        Ok(match tag {
            0 => Self::End,
            1 => Self::Meta,
            2 => Self::Data,
            3 => Self::Blobs,
            4 => Self::BlobDir,
            other => {
                return Err(SpillError::corruption(format!(
                    "unknown archive section tag {other}"
                )))
            }
        })
    }
}

/// Writes `export` to `path`, replacing any existing file.
pub(crate) fn write_archive(path: &Path, id: BufferId, export: &BufferExport) -> SpillResult<()> {
    let meta = ArchiveMeta {
        format_version: ARCHIVE_VERSION,
        buffer_id: id,
        row_count: export.row_count,
        compression: export.compression,
        was_in_memory: export.was_in_memory,
        spec: export.spec.clone(),
    };
    let meta = serde_json::to_vec(&meta).map_err(|e| SpillError::serialization(e.to_string()))?;
    let directory =
        bincode::serialize(&export.slots).map_err(|e| SpillError::serialization(e.to_string()))?;

    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    let mut header = BytesMut::with_capacity(HEADER_LEN);
    header.put_slice(&ARCHIVE_MAGIC);
    header.put_u32_le(ARCHIVE_VERSION);
    out.write_all(&header)?;

    write_section(&mut out, Section::Meta, &meta)?;
    write_section(&mut out, Section::Data, &export.data)?;
    write_section(&mut out, Section::Blobs, &export.blob_bytes)?;
    write_section(&mut out, Section::BlobDir, &directory)?;
    write_section(&mut out, Section::End, &export.row_count.to_le_bytes())?;

    let file = out.into_inner().map_err(|e| SpillError::from(e.into_error()))?;
    file.sync_all()?;
    debug!(path = %path.display(), rows = export.row_count, "wrote table archive");
    Ok(())
}

fn write_section<W: Write>(out: &mut W, section: Section, bytes: &[u8]) -> SpillResult<()> {
    let mut header = BytesMut::with_capacity(SECTION_HEADER_LEN);
    header.put_u8(section.tag());
    header.put_u64_le(bytes.len() as u64);
    header.put_u32_le(crc32fast::hash(bytes));
    out.write_all(&header)?;
    out.write_all(bytes)?;
    Ok(())
}

/// Reads and validates the archive at `path`.
pub(crate) fn read_archive(path: &Path) -> SpillResult<(ArchiveMeta, BufferExport)> {
    let file = File::open(path)?;
    let mut remaining = file.metadata()?.len();
    let mut input = BufReader::new(file);

    let mut header = [0u8; HEADER_LEN];
    read_exact(&mut input, &mut header, "archive header")?;
    remaining = remaining.saturating_sub(HEADER_LEN as u64);
    let mut buf = &header[..];
    let mut magic = [0u8; ARCHIVE_MAGIC.len()];
    buf.copy_to_slice(&mut magic);
    if magic != ARCHIVE_MAGIC {
        return Err(SpillError::corruption(format!(
            "not a table archive, found magic {magic:?}"
        )));
    }
    let version = buf.get_u32_le();
    if version != ARCHIVE_VERSION {
        return Err(SpillError::corruption(format!(
            "unsupported archive version {version}"
        )));
    }

    let mut meta = None;
    let mut data = None;
    let mut blob_bytes = None;
    let mut slots = None;
    let trailer = loop {
        let (section, bytes) = read_section(&mut input, &mut remaining)?;
        let duplicate = match section {
            Section::End => break bytes,
            Section::Meta => meta.replace(decode_meta(&bytes)?).is_some(),
            Section::Data => data.replace(bytes).is_some(),
            Section::Blobs => blob_bytes.replace(bytes).is_some(),
            Section::BlobDir => slots.replace(decode_directory(&bytes)?).is_some(),
        };
        if duplicate {
            return Err(SpillError::corruption(format!(
                "archive section {section:?} appears twice"
            )));
        }
    };

    let meta = meta.ok_or_else(|| SpillError::corruption("archive has no META section"))?;
    let data = data.ok_or_else(|| SpillError::corruption("archive has no DATA section"))?;
    if trailer.len() != 8 {
        return Err(SpillError::corruption("archive END section is malformed"));
    }
    let mut tail = &trailer[..];
    let row_count = tail.get_u64_le();
    if row_count != meta.row_count {
        return Err(SpillError::corruption(format!(
            "archive END records {row_count} rows, META records {}",
            meta.row_count
        )));
    }

    let reader = TableReader::new(Cursor::new(&data[..]))?;
    if reader.header().compression != meta.compression {
        return Err(SpillError::corruption(
            "archive DATA compression does not match META",
        ));
    }

    let export = BufferExport {
        spec: meta.spec.clone(),
        row_count,
        compression: meta.compression,
        was_in_memory: meta.was_in_memory,
        data,
        blob_bytes: blob_bytes.unwrap_or_default(),
        slots: slots.unwrap_or_default(),
    };
    debug!(path = %path.display(), rows = row_count, "read table archive");
    Ok((meta, export))
}

fn read_section<R: Read>(input: &mut R, remaining: &mut u64) -> SpillResult<(Section, Vec<u8>)> {
    let mut header = [0u8; SECTION_HEADER_LEN];
    read_exact(input, &mut header, "archive section header")?;
    *remaining = remaining.saturating_sub(SECTION_HEADER_LEN as u64);

    let mut buf = &header[..];
    let section = Section::from_tag(buf.get_u8())?;
    let len = buf.get_u64_le();
    let expected = buf.get_u32_le();
    if len > *remaining {
        return Err(SpillError::corruption(format!(
            "archive section {section:?} claims {len} bytes, {remaining} remain"
        )));
    }

    let mut bytes = vec![0u8; usize::try_from(len).map_err(|_| {
        SpillError::corruption(format!("archive section {section:?} is too large"))
    })?];
    read_exact(input, &mut bytes, "archive section")?;
    *remaining -= len;

    let actual = crc32fast::hash(&bytes);
    if actual != expected {
        return Err(SpillError::ChecksumMismatch { expected, actual });
    }
    Ok((section, bytes))
}

fn read_exact<R: Read>(input: &mut R, buf: &mut [u8], context: &str) -> SpillResult<()> {
    input.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SpillError::corruption(format!("{context} is truncated"))
        } else {
            SpillError::from(e)
        }
    })
}

fn decode_meta(bytes: &[u8]) -> SpillResult<ArchiveMeta> {
    let meta: ArchiveMeta =
        serde_json::from_slice(bytes).map_err(|e| SpillError::corruption(e.to_string()))?;
    if meta.format_version != ARCHIVE_VERSION {
        return Err(SpillError::corruption(format!(
            "unsupported archive format version {}",
            meta.format_version
        )));
    }
    Ok(meta)
}

fn decode_directory(bytes: &[u8]) -> SpillResult<Vec<SlotEntry>> {
    bincode::deserialize(bytes).map_err(|e| SpillError::corruption(e.to_string()))
}
