//! Conversion between in-memory rows and stored rows.

use std::sync::Arc;

use spillway_common::types::{
    BlobAddress, BlobCell, BlobSource, BufferId, BufferKey, Cell, Row,
};

use super::error::{FormatError, FormatResult};
use super::format::{StoredCell, StoredRow};

/// Blob storage that decoded blob cells are bound to.
#[derive(Clone)]
pub struct BlobBinding {
    /// Id placed into decoded blob addresses.
    pub id: BufferId,
    /// Storage the decoded cells resolve against.
    pub source: Arc<dyn BlobSource>,
}

impl BlobBinding {
    /// Creates a binding.
    pub fn new(id: BufferId, source: Arc<dyn BlobSource>) -> Self {
        Self { id, source }
    }
}

impl std::fmt::Debug for BlobBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobBinding")
            .field("id", &self.id)
            .field("owner", &self.source.owner())
            .finish()
    }
}

/// Converts a row for writing.
///
/// Every blob cell must already be addressed by `owner`.
pub fn encode_row(row: &Row, owner: BufferKey) -> FormatResult<StoredRow> {
    let cells = row
        .cells()
        .iter()
        .map(|cell| encode_cell(cell, owner))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| FormatError::ForeignBlob {
            key: row.key().as_str().to_string(),
        })?;
    Ok(StoredRow {
        key: row.key().as_str().to_string(),
        cells,
    })
}

fn encode_cell(cell: &Cell, owner: BufferKey) -> Option<StoredCell> {
    Some(match cell {
        Cell::Missing => StoredCell::Missing,
        Cell::Boolean(v) => StoredCell::Boolean(*v),
        Cell::Int(v) => StoredCell::Int(*v),
        Cell::Long(v) => StoredCell::Long(*v),
        Cell::Double(v) => StoredCell::Double(*v),
        Cell::String(v) => StoredCell::String(v.clone()),
        Cell::Blob(blob) => {
            if blob.owner() != Some(owner) {
                return None;
            }
            StoredCell::Blob {
                slot: blob.address()?.slot(),
            }
        }
    })
}

/// Converts a stored row back, binding blob cells to `blobs`.
pub fn decode_row(stored: StoredRow, blobs: &BlobBinding) -> Row {
    let cells = stored
        .cells
        .into_iter()
        .map(|cell| match cell {
            StoredCell::Missing => Cell::Missing,
            StoredCell::Boolean(v) => Cell::Boolean(v),
            StoredCell::Int(v) => Cell::Int(v),
            StoredCell::Long(v) => Cell::Long(v),
            StoredCell::Double(v) => Cell::Double(v),
            StoredCell::String(v) => Cell::String(v),
            StoredCell::Blob { slot } => Cell::Blob(BlobCell::addressed(
                BlobAddress::new(blobs.id, slot),
                &blobs.source,
                None,
            )),
        })
        .collect();
    Row::new(stored.key, cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use spillway_common::error::SpillResult;

    struct Slots(BufferKey);

    impl BlobSource for Slots {
        fn owner(&self) -> BufferKey {
            self.0
        }

        fn is_cleared(&self) -> bool {
            false
        }

        fn read(&self, slot: u32) -> SpillResult<Bytes> {
            Ok(Bytes::from(format!("blob-{slot}")))
        }
    }

    #[test]
    fn test_plain_cells() {
        let row = Row::new(
            "Row0",
            vec![
                Cell::Missing,
                Cell::Boolean(true),
                Cell::Int(-3),
                Cell::Long(1 << 40),
                Cell::Double(2.5),
                Cell::from("text"),
            ],
        );
        let stored = encode_row(&row, BufferKey::new(1)).unwrap();
        assert_eq!(stored.cells[0], StoredCell::Missing);

        let binding = BlobBinding::new(BufferId::new(1), Arc::new(Slots(BufferKey::new(1))));
        assert_eq!(decode_row(stored, &binding), row);
    }

    #[test]
    fn test_blob_cells_bind_to_slots() {
        let source: Arc<dyn BlobSource> = Arc::new(Slots(BufferKey::new(5)));
        let blob = BlobCell::addressed(BlobAddress::new(BufferId::new(2), 7), &source, None);
        let row = Row::new("Row0", vec![Cell::Blob(blob)]);

        let stored = encode_row(&row, BufferKey::new(5)).unwrap();
        assert_eq!(stored.cells[0], StoredCell::Blob { slot: 7 });

        let binding = BlobBinding::new(BufferId::new(2), Arc::clone(&source));
        let decoded = decode_row(stored, &binding);
        let cell = decoded.cell(0).and_then(Cell::as_blob).unwrap();
        assert_eq!(cell.address(), Some(BlobAddress::new(BufferId::new(2), 7)));
        assert_eq!(cell.payload().unwrap(), Bytes::from("blob-7"));
    }

    #[test]
    fn test_foreign_blob_rejected() {
        let unassigned = Row::new("Row0", vec![Cell::blob(vec![1u8, 2, 3])]);
        assert!(matches!(
            encode_row(&unassigned, BufferKey::new(1)),
            Err(FormatError::ForeignBlob { .. })
        ));

        let source: Arc<dyn BlobSource> = Arc::new(Slots(BufferKey::new(9)));
        let foreign = BlobCell::addressed(BlobAddress::new(BufferId::new(9), 0), &source, None);
        let row = Row::new("Row1", vec![Cell::Blob(foreign)]);
        assert!(encode_row(&row, BufferKey::new(1)).is_err());
    }
}
