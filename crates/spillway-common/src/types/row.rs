//! Rows and row keys.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::cell::Cell;

/// Unique identifier of a row within a table.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowKey(String);

impl RowKey {
    /// Creates a row key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowKey({:?})", self.0)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for RowKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// An immutable row: a key plus a fixed-length sequence of cells.
///
/// # Example
///
/// ```rust
/// use spillway_common::types::{Cell, Row};
///
/// let row = Row::new("Row0", vec![Cell::Int(1), Cell::Missing]);
/// assert_eq!(row.key().as_str(), "Row0");
/// assert_eq!(row.len(), 2);
/// assert!(row.cell(1).is_some_and(Cell::is_missing));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    key: RowKey,
    cells: Vec<Cell>,
}

impl Row {
    /// Creates a row.
    #[must_use]
    pub fn new(key: impl Into<RowKey>, cells: Vec<Cell>) -> Self {
        Self {
            key: key.into(),
            cells,
        }
    }

    /// Returns the row key.
    #[must_use]
    pub fn key(&self) -> &RowKey {
        &self.key
    }

    /// Returns all cells.
    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Returns the cell at `index`.
    #[must_use]
    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    /// Returns the number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns true if the row has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Returns true if any cell is a blob.
    #[must_use]
    pub fn has_blobs(&self) -> bool {
        self.cells.iter().any(Cell::is_blob)
    }

    /// Splits the row into key and cells.
    #[must_use]
    pub fn into_parts(self) -> (RowKey, Vec<Cell>) {
        (self.key, self.cells)
    }
}
