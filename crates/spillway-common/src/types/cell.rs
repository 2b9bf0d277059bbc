//! Cell values and column data types.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;

use super::blob::BlobCell;

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean values.
    Boolean,
    /// 32-bit signed integers.
    Int,
    /// 64-bit signed integers.
    Long,
    /// 64-bit floating point numbers.
    Double,
    /// UTF-8 strings.
    String,
    /// Large binary values stored out of line.
    Blob,
}

impl DataType {
    /// Returns the type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::String => "string",
            Self::Blob => "blob",
        }
    }

    /// Returns true if `cell` may be stored in a column of this type.
    ///
    /// Missing cells fit every column.
    #[must_use]
    pub fn accepts(self, cell: &Cell) -> bool {
        matches!(
            (self, cell),
            (_, Cell::Missing)
                | (Self::Boolean, Cell::Boolean(_))
                | (Self::Int, Cell::Int(_))
                | (Self::Long, Cell::Long(_))
                | (Self::Double, Cell::Double(_))
                | (Self::String, Cell::String(_))
                | (Self::Blob, Cell::Blob(_))
        )
    }

    /// Returns true if min/max bounds are tracked for this type.
    #[must_use]
    pub const fn has_bounds(self) -> bool {
        matches!(self, Self::Int | Self::Long | Self::Double | Self::String)
    }

    /// Returns true if the set of possible values is tracked for this type.
    #[must_use]
    pub const fn has_possible_values(self) -> bool {
        matches!(self, Self::Boolean | Self::String)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single typed value in a row.
#[derive(Debug, Clone)]
pub enum Cell {
    /// Missing value.
    Missing,
    /// Boolean value.
    Boolean(bool),
    /// 32-bit integer value.
    Int(i32),
    /// 64-bit integer value.
    Long(i64),
    /// Floating point value.
    Double(f64),
    /// String value.
    String(String),
    /// Out-of-line binary value.
    Blob(BlobCell),
}

impl Cell {
    /// Creates an unassigned blob cell holding `payload`.
    #[must_use]
    pub fn blob(payload: impl Into<Bytes>) -> Self {
        Self::Blob(BlobCell::new(payload))
    }

    /// Returns true if this is a missing value.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Returns true if this is a blob cell.
    #[must_use]
    pub const fn is_blob(&self) -> bool {
        matches!(self, Self::Blob(_))
    }

    /// Returns the type of this cell, or `None` for a missing value.
    #[must_use]
    pub const fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Missing => None,
            Self::Boolean(_) => Some(DataType::Boolean),
            Self::Int(_) => Some(DataType::Int),
            Self::Long(_) => Some(DataType::Long),
            Self::Double(_) => Some(DataType::Double),
            Self::String(_) => Some(DataType::String),
            Self::Blob(_) => Some(DataType::Blob),
        }
    }

    /// Returns the type name of this cell.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self.data_type() {
            Some(data_type) => data_type.name(),
            None => "missing",
        }
    }

    /// Returns the integer value, widening `Int`.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v as i64),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the floating point value.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the blob cell.
    #[must_use]
    pub const fn as_blob(&self) -> Option<&BlobCell> {
        match self {
            Self::Blob(v) => Some(v),
            _ => None,
        }
    }

    /// Compares two cells of the same type using the type's ordering.
    ///
    /// Returns `None` for missing values, blobs, and mixed types.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Long(a), Self::Long(b)) => Some(a.cmp(b)),
            (Self::Double(a), Self::Double(b)) => Some(a.total_cmp(b)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Missing, Self::Missing) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b) == Ordering::Equal,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("?"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::Blob(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Missing, Into::into)
    }
}

/// A cell value that can appear in a column domain.
///
/// Domains are part of the schema descriptor and therefore serializable,
/// which blob cells are not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainValue {
    /// Boolean value.
    Boolean(bool),
    /// 32-bit integer value.
    Int(i32),
    /// 64-bit integer value.
    Long(i64),
    /// Floating point value.
    Double(f64),
    /// String value.
    String(String),
}

impl DomainValue {
    /// Converts a cell, returning `None` for missing values and blobs.
    #[must_use]
    pub fn from_cell(cell: &Cell) -> Option<Self> {
        match cell {
            Cell::Boolean(v) => Some(Self::Boolean(*v)),
            Cell::Int(v) => Some(Self::Int(*v)),
            Cell::Long(v) => Some(Self::Long(*v)),
            Cell::Double(v) => Some(Self::Double(*v)),
            Cell::String(v) => Some(Self::String(v.clone())),
            Cell::Missing | Cell::Blob(_) => None,
        }
    }

    /// Converts back into a cell.
    #[must_use]
    pub fn to_cell(&self) -> Cell {
        match self {
            Self::Boolean(v) => Cell::Boolean(*v),
            Self::Int(v) => Cell::Int(*v),
            Self::Long(v) => Cell::Long(*v),
            Self::Double(v) => Cell::Double(*v),
            Self::String(v) => Cell::String(v.clone()),
        }
    }

    /// Compares two values of the same type.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        self.to_cell().compare(&other.to_cell())
    }
}

impl PartialEq for DomainValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for DomainValue {}

impl Hash for DomainValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Boolean(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Long(v) => v.hash(state),
            Self::Double(v) => v.to_bits().hash(state),
            Self::String(v) => v.hash(state),
        }
    }
}
