//! Type definitions for spillway.
//!
//! This module contains the identifiers and the row data model shared by
//! every layer.

mod blob;
mod cell;
mod ids;
mod row;
mod spec;

pub use blob::{BlobAddress, BlobCell, BlobSource};
pub use cell::{Cell, DataType, DomainValue};
pub use ids::{BufferId, BufferKey, BufferKeyGenerator};
pub use row::{Row, RowKey};
pub use spec::{ColumnDomain, ColumnSpec, TableSpec};
