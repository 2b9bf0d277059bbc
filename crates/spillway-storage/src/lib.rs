//! # spillway-storage
//!
//! Out-of-core storage of tables for spillway.
//!
//! This crate owns everything below the row-ingestion front end:
//!
//! - **Context**: the injected alert system, buffer cache, and writer pool
//! - **Buffer**: per-table storage with its memory/disk lifecycle and the
//!   resource-tracked iterators that read it
//! - **File**: the segmented, checksummed table file format
//! - **Blobs**: per-buffer slot storage for out-of-line payloads
//! - **Archive**: single-file export and import of closed tables
//!
//! ## Example
//!
//! ```rust
//! use spillway_common::types::{BufferId, Cell, ColumnSpec, DataType, Row, TableSpec};
//! use spillway_storage::{Buffer, StorageContext};
//!
//! let ctx = StorageContext::for_testing().unwrap();
//! let spec = TableSpec::new(vec![ColumnSpec::new("n", DataType::Int)]).unwrap();
//! let buffer = Buffer::new(&ctx, BufferId::new(0), spec, ctx.settings().clone());
//! buffer.add_row(Row::new("Row0", vec![Cell::Int(7)])).unwrap();
//! buffer.close().unwrap();
//!
//! assert!(buffer.is_held_in_memory());
//! assert_eq!(buffer.rows().unwrap().len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod blob;
pub mod buffer;
pub mod context;
pub mod file;
pub mod pool;
pub mod repository;
pub mod resource;
pub mod table;

pub use archive::ArchiveMeta;
pub use blob::{BlobStore, SlotEntry};
pub use buffer::{
    Buffer, BufferIterator, BufferPhase, BufferStats, IterMode, Lifecycle, TableFilter,
};
pub use context::{RowList, StorageContext, TableCache};
pub use pool::WriterPool;
pub use repository::{DataRepository, LocalDataRepository, NotInWorkflow};
pub use resource::{ResourceHandle, ResourceId, ResourceKind, ResourceRegistry};
pub use table::ContainerTable;
