//! # spillway-container
//!
//! Row ingestion for spillway tables.
//!
//! A [`DataContainer`] validates incoming rows against their schema, rejects
//! duplicate row keys, tracks column domains and hands rows to a storage
//! buffer in batches. Closing the container yields a
//! [`ContainerTable`](spillway_storage::ContainerTable).
//!
//! ```rust
//! use spillway_common::config::ContainerSettings;
//! use spillway_common::types::{Cell, ColumnSpec, DataType, Row, TableSpec};
//! use spillway_container::DataContainer;
//! use spillway_storage::StorageContext;
//!
//! let ctx = StorageContext::for_testing().unwrap();
//! let spec = TableSpec::new(vec![ColumnSpec::new("x", DataType::Int)]).unwrap();
//! let mut container = DataContainer::new(&ctx, spec, &ContainerSettings::default()).unwrap();
//! container.add_row_to_table(Row::new("Row0", vec![Cell::Int(7)])).unwrap();
//! container.close().unwrap();
//!
//! let table = container.get_table().unwrap();
//! assert_eq!(table.row_count(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
pub mod domain;
pub mod duplicate;
pub mod writer;

pub use container::{ContainerFactory, DataContainer};
pub use domain::DomainCreator;
pub use duplicate::DuplicateChecker;
pub use writer::BatchWriter;
