//! # spillway-common
//!
//! Common types, errors, settings, and memory-pressure signalling for spillway.
//!
//! This crate provides the foundational pieces shared by every spillway
//! layer:
//!
//! - **Types**: buffer identifiers, rows, cells, blob cells, and table schemas
//! - **Errors**: unified error handling with `SpillError`
//! - **Config**: immutable storage and container settings built via builders
//! - **Constants**: process-wide defaults and hard limits
//! - **Memory**: the `MemoryAlertSystem` publish/subscribe hub
//!
//! ## Example
//!
//! ```rust
//! use spillway_common::types::{Cell, ColumnSpec, DataType, Row, TableSpec};
//! use spillway_common::error::SpillResult;
//!
//! fn example() -> SpillResult<()> {
//!     let spec = TableSpec::new(vec![
//!         ColumnSpec::new("name", DataType::String),
//!         ColumnSpec::new("count", DataType::Int),
//!     ])?;
//!     let row = Row::new("Row0", vec![Cell::from("a"), Cell::Int(1)]);
//!     spec.validate_row(&row)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod memory;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use error::{ErrorCode, SpillError, SpillResult};
pub use types::{BufferId, BufferKey, Cell, Row, RowKey, TableSpec};
