//! Error handling for spillway.
//!
//! This module provides a unified error type and result alias used
//! across all spillway components.

mod spill;

pub use spill::{ErrorCode, SpillError};

/// Result type alias for spillway operations.
pub type SpillResult<T> = std::result::Result<T, SpillError>;
