//! # spillway-test
//!
//! Integration tests for spillway.
//!
//! This crate contains:
//! - Shared fixtures (contexts, schemas, row generators)
//! - End-to-end scenarios under `tests/`

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Contexts, schemas and tables for tests
pub mod fixtures;

/// Row generators
pub mod workload;
