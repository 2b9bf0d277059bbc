//! Configuration for spillway.
//!
//! Settings are assembled with builders and immutable once built. A
//! [`StorageSettings`] value carries the process-wide defaults; a
//! [`ContainerSettings`] value overrides some of them for one container.

mod settings;

pub use settings::{
    Compression, ContainerSettings, ContainerSettingsBuilder, StorageSettings,
    StorageSettingsBuilder,
};
