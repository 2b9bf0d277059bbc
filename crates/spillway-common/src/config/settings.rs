//! Storage and container settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{
    DEFAULT_BLOB_CACHE_SIZE, DEFAULT_LRU_CACHE_SIZE, DEFAULT_MAX_CELLS_IN_MEMORY,
    DEFAULT_MAX_POSSIBLE_VALUES, DEFAULT_MEMORY_THRESHOLD, DEFAULT_ROWS_PER_SEGMENT,
    DEFAULT_ROW_BATCH_SIZE, DEFAULT_USE_LRU, FALLBACK_WRITER_THREADS, MAX_WRITER_THREADS,
};
use crate::error::{SpillError, SpillResult};

/// Compression applied to row segments and blob payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Compression {
    /// Stored as-is.
    None,
    /// LZ4 block compression.
    #[default]
    Lz4,
}

impl Compression {
    /// Returns the tag stored in file headers.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Lz4 => 1,
        }
    }

    /// Parses a header tag.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::Lz4),
            _ => None,
        }
    }

    /// Returns the file extension used for table files.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::None => "spw",
            Self::Lz4 => "spw.lz4",
        }
    }
}

fn default_writer_threads() -> usize {
    std::thread::available_parallelism()
        .map_or(FALLBACK_WRITER_THREADS, std::num::NonZeroUsize::get)
        .min(MAX_WRITER_THREADS)
}

/// Process-wide storage settings.
///
/// # Example
///
/// ```rust
/// use spillway_common::config::StorageSettings;
///
/// let settings = StorageSettings::builder()
///     .with_max_cells_in_memory(1000)
///     .with_lru_cache_size(8)
///     .build()
///     .unwrap();
/// assert_eq!(settings.max_rows_in_memory(4), 250);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    lru_cache_size: usize,
    use_lru: bool,
    max_cells_in_memory: usize,
    row_batch_size: usize,
    max_writer_threads: usize,
    max_pending_batches: usize,
    compression: Compression,
    max_possible_values: usize,
    init_domain: bool,
    enforce_unique_keys: bool,
    sequential_io: bool,
    blob_cache_size: usize,
    rows_per_segment: usize,
    memory_threshold: f64,
    temp_dir: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let threads = default_writer_threads();
        Self {
            lru_cache_size: DEFAULT_LRU_CACHE_SIZE,
            use_lru: DEFAULT_USE_LRU,
            max_cells_in_memory: DEFAULT_MAX_CELLS_IN_MEMORY,
            row_batch_size: DEFAULT_ROW_BATCH_SIZE,
            max_writer_threads: threads,
            max_pending_batches: threads,
            compression: Compression::default(),
            max_possible_values: DEFAULT_MAX_POSSIBLE_VALUES,
            init_domain: true,
            enforce_unique_keys: true,
            sequential_io: false,
            blob_cache_size: DEFAULT_BLOB_CACHE_SIZE,
            rows_per_segment: DEFAULT_ROWS_PER_SEGMENT,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            temp_dir: None,
        }
    }
}

impl StorageSettings {
    /// Starts a builder populated with the defaults.
    #[must_use]
    pub fn builder() -> StorageSettingsBuilder {
        StorageSettingsBuilder {
            settings: Self::default(),
        }
    }

    /// Creates settings with small thresholds for testing.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            lru_cache_size: 4,
            max_cells_in_memory: 100,
            row_batch_size: 10,
            max_writer_threads: 2,
            max_pending_batches: 2,
            rows_per_segment: 16,
            blob_cache_size: 8,
            ..Self::default()
        }
    }

    /// Returns a builder seeded with these settings.
    #[must_use]
    pub fn to_builder(&self) -> StorageSettingsBuilder {
        StorageSettingsBuilder {
            settings: self.clone(),
        }
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending setting.
    pub fn validate(&self) -> SpillResult<()> {
        if self.lru_cache_size == 0 {
            return Err(SpillError::invalid_config("lru_cache_size must be at least 1"));
        }
        if self.row_batch_size == 0 {
            return Err(SpillError::invalid_config("row_batch_size must be at least 1"));
        }
        if self.max_writer_threads == 0 || self.max_writer_threads > MAX_WRITER_THREADS {
            return Err(SpillError::invalid_config(format!(
                "max_writer_threads must be between 1 and {MAX_WRITER_THREADS}"
            )));
        }
        if self.max_pending_batches == 0 {
            return Err(SpillError::invalid_config(
                "max_pending_batches must be at least 1",
            ));
        }
        if self.rows_per_segment == 0 {
            return Err(SpillError::invalid_config("rows_per_segment must be at least 1"));
        }
        if !(self.memory_threshold > 0.0 && self.memory_threshold <= 1.0) {
            return Err(SpillError::invalid_config(
                "memory_threshold must be in (0.0, 1.0]",
            ));
        }
        Ok(())
    }

    /// Applies per-container overrides.
    #[must_use]
    pub fn with_overrides(&self, overrides: &ContainerSettings) -> Self {
        let mut settings = self.clone();
        if let Some(v) = overrides.max_cells_in_memory {
            settings.max_cells_in_memory = v;
        }
        if let Some(v) = overrides.row_batch_size {
            settings.row_batch_size = v;
        }
        if let Some(v) = overrides.max_pending_batches {
            settings.max_pending_batches = v;
        }
        if let Some(v) = overrides.compression {
            settings.compression = v;
        }
        if let Some(v) = overrides.max_possible_values {
            settings.max_possible_values = v;
        }
        if let Some(v) = overrides.init_domain {
            settings.init_domain = v;
        }
        if let Some(v) = overrides.enforce_unique_keys {
            settings.enforce_unique_keys = v;
        }
        if let Some(v) = overrides.sequential_io {
            settings.sequential_io = v;
        }
        settings
    }

    /// Number of rows a buffer with `num_columns` columns keeps in memory.
    #[must_use]
    pub fn max_rows_in_memory(&self, num_columns: usize) -> usize {
        self.max_cells_in_memory / num_columns.max(1)
    }

    /// Size of the hard-referenced recency list in the cache.
    #[must_use]
    pub const fn lru_cache_size(&self) -> usize {
        self.lru_cache_size
    }

    /// Whether buffers use the soft-reference LRU lifecycle.
    #[must_use]
    pub const fn use_lru(&self) -> bool {
        self.use_lru
    }

    /// Cell count above which a table spills.
    #[must_use]
    pub const fn max_cells_in_memory(&self) -> usize {
        self.max_cells_in_memory
    }

    /// Number of rows per committed batch.
    #[must_use]
    pub const fn row_batch_size(&self) -> usize {
        self.row_batch_size
    }

    /// Number of background write threads.
    #[must_use]
    pub const fn max_writer_threads(&self) -> usize {
        self.max_writer_threads
    }

    /// Number of batches one container may have in flight.
    #[must_use]
    pub const fn max_pending_batches(&self) -> usize {
        self.max_pending_batches
    }

    /// Compression used for new files.
    #[must_use]
    pub const fn compression(&self) -> Compression {
        self.compression
    }

    /// Cap on possible values tracked per column.
    #[must_use]
    pub const fn max_possible_values(&self) -> usize {
        self.max_possible_values
    }

    /// Whether domain tracking starts from the domains of the incoming schema.
    #[must_use]
    pub const fn init_domain(&self) -> bool {
        self.init_domain
    }

    /// Whether duplicate row keys are rejected.
    #[must_use]
    pub const fn enforce_unique_keys(&self) -> bool {
        self.enforce_unique_keys
    }

    /// Whether containers write on the calling thread.
    #[must_use]
    pub const fn sequential_io(&self) -> bool {
        self.sequential_io
    }

    /// Resolved blob payloads kept per buffer.
    #[must_use]
    pub const fn blob_cache_size(&self) -> usize {
        self.blob_cache_size
    }

    /// Rows encoded per file segment.
    #[must_use]
    pub const fn rows_per_segment(&self) -> usize {
        self.rows_per_segment
    }

    /// Used-memory fraction that raises an alert.
    #[must_use]
    pub const fn memory_threshold(&self) -> f64 {
        self.memory_threshold
    }

    /// Directory for spill files, if not the system temp directory.
    #[must_use]
    pub fn temp_dir(&self) -> Option<&Path> {
        self.temp_dir.as_deref()
    }
}

/// Builder for [`StorageSettings`].
#[derive(Debug, Clone)]
pub struct StorageSettingsBuilder {
    settings: StorageSettings,
}

impl StorageSettingsBuilder {
    /// Sets the recency list size.
    #[must_use]
    pub fn with_lru_cache_size(mut self, size: usize) -> Self {
        self.settings.lru_cache_size = size;
        self
    }

    /// Selects the soft-reference LRU lifecycle.
    #[must_use]
    pub fn with_use_lru(mut self, use_lru: bool) -> Self {
        self.settings.use_lru = use_lru;
        self
    }

    /// Sets the in-memory cell threshold.
    #[must_use]
    pub fn with_max_cells_in_memory(mut self, cells: usize) -> Self {
        self.settings.max_cells_in_memory = cells;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_row_batch_size(mut self, rows: usize) -> Self {
        self.settings.row_batch_size = rows;
        self
    }

    /// Sets the number of background write threads.
    #[must_use]
    pub fn with_max_writer_threads(mut self, threads: usize) -> Self {
        self.settings.max_writer_threads = threads;
        self
    }

    /// Sets the number of in-flight batches per container.
    #[must_use]
    pub fn with_max_pending_batches(mut self, batches: usize) -> Self {
        self.settings.max_pending_batches = batches;
        self
    }

    /// Sets the compression.
    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.settings.compression = compression;
        self
    }

    /// Sets the possible-values cap.
    #[must_use]
    pub fn with_max_possible_values(mut self, values: usize) -> Self {
        self.settings.max_possible_values = values;
        self
    }

    /// Seeds domain tracking with the domains of the incoming schema.
    #[must_use]
    pub fn with_init_domain(mut self, init: bool) -> Self {
        self.settings.init_domain = init;
        self
    }

    /// Enables or disables duplicate key checks.
    #[must_use]
    pub fn with_enforce_unique_keys(mut self, enforce: bool) -> Self {
        self.settings.enforce_unique_keys = enforce;
        self
    }

    /// Writes on the calling thread instead of the pool.
    #[must_use]
    pub fn with_sequential_io(mut self, sequential: bool) -> Self {
        self.settings.sequential_io = sequential;
        self
    }

    /// Sets the per-buffer blob cache size.
    #[must_use]
    pub fn with_blob_cache_size(mut self, size: usize) -> Self {
        self.settings.blob_cache_size = size;
        self
    }

    /// Sets the rows per file segment.
    #[must_use]
    pub fn with_rows_per_segment(mut self, rows: usize) -> Self {
        self.settings.rows_per_segment = rows;
        self
    }

    /// Sets the alert threshold.
    #[must_use]
    pub fn with_memory_threshold(mut self, threshold: f64) -> Self {
        self.settings.memory_threshold = threshold;
        self
    }

    /// Sets the spill directory.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.temp_dir = Some(dir.into());
        self
    }

    /// Validates and returns the settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a setting is out of range.
    pub fn build(self) -> SpillResult<StorageSettings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

/// Per-container overrides of [`StorageSettings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSettings {
    max_cells_in_memory: Option<usize>,
    row_batch_size: Option<usize>,
    max_pending_batches: Option<usize>,
    compression: Option<Compression>,
    max_possible_values: Option<usize>,
    init_domain: Option<bool>,
    enforce_unique_keys: Option<bool>,
    sequential_io: Option<bool>,
}

impl ContainerSettings {
    /// Starts a builder with no overrides.
    #[must_use]
    pub fn builder() -> ContainerSettingsBuilder {
        ContainerSettingsBuilder::default()
    }
}

/// Builder for [`ContainerSettings`].
#[derive(Debug, Clone, Default)]
pub struct ContainerSettingsBuilder {
    settings: ContainerSettings,
}

impl ContainerSettingsBuilder {
    /// Overrides the in-memory cell threshold.
    #[must_use]
    pub fn with_max_cells_in_memory(mut self, cells: usize) -> Self {
        self.settings.max_cells_in_memory = Some(cells);
        self
    }

    /// Overrides the batch size.
    #[must_use]
    pub fn with_row_batch_size(mut self, rows: usize) -> Self {
        self.settings.row_batch_size = Some(rows);
        self
    }

    /// Overrides the number of in-flight batches.
    #[must_use]
    pub fn with_max_pending_batches(mut self, batches: usize) -> Self {
        self.settings.max_pending_batches = Some(batches);
        self
    }

    /// Overrides the compression.
    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.settings.compression = Some(compression);
        self
    }

    /// Overrides the possible-values cap.
    #[must_use]
    pub fn with_max_possible_values(mut self, values: usize) -> Self {
        self.settings.max_possible_values = Some(values);
        self
    }

    /// Overrides domain seeding.
    #[must_use]
    pub fn with_init_domain(mut self, init: bool) -> Self {
        self.settings.init_domain = Some(init);
        self
    }

    /// Overrides duplicate key checks.
    #[must_use]
    pub fn with_enforce_unique_keys(mut self, enforce: bool) -> Self {
        self.settings.enforce_unique_keys = Some(enforce);
        self
    }

    /// Overrides sequential writing.
    #[must_use]
    pub fn with_sequential_io(mut self, sequential: bool) -> Self {
        self.settings.sequential_io = Some(sequential);
        self
    }

    /// Validates and returns the overrides.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for zero batch sizes.
    pub fn build(self) -> SpillResult<ContainerSettings> {
        if self.settings.row_batch_size == Some(0) {
            return Err(SpillError::invalid_config("row_batch_size must be at least 1"));
        }
        if self.settings.max_pending_batches == Some(0) {
            return Err(SpillError::invalid_config(
                "max_pending_batches must be at least 1",
            ));
        }
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = StorageSettings::default();
        assert_eq!(settings.max_cells_in_memory(), 5000);
        assert_eq!(settings.row_batch_size(), 100);
        assert_eq!(settings.max_possible_values(), 60);
        assert!(settings.use_lru());
        assert!(settings.enforce_unique_keys());
        assert!(settings.max_writer_threads() <= MAX_WRITER_THREADS);
        assert!(settings.validate().is_ok());
        assert!(StorageSettings::for_testing().validate().is_ok());
    }

    #[test]
    fn test_builder_validates() {
        assert!(StorageSettings::builder().with_lru_cache_size(0).build().is_err());
        assert!(StorageSettings::builder()
            .with_max_writer_threads(MAX_WRITER_THREADS + 1)
            .build()
            .is_err());
        assert!(StorageSettings::builder()
            .with_memory_threshold(1.5)
            .build()
            .is_err());
    }

    #[test]
    fn test_max_rows_in_memory() {
        let settings = StorageSettings::builder()
            .with_max_cells_in_memory(100)
            .build()
            .unwrap();
        assert_eq!(settings.max_rows_in_memory(3), 33);
        assert_eq!(settings.max_rows_in_memory(0), 100);
    }

    #[test]
    fn test_container_overrides() {
        let defaults = StorageSettings::default();
        let overrides = ContainerSettings::builder()
            .with_max_cells_in_memory(10)
            .with_enforce_unique_keys(false)
            .with_compression(Compression::None)
            .build()
            .unwrap();
        let effective = defaults.with_overrides(&overrides);
        assert_eq!(effective.max_cells_in_memory(), 10);
        assert!(!effective.enforce_unique_keys());
        assert_eq!(effective.compression(), Compression::None);
        assert_eq!(effective.row_batch_size(), defaults.row_batch_size());
    }

    #[test]
    fn test_compression_tags() {
        for compression in [Compression::None, Compression::Lz4] {
            assert_eq!(Compression::from_tag(compression.tag()), Some(compression));
        }
        assert_eq!(Compression::from_tag(9), None);
        assert_eq!(Compression::Lz4.extension(), "spw.lz4");
    }
}
