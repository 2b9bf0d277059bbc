//! System-wide constants for spillway.
//!
//! Defaults here seed `StorageSettings`; the `MAX_*` values are hard limits
//! that no setting may exceed.

// =============================================================================
// In-Memory Thresholds
// =============================================================================

/// Default number of cells a table may hold in memory before it spills.
///
/// Divided by the column count to obtain the row threshold of a buffer.
pub const DEFAULT_MAX_CELLS_IN_MEMORY: usize = 5000;

/// Default number of rows handed to the buffer as one batch.
pub const DEFAULT_ROW_BATCH_SIZE: usize = 100;

/// Default size of the hard-referenced recency list in the buffer cache.
pub const DEFAULT_LRU_CACHE_SIZE: usize = 32;

/// Whether the soft-reference LRU lifecycle is used by default.
pub const DEFAULT_USE_LRU: bool = true;

/// Default number of resolved blob payloads each buffer keeps in memory.
pub const DEFAULT_BLOB_CACHE_SIZE: usize = 100;

// =============================================================================
// Background Writers
// =============================================================================

/// Hard upper bound on the number of background write threads.
pub const MAX_WRITER_THREADS: usize = 50;

/// Fallback thread count when the available parallelism cannot be queried.
pub const FALLBACK_WRITER_THREADS: usize = 4;

// =============================================================================
// Domain Tracking
// =============================================================================

/// Default cap on the number of possible values tracked per column.
pub const DEFAULT_MAX_POSSIBLE_VALUES: usize = 60;

// =============================================================================
// Memory Alerts
// =============================================================================

/// Default used-memory fraction above which an alert is raised.
pub const DEFAULT_MEMORY_THRESHOLD: f64 = 0.9;

/// Default polling interval of the memory monitor, in milliseconds.
pub const DEFAULT_MEMORY_POLL_INTERVAL_MS: u64 = 500;

// =============================================================================
// File Format
// =============================================================================

/// Default number of rows encoded into one compressed segment.
pub const DEFAULT_ROWS_PER_SEGMENT: usize = 256;

/// Magic bytes at the start of every table file.
pub const TABLE_FILE_MAGIC: [u8; 4] = *b"SPWT";

/// Current table file format version.
pub const TABLE_FILE_VERSION: u16 = 1;

/// Magic bytes at the start of every table archive.
pub const ARCHIVE_MAGIC: [u8; 8] = *b"SPWARCH\0";

/// Current archive format version.
pub const ARCHIVE_VERSION: u32 = 1;

/// Upper bound on a single decoded segment, guarding against corrupt lengths.
pub const MAX_SEGMENT_SIZE: usize = 256 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_within_limits() {
        assert!(FALLBACK_WRITER_THREADS <= MAX_WRITER_THREADS);
        assert!(DEFAULT_ROW_BATCH_SIZE <= DEFAULT_MAX_CELLS_IN_MEMORY);
        assert!(DEFAULT_MEMORY_THRESHOLD > 0.0 && DEFAULT_MEMORY_THRESHOLD < 1.0);
    }
}
