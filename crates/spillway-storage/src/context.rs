//! Shared storage singletons.
//!
//! Construction order is fixed: alert system, cache (which subscribes its
//! reclaimer to the alert system), writer pool, then the context itself.
//! Every buffer holds an `Arc<StorageContext>`; nothing is process-global.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use spillway_cache::BufferCache;
use spillway_common::config::{Compression, StorageSettings};
use spillway_common::error::SpillResult;
use spillway_common::memory::{MemoryAlertSystem, Registration};
use spillway_common::types::{BufferKey, BufferKeyGenerator, Row};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::pool::WriterPool;

/// In-memory rows of one buffer.
pub type RowList = Vec<Row>;

/// Cache of row lists shared by every buffer of a context.
pub type TableCache = BufferCache<RowList>;

/// Shared state of every buffer in one storage instance.
pub struct StorageContext {
    settings: StorageSettings,
    alerts: Arc<MemoryAlertSystem>,
    cache: Arc<TableCache>,
    reclaimer: Mutex<Option<Registration>>,
    pool: WriterPool,
    scratch: TempDir,
    keys: BufferKeyGenerator,
}

impl StorageContext {
    /// Creates a context with its own alert system.
    pub fn new(settings: StorageSettings) -> SpillResult<Arc<Self>> {
        let alerts = Arc::new(MemoryAlertSystem::with_threshold(settings.memory_threshold()));
        Self::with_alerts(settings, alerts)
    }

    /// Creates a context publishing to an existing alert system.
    pub fn with_alerts(
        settings: StorageSettings,
        alerts: Arc<MemoryAlertSystem>,
    ) -> SpillResult<Arc<Self>> {
        settings.validate()?;

        let cache = Arc::new(TableCache::new(settings.lru_cache_size(), settings.use_lru()));
        let reclaimer = cache.subscribe(&alerts);
        let pool = WriterPool::new(settings.max_writer_threads())?;

        let scratch = match settings.temp_dir() {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                tempfile::Builder::new().prefix("spillway-").tempdir_in(dir)?
            }
            None => tempfile::Builder::new().prefix("spillway-").tempdir()?,
        };
        debug!(dir = %scratch.path().display(), "storage context created");

        Ok(Arc::new(Self {
            settings,
            alerts,
            cache,
            reclaimer: Mutex::new(Some(reclaimer)),
            pool,
            scratch,
            keys: BufferKeyGenerator::new(),
        }))
    }

    /// Creates a context with [`StorageSettings::for_testing`].
    pub fn for_testing() -> SpillResult<Arc<Self>> {
        Self::new(StorageSettings::for_testing())
    }

    /// Returns the process-wide settings.
    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    /// Returns the alert system.
    pub fn alerts(&self) -> &Arc<MemoryAlertSystem> {
        &self.alerts
    }

    /// Returns the row list cache.
    pub fn cache(&self) -> &Arc<TableCache> {
        &self.cache
    }

    /// Returns the background writer pool.
    pub fn pool(&self) -> &WriterPool {
        &self.pool
    }

    /// Returns the directory holding table and blob files.
    pub fn temp_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Allocates a buffer identity.
    pub fn next_buffer_key(&self) -> BufferKey {
        self.keys.next_key()
    }

    /// Path of the table file of `key`.
    pub fn table_file_path(&self, key: BufferKey, compression: Compression) -> PathBuf {
        self.temp_dir()
            .join(format!("buffer-{}.{}", key.as_u64(), compression.extension()))
    }

    /// Path of the blob file of `key`.
    pub fn blob_file_path(&self, key: BufferKey) -> PathBuf {
        self.temp_dir().join(format!("buffer-{}.blobs", key.as_u64()))
    }

    /// Stops the writer pool, drops every cached row list, and detaches all
    /// alert listeners.
    ///
    /// Buffers still alive afterwards keep their pinned rows and files but
    /// can no longer write asynchronously.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        self.reclaimer.lock().take();
        self.cache.clear();
        self.alerts.reset();
        debug!("storage context shut down");
    }
}

impl Drop for StorageContext {
    fn drop(&mut self) {
        self.reclaimer.get_mut().take();
        self.pool.shutdown();
    }
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("temp_dir", &self.temp_dir())
            .field("cache", &self.cache)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Deletes a temporary file, logging failures other than absence.
pub(crate) fn delete_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to delete temporary file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_wiring() {
        let ctx = StorageContext::for_testing().unwrap();
        assert!(ctx.temp_dir().is_dir());
        assert_eq!(ctx.cache().capacity(), 4);
        assert_eq!(ctx.pool().size(), 2);
        // The cache reclaimer is the only listener.
        assert_eq!(ctx.alerts().number_of_listeners(), 1);

        let a = ctx.next_buffer_key();
        let b = ctx.next_buffer_key();
        assert_ne!(a, b);
        assert!(ctx
            .table_file_path(a, Compression::Lz4)
            .to_string_lossy()
            .ends_with(".spw.lz4"));
    }

    #[test]
    fn test_shutdown_detaches_everything() {
        let ctx = StorageContext::for_testing().unwrap();
        ctx.cache().put(BufferKey::new(99), Arc::new(Vec::new()));
        ctx.shutdown();
        assert_eq!(ctx.alerts().number_of_listeners(), 0);
        assert!(ctx.cache().is_empty());
        assert!(ctx.pool().is_shutdown());
    }

    #[test]
    fn test_scratch_dir_removed_on_drop() {
        let ctx = StorageContext::for_testing().unwrap();
        let dir = ctx.temp_dir().to_path_buf();
        drop(ctx);
        assert!(!dir.exists());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = StorageSettings::builder().with_row_batch_size(0).build();
        assert!(settings.is_err());
    }

    #[test]
    fn test_delete_missing_file_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        delete_file(&dir.path().join("absent"));
    }
}
