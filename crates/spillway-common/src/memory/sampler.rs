//! Memory usage samplers.

use std::fs;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

/// One memory usage sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes in use.
    pub used_bytes: u64,
    /// Bytes available in total.
    pub total_bytes: u64,
}

impl MemoryUsage {
    /// Returns the used fraction in `[0.0, 1.0]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn used_fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.used_bytes.min(self.total_bytes) as f64) / (self.total_bytes as f64)
        }
    }
}

/// A source of memory usage samples.
pub trait MemorySampler: Send + Sync {
    /// Takes a sample.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the usage cannot be determined.
    fn sample(&self) -> io::Result<MemoryUsage>;
}

/// Reads system memory from `/proc/meminfo`.
#[derive(Debug, Clone, Default)]
pub struct ProcMemInfo;

impl ProcMemInfo {
    fn parse(contents: &str) -> io::Result<MemoryUsage> {
        let field = |name: &str| -> Option<u64> {
            contents
                .lines()
                .find(|line| line.starts_with(name))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok())
                .map(|kb| kb * 1024)
        };
        let total = field("MemTotal:");
        let available = field("MemAvailable:");
        match (total, available) {
            (Some(total_bytes), Some(available)) => Ok(MemoryUsage {
                used_bytes: total_bytes.saturating_sub(available),
                total_bytes,
            }),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "meminfo lacks MemTotal or MemAvailable",
            )),
        }
    }
}

impl MemorySampler for ProcMemInfo {
    fn sample(&self) -> io::Result<MemoryUsage> {
        Self::parse(&fs::read_to_string("/proc/meminfo")?)
    }
}

/// A sampler reporting whatever was last set, for tests and embedding.
#[derive(Debug, Default)]
pub struct FixedSampler {
    used: AtomicU64,
    total: AtomicU64,
}

impl FixedSampler {
    /// Creates a sampler reporting `used` of `total` bytes.
    #[must_use]
    pub fn new(used: u64, total: u64) -> Self {
        Self {
            used: AtomicU64::new(used),
            total: AtomicU64::new(total),
        }
    }

    /// Changes the reported usage.
    pub fn set(&self, used: u64, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.used.store(used, Ordering::Relaxed);
    }
}

impl MemorySampler for FixedSampler {
    fn sample(&self) -> io::Result<MemoryUsage> {
        Ok(MemoryUsage {
            used_bytes: self.used.load(Ordering::Relaxed),
            total_bytes: self.total.load(Ordering::Relaxed),
        })
    }
}
