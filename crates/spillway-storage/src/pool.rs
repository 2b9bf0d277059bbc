//! Background write threads shared by every buffer and container.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use spillway_common::constants::MAX_WRITER_THREADS;
use spillway_common::error::{SpillError, SpillResult};
use tracing::{debug, error, info};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolShared {
    queue: Mutex<VecDeque<Job>>,
    available: Condvar,
    idle: Condvar,
    shutdown: AtomicBool,
    running: AtomicU64,
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// Fixed set of worker threads executing write jobs in submission order.
///
/// Jobs from different submitters may run concurrently; callers needing
/// ordering serialize their own jobs on top of the pool.
pub struct WriterPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WriterPool {
    /// Starts `threads` workers, capped at [`MAX_WRITER_THREADS`].
    pub fn new(threads: usize) -> SpillResult<Self> {
        let size = threads.clamp(1, MAX_WRITER_THREADS);
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            idle: Condvar::new(),
            shutdown: AtomicBool::new(false),
            running: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("spillway-writer-{index}"))
                .spawn(move || worker_loop(&shared))?;
            workers.push(handle);
        }
        debug!(threads = size, "writer pool started");

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            size,
        })
    }

    /// Queues a job.
    pub fn submit<F>(&self, job: F) -> SpillResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock();
        if self.is_shutdown() {
            return Err(SpillError::illegal_state("writer pool has been shut down"));
        }
        queue.push_back(Box::new(job));
        drop(queue);
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Blocks until every queued job has run.
    pub fn wait_idle(&self) {
        let mut queue = self.shared.queue.lock();
        while !queue.is_empty() || self.shared.running.load(Ordering::Acquire) > 0 {
            self.shared.idle.wait(&mut queue);
        }
    }

    /// Returns the number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of queued jobs not yet started.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Returns the number of jobs that have finished, including panicked ones.
    pub fn completed(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Returns true once shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stops accepting jobs, runs the queued ones, and joins the workers.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        {
            let _queue = self.shared.queue.lock();
            if self.shared.shutdown.swap(true, Ordering::AcqRel) {
                return;
            }
            self.shared.available.notify_all();
        }

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for worker in workers {
            // A job may drop the last context reference from a worker.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("writer thread terminated abnormally");
            }
        }
        info!(
            completed = self.completed(),
            panicked = self.shared.panicked.load(Ordering::Relaxed),
            "writer pool shut down"
        );
    }
}

impl Drop for WriterPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WriterPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterPool")
            .field("size", &self.size)
            .field("pending", &self.pending())
            .field("completed", &self.completed())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    shared.running.fetch_add(1, Ordering::AcqRel);
                    break job;
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            shared.panicked.fetch_add(1, Ordering::Relaxed);
            error!("write job panicked");
        }
        shared.completed.fetch_add(1, Ordering::Relaxed);

        let _queue = shared.queue.lock();
        shared.running.fetch_sub(1, Ordering::AcqRel);
        shared.idle.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_jobs_run() {
        let pool = WriterPool::new(3).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(pool.completed(), 100);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn test_size_is_capped() {
        let pool = WriterPool::new(MAX_WRITER_THREADS + 10).unwrap();
        assert_eq!(pool.size(), MAX_WRITER_THREADS);
        let pool = WriterPool::new(0).unwrap();
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WriterPool::new(1).unwrap();
        pool.submit(|| panic!("boom")).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        pool.submit(move || flag.store(true, Ordering::SeqCst)).unwrap();
        pool.wait_idle();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shutdown_drains_and_rejects() {
        let pool = WriterPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown();
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert!(pool.submit(|| {}).is_err());
    }
}
