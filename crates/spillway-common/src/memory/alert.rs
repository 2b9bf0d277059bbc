//! The memory alert system.
//!
//! Listeners are invoked on the thread that raises the alert, one after the
//! other, without the registry lock held, so a listener may register or
//! unregister listeners itself. A listener that panics is logged and
//! removed; the remaining listeners still receive the alert.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use super::sampler::{MemorySampler, MemoryUsage};
use crate::constants::DEFAULT_MEMORY_THRESHOLD;

/// What raised an alert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertKind {
    /// Raised programmatically.
    OnDemand,
    /// Raised because usage exceeded the threshold.
    Threshold {
        /// The sample that crossed the threshold.
        usage: MemoryUsage,
        /// The configured threshold.
        threshold: f64,
    },
}

/// A low-memory notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryAlert {
    /// Sequence number, starting at 1.
    pub sequence: u64,
    /// Origin of the alert.
    pub kind: AlertKind,
}

/// A subscriber to memory alerts.
pub trait MemoryAlertListener: Send + Sync {
    /// Handles an alert.
    ///
    /// Returns `true` when the listener is done and should be unregistered.
    fn memory_alert(&self, alert: &MemoryAlert) -> bool;
}

/// Token returned by [`MemoryAlertSystem::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Process-wide publish/subscribe hub for memory pressure.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use spillway_common::memory::{MemoryAlert, MemoryAlertListener, MemoryAlertSystem};
///
/// struct Counter(AtomicUsize);
///
/// impl MemoryAlertListener for Counter {
///     fn memory_alert(&self, _alert: &MemoryAlert) -> bool {
///         self.0.fetch_add(1, Ordering::SeqCst);
///         true
///     }
/// }
///
/// let alerts = MemoryAlertSystem::new();
/// let counter = Arc::new(Counter(AtomicUsize::new(0)));
/// alerts.register(counter.clone());
/// assert_eq!(alerts.number_of_listeners(), 1);
///
/// alerts.send_alert();
/// assert_eq!(counter.0.load(Ordering::SeqCst), 1);
/// assert_eq!(alerts.number_of_listeners(), 0);
/// ```
pub struct MemoryAlertSystem {
    /// Registered listeners.
    listeners: Mutex<HashMap<ListenerId, Arc<dyn MemoryAlertListener>>>,
    /// Next listener id.
    next_id: AtomicU64,
    /// Number of alerts sent.
    alerts_sent: AtomicU64,
    /// Used fraction above which threshold alerts are raised (f64 bits).
    threshold: AtomicU64,
}

impl MemoryAlertSystem {
    /// Creates an alert system with the default threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_MEMORY_THRESHOLD)
    }

    /// Creates an alert system with the given used-memory threshold.
    #[must_use]
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            alerts_sent: AtomicU64::new(0),
            threshold: AtomicU64::new(threshold.to_bits()),
        }
    }

    /// Returns the used-memory threshold.
    pub fn threshold(&self) -> f64 {
        f64::from_bits(self.threshold.load(Ordering::Relaxed))
    }

    /// Changes the used-memory threshold.
    pub fn set_threshold(&self, threshold: f64) {
        self.threshold.store(threshold.to_bits(), Ordering::Relaxed);
    }

    /// Registers a listener.
    pub fn register(&self, listener: Arc<dyn MemoryAlertListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().insert(id, listener);
        trace!(listener = id.0, "memory alert listener registered");
        id
    }

    /// Registers a listener that is unregistered when the guard drops.
    pub fn register_guarded(
        self: &Arc<Self>,
        listener: Arc<dyn MemoryAlertListener>,
    ) -> Registration {
        let id = self.register(listener);
        Registration {
            id,
            system: Arc::downgrade(self),
        }
    }

    /// Unregisters a listener.
    ///
    /// Returns false if it was not registered (already removed or never
    /// added).
    pub fn unregister(&self, id: ListenerId) -> bool {
        let removed = self.listeners.lock().remove(&id).is_some();
        if removed {
            trace!(listener = id.0, "memory alert listener unregistered");
        }
        removed
    }

    /// Returns true if the listener is registered.
    pub fn is_registered(&self, id: ListenerId) -> bool {
        self.listeners.lock().contains_key(&id)
    }

    /// Returns the number of registered listeners.
    pub fn number_of_listeners(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Returns the number of alerts sent so far.
    pub fn alerts_sent(&self) -> u64 {
        self.alerts_sent.load(Ordering::Relaxed)
    }

    /// Raises an alert on demand.
    ///
    /// Returns the number of listeners notified.
    pub fn send_alert(&self) -> usize {
        self.send(AlertKind::OnDemand)
    }

    /// Samples `sampler` and raises an alert if usage exceeds the threshold.
    ///
    /// Returns true if an alert was raised. A failing sampler raises nothing.
    pub fn check(&self, sampler: &dyn MemorySampler) -> bool {
        match sampler.sample() {
            Ok(usage) => {
                let threshold = self.threshold();
                if usage.used_fraction() > threshold {
                    self.send(AlertKind::Threshold { usage, threshold });
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                warn!(error = %e, "memory sampling failed");
                false
            }
        }
    }

    /// Polls `sampler` every `interval` on a background thread.
    ///
    /// An alert is raised each time usage crosses the threshold upwards.
    /// The monitor stops when the returned handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn start_monitor(
        self: &Arc<Self>,
        sampler: Box<dyn MemorySampler>,
        interval: Duration,
    ) -> std::io::Result<MonitorHandle> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let system = Arc::downgrade(self);
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("spillway-memory-monitor".to_string())
            .spawn(move || monitor_loop(&system, sampler.as_ref(), interval, &thread_stop))?;
        debug!(interval_ms = interval.as_millis() as u64, "memory monitor started");
        Ok(MonitorHandle {
            stop,
            thread: Some(thread),
        })
    }

    /// Drops every listener. Intended for test isolation and shutdown.
    pub fn reset(&self) {
        let removed = {
            let mut listeners = self.listeners.lock();
            let removed = listeners.len();
            listeners.clear();
            removed
        };
        debug!(removed, "memory alert system reset");
    }

    // =========================================================================
    // Private helpers
    // =========================================================================

    fn send(&self, kind: AlertKind) -> usize {
        let sequence = self.alerts_sent.fetch_add(1, Ordering::Relaxed) + 1;
        let alert = MemoryAlert { sequence, kind };

        let snapshot: Vec<(ListenerId, Arc<dyn MemoryAlertListener>)> = self
            .listeners
            .lock()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();
        debug!(sequence, listeners = snapshot.len(), "sending memory alert");

        let mut notified = 0;
        let mut done = Vec::new();
        for (id, listener) in snapshot {
            // Skip listeners removed by an earlier listener of this round.
            if !self.is_registered(id) {
                continue;
            }
            notified += 1;
            match catch_unwind(AssertUnwindSafe(|| listener.memory_alert(&alert))) {
                Ok(true) => done.push(id),
                Ok(false) => {}
                Err(_) => {
                    warn!(listener = id.0, "memory alert listener panicked, removing it");
                    done.push(id);
                }
            }
        }

        if !done.is_empty() {
            let mut listeners = self.listeners.lock();
            for id in done {
                listeners.remove(&id);
            }
        }
        notified
    }
}

impl Default for MemoryAlertSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryAlertSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAlertSystem")
            .field("listeners", &self.number_of_listeners())
            .field("alerts_sent", &self.alerts_sent())
            .field("threshold", &self.threshold())
            .finish()
    }
}

fn monitor_loop(
    system: &Weak<MemoryAlertSystem>,
    sampler: &dyn MemorySampler,
    interval: Duration,
    stop: &(Mutex<bool>, Condvar),
) {
    let (stopped, wakeup) = stop;
    let mut above = false;
    loop {
        {
            let mut stopped = stopped.lock();
            if !*stopped {
                wakeup.wait_for(&mut stopped, interval);
            }
            if *stopped {
                break;
            }
        }
        let Some(system) = system.upgrade() else {
            break;
        };
        match sampler.sample() {
            Ok(usage) => {
                let threshold = system.threshold();
                let now_above = usage.used_fraction() > threshold;
                if now_above && !above {
                    system.send(AlertKind::Threshold { usage, threshold });
                }
                above = now_above;
            }
            Err(e) => warn!(error = %e, "memory sampling failed"),
        }
    }
    debug!("memory monitor stopped");
}

/// Unregisters its listener when dropped.
#[must_use = "dropping a Registration unregisters the listener"]
pub struct Registration {
    id: ListenerId,
    system: Weak<MemoryAlertSystem>,
}

impl Registration {
    /// Returns the listener id.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Returns true while the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.system
            .upgrade()
            .is_some_and(|system| system.is_registered(self.id))
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(system) = self.system.upgrade() {
            system.unregister(self.id);
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

/// Stops the memory monitor thread when dropped.
pub struct MonitorHandle {
    stop: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stops the monitor and waits for its thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        {
            let (stopped, wakeup) = &*self.stop;
            *stopped.lock() = true;
            wakeup.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("memory monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("running", &self.thread.is_some())
            .finish()
    }
}
