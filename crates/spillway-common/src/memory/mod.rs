//! Memory-pressure signalling for spillway.
//!
//! This module provides the process-wide alert hub buffers subscribe to:
//!
//! - **Alert system**: synchronous publish/subscribe with RAII registrations
//! - **Samplers**: sources of memory usage samples for threshold alerts
//!
//! The hub is an explicitly constructed, shared instance. Construct it
//! first, before the buffer cache that subscribes to it.

mod alert;
mod sampler;

pub use alert::{
    AlertKind, ListenerId, MemoryAlert, MemoryAlertListener, MemoryAlertSystem, MonitorHandle,
    Registration,
};
pub use sampler::{FixedSampler, MemorySampler, MemoryUsage, ProcMemInfo};
