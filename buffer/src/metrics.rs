//! Operation counters and usage snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal operation counters, incremented on the hot paths.
#[derive(Debug, Default)]
pub(crate) struct BufferMetrics {
    pub(crate) puts: AtomicU64,
    pub(crate) gets: AtomicU64,
    pub(crate) memory_hits: AtomicU64,
    pub(crate) disk_hits: AtomicU64,
    pub(crate) removes: AtomicU64,
    pub(crate) spills_completed: AtomicU64,
    pub(crate) spills_cancelled: AtomicU64,
    pub(crate) memory_evictions: AtomicU64,
    pub(crate) hook_evictions: AtomicU64,
}

impl BufferMetrics {
    pub(crate) fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of the buffer's counters and tier usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Total `put` calls accepted past the fatal-slot check.
    pub puts: u64,
    /// Total `get` calls accepted past the fatal-slot check.
    pub gets: u64,
    /// Gets answered from the memory tier.
    pub memory_hits: u64,
    /// Gets answered from a spill file.
    pub disk_hits: u64,
    /// Total `remove` calls accepted past the fatal-slot check.
    pub removes: u64,
    /// Spills the worker carried to completion.
    pub spills_completed: u64,
    /// Spills abandoned because a concurrent remove won.
    pub spills_cancelled: u64,
    /// Memory entries evicted to make room (their payload was on disk).
    pub memory_evictions: u64,
    /// Disk entries handed to the eviction hook.
    pub hook_evictions: u64,
    /// Bytes currently staged in memory.
    pub memory_used: u64,
    /// Memory budget in bytes.
    pub memory_max: u64,
    /// Bytes currently held in completed spill files.
    pub disk_used: u64,
    /// Disk budget in bytes.
    pub disk_max: u64,
}

impl MetricsSnapshot {
    /// Fraction of gets answered from the memory tier, in `0.0..=1.0`.
    /// Zero when no gets have been observed.
    pub fn memory_hit_ratio(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            self.memory_hits as f64 / self.gets as f64
        }
    }
}
