//! The two-tier buffer coordinator.
//!
//! [`SpillBuffer`] owns both tiers, the spill directory and the background
//! worker, and exposes the blocking public API. Each tier has its own
//! mutex and condition variable; when both locks are needed they are taken
//! memory first, then disk, never the reverse.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::{fs, thread};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tempfile::TempDir;
use tracing::{debug, error, warn};

use crate::disk::{DiskTier, RecordState};
use crate::error::{BufferError, BufferResult};
use crate::key::{BufferKey, short_hex};
use crate::memory::{MemoryTier, SpillState};
use crate::metrics::{BufferMetrics, MetricsSnapshot};
use crate::{spill, worker};

/// Callback invoked with an evicted entry's key and payload when the disk
/// tier must make room and no external remove is forthcoming.
///
/// The hook runs on whichever thread is waiting for disk room (the worker
/// or a caller storing an oversized value) with no buffer locks held, so
/// it may call back into the buffer.
pub type EvictionHook<K> = Box<dyn Fn(K, Bytes) + Send + Sync>;

/// Outcome of one pass through the disk-write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpillOutcome {
    /// The file was written and the record marked `Completed`.
    Stored,
    /// A concurrent remove won; nothing was written or accounted.
    Cancelled,
    /// `running` cleared while waiting; nothing was written.
    Shutdown,
}

/// State shared between the public API and the spill worker.
pub(crate) struct Shared<K: BufferKey> {
    pub(crate) memory: Mutex<MemoryTier<K>>,
    pub(crate) memory_cond: Condvar,
    pub(crate) disk: Mutex<DiskTier<K>>,
    pub(crate) disk_cond: Condvar,
    running: AtomicBool,
    fatal: Mutex<Option<BufferError>>,
    root: PathBuf,
    hook: Option<EvictionHook<K>>,
    pub(crate) metrics: BufferMetrics,
}

impl<K: BufferKey> Shared<K> {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear `running` and wake every waiter.
    ///
    /// The flag is flipped while holding both tier locks so that a waiter
    /// cannot check it and then block after the notification has passed.
    pub(crate) fn stop(&self) {
        {
            let _memory = self.memory.lock();
            let _disk = self.disk.lock();
            self.running.store(false, Ordering::Release);
        }
        self.memory_cond.notify_all();
        self.disk_cond.notify_all();
    }

    /// Record a fatal error and stop the buffer. Must be called with no
    /// tier locks held.
    pub(crate) fn mark_fatal(&self, err: BufferError) {
        *self.fatal.lock() = Some(err);
        self.stop();
    }

    fn stored_fatal_or(&self, fallback: BufferError) -> BufferError {
        (*self.fatal.lock()).unwrap_or(fallback)
    }

    /// Re-raise a stored fatal error, or fail if the buffer has stopped.
    fn check_usable(&self) -> BufferResult<()> {
        if let Some(err) = *self.fatal.lock() {
            return Err(err);
        }
        if !self.is_running() {
            return Err(BufferError::FilesystemIo);
        }
        Ok(())
    }

    /// Block until the memory tier can admit `required` bytes, evicting
    /// the oldest spilled entry each pass, or until the buffer stops.
    fn wait_for_memory_room(&self, required: u64, memory: &mut MutexGuard<'_, MemoryTier<K>>) {
        while self.is_running() && !memory.capacity().has_space(required) {
            if memory.evict_oldest_completed().is_some() {
                BufferMetrics::increment(&self.metrics.memory_evictions);
                continue;
            }
            self.memory_cond.wait(memory);
        }
    }

    /// The disk-write path, shared by the worker and by `put` for values
    /// that skip the memory tier. Called with the disk lock held; the
    /// caller notifies disk waiters after releasing it.
    pub(crate) fn store_on_disk(
        &self,
        key: &K,
        value: &Bytes,
        disk: &mut MutexGuard<'_, DiskTier<K>>,
    ) -> BufferResult<SpillOutcome> {
        let required = value.len() as u64;
        if required > disk.capacity().max() {
            error!(
                key = %short_hex(&key.canonical_bytes()),
                len = required,
                disk_max = disk.capacity().max(),
                "value exceeds disk budget"
            );
            return Err(BufferError::CannotExceedLimit);
        }
        let ticket = disk.append(key.clone());

        while !disk.capacity().has_space(required) {
            if !self.is_running() {
                return Ok(SpillOutcome::Shutdown);
            }
            match disk.state_of_ticket(ticket) {
                None => return Ok(SpillOutcome::Cancelled),
                Some(RecordState::Cancelled) => {
                    disk.remove_ticket(ticket);
                    return Ok(SpillOutcome::Cancelled);
                }
                _ => {}
            }
            match &self.hook {
                Some(hook) => {
                    let Some(victim) = disk.front_completed().cloned() else {
                        // Front still being written by another spill; its
                        // completion or cancellation will wake us.
                        self.disk_cond.wait(disk);
                        continue;
                    };
                    let path = spill::file_path(&self.root, &victim);
                    let payload = spill::read(&path)?;
                    let freed = spill::remove(&path)?;
                    disk.remove_completed(&victim, freed);
                    BufferMetrics::increment(&self.metrics.hook_evictions);
                    MutexGuard::unlocked(disk, || hook(victim, payload));
                }
                None => {
                    // Only an external remove can make room.
                    self.disk_cond.wait(disk);
                }
            }
        }

        if !self.is_running() {
            return Ok(SpillOutcome::Shutdown);
        }

        // A remove may have landed while the lock was released in the
        // final wait window, or before the wait loop ran at all; a
        // cancelled spill must leave neither a file nor accounting.
        match disk.state_of_ticket(ticket) {
            None => return Ok(SpillOutcome::Cancelled),
            Some(RecordState::Cancelled) => {
                disk.remove_ticket(ticket);
                return Ok(SpillOutcome::Cancelled);
            }
            _ => {}
        }

        spill::write(&self.root, key, value)?;
        disk.mark_completed(ticket, required);
        Ok(SpillOutcome::Stored)
    }
}

/// A bounded in-memory staging area backed by a bounded on-disk spill
/// area, migrated by a single background worker.
///
/// ```text
///            put                    get
///             |                      |
///             v                      v
///  +--------------------+   memory first, then disk
///  |    memory tier     |
///  |  (insertion order) |
///  +---------+----------+
///            | spill worker (oldest unspilled first)
///            v
///  +--------------------+
///  |     disk tier      |  one file per entry under the spill root
///  |  (insertion order) |
///  +--------------------+
/// ```
///
/// `put` blocks while the target tier is full; space appears through
/// `remove` calls, through eviction of memory entries whose spill has
/// completed, and (when an [`EvictionHook`] is configured) by popping the
/// oldest completed disk entries. A worker failure is fatal: the error is
/// re-raised by every subsequent call.
pub struct SpillBuffer<K: BufferKey> {
    shared: Arc<Shared<K>>,
    worker: Option<JoinHandle<()>>,
    owned_root: Option<TempDir>,
}

impl<K: BufferKey> SpillBuffer<K> {
    /// Create a buffer with a self-managed temporary spill directory,
    /// removed when the buffer is dropped.
    ///
    /// Fails with `InvalidParameter` if `memory_max > disk_max` and with
    /// `Uninitialised` if the spill directory cannot be created or is not
    /// writable.
    pub fn new(
        memory_max: u64,
        disk_max: u64,
        hook: Option<EvictionHook<K>>,
    ) -> BufferResult<Self> {
        if memory_max > disk_max {
            error!(memory_max, disk_max, "memory budget exceeds disk budget");
            return Err(BufferError::InvalidParameter);
        }
        let dir = tempfile::Builder::new()
            .prefix("spillbuf-")
            .tempdir()
            .map_err(|err| {
                error!(error = %err, "failed to create spill directory");
                BufferError::Uninitialised
            })?;
        let root = dir.path().to_path_buf();
        Self::start(memory_max, disk_max, hook, root, Some(dir))
    }

    /// Create a buffer spilling into a caller-supplied directory, which is
    /// created if missing and left in place when the buffer is dropped.
    pub fn with_dir(
        memory_max: u64,
        disk_max: u64,
        hook: Option<EvictionHook<K>>,
        dir: impl AsRef<Path>,
    ) -> BufferResult<Self> {
        if memory_max > disk_max {
            error!(memory_max, disk_max, "memory budget exceeds disk budget");
            return Err(BufferError::InvalidParameter);
        }
        let root = dir.as_ref().to_path_buf();
        if let Err(err) = fs::create_dir_all(&root) {
            error!(path = %root.display(), error = %err, "failed to create spill directory");
            return Err(BufferError::Uninitialised);
        }
        Self::start(memory_max, disk_max, hook, root, None)
    }

    fn start(
        memory_max: u64,
        disk_max: u64,
        hook: Option<EvictionHook<K>>,
        root: PathBuf,
        owned_root: Option<TempDir>,
    ) -> BufferResult<Self> {
        probe_writable(&root)?;

        let shared = Arc::new(Shared {
            memory: Mutex::new(MemoryTier::new(memory_max)),
            memory_cond: Condvar::new(),
            disk: Mutex::new(DiskTier::new(disk_max)),
            disk_cond: Condvar::new(),
            running: AtomicBool::new(true),
            fatal: Mutex::new(None),
            root,
            hook,
            metrics: BufferMetrics::default(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("spillbuf-worker".into())
                .spawn(move || worker::run(&shared))
                .map_err(|err| {
                    error!(error = %err, "failed to spawn spill worker");
                    BufferError::Uninitialised
                })?
        };

        Ok(Self {
            shared,
            worker: Some(worker),
            owned_root,
        })
    }

    /// Store a value under a key, replacing any previous value for it.
    ///
    /// Blocks while the target tier is full. Values larger than the
    /// memory budget skip memory and are written to disk on the calling
    /// thread; values larger than the disk budget fail with
    /// `CannotExceedLimit` and render the buffer unusable.
    pub fn put(&self, key: K, value: Bytes) -> BufferResult<()> {
        if value.is_empty() {
            return Err(BufferError::InvalidParameter);
        }
        // A speculative delete keeps at most one live record per key
        // across both tiers; a miss is the common case.
        match self.remove_impl(&key) {
            Ok(()) => debug!(key = %short_hex(&key.canonical_bytes()), "re-storing key"),
            Err(BufferError::NoSuchElement) => {}
            Err(err) => return Err(err),
        }
        BufferMetrics::increment(&self.shared.metrics.puts);

        let required = value.len() as u64;
        let mut memory = self.shared.memory.lock();
        if required > memory.capacity().max() {
            // Disk lock taken while memory is still held to respect the
            // lock order, then memory released for the duration.
            let mut disk = self.shared.disk.lock();
            drop(memory);
            let outcome = self.shared.store_on_disk(&key, &value, &mut disk);
            drop(disk);
            self.shared.disk_cond.notify_all();
            return match outcome {
                Ok(SpillOutcome::Stored) | Ok(SpillOutcome::Cancelled) => Ok(()),
                Ok(SpillOutcome::Shutdown) => {
                    Err(self.shared.stored_fatal_or(BufferError::FilesystemIo))
                }
                Err(err) => {
                    self.shared.mark_fatal(err);
                    Err(err)
                }
            };
        }

        self.shared.wait_for_memory_room(required, &mut memory);
        if !self.shared.is_running() {
            drop(memory);
            return Err(self.shared.stored_fatal_or(BufferError::FilesystemIo));
        }
        memory.insert(key, value);
        drop(memory);
        self.shared.memory_cond.notify_all();
        Ok(())
    }

    /// Fetch the value stored under a key.
    ///
    /// A value mid-spill blocks until the spill completes or is
    /// cancelled; a value that was evicted from memory is read back from
    /// its spill file.
    pub fn get(&self, key: &K) -> BufferResult<Bytes> {
        self.shared.check_usable()?;
        BufferMetrics::increment(&self.shared.metrics.gets);

        {
            let memory = self.shared.memory.lock();
            if let Some(value) = memory.value(key) {
                BufferMetrics::increment(&self.shared.metrics.memory_hits);
                return Ok(value.clone());
            }
        }

        let mut disk = self.shared.disk.lock();
        loop {
            match disk.state_of(key) {
                None | Some(RecordState::Cancelled) => {
                    return Err(BufferError::NoSuchElement);
                }
                Some(RecordState::Completed) => break,
                Some(RecordState::Started) => {
                    if !self.shared.is_running() {
                        return Err(self.shared.stored_fatal_or(BufferError::FilesystemIo));
                    }
                    self.shared.disk_cond.wait(&mut disk);
                }
            }
        }
        let value = spill::read(&spill::file_path(&self.shared.root, key))?;
        BufferMetrics::increment(&self.shared.metrics.disk_hits);
        Ok(value)
    }

    /// Remove the value stored under a key.
    ///
    /// A spill in flight for the key is cancelled; a completed spill file
    /// is deleted. Fails with `NoSuchElement` if the key is absent.
    pub fn remove(&self, key: &K) -> BufferResult<()> {
        BufferMetrics::increment(&self.shared.metrics.removes);
        self.remove_impl(key)
    }

    fn remove_impl(&self, key: &K) -> BufferResult<()> {
        self.shared.check_usable()?;

        let observed = {
            let mut memory = self.shared.memory.lock();
            memory.remove(key)
        };
        let state = match observed {
            Some(state) => {
                self.shared.memory_cond.notify_all();
                state
            }
            // Not staged in memory: it may still be on disk.
            None => SpillState::Completed,
        };
        if state == SpillState::NotStarted {
            return Ok(());
        }

        let mut disk = self.shared.disk.lock();
        let result = match disk.state_of(key) {
            None => {
                debug!(key = %short_hex(&key.canonical_bytes()), "key not in disk index");
                Err(BufferError::NoSuchElement)
            }
            Some(RecordState::Started) => {
                // The in-flight spill observes this and aborts.
                disk.cancel(key);
                Ok(())
            }
            Some(RecordState::Cancelled) => {
                disk.remove_unaccounted(key);
                Ok(())
            }
            Some(RecordState::Completed) => {
                spill::remove(&spill::file_path(&self.shared.root, key)).map(|freed| {
                    disk.remove_completed(key, freed);
                })
            }
        };
        drop(disk);
        self.shared.disk_cond.notify_all();
        result
    }

    /// Resize the memory budget. Fails with `InvalidParameter` if the new
    /// budget exceeds the disk budget. Always wakes memory waiters: a
    /// lowered budget can still make progress through eviction.
    pub fn set_memory_max(&self, memory_max: u64) -> BufferResult<()> {
        {
            let mut memory = self.shared.memory.lock();
            let disk = self.shared.disk.lock();
            if memory_max > disk.capacity().max() {
                return Err(BufferError::InvalidParameter);
            }
            drop(disk);
            memory.capacity_mut().set_max(memory_max);
        }
        self.shared.memory_cond.notify_all();
        Ok(())
    }

    /// Resize the disk budget. Fails with `InvalidParameter` if the new
    /// budget is smaller than the memory budget. Wakes disk waiters on a
    /// strict increase, since space may now be available.
    pub fn set_disk_max(&self, disk_max: u64) -> BufferResult<()> {
        let increased = {
            let memory = self.shared.memory.lock();
            let mut disk = self.shared.disk.lock();
            if memory.capacity().max() > disk_max {
                return Err(BufferError::InvalidParameter);
            }
            drop(memory);
            let increased = disk_max > disk.capacity().max();
            disk.capacity_mut().set_max(disk_max);
            increased
        };
        if increased {
            self.shared.disk_cond.notify_all();
        }
        Ok(())
    }

    /// Snapshot the operation counters and tier usage.
    pub fn metrics(&self) -> MetricsSnapshot {
        let metrics = &self.shared.metrics;
        let memory = self.shared.memory.lock();
        let disk = self.shared.disk.lock();
        MetricsSnapshot {
            puts: metrics.puts.load(Ordering::Relaxed),
            gets: metrics.gets.load(Ordering::Relaxed),
            memory_hits: metrics.memory_hits.load(Ordering::Relaxed),
            disk_hits: metrics.disk_hits.load(Ordering::Relaxed),
            removes: metrics.removes.load(Ordering::Relaxed),
            spills_completed: metrics.spills_completed.load(Ordering::Relaxed),
            spills_cancelled: metrics.spills_cancelled.load(Ordering::Relaxed),
            memory_evictions: metrics.memory_evictions.load(Ordering::Relaxed),
            hook_evictions: metrics.hook_evictions.load(Ordering::Relaxed),
            memory_used: memory.capacity().current(),
            memory_max: memory.capacity().max(),
            disk_used: disk.capacity().current(),
            disk_max: disk.capacity().max(),
        }
    }

    /// The spill directory this buffer writes into.
    pub fn spill_dir(&self) -> &Path {
        &self.shared.root
    }
}

impl<K: BufferKey> Drop for SpillBuffer<K> {
    fn drop(&mut self) {
        self.shared.stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(dir) = self.owned_root.take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                warn!(path = %path.display(), error = %err, "failed to remove spill directory");
            }
        }
    }
}

/// Verify the spill root accepts writes by touching and removing a probe
/// file.
fn probe_writable(root: &Path) -> BufferResult<()> {
    let probe = root.join(".write-probe");
    if let Err(err) = fs::write(&probe, b"probe") {
        error!(path = %root.display(), error = %err, "spill directory is not writable");
        return Err(BufferError::Uninitialised);
    }
    if let Err(err) = fs::remove_file(&probe) {
        error!(path = %probe.display(), error = %err, "failed to remove probe file");
        return Err(BufferError::Uninitialised);
    }
    Ok(())
}
