//! Background spill worker.
//!
//! A single thread migrates the oldest unspilled memory entry to disk,
//! oldest first, until the buffer stops. Any error escaping the disk-write
//! path is stored in the fatal slot and ends the worker; it does not
//! restart.

use tracing::{debug, error};

use crate::buffer::{Shared, SpillOutcome};
use crate::key::{BufferKey, short_hex};
use crate::metrics::BufferMetrics;

/// Worker entry point: run the spill loop and record any failure.
pub(crate) fn run<K: BufferKey>(shared: &Shared<K>) {
    if let Err(err) = spill_loop(shared) {
        error!(error = %err, "spill worker failed");
        shared.mark_fatal(err);
    }
}

fn spill_loop<K: BufferKey>(shared: &Shared<K>) -> crate::BufferResult<()> {
    loop {
        let mut memory = shared.memory.lock();
        let (key, value, seq) = loop {
            if !shared.is_running() {
                return Ok(());
            }
            if let Some(candidate) = memory.take_spill_candidate() {
                break candidate;
            }
            shared.memory_cond.wait(&mut memory);
        };

        // Disk lock taken while memory is still held (memory before
        // disk), then memory released for the duration of the write.
        let mut disk = shared.disk.lock();
        drop(memory);
        let outcome = shared.store_on_disk(&key, &value, &mut disk);
        drop(disk);
        shared.disk_cond.notify_all();

        match outcome? {
            SpillOutcome::Stored => {
                BufferMetrics::increment(&shared.metrics.spills_completed);
                let mut memory = shared.memory.lock();
                // The entry is evictable only if it is still the exact
                // generation that was written out.
                memory.mark_completed(&key, seq);
                drop(memory);
                shared.memory_cond.notify_all();
            }
            SpillOutcome::Cancelled => {
                BufferMetrics::increment(&shared.metrics.spills_cancelled);
                debug!(key = %short_hex(&key.canonical_bytes()), "spill cancelled by remove");
                shared.memory_cond.notify_all();
            }
            SpillOutcome::Shutdown => return Ok(()),
        }
    }
}
