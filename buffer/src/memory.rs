//! In-memory staging tier.
//!
//! Entries are held in insertion order and scanned linearly; both tiers
//! are bounded by design (budget divided by typical value size), so a
//! linear find stays cheap. Each entry tracks how far its migration to
//! disk has progressed, plus a generation stamp so the worker can tell
//! the entry it spilled apart from a same-key successor.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::capacity::Capacity;
use crate::key::BufferKey;

/// Migration progress of a memory entry.
///
/// `NotStarted -> Started -> Completed`, no back-transitions. Only
/// `Completed` entries may be evicted from memory: their payload is
/// guaranteed to exist on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpillState {
    NotStarted,
    Started,
    Completed,
}

/// One staged entry.
#[derive(Debug)]
pub(crate) struct MemoryEntry<K> {
    key: K,
    value: Bytes,
    spill: SpillState,
    seq: u64,
}

/// The memory tier: insertion-ordered entries plus a byte budget.
#[derive(Debug)]
pub(crate) struct MemoryTier<K> {
    capacity: Capacity,
    entries: VecDeque<MemoryEntry<K>>,
    next_seq: u64,
}

impl<K: BufferKey> MemoryTier<K> {
    pub(crate) fn new(max: u64) -> Self {
        Self {
            capacity: Capacity::new(max),
            entries: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn capacity(&self) -> &Capacity {
        &self.capacity
    }

    pub(crate) fn capacity_mut(&mut self) -> &mut Capacity {
        &mut self.capacity
    }

    /// Append an entry in `NotStarted` state and charge its size.
    pub(crate) fn insert(&mut self, key: K, value: Bytes) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.capacity.charge(value.len() as u64);
        self.entries.push_back(MemoryEntry {
            key,
            value,
            spill: SpillState::NotStarted,
            seq,
        });
        seq
    }

    /// Value of the entry with this key, if present.
    pub(crate) fn value(&self, key: &K) -> Option<&Bytes> {
        self.entries
            .iter()
            .find(|entry| entry.key == *key)
            .map(|entry| &entry.value)
    }

    /// Pick the oldest entry that has not begun spilling, mark it
    /// `Started`, and hand back copies of its key, value and stamp.
    pub(crate) fn take_spill_candidate(&mut self) -> Option<(K, Bytes, u64)> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.spill == SpillState::NotStarted)?;
        entry.spill = SpillState::Started;
        Some((entry.key.clone(), entry.value.clone(), entry.seq))
    }

    /// Mark the entry with this key `Completed`, but only if it is still
    /// the same generation the worker spilled. Returns whether a mark
    /// happened.
    pub(crate) fn mark_completed(&mut self, key: &K, seq: u64) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.key == *key && entry.seq == seq)
        {
            Some(entry) => {
                entry.spill = SpillState::Completed;
                true
            }
            None => false,
        }
    }

    /// Remove the entry with this key, releasing its bytes. Returns the
    /// migration state observed at removal.
    pub(crate) fn remove(&mut self, key: &K) -> Option<SpillState> {
        let pos = self.entries.iter().position(|entry| entry.key == *key)?;
        let entry = self.entries.remove(pos)?;
        self.capacity.release(entry.value.len() as u64);
        Some(entry.spill)
    }

    /// Evict the oldest `Completed` entry, releasing its bytes. Entries
    /// that are `Started` are being read by the worker and must stay.
    pub(crate) fn evict_oldest_completed(&mut self) -> Option<K> {
        let pos = self
            .entries
            .iter()
            .position(|entry| entry.spill == SpillState::Completed)?;
        let entry = self.entries.remove(pos)?;
        self.capacity.release(entry.value.len() as u64);
        Some(entry.key)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
