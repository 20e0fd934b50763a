//! Single-tier bounded in-memory store.
//!
//! A boundary surface for collaborators that want plain bounded staging
//! with no disk behind it. Not the same type as the spill buffer's memory
//! tier: one mutex, no worker, bounded by entry count.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{BufferError, BufferResult};

/// An insertion-ordered key/value store holding at most `capacity`
/// entries. Storing past the bound silently drops the oldest entry.
#[derive(Debug)]
pub struct MemoryStore<K> {
    capacity: usize,
    entries: Mutex<VecDeque<(K, Bytes)>>,
}

impl<K: Clone + Eq> MemoryStore<K> {
    /// Create a store bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Store a value, replacing any entry with the same key. When the
    /// store is full the oldest entry is dropped to make room.
    pub fn put(&self, key: K, value: Bytes) {
        let mut entries = self.entries.lock();
        if let Some(pos) = entries.iter().position(|(k, _)| *k == key) {
            entries.remove(pos);
        }
        if self.capacity == 0 {
            return;
        }
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back((key, value));
    }

    /// Fetch a value by key.
    pub fn get(&self, key: &K) -> BufferResult<Bytes> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .ok_or(BufferError::NoSuchElement)
    }

    /// Remove a value by key.
    pub fn remove(&self, key: &K) -> BufferResult<()> {
        let mut entries = self.entries.lock();
        match entries.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                entries.remove(pos);
                Ok(())
            }
            None => Err(BufferError::NoSuchElement),
        }
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
