//! Disk tier record index.
//!
//! Records track spill files in insertion order. A record starts
//! unaccounted; only the transition to `Completed` (after the file write
//! succeeds) charges the byte budget, so `current` always equals the sum
//! of completed spill-file sizes.
//!
//! Each record also carries a ticket. The key is the external identity
//! (gets and removes resolve by key); the ticket is the writer's private
//! identity, so an in-flight spill whose record was cancelled, removed and
//! replaced by a same-key successor observes "my record is gone" instead
//! of adopting the successor.

use std::collections::VecDeque;

use crate::capacity::Capacity;
use crate::key::BufferKey;

/// State of a disk record.
///
/// `Started -> Completed` on a successful write, `Started -> Cancelled`
/// when a concurrent remove lands mid-spill. A `Cancelled` record is
/// removed by whichever party observes it next under the disk lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordState {
    Started,
    Cancelled,
    Completed,
}

#[derive(Debug)]
struct DiskRecord<K> {
    key: K,
    state: RecordState,
    ticket: u64,
}

/// The disk tier: insertion-ordered records plus a byte budget.
#[derive(Debug)]
pub(crate) struct DiskTier<K> {
    capacity: Capacity,
    records: VecDeque<DiskRecord<K>>,
    next_ticket: u64,
}

impl<K: BufferKey> DiskTier<K> {
    pub(crate) fn new(max: u64) -> Self {
        Self {
            capacity: Capacity::new(max),
            records: VecDeque::new(),
            next_ticket: 0,
        }
    }

    pub(crate) fn capacity(&self) -> &Capacity {
        &self.capacity
    }

    pub(crate) fn capacity_mut(&mut self) -> &mut Capacity {
        &mut self.capacity
    }

    /// Append a `Started` record and return the writer's ticket. Nothing
    /// is charged yet.
    ///
    /// The public API serialises re-stores through a logical delete, so a
    /// key appears at most once in the index.
    pub(crate) fn append(&mut self, key: K) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.records.push_back(DiskRecord {
            key,
            state: RecordState::Started,
            ticket,
        });
        ticket
    }

    /// State of the record holding this key, if any.
    pub(crate) fn state_of(&self, key: &K) -> Option<RecordState> {
        self.records
            .iter()
            .find(|record| record.key == *key)
            .map(|record| record.state)
    }

    /// State of the record with this ticket, if it still exists.
    pub(crate) fn state_of_ticket(&self, ticket: u64) -> Option<RecordState> {
        self.records
            .iter()
            .find(|record| record.ticket == ticket)
            .map(|record| record.state)
    }

    /// Transition the matching `Started` record to `Cancelled`.
    pub(crate) fn cancel(&mut self, key: &K) {
        if let Some(record) = self
            .records
            .iter_mut()
            .find(|record| record.key == *key && record.state == RecordState::Started)
        {
            record.state = RecordState::Cancelled;
        }
    }

    /// Drop the record holding this key without touching the budget (the
    /// file was never accounted: the record is `Started` or `Cancelled`).
    pub(crate) fn remove_unaccounted(&mut self, key: &K) {
        if let Some(pos) = self.records.iter().position(|record| record.key == *key) {
            debug_assert!(self.records[pos].state != RecordState::Completed);
            self.records.remove(pos);
        }
    }

    /// Drop the writer's own record without touching the budget.
    pub(crate) fn remove_ticket(&mut self, ticket: u64) {
        if let Some(pos) = self
            .records
            .iter()
            .position(|record| record.ticket == ticket)
        {
            debug_assert!(self.records[pos].state != RecordState::Completed);
            self.records.remove(pos);
        }
    }

    /// Transition the writer's own `Started` record to `Completed` and
    /// charge the written size.
    pub(crate) fn mark_completed(&mut self, ticket: u64, len: u64) {
        if let Some(record) = self
            .records
            .iter_mut()
            .find(|record| record.ticket == ticket && record.state == RecordState::Started)
        {
            record.state = RecordState::Completed;
            self.capacity.charge(len);
        }
    }

    /// Drop a `Completed` record, releasing the bytes its file occupied.
    pub(crate) fn remove_completed(&mut self, key: &K, freed: u64) {
        if let Some(pos) = self
            .records
            .iter()
            .position(|record| record.key == *key && record.state == RecordState::Completed)
        {
            self.records.remove(pos);
            self.capacity.release(freed);
        }
    }

    /// Key of the front record, provided the front is `Completed`.
    ///
    /// The front is the oldest record overall; when it is still `Started`
    /// the eviction path must leave it alone and wait instead.
    pub(crate) fn front_completed(&self) -> Option<&K> {
        match self.records.front() {
            Some(record) if record.state == RecordState::Completed => Some(&record.key),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(max: u64) -> DiskTier<Vec<u8>> {
        DiskTier::new(max)
    }

    #[test]
    fn test_append_is_unaccounted() {
        let mut disk = tier(100);
        disk.append(b"a".to_vec());
        assert_eq!(disk.state_of(&b"a".to_vec()), Some(RecordState::Started));
        assert_eq!(disk.capacity().current(), 0);
    }

    #[test]
    fn test_mark_completed_charges() {
        let mut disk = tier(100);
        let ticket = disk.append(b"a".to_vec());
        disk.mark_completed(ticket, 40);
        assert_eq!(disk.state_of(&b"a".to_vec()), Some(RecordState::Completed));
        assert_eq!(disk.capacity().current(), 40);
    }

    #[test]
    fn test_cancel_only_hits_started() {
        let mut disk = tier(100);
        let ticket = disk.append(b"a".to_vec());
        disk.mark_completed(ticket, 10);
        disk.cancel(&b"a".to_vec());
        assert_eq!(disk.state_of(&b"a".to_vec()), Some(RecordState::Completed));

        disk.append(b"b".to_vec());
        disk.cancel(&b"b".to_vec());
        assert_eq!(disk.state_of(&b"b".to_vec()), Some(RecordState::Cancelled));
    }

    #[test]
    fn test_ticket_does_not_resolve_successor_record() {
        let mut disk = tier(100);
        let old_ticket = disk.append(b"a".to_vec());
        disk.cancel(&b"a".to_vec());
        disk.remove_unaccounted(&b"a".to_vec());

        // A same-key successor gets its own ticket; the old writer sees
        // its record as gone and must not complete the new one.
        let new_ticket = disk.append(b"a".to_vec());
        assert_eq!(disk.state_of_ticket(old_ticket), None);
        disk.mark_completed(old_ticket, 10);
        assert_eq!(disk.state_of(&b"a".to_vec()), Some(RecordState::Started));
        assert_eq!(disk.capacity().current(), 0);

        disk.mark_completed(new_ticket, 5);
        assert_eq!(disk.capacity().current(), 5);
    }

    #[test]
    fn test_remove_completed_releases() {
        let mut disk = tier(100);
        let ticket = disk.append(b"a".to_vec());
        disk.mark_completed(ticket, 25);
        disk.remove_completed(&b"a".to_vec(), 25);
        assert_eq!(disk.state_of(&b"a".to_vec()), None);
        assert_eq!(disk.capacity().current(), 0);
    }

    #[test]
    fn test_front_completed_respects_started_front() {
        let mut disk = tier(100);
        let ticket_a = disk.append(b"a".to_vec());
        let ticket_b = disk.append(b"b".to_vec());
        disk.mark_completed(ticket_b, 5);

        // Front is Started: no eviction candidate even though "b" completed.
        assert!(disk.front_completed().is_none());

        disk.mark_completed(ticket_a, 5);
        assert_eq!(disk.front_completed(), Some(&b"a".to_vec()));
    }

    #[test]
    fn test_insertion_order_preserved_for_eviction() {
        let mut disk = tier(100);
        for key in [b"k1".to_vec(), b"k2".to_vec(), b"k3".to_vec()] {
            let ticket = disk.append(key.clone());
            disk.mark_completed(ticket, 10);
        }
        assert_eq!(disk.front_completed(), Some(&b"k1".to_vec()));
        disk.remove_completed(&b"k1".to_vec(), 10);
        assert_eq!(disk.front_completed(), Some(&b"k2".to_vec()));
        assert_eq!(disk.len(), 2);
    }
}
