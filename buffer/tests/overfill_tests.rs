//! Blocking, eviction and cancellation scenarios around full tiers.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use spillbuf::{BufferError, SpillBuffer};

const KB: usize = 1024;

fn key(name: &str) -> Vec<u8> {
    name.as_bytes().to_vec()
}

fn value(len: usize) -> Bytes {
    Bytes::from(vec![b'v'; len])
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Fill the disk tier exactly: four 1KB entries behind a 1KB memory tier,
/// then wait for every spill to land.
fn populate(buffer: &SpillBuffer<Vec<u8>>) {
    for name in ["k1", "k2", "k3", "k4"] {
        buffer.put(key(name), value(KB)).unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || {
        buffer.metrics().disk_used == 4 * KB as u64
    }));
}

#[test]
fn test_disk_overfill_pops_oldest_through_hook() {
    let popped = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&popped);
    let hook = Box::new(move |k: Vec<u8>, v: Bytes| {
        sink.lock().unwrap().push((k, v));
    });

    let buffer = SpillBuffer::new(KB as u64, 4 * KB as u64, Some(hook)).unwrap();
    populate(&buffer);
    assert!(popped.lock().unwrap().is_empty());

    // 2KB skips memory and needs 2KB of disk room: the two oldest
    // completed entries are popped, in insertion order, on this thread.
    let big = value(2 * KB);
    buffer.put(key("k5"), big.clone()).unwrap();

    let observed = popped.lock().unwrap();
    assert_eq!(observed.len(), 2);
    assert_eq!(observed[0], (key("k1"), value(KB)));
    assert_eq!(observed[1], (key("k2"), value(KB)));
    drop(observed);

    assert_eq!(buffer.get(&key("k5")).unwrap(), big);
    assert_eq!(buffer.get(&key("k1")), Err(BufferError::NoSuchElement));
    assert_eq!(buffer.get(&key("k3")).unwrap(), value(KB));
    assert_eq!(buffer.metrics().hook_evictions, 2);
}

#[test]
fn test_disk_overfill_blocks_until_external_removes() {
    let buffer = Arc::new(SpillBuffer::new(KB as u64, 4 * KB as u64, None).unwrap());
    populate(&buffer);

    let big = value(2 * KB);
    let writer = {
        let buffer = Arc::clone(&buffer);
        let big = big.clone();
        thread::spawn(move || buffer.put(key("k5"), big))
    };

    // No hook: the store has nothing to evict and must sit in the wait.
    thread::sleep(Duration::from_millis(250));
    assert!(!writer.is_finished());

    // One remove is not enough room for 2KB.
    buffer.remove(&key("k1")).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(!writer.is_finished());

    buffer.remove(&key("k2")).unwrap();
    writer.join().unwrap().unwrap();

    assert_eq!(buffer.get(&key("k5")).unwrap(), big);
    let snapshot = buffer.metrics();
    assert_eq!(snapshot.disk_used, 4 * KB as u64);
    assert_eq!(snapshot.hook_evictions, 0);
}

#[test]
fn test_disk_budget_increase_unblocks_waiting_store() {
    let buffer = Arc::new(SpillBuffer::new(KB as u64, 4 * KB as u64, None).unwrap());
    populate(&buffer);

    let writer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || buffer.put(key("k5"), value(2 * KB)))
    };

    thread::sleep(Duration::from_millis(250));
    assert!(!writer.is_finished());

    buffer.set_disk_max(8 * KB as u64).unwrap();
    writer.join().unwrap().unwrap();
    assert_eq!(buffer.get(&key("k5")).unwrap(), value(2 * KB));
}

#[test]
fn test_remove_cancels_spill_waiting_for_disk_room() {
    let buffer = SpillBuffer::new(64, 128, None).unwrap();

    // Fill the disk tier so the worker's spill has to wait for room.
    buffer.put(key("resident"), value(128)).unwrap();

    // Exactly memory-sized: staged in memory, worker begins spilling and
    // parks in the disk wait with its record Started.
    buffer.put(key("victim"), value(64)).unwrap();
    thread::sleep(Duration::from_millis(200));

    buffer.remove(&key("victim")).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        buffer.metrics().spills_cancelled == 1
    }));
    assert_eq!(buffer.get(&key("victim")), Err(BufferError::NoSuchElement));

    // Hex of "victim": never written.
    assert!(!buffer.spill_dir().join("76696374696d").exists());

    // The worker survived the cancellation and keeps spilling.
    buffer.remove(&key("resident")).unwrap();
    buffer.put(key("fresh"), value(64)).unwrap();
    assert_eq!(buffer.get(&key("fresh")).unwrap(), value(64));
    assert!(wait_until(Duration::from_secs(2), || {
        buffer.metrics().spills_completed >= 1
    }));
}

#[test]
fn test_concurrent_mixed_operations_settle() {
    use rand::Rng;

    let hook: spillbuf::EvictionHook<Vec<u8>> = Box::new(|_, _| {});
    let buffer = Arc::new(SpillBuffer::new(1000, 2000, Some(hook)).unwrap());

    let workers: Vec<_> = (0..4)
        .map(|worker_id| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut rng = rand::rng();
                for i in 0..50 {
                    match i % 3 {
                        0 => {
                            // Each thread stores under its own keys;
                            // re-stores per key stay serialised.
                            let k = key(&format!("w{worker_id}-{}", rng.random_range(0..4)));
                            let len = rng.random_range(1..=300);
                            buffer.put(k, value(len)).unwrap();
                        }
                        1 => {
                            // Reads race against every thread's writes;
                            // absent keys are a normal miss.
                            let k = key(&format!(
                                "w{}-{}",
                                rng.random_range(0..4),
                                rng.random_range(0..4)
                            ));
                            let _ = buffer.get(&k);
                        }
                        _ => {
                            let k = key(&format!(
                                "w{}-{}",
                                rng.random_range(0..4),
                                rng.random_range(0..4)
                            ));
                            let _ = buffer.remove(&k);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in workers {
        handle.join().unwrap();
    }

    let snapshot = buffer.metrics();
    assert!(snapshot.memory_used <= snapshot.memory_max);
    assert!(snapshot.disk_used <= snapshot.disk_max);
}
