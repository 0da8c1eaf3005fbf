//! Concurrency and property tests for the core primitives.

use breakwater_core::{BoundedQueue, QueueFull, ShardedMap};
use proptest::prelude::*;
use std::sync::Arc;

#[test]
fn map_read_your_writes_under_contention() {
    let map = Arc::new(ShardedMap::<u64, u64>::new(256));
    let mut handles = Vec::new();
    for t in 0..8u64 {
        let map = Arc::clone(&map);
        handles.push(std::thread::spawn(move || {
            for i in 0..5_000u64 {
                let key = t * 5_000 + i;
                map.insert(key, key + 1);
                // A put followed by a get on the same key observes the put.
                assert_eq!(map.get(&key), Some(key + 1));
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(map.len(), 40_000);
}

#[test]
fn queue_depth_stays_within_capacity() {
    let q = Arc::new(BoundedQueue::<u64>::new(64));
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let q = Arc::clone(&q);
        let stop = Arc::clone(&stop);
        handles.push(std::thread::spawn(move || {
            let mut pushed = 0u64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                if q.push(pushed).is_ok() {
                    pushed += 1;
                }
            }
            pushed
        }));
    }
    let consumer = {
        let q = Arc::clone(&q);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut popped = 0u64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                if q.pop().is_some() {
                    popped += 1;
                }
            }
            // Drain the residue.
            while q.pop().is_some() {
                popped += 1;
            }
            popped
        })
    };

    std::thread::sleep(std::time::Duration::from_millis(100));
    stop.store(true, std::sync::atomic::Ordering::Relaxed);

    let pushed: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let popped = consumer.join().unwrap();
    assert_eq!(pushed, popped);
}

proptest! {
    /// Any sequence of pushes and pops preserves every item exactly once
    /// and respects the capacity bound.
    #[test]
    fn queue_push_pop_is_lossless(ops in prop::collection::vec(any::<bool>(), 1..200)) {
        let q = BoundedQueue::<u64>::new(16);
        let mut next = 0u64;
        let mut expected_front = 0u64;
        let mut depth = 0usize;

        for push in ops {
            if push {
                match q.push(next) {
                    Ok(()) => {
                        next += 1;
                        depth += 1;
                        prop_assert!(depth <= 16);
                    }
                    Err(QueueFull(item)) => {
                        prop_assert_eq!(item, next);
                        prop_assert_eq!(depth, 16);
                    }
                }
            } else {
                match q.pop() {
                    Some(v) => {
                        // Single producer: strict FIFO.
                        prop_assert_eq!(v, expected_front);
                        expected_front += 1;
                        depth -= 1;
                    }
                    None => prop_assert_eq!(depth, 0),
                }
            }
        }
    }

    /// Insert/remove on the sharded map behaves like a HashMap.
    #[test]
    fn sharded_map_matches_model(
        ops in prop::collection::vec((any::<u8>(), any::<bool>()), 1..300)
    ) {
        let map = ShardedMap::<u8, u64>::new(8);
        let mut model = std::collections::HashMap::new();
        for (i, (key, insert)) in ops.into_iter().enumerate() {
            if insert {
                prop_assert_eq!(map.insert(key, i as u64), model.insert(key, i as u64));
            } else {
                prop_assert_eq!(map.remove(&key), model.remove(&key));
            }
            prop_assert_eq!(map.get(&key), model.get(&key).copied());
        }
        prop_assert_eq!(map.len(), model.len());
    }
}
