//! Concurrent writer correctness across the cache shards.

use breakwater::{CacheConfig, TierLevel};
use bytes::Bytes;
use std::sync::Arc;

const WRITERS: usize = 16;
const PER_WRITER: usize = 1_000;
const OBJECT_BYTES: usize = 64;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn disjoint_writers_account_every_byte() {
    // Capacities sized so nothing is ever evicted: the totals must then
    // be exact, not merely bounded.
    let cache = Arc::new(
        CacheConfig::builder()
            .name("concurrency")
            .shard_count(64)
            .tier_max_bytes(TierLevel::L1, 64 * 1024 * 1024)
            .compression_threshold_bytes(u64::MAX)
            .build(),
    );

    let mut handles = Vec::new();
    for writer in 0..WRITERS {
        let cache = Arc::clone(&cache);
        handles.push(tokio::task::spawn_blocking(move || {
            for i in 0..PER_WRITER {
                let key = format!("w{writer}/object-{i}");
                let payload = Bytes::from(vec![writer as u8; OBJECT_BYTES]);
                cache.put(&key, payload, None).unwrap();
                let read = cache.get(&key).expect("read-your-write");
                assert_eq!(read.len(), OBJECT_BYTES);
                assert_eq!(read[0], writer as u8);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = cache.stats();
    let expected_entries = WRITERS * PER_WRITER;
    let expected_bytes = (expected_entries * OBJECT_BYTES) as u64;

    assert_eq!(stats.evictions, 0);
    assert_eq!(stats.puts, expected_entries as u64);
    let total_entries: usize = stats.tiers.iter().map(|t| t.entry_count).sum();
    let total_bytes: u64 = stats.tiers.iter().map(|t| t.used_bytes).sum();
    assert_eq!(total_entries, expected_entries);
    assert_eq!(total_bytes, expected_bytes);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn overlapping_writers_never_corrupt_a_payload() {
    let cache = Arc::new(
        CacheConfig::builder()
            .name("overlap")
            .shard_count(16)
            .build(),
    );

    // All writers fight over the same small key space; a reader must see
    // some writer's complete payload, never a mix.
    let mut handles = Vec::new();
    for writer in 0..8u8 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::task::spawn_blocking(move || {
            for i in 0..500 {
                let key = format!("shared-{}", i % 10);
                cache
                    .put(&key, Bytes::from(vec![writer; 256]), None)
                    .unwrap();
                if let Some(read) = cache.get(&key) {
                    assert_eq!(read.len(), 256);
                    let first = read[0];
                    assert!(read.iter().all(|b| *b == first), "torn payload");
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}
