/*!
 * Reference Counter Pool Tests
 *
 * Storage sharing between locks and the process-wide pool
 */

use lrlock::core::sync::Allocation;
use lrlock::{FixedPlatform, HostPlatform, LRMutex, LockConfig, Platform, PoolStats, RefCountPool};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
#[serial]
fn test_global_pool_is_shared() {
    let pool = RefCountPool::global();
    assert!(Arc::ptr_eq(&pool, &RefCountPool::global()));
    assert!(pool.platform().max_parallelism() >= 1);

    let before = pool.stats();
    let lock = LRMutex::new();
    lock.write(|_| {});
    let after = pool.stats();

    // Other tests may allocate concurrently; this lock accounts for at least
    // two counters and two in-place reuses.
    let handed_out = |s: PoolStats| s.blocks_allocated + s.pooled_handouts;
    assert!(handed_out(after) >= handed_out(before) + 2);
    assert!(after.reused_in_place >= before.reused_in_place + 2);
}

#[test]
fn test_locks_share_blocks_until_full() {
    let platform = Arc::new(FixedPlatform::new(4));
    let pool = RefCountPool::new(platform.clone());
    let capacity = 1usize << platform.slots_per_cache_line_bits();

    // Each lock owns two counters.
    let locks: Vec<_> = (0..capacity / 2 + 1)
        .map(|_| LRMutex::with_pool(pool.clone(), LockConfig::default()))
        .collect();
    for lock in &locks {
        lock.read(|_| ());
    }

    let stats = pool.stats();
    assert_eq!(stats.blocks_allocated, 2);
    assert_eq!(stats.pooled_handouts as usize, capacity);
}

#[test]
fn test_dropped_locks_return_storage() {
    let platform = Arc::new(FixedPlatform::new(4));
    let pool = RefCountPool::new(platform);
    let bits = lrlock::core::shard_bits_for(4);

    {
        let lock = LRMutex::with_pool(pool.clone(), LockConfig::default());
        lock.write(|_| {});
        assert_eq!(pool.idle_offsets(bits), 14);
    }
    assert_eq!(pool.idle_offsets(bits), 16);

    let lock = LRMutex::with_pool(pool.clone(), LockConfig::default());
    lock.read(|_| ());
    assert_eq!(pool.stats().blocks_allocated, 1);
}

#[test]
fn test_concurrent_first_use_initializes_once() {
    let platform = Arc::new(FixedPlatform::new(4));
    let pool = RefCountPool::new(platform);
    let lock = Arc::new(LRMutex::with_pool(pool.clone(), LockConfig::default()));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || lock.read(|index| index))
        })
        .collect();
    for thread in threads {
        assert_eq!(thread.join().unwrap(), 0);
    }

    let stats = pool.stats();
    assert_eq!(stats.blocks_allocated + stats.pooled_handouts, 2);
}

#[test]
fn test_allocate_reuses_matching_counter() {
    let platform = Arc::new(FixedPlatform::new(6));
    let pool = RefCountPool::new(platform.clone());
    let counter = pool.allocate_fresh();

    assert!(matches!(pool.allocate(Some(&counter)), Allocation::Reused));
    platform.set_parallelism(7);
    assert!(matches!(pool.allocate(Some(&counter)), Allocation::Reused));

    platform.set_parallelism(8);
    match pool.allocate(Some(&counter)) {
        Allocation::Fresh(wider) => assert!(wider.max_shard() > counter.max_shard()),
        Allocation::Reused => panic!("shard width grew but counter was reused"),
    }
}

static HOST_CPUS: AtomicUsize = AtomicUsize::new(2);

fn host_cpus() -> usize {
    HOST_CPUS.load(Ordering::Relaxed)
}

#[test]
fn test_host_backed_pool_sees_parallelism_growth() {
    let pool = RefCountPool::new(Arc::new(HostPlatform::with_probe(host_cpus, 8)));
    let counter = pool.allocate_fresh();
    let narrow = counter.max_shard();

    HOST_CPUS.store(64, Ordering::Relaxed);
    let mut widened = None;
    for _ in 0..16 {
        if let Allocation::Fresh(wider) = pool.allocate(Some(&counter)) {
            widened = Some(wider);
            break;
        }
    }

    let wider = widened.expect("pool never noticed the wider host");
    assert!(wider.max_shard() > narrow);
    assert_eq!(wider.max_shard(), (1 << lrlock::core::shard_bits_for(64)) - 1);
}
