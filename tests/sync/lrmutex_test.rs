/*!
 * LRMutex Integration Tests
 *
 * Writer/reader protocol behavior under concurrency
 */

use lrlock::{FixedPlatform, LRMutex, LockConfig, LockError, RefCountPool};
use parking_lot::RwLock;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

static STATUS_LOCK: LRMutex = LRMutex::new();
static STATUS: [RwLock<String>; 2] = [RwLock::new(String::new()), RwLock::new(String::new())];

fn get_status() -> String {
    STATUS_LOCK.read(|index| STATUS[index].read().clone())
}

fn set_status(value: &str) {
    let mut token = STATUS_LOCK.lock();
    while token.advance() {
        *STATUS[token.write_index()].write() = value.to_string();
    }
}

#[test]
fn test_status_round_trip() {
    set_status("foobar");
    assert_eq!(get_status(), "foobar");

    let readers: Vec<_> = (0..8).map(|_| thread::spawn(get_status)).collect();
    for reader in readers {
        assert_eq!(reader.join().unwrap(), "foobar");
    }
}

#[test]
fn test_advance_returns_true_true_false() {
    let lock = LRMutex::new();
    let mut token = lock.lock();

    let results: Vec<bool> = (0..3).map(|_| token.advance()).collect();
    assert_eq!(results, vec![true, true, false]);
    assert_eq!(token.try_advance(), Err(LockError::AdvanceAfterFinish));
}

#[test]
#[should_panic(expected = "cannot call advance() again")]
fn test_fourth_advance_is_fatal() {
    let lock = LRMutex::new();
    let mut token = lock.lock();
    while token.advance() {}
    token.advance();
}

#[test]
#[should_panic(expected = "use of an RLockToken after release is invalid")]
fn test_double_release_is_fatal() {
    let lock = LRMutex::new();
    let mut token = lock.rlock();
    token.release();
    token.release();
}

#[test]
#[should_panic(expected = "before the first advance")]
fn test_write_index_before_advance_is_fatal() {
    let lock = LRMutex::new();
    let token = lock.lock();
    let _ = token.write_index();
}

#[test]
fn test_overlapping_readers_block_handoff() {
    let lock = Arc::new(LRMutex::with_config(LockConfig::long_wait()));
    let mut tokens: Vec<_> = (0..100).map(|_| lock.rlock()).collect();
    assert_eq!(lock.readers(), 100);

    let first_step = Arc::new(AtomicBool::new(false));
    let handed_off = Arc::new(AtomicBool::new(false));
    let writer = {
        let lock = lock.clone();
        let first_step = first_step.clone();
        let handed_off = handed_off.clone();
        thread::spawn(move || {
            let mut token = lock.lock();
            assert!(token.advance());
            first_step.store(true, Ordering::SeqCst);
            assert!(token.advance());
            handed_off.store(true, Ordering::SeqCst);
            assert!(!token.advance());
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(first_step.load(Ordering::SeqCst), "first step never drains");
    assert!(!handed_off.load(Ordering::SeqCst));

    let last = tokens.pop().unwrap();
    for mut token in tokens {
        token.release();
    }
    thread::sleep(Duration::from_millis(50));
    assert!(!handed_off.load(Ordering::SeqCst), "one reader is still registered");

    drop(last);
    writer.join().unwrap();
    assert!(handed_off.load(Ordering::SeqCst));
    assert_eq!(lock.readers(), 0);
    assert!(lock.stats().drains_parked >= 1);
}

#[test]
fn test_readers_proceed_while_writer_holds_gate() {
    let lock = LRMutex::new();
    let mut token = lock.lock();
    assert!(token.advance());

    // Readers are directed away from the copy the writer is filling.
    let index = lock.read(|index| index);
    assert_ne!(index, token.write_index());

    assert!(token.advance());
    assert!(!token.advance());
}

#[test]
fn test_co_resident_counters_are_isolated() {
    let platform = Arc::new(FixedPlatform::new(4));
    let pool = RefCountPool::new(platform);
    let held = Arc::new(LRMutex::with_pool(pool.clone(), LockConfig::default()));
    let other = Arc::new(LRMutex::with_pool(pool.clone(), LockConfig::default()));

    let _reader = held.rlock();
    other.read(|_| ());
    assert_eq!(pool.stats().blocks_allocated, 1, "all four counters share a block");

    let (done_tx, done_rx) = mpsc::channel();
    let writer = {
        let other = other.clone();
        thread::spawn(move || {
            other.write(|_| {});
            done_tx.send(()).unwrap();
        })
    };

    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("a reader on a neighbouring counter blocked the writer");
    writer.join().unwrap();
    assert_eq!(held.readers(), 1);
    assert_eq!(other.readers(), 0);
}

#[test]
fn test_readers_and_writer_never_share_a_copy() {
    const WRITES: u64 = 500;
    const READERS: usize = 6;

    struct Shared {
        lock: LRMutex,
        copies: [RwLock<u64>; 2],
    }

    let shared = Arc::new(Shared {
        lock: LRMutex::with_config(LockConfig::low_latency()),
        copies: [RwLock::new(0), RwLock::new(0)],
    });
    let stop = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicU64::new(0));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let shared = shared.clone();
            let stop = stop.clone();
            let reads = reads.clone();
            thread::spawn(move || {
                let mut last_seen = 0;
                while !stop.load(Ordering::Relaxed) {
                    let value = shared.lock.read(|index| {
                        let copy = shared.copies[index]
                            .try_read()
                            .expect("reader landed on the copy being written");
                        *copy
                    });
                    assert!(value >= last_seen, "read went backwards: {value} < {last_seen}");
                    last_seen = value;
                    reads.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    while reads.load(Ordering::Relaxed) == 0 {
        thread::yield_now();
    }

    for value in 1..=WRITES {
        let mut token = shared.lock.lock();
        while token.advance() {
            let mut copy = shared.copies[token.write_index()]
                .try_write()
                .expect("writer landed on a copy a reader holds");
            *copy = value;
        }
    }

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(shared.lock.read(|index| *shared.copies[index].read()), WRITES);
    assert!(reads.load(Ordering::Relaxed) > 0);

    let stats = shared.lock.stats();
    assert_eq!(stats.writes_completed, WRITES);
    assert_eq!(stats.drains, WRITES * 2);
}

#[test]
fn test_parallelism_change_under_load() {
    let platform = Arc::new(FixedPlatform::new(2));
    let pool = RefCountPool::new(platform.clone());

    struct Shared {
        lock: LRMutex,
        copies: [RwLock<u64>; 2],
    }

    let shared = Arc::new(Shared {
        lock: LRMutex::with_pool(pool, LockConfig::default()),
        copies: [RwLock::new(0), RwLock::new(0)],
    });
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let shared = shared.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    shared.lock.read(|index| {
                        let _copy = shared.copies[index]
                            .try_read()
                            .expect("reader landed on the copy being written");
                    });
                }
            })
        })
        .collect();

    for value in 1..=200u64 {
        if value % 40 == 0 {
            platform.set_parallelism(2 + (value as usize / 10));
        }
        shared.lock.write(|index| {
            *shared.copies[index]
                .try_write()
                .expect("writer landed on a copy a reader holds") = value;
        });
    }

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    assert!(shared.lock.stats().counters_replaced >= 2);
    assert_eq!(shared.lock.readers(), 0);
    assert_eq!(shared.lock.read(|index| *shared.copies[index].read()), 200);
}

fn abandon_write_at_step(steps: u8) {
    let lock = LRMutex::new();
    let copies = [RwLock::new(0u64), RwLock::new(0u64)];
    lock.write(|index| *copies[index].write() = 1);

    let mut token = lock.lock();
    for _ in 0..steps {
        assert!(token.advance());
        *copies[token.write_index()].write() = 99;
    }
    assert_eq!(token.step(), steps);
    drop(token);

    let mut token = lock.try_lock().expect("gate still held after the token was dropped");
    assert!(token.advance());
    assert_ne!(token.write_index(), lock.read(|index| index));
    drop(token);

    lock.write(|index| *copies[index].write() = 2);
    assert_eq!(lock.read(|index| *copies[index].read()), 2);
    assert_eq!(lock.readers(), 0);
}

#[test]
fn test_write_abandoned_after_first_copy() {
    abandon_write_at_step(1);
}

#[test]
fn test_write_abandoned_after_handoff() {
    abandon_write_at_step(2);
}

#[test]
fn test_retired_counters_return_offsets_to_pool() {
    let platform = Arc::new(FixedPlatform::new(2));
    let pool = RefCountPool::new(platform.clone());
    let lock = LRMutex::with_pool(pool.clone(), LockConfig::default());

    lock.write(|_| {});
    platform.set_parallelism(64);
    lock.write(|_| {});
    assert_eq!(lock.stats().counters_replaced, 2);

    // Reclamation runs on whichever thread next advances the epoch.
    let deadline = Instant::now() + Duration::from_secs(10);
    while pool.stats().offsets_recycled < 2 && Instant::now() < deadline {
        lock.read(|_| ());
        crossbeam_epoch::pin().flush();
        thread::sleep(Duration::from_millis(1));
    }
    assert!(pool.stats().offsets_recycled >= 2);
}
