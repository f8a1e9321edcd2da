/*!
 * Lock-Free Lock Statistics
 * Atomic counters updated off the reader hot path, with serializable snapshots
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Writer-side statistics for one [`LRMutex`](super::LRMutex)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStats {
    /// Writer protocols driven to the terminal step
    pub writes_completed: u64,
    /// Counter drains performed (two per completed write)
    pub drains: u64,
    /// Drains where the writer parked waiting for readers
    pub drains_parked: u64,
    /// Counters swapped out after a parallelism change
    pub counters_replaced: u64,
}

/// Allocation statistics for a [`RefCountPool`](super::RefCountPool)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Backing blocks allocated from the heap
    pub blocks_allocated: u64,
    /// Counters handed out from an already pooled block
    pub pooled_handouts: u64,
    /// Drained counters kept in place because their width still fits
    pub reused_in_place: u64,
    /// Offsets returned by retired counters
    pub offsets_recycled: u64,
}

/// Atomic writer statistics
///
/// All operations use relaxed ordering; snapshots may be momentarily
/// inconsistent across fields.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub(crate) struct AtomicLockStats {
    writes_completed: AtomicU64,
    drains: AtomicU64,
    drains_parked: AtomicU64,
    counters_replaced: AtomicU64,
}

impl AtomicLockStats {
    #[inline(always)]
    pub fn inc_writes_completed(&self) {
        self.writes_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_drain(&self, parked: bool) {
        self.drains.fetch_add(1, Ordering::Relaxed);
        if parked {
            self.drains_parked.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline(always)]
    pub fn inc_counters_replaced(&self) {
        self.counters_replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LockStats {
        LockStats {
            writes_completed: self.writes_completed.load(Ordering::Relaxed),
            drains: self.drains.load(Ordering::Relaxed),
            drains_parked: self.drains_parked.load(Ordering::Relaxed),
            counters_replaced: self.counters_replaced.load(Ordering::Relaxed),
        }
    }
}

/// Atomic pool statistics
#[derive(Debug, Default)]
pub(crate) struct AtomicPoolStats {
    blocks_allocated: AtomicU64,
    pooled_handouts: AtomicU64,
    reused_in_place: AtomicU64,
    offsets_recycled: AtomicU64,
}

impl AtomicPoolStats {
    #[inline]
    pub fn inc_blocks_allocated(&self) {
        self.blocks_allocated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_pooled_handouts(&self) {
        self.pooled_handouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_reused_in_place(&self) {
        self.reused_in_place.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_offsets_recycled(&self) {
        self.offsets_recycled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            blocks_allocated: self.blocks_allocated.load(Ordering::Relaxed),
            pooled_handouts: self.pooled_handouts.load(Ordering::Relaxed),
            reused_in_place: self.reused_in_place.load(Ordering::Relaxed),
            offsets_recycled: self.offsets_recycled.load(Ordering::Relaxed),
        }
    }
}
