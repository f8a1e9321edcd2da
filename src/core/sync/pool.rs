/*!
 * Reference Counter Pool
 *
 * Recycles counter storage between lock instances, grouped by shard width.
 *
 * # Design: Cache-Line Subdivision
 *
 * A counter needs one slot per shard, and each shard lives on its own cache
 * line so different cores never write the same line. Giving every counter
 * whole lines would waste most of them, so one block is shared by up to
 * `1 << slots_per_cache_line_bits` counters of the same shard width, each
 * claiming a distinct `offset` inside every line.
 *
 * ```text
 *   free: shard_bits -> [FreeSlots { block, offsets: 3..16 }, ...]
 *
 *   allocate(reuse)
 *     ├─ reuse fits current width  -> Reused (no allocation)
 *     ├─ pooled block with offsets -> Fresh(offset = range.start)
 *     └─ nothing pooled            -> new block, Fresh(offset 0), pool 1..cap
 * ```
 *
 * The pool is an explicit value: [`RefCountPool::new`] builds an isolated
 * pool over any [`Platform`], and [`RefCountPool::global`] is the shared
 * instance on the host platform used by [`LRMutex::new`](super::LRMutex::new).
 */

use super::refcount::{RefCount, SlotBlock};
use super::stats::{AtomicPoolStats, PoolStats};
use crate::core::platform::{shard_bits_for, HostPlatform, Platform};
use ahash::RandomState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Unclaimed offsets of one shared block
struct FreeSlots {
    block: Arc<SlotBlock>,
    offsets: Range<usize>,
}

/// Result of [`RefCountPool::allocate`]
#[derive(Debug)]
pub enum Allocation {
    /// The drained counter passed in still fits and was kept
    Reused,
    /// A counter from pooled or freshly allocated storage
    Fresh(RefCount),
}

/// Process-wide or injected registry of counter storage
pub struct RefCountPool {
    platform: Arc<dyn Platform>,
    free: Mutex<HashMap<u32, Vec<FreeSlots>, RandomState>>,
    stats: AtomicPoolStats,
}

static GLOBAL_POOL: OnceLock<Arc<RefCountPool>> = OnceLock::new();

impl RefCountPool {
    /// Isolated pool sized by `platform`
    pub fn new(platform: Arc<dyn Platform>) -> Arc<Self> {
        Arc::new(Self {
            platform,
            free: Mutex::new(HashMap::with_hasher(RandomState::new())),
            stats: AtomicPoolStats::default(),
        })
    }

    /// Shared pool on the host platform, created on first use
    pub fn global() -> Arc<Self> {
        GLOBAL_POOL
            .get_or_init(|| Self::new(Arc::new(HostPlatform::new())))
            .clone()
    }

    /// Platform hooks this pool sizes and routes counters with
    #[inline(always)]
    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    /// Obtain a counter sized for the current parallelism
    ///
    /// `reuse` is a counter that was just drained. If its shard width still
    /// matches, it is kept as is and [`Allocation::Reused`] is returned; a
    /// drained counter is already balanced, and registrations that raced the
    /// drain keep their counts.
    pub fn allocate(self: &Arc<Self>, reuse: Option<&RefCount>) -> Allocation {
        let shard_bits = shard_bits_for(self.platform.max_parallelism());

        if let Some(current) = reuse {
            if current.shard_bits() == shard_bits {
                self.stats.inc_reused_in_place();
                return Allocation::Reused;
            }
            debug!(
                from = current.shard_bits(),
                to = shard_bits,
                "Counter shard width changed, reallocating"
            );
        }

        Allocation::Fresh(self.allocate_fresh_with(shard_bits))
    }

    /// Obtain a counter sized for the current parallelism, never reusing one
    pub fn allocate_fresh(self: &Arc<Self>) -> RefCount {
        self.allocate_fresh_with(shard_bits_for(self.platform.max_parallelism()))
    }

    fn allocate_fresh_with(self: &Arc<Self>, shard_bits: u32) -> RefCount {
        let slot_bits = self.platform.slots_per_cache_line_bits();
        if let Some((block, offset)) = self.take_pooled(shard_bits) {
            self.stats.inc_pooled_handouts();
            debug!(shard_bits, offset, "Handing out pooled counter slot");
            return RefCount::new(shard_bits, slot_bits, block, offset, Arc::downgrade(self));
        }

        let capacity = 1usize << slot_bits;
        let block = Arc::new(SlotBlock::new((1usize << shard_bits) << slot_bits));
        self.stats.inc_blocks_allocated();
        debug!(
            shard_bits,
            slot_bits,
            slots = block.len(),
            "Allocated counter block"
        );

        if capacity > 1 {
            self.free
                .lock()
                .entry(shard_bits)
                .or_default()
                .push(FreeSlots {
                    block: Arc::clone(&block),
                    offsets: 1..capacity,
                });
        }

        RefCount::new(shard_bits, slot_bits, block, 0, Arc::downgrade(self))
    }

    fn take_pooled(&self, shard_bits: u32) -> Option<(Arc<SlotBlock>, usize)> {
        let mut free = self.free.lock();
        let entries = free.get_mut(&shard_bits)?;
        let entry = entries.last_mut()?;

        let offset = entry.offsets.start;
        entry.offsets.start += 1;
        let block = if entry.offsets.is_empty() {
            entries.pop().map(|exhausted| exhausted.block)?
        } else {
            Arc::clone(&entry.block)
        };
        Some((block, offset))
    }

    /// Return a retired counter's offset to the pool
    ///
    /// The counter's slots must already be cleared.
    pub(crate) fn recycle(&self, block: Arc<SlotBlock>, offset: usize, shard_bits: u32) {
        self.stats.inc_offsets_recycled();
        debug!(shard_bits, offset, "Recycling counter slot");

        let mut free = self.free.lock();
        let entries = free.entry(shard_bits).or_default();
        let adjacent = entries.iter_mut().find(|entry| {
            Arc::ptr_eq(&entry.block, &block)
                && (entry.offsets.start == offset + 1 || entry.offsets.end == offset)
        });

        match adjacent {
            Some(entry) if entry.offsets.end == offset => entry.offsets.end += 1,
            Some(entry) => entry.offsets.start = offset,
            None => entries.push(FreeSlots {
                block,
                offsets: offset..offset + 1,
            }),
        }
    }

    /// Unclaimed offsets pooled for a shard width
    pub fn idle_offsets(&self, shard_bits: u32) -> usize {
        self.free
            .lock()
            .get(&shard_bits)
            .map(|entries| entries.iter().map(|entry| entry.offsets.len()).sum())
            .unwrap_or(0)
    }

    /// Snapshot of allocation statistics
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for RefCountPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let widths = self.free.lock().len();
        f.debug_struct("RefCountPool")
            .field("platform", &self.platform)
            .field("pooled_widths", &widths)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
