/*!
 * Distributed Reference Counter
 *
 * A reader-registration counter sharded across execution contexts. Any
 * number of threads may acquire and release concurrently; exactly one thread
 * (the draining writer) may wait for quiescence at a time.
 *
 * # Layout
 *
 * ```text
 *   SlotBlock (shared by up to 1 << slot_bits counters)
 *   ┌──────── line 0 ────────┐┌──────── line 1 ────────┐
 *   │ s0 s0 s0 s0 .. s0      ││ s1 s1 s1 s1 .. s1      │ ...
 *   │ ^off0 ^off1 ^off2      ││ ^off0 ^off1 ^off2      │
 *   └────────────────────────┘└────────────────────────┘
 *   slot index = (shard << slot_bits) + offset
 * ```
 *
 * Shard 0 is the aggregation slot; shards `1..=max_shard` are picked by the
 * caller's context id. Each shard owns one cache line per block, so
 * different cores touch different lines, while several counters sharing the
 * block divide each line between them by `offset`.
 *
 * # Drain Protocol
 *
 * `wait()` arms every shard that holds registrations by subtracting
 * `ARMED_BIAS` (so armed shards read negative), then adds the number of armed
 * shards to the aggregation slot. The release that brings an armed shard back
 * to exactly `-ARMED_BIAS` disarms it and decrements the aggregate; whichever
 * release takes the aggregate to zero wakes the waiter. Idle shards are never
 * touched: a registration landing on one after the scan is counted like any
 * other and not waited for. A registration landing on an armed shard keeps
 * the shard from reaching `-ARMED_BIAS`, so the waiter waits for it too.
 * Either way the counter is balanced again as soon as `wait()` returns.
 */

use super::config::LockConfig;
use super::pool::RefCountPool;
use super::signal::{WakeOutcome, WakeSignal};
use crate::core::errors::{LockError, LockResult};
use crate::core::limits::{AGGREGATION_SHARD, ARMED_BIAS, MAX_SHARD_REGISTRATIONS, SLOTS_PER_LINE};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};

#[derive(Default)]
#[repr(C, align(64))]
struct CacheLine([AtomicI32; SLOTS_PER_LINE]);

/// Cache-line aligned backing storage for one or more counters
pub struct SlotBlock {
    lines: Box<[CacheLine]>,
}

impl SlotBlock {
    /// Zeroed storage for at least `slots` counters
    pub fn new(slots: usize) -> Self {
        let lines = slots.div_ceil(SLOTS_PER_LINE).max(1);
        Self {
            lines: (0..lines).map(|_| CacheLine::default()).collect(),
        }
    }

    /// Number of slots
    #[inline]
    pub fn len(&self) -> usize {
        self.lines.len() * SLOTS_PER_LINE
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[inline(always)]
    fn slot(&self, index: usize) -> &AtomicI32 {
        &self.lines[index / SLOTS_PER_LINE].0[index % SLOTS_PER_LINE]
    }
}

impl std::fmt::Debug for SlotBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotBlock").field("slots", &self.len()).finish()
    }
}

/// Opaque registration handle returned by [`RefCount::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardHandle(usize);

impl ShardHandle {
    /// Shard the registration was counted on
    #[inline(always)]
    pub fn shard(self) -> usize {
        self.0
    }
}

/// Result of a [`RefCount::wait`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// No shard held a registration when scanned
    Quiescent,
    /// Armed shards were all released before the waiter needed to block
    Drained { armed: u32 },
    /// The waiter blocked until the last armed shard was released
    Woken { armed: u32, parked: bool },
}

impl DrainOutcome {
    /// Shards that held registrations when scanned
    pub fn armed(&self) -> u32 {
        match *self {
            DrainOutcome::Quiescent => 0,
            DrainOutcome::Drained { armed } | DrainOutcome::Woken { armed, .. } => armed,
        }
    }

    /// Whether the waiter had to park on the wake signal
    pub fn parked(&self) -> bool {
        matches!(self, DrainOutcome::Woken { parked: true, .. })
    }
}

/// Sharded reader-registration counter with a single quiescence waiter
pub struct RefCount {
    shard_bits: u32,
    slot_bits: u32,
    offset: usize,
    block: Arc<SlotBlock>,
    signal: WakeSignal,
    home: Weak<RefCountPool>,
}

impl RefCount {
    pub(crate) fn new(
        shard_bits: u32,
        slot_bits: u32,
        block: Arc<SlotBlock>,
        offset: usize,
        home: Weak<RefCountPool>,
    ) -> Self {
        debug_assert!(offset < 1 << slot_bits);
        debug_assert!(block.len() >= (1 << shard_bits) << slot_bits);
        Self {
            shard_bits,
            slot_bits,
            offset,
            block,
            signal: WakeSignal::new(),
            home,
        }
    }

    /// Bits of shard address space fixed at allocation
    #[inline]
    pub fn shard_bits(&self) -> u32 {
        self.shard_bits
    }

    /// Sub-slot this counter occupies in every line of its block
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Highest shard id; also the mask applied to context ids
    #[inline(always)]
    pub fn max_shard(&self) -> usize {
        (1 << self.shard_bits) - 1
    }

    /// Whether two counters share backing storage
    pub fn shares_block_with(&self, other: &RefCount) -> bool {
        Arc::ptr_eq(&self.block, &other.block)
    }

    /// Shard used for a context id
    ///
    /// Ids beyond the allocated range wrap onto existing shards. A wrap that
    /// would hit the aggregation slot is folded onto shard 1.
    #[inline(always)]
    pub fn shard_for_context(&self, context: usize) -> usize {
        (context.wrapping_add(1) & self.max_shard()).max(1)
    }

    #[inline(always)]
    fn slot(&self, shard: usize) -> &AtomicI32 {
        self.block.slot((shard << self.slot_bits) + self.offset)
    }

    /// Register a reader on the caller's shard
    ///
    /// # Errors
    ///
    /// [`LockError::ShardOverflow`] if the shard already holds the maximum
    /// number of registrations; the increment is rolled back.
    #[inline]
    pub fn acquire(&self, context: usize) -> LockResult<ShardHandle> {
        let handle = ShardHandle(self.shard_for_context(context));
        let count = self.slot(handle.0).fetch_add(1, Ordering::SeqCst) + 1;
        if count > MAX_SHARD_REGISTRATIONS {
            self.release(handle);
            return Err(LockError::ShardOverflow {
                shard: handle.0,
                limit: MAX_SHARD_REGISTRATIONS,
            });
        }
        Ok(handle)
    }

    /// Drop a registration made by [`RefCount::acquire`]
    #[inline]
    pub fn release(&self, handle: ShardHandle) {
        let slot = self.slot(handle.0);
        let remaining = slot.fetch_sub(1, Ordering::SeqCst) - 1;
        debug_assert!(remaining >= -ARMED_BIAS, "shard released more often than acquired");
        if remaining != -ARMED_BIAS {
            return;
        }

        // Last holder of an armed shard. If a late registration slipped in
        // first, the CAS fails and that registration's release disarms.
        if slot
            .compare_exchange(-ARMED_BIAS, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if self.slot(AGGREGATION_SHARD).fetch_sub(1, Ordering::SeqCst) == 1 {
            self.signal.notify();
        }
    }

    /// Arm a shard if it holds registrations
    fn arm(&self, shard: usize) -> bool {
        let slot = self.slot(shard);
        let mut current = slot.load(Ordering::SeqCst);
        debug_assert!(current >= 0, "shard {shard} still armed from a previous drain");
        while current > 0 {
            match slot.compare_exchange_weak(
                current,
                current - ARMED_BIAS,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Block until every registration visible to the scan has been released
    ///
    /// Only one thread may wait on a counter at a time. A registration that
    /// lands on a shard which was idle when scanned is not waited for; one
    /// that lands on an armed shard holds off its disarm and is waited for.
    pub fn wait(&self, config: &LockConfig) -> DrainOutcome {
        let mut armed = 0u32;
        for shard in 1..=self.max_shard() {
            if self.arm(shard) {
                armed += 1;
            }
        }
        if armed == 0 {
            return DrainOutcome::Quiescent;
        }

        let delta = armed as i32;
        let pending = self
            .slot(AGGREGATION_SHARD)
            .fetch_add(delta, Ordering::SeqCst)
            + delta;
        if pending > 0 {
            let parked = self.signal.wait(config) == WakeOutcome::Parked;
            DrainOutcome::Woken { armed, parked }
        } else {
            DrainOutcome::Drained { armed }
        }
    }

    /// Reset the aggregation slot and every shard slot of this counter
    ///
    /// Must not run concurrently with any other operation on this counter.
    pub fn clear(&self) {
        self.slot(AGGREGATION_SHARD).store(0, Ordering::Relaxed);
        for shard in 1..=self.max_shard() {
            self.slot(shard).store(0, Ordering::Relaxed);
        }
    }

    /// Registrations currently held across all shards
    ///
    /// Racy snapshot for diagnostics and tests.
    pub fn outstanding(&self) -> u64 {
        (1..=self.max_shard())
            .map(|shard| {
                let value = self.slot(shard).load(Ordering::Relaxed);
                let count = if value < 0 { value + ARMED_BIAS } else { value };
                u64::from(count.max(0) as u32)
            })
            .sum()
    }
}

impl Drop for RefCount {
    fn drop(&mut self) {
        if let Some(pool) = self.home.upgrade() {
            self.clear();
            pool.recycle(Arc::clone(&self.block), self.offset, self.shard_bits);
        }
    }
}

impl std::fmt::Debug for RefCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefCount")
            .field("shard_bits", &self.shard_bits)
            .field("offset", &self.offset)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
