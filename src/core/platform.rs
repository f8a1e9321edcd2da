/*!
 * Platform Hooks
 *
 * CPU-topology hints consumed by the distributed reference counter:
 * - Upper bound on concurrently schedulable execution contexts
 * - Fast, approximate id of the calling context (used only to pick a shard)
 * - How many counter slots share one cache line
 *
 * # Design: Trait Over Free Functions
 *
 * The counter pool must be testable with a parallelism that changes on
 * demand, so the hooks sit behind a small trait instead of free functions.
 * Hooks are called on every read registration and must not cause cross-core
 * traffic: the host implementation caches the parallelism probe and reads
 * the current CPU through the vDSO.
 *
 * The cached parallelism is re-probed every `PARALLELISM_REPROBE_QUERIES`
 * queries, so affinity or cgroup changes reach the process-wide pool without
 * anyone calling [`HostPlatform::refresh`].
 */

use crate::core::limits::{FALLBACK_PARALLELISM, PARALLELISM_REPROBE_QUERIES, SLOTS_PER_LINE_BITS};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Source of topology hints for shard sizing and selection
pub trait Platform: Send + Sync + Debug {
    /// Current upper bound on concurrently schedulable contexts
    ///
    /// May lag behind real changes; callers only use it to size new counters.
    fn max_parallelism(&self) -> usize;

    /// Approximate id of the calling execution context
    ///
    /// Staleness is fine: a wrong answer only costs cache-line sharing.
    fn current_context_id(&self) -> usize;

    /// log2 of the number of counter slots per cache line
    ///
    /// Must not change for the lifetime of the process.
    fn slots_per_cache_line_bits(&self) -> u32;
}

/// Bits needed to address `parallelism + 1` shards
///
/// Shard 0 is reserved for aggregation, so a host with `p` contexts needs
/// shard ids `1..=p`. The shard count is rounded up to a power of two so shard
/// ids can be masked.
#[inline]
pub fn shard_bits_for(parallelism: usize) -> u32 {
    (parallelism.max(1) + 1).next_power_of_two().trailing_zeros()
}

static NEXT_THREAD_CONTEXT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_CONTEXT: usize = NEXT_THREAD_CONTEXT.fetch_add(1, Ordering::Relaxed);
}

/// Per-thread context id, assigned once on first use
#[inline]
pub fn thread_context_id() -> usize {
    THREAD_CONTEXT.with(|id| *id)
}

/// Ask the host how many contexts it can schedule
pub fn probe_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or_else(|err| {
            log::warn!(
                "Failed to detect parallelism ({}), defaulting to {}",
                err,
                FALLBACK_PARALLELISM
            );
            FALLBACK_PARALLELISM
        })
}

/// Hooks backed by the host operating system
///
/// Parallelism is probed at construction and again after every
/// `reprobe_every` queries. [`HostPlatform::refresh`] forces a probe, e.g.
/// right after changing the process affinity or cgroup quota.
#[derive(Debug)]
pub struct HostPlatform {
    parallelism: AtomicUsize,
    queries: AtomicU32,
    reprobe_every: u32,
    probe: fn() -> usize,
}

impl HostPlatform {
    /// Probe the host and cache the result
    pub fn new() -> Self {
        Self::with_probe(probe_parallelism, PARALLELISM_REPROBE_QUERIES)
    }

    /// Use a custom parallelism source, re-probed every `reprobe_every` queries
    ///
    /// A `reprobe_every` of 0 disables periodic probing.
    pub fn with_probe(probe: fn() -> usize, reprobe_every: u32) -> Self {
        Self {
            parallelism: AtomicUsize::new(probe()),
            queries: AtomicU32::new(0),
            reprobe_every,
            probe,
        }
    }

    /// Re-probe the host parallelism, returning the new value
    pub fn refresh(&self) -> usize {
        let parallelism = (self.probe)();
        let previous = self.parallelism.swap(parallelism, Ordering::Relaxed);
        if previous != parallelism {
            log::debug!("Host parallelism changed from {} to {}", previous, parallelism);
        }
        parallelism
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    #[inline]
    fn max_parallelism(&self) -> usize {
        if self.reprobe_every != 0 {
            let query = self.queries.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if query % self.reprobe_every == 0 {
                return self.refresh();
            }
        }
        self.parallelism.load(Ordering::Relaxed)
    }

    #[inline]
    fn current_context_id(&self) -> usize {
        #[cfg(target_os = "linux")]
        {
            nix::sched::sched_getcpu().unwrap_or_else(|_| thread_context_id())
        }
        #[cfg(not(target_os = "linux"))]
        {
            thread_context_id()
        }
    }

    #[inline(always)]
    fn slots_per_cache_line_bits(&self) -> u32 {
        SLOTS_PER_LINE_BITS
    }
}

const UNPINNED: usize = usize::MAX;

/// Hooks with caller-controlled answers
///
/// Context ids come from [`thread_context_id`] unless pinned. Used by tests
/// and by callers that want a fixed shard count regardless of the host.
#[derive(Debug)]
pub struct FixedPlatform {
    parallelism: AtomicUsize,
    pinned_context: AtomicUsize,
    slot_bits: AtomicU32,
}

impl FixedPlatform {
    /// Fixed parallelism with the default cache-line geometry
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: AtomicUsize::new(parallelism),
            pinned_context: AtomicUsize::new(UNPINNED),
            slot_bits: AtomicU32::new(SLOTS_PER_LINE_BITS),
        }
    }

    /// Override the slots-per-line exponent (set before any counter exists)
    pub fn with_slot_bits(self, bits: u32) -> Self {
        self.slot_bits.store(bits, Ordering::Relaxed);
        self
    }

    /// Change the reported parallelism
    pub fn set_parallelism(&self, parallelism: usize) {
        self.parallelism.store(parallelism, Ordering::Relaxed);
    }

    /// Report the same context id for every thread, or `None` to unpin
    pub fn pin_context(&self, context: Option<usize>) {
        self.pinned_context
            .store(context.unwrap_or(UNPINNED), Ordering::Relaxed);
    }
}

impl Platform for FixedPlatform {
    #[inline]
    fn max_parallelism(&self) -> usize {
        self.parallelism.load(Ordering::Relaxed)
    }

    #[inline]
    fn current_context_id(&self) -> usize {
        match self.pinned_context.load(Ordering::Relaxed) {
            UNPINNED => thread_context_id(),
            pinned => pinned,
        }
    }

    #[inline]
    fn slots_per_cache_line_bits(&self) -> u32 {
        self.slot_bits.load(Ordering::Relaxed)
    }
}
