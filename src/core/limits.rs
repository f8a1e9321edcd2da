/*!
 * Limits and Layout Constants
 *
 * Centralized location for the lock's numeric limits and memory layout.
 * Performance-critical constants are marked with [PERF].
 */

use std::sync::atomic::AtomicI32;

// =============================================================================
// MEMORY LAYOUT
// =============================================================================

/// Cache line size assumed for padding (64 bytes)
/// [PERF] x86-64, ARM64 and RISC-V all use 64-byte L1 lines
pub const CACHE_LINE_SIZE: usize = 64;

/// Counter slots per cache line (16 x i32)
pub const SLOTS_PER_LINE: usize = CACHE_LINE_SIZE / std::mem::size_of::<AtomicI32>();

/// log2 of [`SLOTS_PER_LINE`]
pub const SLOTS_PER_LINE_BITS: u32 = SLOTS_PER_LINE.trailing_zeros();

/// Fallback parallelism when the host cannot be probed
pub const FALLBACK_PARALLELISM: usize = 8;

/// Parallelism queries answered from cache before the host is probed again
/// [PERF] Queries come from writers sizing counters, never from readers
pub const PARALLELISM_REPROBE_QUERIES: u32 = 64;

// =============================================================================
// COUNTER LIMITS
// =============================================================================

/// Bias subtracted from a shard while a drain is waiting on it
///
/// A shard holding `count` registrations is armed as `count - ARMED_BIAS`,
/// which keeps armed shards negative and idle shards non-negative.
pub const ARMED_BIAS: i32 = 1 << 30;

/// Maximum outstanding registrations on a single shard
pub const MAX_SHARD_REGISTRATIONS: i32 = ARMED_BIAS - 1;

/// Largest shard id a read token can carry (i16 range)
pub const MAX_REGISTRATION_HANDLE: usize = i16::MAX as usize;

/// Shard reserved for drain aggregation
pub const AGGREGATION_SHARD: usize = 0;
