/*!
 * Left-Right Lock Library
 *
 * A cross-core scalable reader-writer lock in the left-right style: the
 * caller keeps two copies of the protected data, readers never block, and a
 * writer modifies the copy no reader is directed to before handing it over.
 *
 * Reader registrations are counted on per-core shards, so readers on
 * different cores never write the same cache line. The price is memory:
 * every lock owns two counters of O(parallelism) slots (shared between locks
 * through a pool) plus the second copy of the data.
 */

pub mod core;
pub mod monitoring;

// Re-exports
pub use crate::core::errors::{fatal, LockError, LockResult};
pub use crate::core::platform::{FixedPlatform, HostPlatform, Platform};
pub use crate::core::sync::{
    LRMutex, LockConfig, LockState, LockStats, LockToken, PoolStats, RLockToken, RefCountPool,
};
pub use monitoring::init_tracing;
