/*!
 * Synchronization Primitives
 *
 * Left-right locking with distributed reader registration:
 * - `LRMutex`: writer gate, packed state word and the two-drain handoff
 * - `RefCount`: per-version reader counter sharded across cores
 * - `RefCountPool`: cache-line subdivided storage shared between locks
 * - `WakeSignal`: spin-then-park handoff from the last reader to the writer
 *
 * # Performance
 *
 * - Readers touch only their own shard's cache line plus the state word
 * - No allocation and no logging in the read protocol itself; pinning the
 *   epoch may run deferred reclamation of a retired counter, which returns
 *   its storage to the pool
 * - Writers block only on readers, never on each other beyond the gate
 */

mod config;
mod lrmutex;
mod pool;
mod refcount;
mod signal;
mod state;
mod stats;
mod token;

pub use config::LockConfig;
pub use lrmutex::LRMutex;
pub use pool::{Allocation, RefCountPool};
pub use refcount::{DrainOutcome, RefCount, ShardHandle, SlotBlock};
pub use signal::{WakeOutcome, WakeSignal};
pub use state::LockState;
pub use stats::{LockStats, PoolStats};
pub use token::{LockToken, RLockToken};
