/*!
 * Core Module
 * Lock primitives, platform hooks, limits and error handling
 */

pub mod errors;
pub mod limits;
pub mod platform;
pub mod sync;

// Re-export for convenience
pub use errors::*;
pub use platform::{shard_bits_for, thread_context_id, FixedPlatform, HostPlatform, Platform};
