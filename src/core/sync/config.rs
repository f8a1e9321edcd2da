/*!
 * Lock Configuration
 *
 * Runtime tuning for the writer's drain wait
 */

use std::time::Duration;

/// Drain tuning for a left-right lock
///
/// A draining writer first spins (spin hint, then yield, then short sleeps)
/// for up to `spin_duration` or `max_spins` iterations, whichever comes first,
/// and then parks until the last outstanding reader wakes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// Spin duration before parking
    pub spin_duration: Duration,
    /// Maximum spin iterations before parking
    pub max_spins: u32,
}

impl LockConfig {
    /// Balanced defaults: a brief spin, then park
    pub const fn new() -> Self {
        Self {
            spin_duration: Duration::from_micros(10),
            max_spins: 100,
        }
    }

    /// Configuration for readers that hold tokens for well under 1ms
    pub const fn low_latency() -> Self {
        Self {
            spin_duration: Duration::from_micros(50),
            max_spins: 500,
        }
    }

    /// Configuration for long-held read tokens: park almost immediately
    pub const fn long_wait() -> Self {
        Self {
            spin_duration: Duration::from_micros(1),
            max_spins: 10,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::new()
    }
}
