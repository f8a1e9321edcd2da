/*!
 * Single-Slot Wake Signal
 *
 * One-shot handoff from the last releasing reader to the draining writer.
 *
 * # Design: Spin, Then Park
 *
 * Most drains finish within a few hundred nanoseconds, so the waiter spins
 * with a three-phase backoff (spin hint, yield, short sleeps) before falling
 * back to a parking_lot condvar. The flag is consumed by the waiter, leaving the slot empty for
 * the next drain.
 */

use super::config::LockConfig;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// How a [`WakeSignal::wait`] call was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// Signal arrived while spinning
    Spun,
    /// Waiter parked on the condvar before the signal arrived
    Parked,
}

/// Single-slot, single-waiter wake channel
#[repr(C, align(64))]
pub struct WakeSignal {
    signalled: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl WakeSignal {
    pub const fn new() -> Self {
        Self {
            signalled: AtomicBool::new(false),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Fill the slot and wake the waiter if it is parked
    pub fn notify(&self) {
        self.signalled.store(true, Ordering::Release);
        // Taking the mutex orders this notify after the waiter's final check.
        let _guard = self.mutex.lock();
        self.condvar.notify_one();
    }

    /// Block until the slot is filled, then empty it
    pub fn wait(&self, config: &LockConfig) -> WakeOutcome {
        if self.spin(config) {
            self.signalled.store(false, Ordering::Relaxed);
            return WakeOutcome::Spun;
        }

        let mut guard = self.mutex.lock();
        while !self.signalled.load(Ordering::Acquire) {
            self.condvar.wait(&mut guard);
        }
        self.signalled.store(false, Ordering::Relaxed);
        WakeOutcome::Parked
    }

    /// Whether a notify is pending (diagnostics only)
    pub fn is_signalled(&self) -> bool {
        self.signalled.load(Ordering::Acquire)
    }

    fn spin(&self, config: &LockConfig) -> bool {
        let start = Instant::now();
        let mut spin_count = 0u32;
        let mut backoff_ns = 1u64;

        loop {
            if self.signalled.load(Ordering::Acquire) {
                return true;
            }
            if spin_count >= config.max_spins || start.elapsed() >= config.spin_duration {
                return false;
            }

            if spin_count < 10 {
                std::hint::spin_loop();
            } else if spin_count < 50 {
                thread::yield_now();
            } else {
                thread::sleep(Duration::from_nanos(backoff_ns));
                backoff_ns = (backoff_ns * 2).min(1_000_000);
            }

            spin_count += 1;
        }
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WakeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeSignal")
            .field("signalled", &self.is_signalled())
            .finish()
    }
}
