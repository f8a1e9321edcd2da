/*!
 * Left-Right Mutex
 *
 * A reader-writer lock where readers never block and never write a shared
 * cache line. The caller keeps two copies of the protected data; the lock
 * tells each reader which copy to read and the writer which copy to modify.
 *
 * # Protocol
 *
 * ```text
 *   state (AtomicU8): bit 0 = version index, bit 1 = left-right
 *
 *   reader                           writer (holding the gate)
 *   ──────                           ─────────────────────────
 *   s0 = state                       write copy !lr         (nobody reads it)
 *   counter[s0.version].acquire()    flip lr                (new readers -> other copy)
 *   s1 = state                       drain counter[!version]
 *   read copy s1.lr                  flip version           (new readers -> other counter)
 *   counter.release()                drain counter[!version]
 *                                    write copy that was visible
 * ```
 *
 * Registration must happen before the left-right bit is read: a reader that
 * sees the old copy is then counted on a counter the writer drains before it
 * touches that copy. The two drains cover readers that picked a counter and a
 * copy on either side of a flip.
 *
 * # Counter Replacement
 *
 * A drained counter whose shard width no longer matches the platform is
 * swapped for a fresh one. Readers hold a pinned `crossbeam_epoch` guard for
 * the life of their token, so the retired counter is reclaimed only after
 * the last of them has released. A reader that registered on a counter that
 * was swapped out before it could confirm the pointer releases and retries.
 */

use super::config::LockConfig;
use super::pool::{Allocation, RefCountPool};
use super::refcount::RefCount;
use super::state::LockState;
use super::stats::{AtomicLockStats, LockStats};
use super::token::{LockToken, RLockToken};
use crate::core::errors::{or_fatal, LockError, LockResult};
use crate::core::limits::MAX_REGISTRATION_HANDLE;
use crossbeam_epoch::{self as epoch, Atomic, Owned};
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

/// Per-lock counters, created on first use
struct Counters {
    ref_counts: [Atomic<RefCount>; 2],
    pool: Arc<RefCountPool>,
    stats: AtomicLockStats,
}

impl Counters {
    fn new(pool: Arc<RefCountPool>) -> Self {
        let first = pool.allocate_fresh();
        let second = pool.allocate_fresh();
        debug!(
            shard_bits = first.shard_bits(),
            offsets = ?(first.offset(), second.offset()),
            "Initialized lock counters"
        );
        Self {
            ref_counts: [Atomic::new(first), Atomic::new(second)],
            pool,
            stats: AtomicLockStats::default(),
        }
    }
}

impl Drop for Counters {
    fn drop(&mut self) {
        // SAFETY: tokens borrow the lock, so none is alive and no other
        // thread can load these pointers.
        unsafe {
            let guard = epoch::unprotected();
            for slot in &self.ref_counts {
                let counter = slot.swap(epoch::Shared::null(), Ordering::Relaxed, guard);
                if !counter.is_null() {
                    drop(counter.into_owned());
                }
            }
        }
    }
}

/// Reader-writer lock over two caller-held copies of the protected data
///
/// # Example
///
/// ```
/// use lrlock::LRMutex;
/// use std::cell::UnsafeCell;
///
/// struct Shared {
///     lock: LRMutex,
///     copies: [UnsafeCell<u64>; 2],
/// }
///
/// let shared = Shared { lock: LRMutex::new(), copies: Default::default() };
///
/// shared.lock.write(|index| unsafe { *shared.copies[index].get() = 7 });
/// let value = shared.lock.read(|index| unsafe { *shared.copies[index].get() });
/// assert_eq!(value, 7);
/// ```
pub struct LRMutex {
    state: AtomicU8,
    gate: Mutex<()>,
    counters: OnceLock<Counters>,
    pool: Option<Arc<RefCountPool>>,
    config: LockConfig,
}

impl LRMutex {
    /// Lock on the process-wide counter pool with default drain tuning
    pub const fn new() -> Self {
        Self::with_config(LockConfig::new())
    }

    /// Lock on the process-wide counter pool
    pub const fn with_config(config: LockConfig) -> Self {
        Self {
            state: AtomicU8::new(LockState::INITIAL.bits()),
            gate: Mutex::new(()),
            counters: OnceLock::new(),
            pool: None,
            config,
        }
    }

    /// Lock drawing its counters from `pool`
    pub fn with_pool(pool: Arc<RefCountPool>, config: LockConfig) -> Self {
        Self {
            pool: Some(pool),
            ..Self::with_config(config)
        }
    }

    fn counters(&self) -> &Counters {
        self.counters.get_or_init(|| {
            let pool = self.pool.clone().unwrap_or_else(RefCountPool::global);
            Counters::new(pool)
        })
    }

    #[inline(always)]
    fn load_state(&self) -> LockState {
        LockState::from_bits(self.state.load(Ordering::SeqCst))
    }

    #[inline(always)]
    fn store_state(&self, state: LockState) {
        self.state.store(state.bits(), Ordering::SeqCst);
    }

    /// Current protocol state (diagnostics)
    pub fn state(&self) -> LockState {
        self.load_state()
    }

    /// Drain tuning used by writers
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Start a round of the writer protocol
    ///
    /// Blocks while another writer holds the gate. The first copy handed out
    /// is the one no reader is directed to.
    pub fn lock(&self) -> LockToken<'_> {
        self.counters();
        let gate = self.gate.lock();
        let start_index = self.load_state().left_right() ^ 1;
        LockToken::new(self, gate, start_index)
    }

    /// Start a round of the writer protocol if no other writer holds the gate
    pub fn try_lock(&self) -> Option<LockToken<'_>> {
        self.counters();
        let gate = self.gate.try_lock()?;
        let start_index = self.load_state().left_right() ^ 1;
        Some(LockToken::new(self, gate, start_index))
    }

    /// Register a reader
    ///
    /// # Errors
    ///
    /// Only invariant violations: a shard overflowing its registration limit,
    /// or a shard id too large for the read token.
    pub fn try_rlock(&self) -> LockResult<RLockToken<'_>> {
        let counters = self.counters();
        let context = counters.pool.platform().current_context_id();
        let guard = epoch::pin();

        loop {
            let version = self.load_state().version_index();
            let slot = &counters.ref_counts[version];
            let shared = slot.load(Ordering::SeqCst, &guard);
            // SAFETY: counter slots are never null while the lock is alive, and
            // the pinned guard keeps a swapped-out counter from being reclaimed.
            let counter = unsafe { shared.deref() };

            let handle = counter.acquire(context)?;
            if handle.shard() > MAX_REGISTRATION_HANDLE {
                counter.release(handle);
                return Err(LockError::RegistrationOutOfRange {
                    shard: handle.shard(),
                    limit: MAX_REGISTRATION_HANDLE,
                });
            }

            let index = self.load_state().left_right();
            if slot.load(Ordering::SeqCst, &guard) != shared {
                counter.release(handle);
                continue;
            }

            let counter = NonNull::from(counter);
            return Ok(RLockToken::new(counter, handle, index, guard));
        }
    }

    /// Register a reader; invariant violations are fatal
    #[track_caller]
    pub fn rlock(&self) -> RLockToken<'_> {
        or_fatal(self.try_rlock())
    }

    /// Run the full writer protocol, calling `apply` once for each copy
    pub fn write<F>(&self, mut apply: F)
    where
        F: FnMut(usize),
    {
        let mut token = self.lock();
        while token.advance() {
            apply(token.write_index());
        }
    }

    /// Run `read` against the copy a fresh read token names
    pub fn read<R, F>(&self, read: F) -> R
    where
        F: FnOnce(usize) -> R,
    {
        let mut token = self.rlock();
        let result = read(token.read_index());
        token.release();
        result
    }

    /// Registrations currently held on both counters (racy snapshot)
    pub fn readers(&self) -> u64 {
        let Some(counters) = self.counters.get() else {
            return 0;
        };
        let guard = epoch::pin();
        counters
            .ref_counts
            .iter()
            .map(|slot| {
                // SAFETY: see `try_rlock`.
                unsafe { slot.load(Ordering::SeqCst, &guard).deref() }.outstanding()
            })
            .sum()
    }

    /// Writer statistics
    pub fn stats(&self) -> LockStats {
        self.counters
            .get()
            .map(|counters| counters.stats.snapshot())
            .unwrap_or_default()
    }

    /// Step 1 to 2: hand the written copy to readers and drain the other
    pub(crate) fn hand_off(&self) {
        let counters = self.counters();

        let state = self.load_state().toggle_left_right();
        self.store_state(state);
        self.drain(counters, state.inactive_version());

        let state = state.toggle_version();
        self.store_state(state);
        self.drain(counters, state.inactive_version());
    }

    pub(crate) fn record_write(&self) {
        self.counters().stats.inc_writes_completed();
    }

    /// Wait out every reader on one counter, then resize it if needed
    fn drain(&self, counters: &Counters, version: usize) {
        let guard = epoch::pin();
        let slot = &counters.ref_counts[version];
        let current = slot.load(Ordering::SeqCst, &guard);
        // SAFETY: only the gate holder swaps counters, and that is us.
        let counter = unsafe { current.deref() };

        let outcome = counter.wait(&self.config);
        counters.stats.record_drain(outcome.parked());
        trace!(
            version,
            armed = outcome.armed(),
            parked = outcome.parked(),
            "Drained counter"
        );

        let Allocation::Fresh(replacement) = counters.pool.allocate(Some(counter)) else {
            return;
        };

        let retired = slot.swap(Owned::new(replacement), Ordering::SeqCst, &guard);
        // SAFETY: `retired` is `current`, still protected by our guard.
        let retired_counter = unsafe { retired.deref() };

        // Readers that registered before seeing the swap are still counted
        // on the retired counter.
        let outcome = retired_counter.wait(&self.config);
        counters.stats.record_drain(outcome.parked());
        counters.stats.inc_counters_replaced();
        debug!(
            version,
            from = retired_counter.shard_bits(),
            armed = outcome.armed(),
            "Replaced lock counter"
        );

        // SAFETY: the pointer is unreachable from the lock now, and readers
        // still holding it are pinned, which defers destruction past them.
        unsafe { guard.defer_destroy(retired) };
        // Hand the retired counter to the global queue so it is reclaimed once
        // its readers unpin, not when this thread's bag fills up.
        guard.flush();
    }
}

impl Default for LRMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LRMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LRMutex")
            .field("state", &self.load_state())
            .field("initialized", &self.counters.get().is_some())
            .field("config", &self.config)
            .finish()
    }
}
