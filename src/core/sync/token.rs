/*!
 * Writer and Reader Tokens
 *
 * Finite-state cursors that drive and validate the left-right protocol.
 *
 * # Writer Steps
 *
 * ```text
 *   step 0 ──advance()=true──> step 1: write copy `start`      (no drain)
 *   step 1 ──advance()=true──> step 2: write copy `1 - start`  (two drains)
 *   step 2 ──advance()=false─> step 3: gate released
 *   step 3 ──advance()──────> AdvanceAfterFinish
 * ```
 *
 * Every operation has a `try_*` form returning [`LockResult`]; the plain
 * form treats misuse as fatal.
 */

use super::lrmutex::LRMutex;
use super::refcount::{RefCount, ShardHandle};
use crate::core::errors::{or_fatal, LockError, LockResult};
use crossbeam_epoch::Guard;
use parking_lot::MutexGuard;
use std::marker::PhantomData;
use std::ptr::NonNull;

const FINAL_STEP: u8 = 3;

/// Writer side of one round of the protocol, returned by [`LRMutex::lock`]
///
/// Holds the writer gate until [`LockToken::advance`] returns `false`.
/// Dropping an unfinished token releases the gate; the copy it was writing
/// is left as it is.
#[must_use = "the writer gate is released when the token is dropped"]
#[derive(Default)]
pub struct LockToken<'a> {
    lock: Option<&'a LRMutex>,
    gate: Option<MutexGuard<'a, ()>>,
    start_index: usize,
    step: u8,
}

impl<'a> LockToken<'a> {
    pub(crate) fn new(lock: &'a LRMutex, gate: MutexGuard<'a, ()>, start_index: usize) -> Self {
        Self {
            lock: Some(lock),
            gate: Some(gate),
            start_index,
            step: 0,
        }
    }

    fn issued(&self) -> LockResult<&'a LRMutex> {
        self.lock.ok_or(LockError::ZeroWriteToken)
    }

    /// Move to the next step; `false` once the round is complete
    pub fn try_advance(&mut self) -> LockResult<bool> {
        let lock = self.issued()?;
        match self.step {
            0 => {
                self.step = 1;
                Ok(true)
            }
            1 => {
                lock.hand_off();
                self.step = 2;
                Ok(true)
            }
            2 => {
                self.step = FINAL_STEP;
                self.gate = None;
                lock.record_write();
                Ok(false)
            }
            _ => Err(LockError::AdvanceAfterFinish),
        }
    }

    /// Move to the next step; misuse is fatal
    ///
    /// Returns `true` twice and then `false`, the intended loop being
    /// `while token.advance() { write(token.write_index()) }`.
    #[track_caller]
    pub fn advance(&mut self) -> bool {
        or_fatal(self.try_advance())
    }

    /// Copy the writer may modify at the current step
    pub fn try_write_index(&self) -> LockResult<usize> {
        self.issued()?;
        match self.step {
            0 => Err(LockError::IndexBeforeAdvance),
            1 => Ok(self.start_index),
            2 => Ok(self.start_index ^ 1),
            _ => Err(LockError::IndexAfterFinish),
        }
    }

    /// Copy the writer may modify at the current step; misuse is fatal
    #[track_caller]
    pub fn write_index(&self) -> usize {
        or_fatal(self.try_write_index())
    }

    /// Protocol step, 0 through 3
    #[inline]
    pub fn step(&self) -> u8 {
        self.step
    }

    /// Whether [`LockToken::advance`] has returned `false`
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.step >= FINAL_STEP
    }
}

impl Drop for LockToken<'_> {
    fn drop(&mut self) {
        if self.gate.is_some() {
            tracing::debug!(step = self.step, "Write token dropped before finishing");
        }
    }
}

impl std::fmt::Debug for LockToken<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockToken")
            .field("issued", &self.lock.is_some())
            .field("start_index", &self.start_index)
            .field("step", &self.step)
            .finish()
    }
}

/// A live registration on one counter
///
/// The pinned guard keeps the counter from being reclaimed, even after a
/// writer has swapped it out, until the registration is released.
struct Registration {
    counter: NonNull<RefCount>,
    handle: ShardHandle,
    index: usize,
    _guard: Guard,
}

#[derive(Default)]
enum ReadState {
    #[default]
    Zero,
    Held(Registration),
    Released,
}

/// Reader side of the protocol, returned by [`LRMutex::rlock`]
///
/// Dropping a held token releases it. A token pins the calling thread's
/// epoch and so cannot be sent to another thread.
#[must_use = "the read registration is released when the token is dropped"]
#[derive(Default)]
pub struct RLockToken<'a> {
    state: ReadState,
    _lock: PhantomData<&'a LRMutex>,
}

impl<'a> RLockToken<'a> {
    /// `counter` must stay valid while `guard` is pinned
    pub(crate) fn new(
        counter: NonNull<RefCount>,
        handle: ShardHandle,
        index: usize,
        guard: Guard,
    ) -> Self {
        Self {
            state: ReadState::Held(Registration {
                counter,
                handle,
                index,
                _guard: guard,
            }),
            _lock: PhantomData,
        }
    }

    /// Copy the reader may read
    pub fn try_read_index(&self) -> LockResult<usize> {
        match &self.state {
            ReadState::Held(registration) => Ok(registration.index),
            ReadState::Zero => Err(LockError::ZeroReadToken),
            ReadState::Released => Err(LockError::ReadTokenReleased),
        }
    }

    /// Copy the reader may read; misuse is fatal
    #[track_caller]
    pub fn read_index(&self) -> usize {
        or_fatal(self.try_read_index())
    }

    /// End the read
    pub fn try_release(&mut self) -> LockResult<()> {
        match &self.state {
            ReadState::Zero => return Err(LockError::ZeroReadToken),
            ReadState::Released => return Err(LockError::ReadTokenReleased),
            ReadState::Held(_) => {}
        }
        if let ReadState::Held(registration) = std::mem::replace(&mut self.state, ReadState::Released) {
            registration.release();
        }
        Ok(())
    }

    /// End the read; releasing twice is fatal
    #[track_caller]
    pub fn release(&mut self) {
        or_fatal(self.try_release())
    }

    /// Whether the token has been released
    #[inline]
    pub fn is_released(&self) -> bool {
        matches!(self.state, ReadState::Released)
    }
}

impl Registration {
    fn release(self) {
        // SAFETY: `_guard` has been pinned since the counter was loaded and is
        // dropped only after this call, so the counter has not been reclaimed.
        unsafe { self.counter.as_ref() }.release(self.handle);
    }
}

impl Drop for RLockToken<'_> {
    fn drop(&mut self) {
        if let ReadState::Held(registration) = std::mem::take(&mut self.state) {
            registration.release();
        }
    }
}

impl std::fmt::Debug for RLockToken<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            ReadState::Zero => "zero",
            ReadState::Held(_) => "held",
            ReadState::Released => "released",
        };
        f.debug_struct("RLockToken")
            .field("state", &state)
            .field("index", &self.try_read_index().ok())
            .finish()
    }
}
