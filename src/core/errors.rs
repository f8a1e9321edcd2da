/*!
 * Error Types
 * Protocol misuse errors with thiserror and miette diagnostics
 *
 * Every error here is a programmer bug or an impossible environment, never a
 * condition to retry. The `try_*` operations surface them as values so tests
 * and diagnostics can inspect them; the plain operations route them through
 * [`fatal`] and stop the calling thread.
 */

use miette::Diagnostic;
use thiserror::Error;

/// Result type for lock protocol operations
pub type LockResult<T> = Result<T, LockError>;

/// Misuse of the left-right protocol or violated counter invariants
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Diagnostic)]
pub enum LockError {
    #[error("use of a zero LockToken is invalid")]
    #[diagnostic(
        code(lrlock::zero_write_token),
        help("Obtain write tokens from LRMutex::lock(); LockToken::default() is never usable.")
    )]
    ZeroWriteToken,

    #[error("use of a zero RLockToken is invalid")]
    #[diagnostic(
        code(lrlock::zero_read_token),
        help("Obtain read tokens from LRMutex::rlock(); RLockToken::default() is never usable.")
    )]
    ZeroReadToken,

    #[error("cannot query the write index before the first advance()")]
    #[diagnostic(
        code(lrlock::index_before_advance),
        help("Call advance() once after lock(); it returns true when the first copy may be written.")
    )]
    IndexBeforeAdvance,

    #[error("cannot query the write index after advance() has returned false")]
    #[diagnostic(
        code(lrlock::index_after_finish),
        help("The write protocol is complete and the writer gate has been released.")
    )]
    IndexAfterFinish,

    #[error("cannot call advance() again after it has returned false")]
    #[diagnostic(
        code(lrlock::advance_after_finish),
        help("Drive the token with a `while token.advance()` loop and stop at the first false.")
    )]
    AdvanceAfterFinish,

    #[error("use of an RLockToken after release is invalid")]
    #[diagnostic(
        code(lrlock::read_token_released),
        help("Each read token is single-use; take a new one with LRMutex::rlock().")
    )]
    ReadTokenReleased,

    #[error("shard {shard} exceeded {limit} outstanding registrations")]
    #[diagnostic(
        code(lrlock::shard_overflow),
        help("Read tokens are being leaked; every rlock() needs a matching release().")
    )]
    ShardOverflow { shard: usize, limit: i32 },

    #[error("registration handle {shard} does not fit the read token (limit {limit})")]
    #[diagnostic(
        code(lrlock::registration_out_of_range),
        help("The reported parallelism is larger than the lock supports.")
    )]
    RegistrationOutOfRange { shard: usize, limit: usize },
}

impl LockError {
    /// Short stable name for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            LockError::ZeroWriteToken => "zero_write_token",
            LockError::ZeroReadToken => "zero_read_token",
            LockError::IndexBeforeAdvance => "index_before_advance",
            LockError::IndexAfterFinish => "index_after_finish",
            LockError::AdvanceAfterFinish => "advance_after_finish",
            LockError::ReadTokenReleased => "read_token_released",
            LockError::ShardOverflow { .. } => "shard_overflow",
            LockError::RegistrationOutOfRange { .. } => "registration_out_of_range",
        }
    }
}

/// Abort the current operation on an unrecoverable protocol error
///
/// Emits an error event and panics with the error's message. Never returns.
#[cold]
#[track_caller]
pub fn fatal(err: LockError) -> ! {
    tracing::error!(kind = err.kind(), error = %err, "fatal lock protocol violation");
    panic!("{err}")
}

/// Unwrap a protocol result, treating any error as fatal
#[inline]
#[track_caller]
pub(crate) fn or_fatal<T>(result: LockResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => fatal(err),
    }
}
