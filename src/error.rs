//! Error types returned by the pool's public API.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error type a user-supplied [`crate::Allocator`] raises from `allocate`/`reallocate`.
///
/// Boxed so the pool never needs to know the concrete error type of whatever
/// resource it is pooling (a DB driver error, an I/O error, ...).
pub type AllocError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Cheaply-cloneable captured allocation failure, stored in a slot's `poison`
/// field and surfaced to the next claimer.
#[derive(Clone)]
pub(crate) struct Poison(pub(crate) Arc<dyn std::error::Error + Send + Sync + 'static>);

impl fmt::Debug for Poison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Poison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// All failure kinds the pool's public API can raise.
///
/// Every variant is one of the five kinds a bounded object pool needs:
/// a timed-out wait, a poisoned object surfaced from a failed allocation,
/// the pool shutting down, caller misuse, or an interrupted blocking wait.
#[derive(Debug, Error)]
pub enum PoolError {
    /// `claim` or `Completion::await_termination` did not succeed before its
    /// deadline elapsed.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The claimed slot's last allocation attempt failed; the underlying
    /// cause is attached. The slot has already been queued for proactive
    /// reallocation by the time this error reaches the caller.
    #[error("claimed object is poisoned: {0}")]
    Poisoned(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// The pool is shutting down (or already has). No new claims succeed
    /// once every outstanding claim has been released.
    #[error("pool is shutting down")]
    Shutdown,

    /// Caller misuse that indicates a bug: an invalid configuration value,
    /// or an internal invariant the pool expected to hold did not.
    #[error("pool misuse: {0}")]
    Structural(&'static str),

    /// The thread blocked in `claim`/`await_termination` was interrupted.
    ///
    /// Rust has no portable thread-interruption signal, so this variant
    /// exists for API parity with the specification and for callers that
    /// build their own cancellation on top (e.g. by having another thread
    /// drop the pool out from under a waiter, which is reported as
    /// [`PoolError::Shutdown`] rather than this variant in practice).
    #[error("blocking wait was interrupted")]
    Interrupted,
}

impl From<Poison> for PoolError {
    fn from(p: Poison) -> Self {
        PoolError::Poisoned(p.0)
    }
}
