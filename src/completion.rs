//! The shutdown completion handle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

pub(crate) struct CompletionInner {
    done: Mutex<bool>,
    cv: Condvar,
}

impl CompletionInner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self { done: Mutex::new(false), cv: Condvar::new() })
    }

    pub(crate) fn signal(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cv.notify_all();
    }

    pub(crate) fn is_done(&self) -> bool {
        *self.done.lock()
    }
}

/// Returned by [`crate::Pool::shutdown`]; reports when the pool has finished
/// destroying every slot and its allocator thread has exited.
///
/// Every call to `shutdown()` on the same pool returns a `Completion`
/// wrapping the same underlying signal, so it is safe to call `shutdown()`
/// from more than one thread and have every caller observe the same
/// outcome.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<CompletionInner>,
}

impl Completion {
    pub(crate) fn new(inner: Arc<CompletionInner>) -> Self {
        Self { inner }
    }

    /// Block the calling thread until shutdown completes or `timeout`
    /// elapses, whichever comes first.
    ///
    /// Returns `true` if shutdown had completed by the time this returned,
    /// `false` on timeout. A leaked slot (claimed and never released) means
    /// this never returns `true`, no matter how many times it's called.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.inner.done.lock();
        while !*done {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            // A spurious wakeup returns here with `*done` still false and
            // time left on the clock; loop and recompute the remaining wait
            // instead of trusting a single `wait_for`'s timed-out flag.
            self.inner.cv.wait_for(&mut done, remaining);
        }
        true
    }

    /// Returns `true` if shutdown has already completed, without blocking.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }
}
