//! The pool itself: the fixed-capacity slot arena, the claim/release engine,
//! and the resize/shutdown controllers layered over it.
//!
//! Everything here is glue over the primitives in [`crate::slot`],
//! [`crate::tlr`], and [`crate::allocator`]; this module owns no state
//! machine logic of its own beyond deciding *which* transition applies.

use std::cell::Cell;
use std::num::NonZeroUsize;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::allocator::{self, AllocatorHandle};
use crate::completion::{Completion, CompletionInner};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::expiration::{Expiration, SlotMeta};
use crate::factory::Allocator;
use crate::slot::{Slot, State};
use crate::tlr;

/// Shared state behind a [`Pool`]. Lives in an `Arc` so the allocator thread,
/// every outstanding [`PooledObject`], and the `Pool` handle itself can all
/// reach it without the pool needing an owning back-reference cycle. The
/// arena is the single owner of every slot; everything else holds an index.
pub(crate) struct PoolInner<T> {
    pub(crate) slots: Box<[Slot<T>]>,
    pub(crate) live_tx: Sender<usize>,
    pub(crate) live_rx: Receiver<usize>,
    pub(crate) dead_queue: SegQueue<usize>,
    pub(crate) doorbell_mutex: Mutex<()>,
    pub(crate) doorbell_cv: Condvar,
    pub(crate) target_size: AtomicUsize,
    /// Count of slots currently Living, Claimed, or TlrClaimed (i.e. not
    /// Dead). Compared against `target_size` to decide grow/shrink.
    pub(crate) live_and_claimed: AtomicUsize,
    pub(crate) shutdown: AtomicBool,
    pub(crate) completion: Arc<CompletionInner>,
    pub(crate) allocator: Arc<dyn Allocator<T>>,
    pub(crate) expiration: Arc<dyn Expiration<T>>,
    pub(crate) pool_id: u64,
    pub(crate) max_size: usize,
}

impl<T> PoolInner<T> {
    /// Apply the release protocol for a claimed slot. `via_tlr` records which
    /// CAS exit this claim is expected to take; `expire_requested` is the
    /// non-atomic flag read from [`PooledObject::expire`].
    fn release(&self, index: usize, via_tlr: bool, expire_requested: bool) {
        let slot = &self.slots[index];
        let shrink = self.live_and_claimed.load(Ordering::Acquire) > self.target_size.load(Ordering::Acquire);
        let shutting_down = self.shutdown.load(Ordering::Acquire);
        let to_dead = expire_requested || shrink || shutting_down;

        // The TLR exit is a CAS, not a store, because a concurrent observer
        // can in principle move the slot out of TlrClaimed first (see the
        // steal race documented on `Slot::try_steal`). On CAS failure we
        // fall back to the ordinary CLAIMED exit below.
        let tlr_exit_ok = via_tlr
            && if to_dead {
                slot.try_release_tlr_to_dead()
            } else {
                slot.try_release_tlr_to_living()
            };

        if !tlr_exit_ok {
            slot.release_claimed(to_dead);
        }
        if to_dead {
            tlr::clear_if(self.pool_id, index);
        }

        if to_dead {
            self.live_and_claimed.fetch_sub(1, Ordering::AcqRel);
            allocator::push_dead(self, index);
            tracing::trace!(index, "pool slot released to dead channel");
        } else if !tlr_exit_ok {
            // Normal (non-TLR) releases, and TLR releases whose fast CAS
            // lost its race, republish on the live channel. A TLR exit that
            // succeeded deliberately does not: while this slot was
            // TlrClaimed, any popper that found it busy re-queued its index
            // instead of dropping it (see the claim loop in `Pool::claim`),
            // so an entry for this slot is already back in the channel by
            // the time we get here.
            if self.live_tx.send(index).is_err() {
                tracing::debug!(index, "live channel receiver gone, pool is being torn down");
            }
        }
    }
}

/// A generic, bounded, thread-safe object pool.
///
/// Client threads [`claim`](Pool::claim) an object, use it, and either call
/// [`PooledObject::release`] or simply drop the handle. A dedicated
/// background allocator thread performs all construction and destruction,
/// so `claim` never pays for it directly except on a cold (never-yet-
/// allocated) slot at pool startup.
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
    allocator_handle: Mutex<Option<AllocatorHandle>>,
}

impl<T: Send + 'static> PoolConfig<T> {
    /// Validate the configuration and start the pool, including its
    /// background allocator.
    ///
    /// # Errors
    /// Returns [`PoolError::Structural`] if no allocator was supplied, or if
    /// the configured initial `size` exceeds the resolved `max_size`.
    pub fn build(mut self) -> Result<Pool<T>, PoolError> {
        let allocator = self.take_allocator()?;
        let initial_size = self.size.get();
        let max_size = self.resolved_max_size().get();
        if initial_size > max_size {
            return Err(PoolError::Structural(
                "PoolConfig::size must not exceed PoolConfig::max_size",
            ));
        }

        let pool_id = tlr::next_pool_id();
        let slots: Box<[Slot<T>]> = (0..max_size)
            .map(|index| Slot::new(index, pool_id ^ (index as u64).wrapping_mul(0x9E37_79B9)))
            .collect();

        let (live_tx, live_rx) = crossbeam_channel::bounded(max_size);
        let dead_queue = SegQueue::new();
        for index in 0..initial_size {
            dead_queue.push(index);
        }

        let inner = Arc::new(PoolInner {
            slots,
            live_tx,
            live_rx,
            dead_queue,
            doorbell_mutex: Mutex::new(()),
            doorbell_cv: Condvar::new(),
            target_size: AtomicUsize::new(initial_size),
            live_and_claimed: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            completion: CompletionInner::new(),
            allocator,
            expiration: self.expiration,
            pool_id,
            max_size,
        });

        tracing::info!(initial_size, max_size, "pool constructed");

        let handle = allocator::spawn(
            Arc::clone(&inner),
            self.allocator_thread_name,
            self.background_scheduler,
            max_size,
            initial_size,
        );

        Ok(Pool { inner, allocator_handle: Mutex::new(Some(handle)) })
    }
}

impl<T: Send + 'static> Pool<T> {
    /// Start building a pool configuration with every default tunable.
    #[must_use]
    pub fn builder() -> PoolConfig<T> {
        PoolConfig::new()
    }

    /// Claim an object from the pool, blocking the calling thread for at
    /// most `timeout`.
    ///
    /// # Errors
    /// - [`PoolError::Timeout`] if no object became available in time.
    /// - [`PoolError::Poisoned`] if the claimed slot's last allocation
    ///   attempt failed; the slot has already been queued for proactive
    ///   reallocation by the time this returns.
    /// - [`PoolError::Shutdown`] if the pool is shutting down. Takes
    ///   precedence over `Timeout` when both would apply.
    pub fn claim(&self, timeout: Duration) -> Result<PooledObject<T>, PoolError> {
        let deadline = Instant::now() + timeout;

        if let Some(index) = tlr::get(self.inner.pool_id) {
            let slot = &self.inner.slots[index];
            if slot.load_state() == State::Living && slot.try_claim(true) {
                if let Some(object) = self.finish_claim(index, true)? {
                    return Ok(object);
                }
                // Expired on the fast path; fall through to normal polling.
            }
        }

        loop {
            if self.inner.shutdown.load(Ordering::Acquire) {
                return Err(PoolError::Shutdown);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PoolError::Timeout(timeout));
            }

            let index = match self.inner.live_rx.recv_timeout(remaining) {
                Ok(index) => index,
                Err(RecvTimeoutError::Timeout) => return Err(PoolError::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(PoolError::Shutdown),
            };

            let slot = &self.inner.slots[index];
            if slot.load_state() == State::TlrClaimed {
                // This index's owner is off using it via the TLR fast path
                // and won't republish on release (see `PoolInner::release`).
                // Put the entry back so the next popper gets a chance once
                // that thread is done with it, instead of losing the slot's
                // only channel reference.
                if self.inner.live_tx.send(index).is_err() {
                    tracing::debug!(index, "live channel receiver gone, pool is being torn down");
                }
                continue;
            }
            if !slot.try_claim(false) {
                // Lost the race to claim this index via the normal path
                // (another thread's channel pop or force_dead beat us to
                // it); its own release or the allocator already accounts
                // for the slot, so the entry is safe to drop here.
                continue;
            }
            if let Some(object) = self.finish_claim(index, false)? {
                return Ok(object);
            }
        }
    }

    /// Run the poison/expiration/shutdown checks on a freshly-claimed slot.
    ///
    /// `Ok(Some(_))` is a successful claim; `Ok(None)` means the slot was
    /// expired and retired, and the caller should keep polling; `Err(_)`
    /// propagates immediately (poison consumes the caller's remaining
    /// timeout rather than being retried, see the crate's design notes).
    fn finish_claim(&self, index: usize, via_tlr: bool) -> Result<Option<PooledObject<T>>, PoolError> {
        let slot = &self.inner.slots[index];

        // SAFETY: this thread exclusively owns the slot, having just won the
        // CAS into Claimed/TlrClaimed.
        let poison = unsafe { slot.poison_mut().take() };
        if let Some(poison) = poison {
            tracing::warn!(index, "claimed slot was poisoned, retiring for reallocation");
            self.retire(index);
            return Err(PoolError::from(poison));
        }

        let expired = {
            let claim_count = slot.claim_count();
            // SAFETY: see above.
            let created_at = unsafe { slot.created_at() };
            let mut meta =
                SlotMeta::new(created_at, claim_count, unsafe { slot.stamp_mut() }, unsafe {
                    slot.rng_mut()
                });
            self.inner.expiration.has_expired(&mut meta)
        };
        if expired {
            tracing::debug!(index, "claimed slot expired, retiring for reallocation");
            self.retire(index);
            return Ok(None);
        }

        if self.inner.shutdown.load(Ordering::Acquire) {
            self.retire(index);
            return Err(PoolError::Shutdown);
        }

        slot.increment_claim_count();
        tlr::set(self.inner.pool_id, index);
        Ok(Some(PooledObject {
            inner: Arc::clone(&self.inner),
            index,
            via_tlr,
            expire_requested: Cell::new(false),
        }))
    }

    /// Retire a slot this thread exclusively owns (via a prior successful
    /// claim CAS) straight to Dead and hand it to the allocator.
    fn retire(&self, index: usize) {
        let slot = &self.inner.slots[index];
        slot.force_dead();
        tlr::clear_if(self.inner.pool_id, index);
        self.inner.live_and_claimed.fetch_sub(1, Ordering::AcqRel);
        allocator::push_dead(&self.inner, index);
    }

    /// Set the pool's target size. Convergence is driven by the background
    /// allocator loop and has no wall-clock guarantee; clamped to the
    /// arena's fixed `max_size` established at construction.
    pub fn set_target_size(&self, n: NonZeroUsize) {
        let clamped = n.get().min(self.inner.max_size);
        if clamped != n.get() {
            tracing::warn!(
                requested = n.get(),
                max_size = self.inner.max_size,
                "set_target_size clamped to the pool's max_size"
            );
        }
        self.inner.target_size.store(clamped, Ordering::Release);
        let _guard = self.inner.doorbell_mutex.lock();
        self.inner.doorbell_cv.notify_all();
    }

    /// The pool's current target size.
    #[must_use]
    pub fn target_size(&self) -> usize {
        self.inner.target_size.load(Ordering::Acquire)
    }

    /// The arena's fixed maximum capacity (see [`crate::config::PoolConfig::max_size`]).
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    /// Begin shutting down the pool. Idempotent: every call (from any
    /// thread) returns a [`Completion`] tracking the same underlying signal.
    ///
    /// Does not block. Does not cancel in-flight `claim` calls; those
    /// complete per their own timeout, returning [`PoolError::Shutdown`] if
    /// they haven't already succeeded.
    pub fn shutdown(&self) -> Completion {
        self.inner.shutdown.store(true, Ordering::Release);
        let _guard = self.inner.doorbell_mutex.lock();
        self.inner.doorbell_cv.notify_all();
        Completion::new(Arc::clone(&self.inner.completion))
    }
}

impl<T> Drop for Pool<T> {
    fn drop(&mut self) {
        if !self.inner.shutdown.swap(true, Ordering::AcqRel) {
            tracing::debug!("pool dropped without an explicit shutdown() call; shutting down now");
        }
        {
            let _guard = self.inner.doorbell_mutex.lock();
            self.inner.doorbell_cv.notify_all();
        }
        // A leaked slot (claimed and never released) means this blocks
        // forever. Documented pool-drop behavior, not a bug: see the
        // shutdown controller's design notes.
        if let Some(handle) = self.allocator_handle.lock().take() {
            handle.join();
        }
    }
}

/// An RAII claim on one object from a [`Pool`].
///
/// Derefs to `T` for direct use. Automatically released back to the pool on
/// drop, including when the caller panics while holding it, so
/// [`PooledObject::release`] exists only for callers who want to make the
/// return point explicit; it has no effect beyond what `Drop` already does.
pub struct PooledObject<T> {
    inner: Arc<PoolInner<T>>,
    index: usize,
    via_tlr: bool,
    expire_requested: Cell<bool>,
}

impl<T> PooledObject<T> {
    /// Mark this slot's current object as expired. Takes effect when this
    /// handle is released (explicitly or via drop): the slot is retired and
    /// queued for reallocation instead of being returned to circulation.
    pub fn expire(&self) {
        self.expire_requested.set(true);
    }

    /// Release the object back to the pool. Equivalent to dropping the
    /// handle; provided so call sites can make the return point explicit.
    pub fn release(self) {}

    /// The slot's stable arena index, for logging/metrics.
    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.index
    }
}

impl<T> Deref for PooledObject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        let slot = &self.inner.slots[self.index];
        // SAFETY: this handle is the exclusive owner of the slot while it
        // exists (Claimed/TlrClaimed); a successfully-built `PooledObject`
        // is only ever constructed once poisoning has already been ruled
        // out, so the object is always present.
        unsafe {
            (*slot.object_mut())
                .as_ref()
                .expect("claimed slot has no object despite a non-poisoned claim")
        }
    }
}

impl<T> DerefMut for PooledObject<T> {
    fn deref_mut(&mut self) -> &mut T {
        let slot = &self.inner.slots[self.index];
        // SAFETY: see `Deref::deref`.
        unsafe {
            (*slot.object_mut())
                .as_mut()
                .expect("claimed slot has no object despite a non-poisoned claim")
        }
    }
}

impl<T> Drop for PooledObject<T> {
    fn drop(&mut self) {
        self.inner.release(self.index, self.via_tlr, self.expire_requested.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AllocError;
    use crate::expiration::NeverExpire;
    use crate::factory::ClosureAllocator;
    use std::sync::atomic::AtomicU64;

    fn counting_allocator() -> (Arc<AtomicU64>, ClosureAllocator<impl Fn(&crate::factory::SlotInfo) -> Result<u64, AllocError>, impl Fn(u64)>) {
        let created = Arc::new(AtomicU64::new(0));
        let created_clone = Arc::clone(&created);
        let allocator = ClosureAllocator::new(
            move |_slot: &crate::factory::SlotInfo| {
                Ok::<_, AllocError>(created_clone.fetch_add(1, Ordering::SeqCst))
            },
            |_obj: u64| {},
        );
        (created, allocator)
    }

    #[test]
    fn claim_and_release_roundtrip() {
        let (_created, allocator) = counting_allocator();
        let pool: Pool<u64> = PoolConfig::new()
            .size(NonZeroUsize::new(1).expect("1 is nonzero"))
            .allocator(Arc::new(allocator))
            .expiration(Arc::new(NeverExpire))
            .build()
            .expect("pool must build");

        let obj = pool.claim(Duration::from_secs(1)).expect("claim must succeed");
        assert_eq!(*obj, 0);
        drop(obj);

        // Same thread, same slot: TLR fast path should serve this claim.
        let obj2 = pool.claim(Duration::from_secs(1)).expect("claim must succeed");
        assert_eq!(obj2.slot_index(), 0);
    }

    #[test]
    fn claim_times_out_when_exhausted() {
        let (_created, allocator) = counting_allocator();
        let pool: Pool<u64> = PoolConfig::new()
            .size(NonZeroUsize::new(1).expect("1 is nonzero"))
            .allocator(Arc::new(allocator))
            .expiration(Arc::new(NeverExpire))
            .build()
            .expect("pool must build");

        let _held = pool.claim(Duration::from_secs(1)).expect("claim must succeed");
        let result = pool.claim(Duration::from_millis(50));
        assert!(matches!(result, Err(PoolError::Timeout(_))));
    }

    #[test]
    fn shutdown_then_claim_fails() {
        let (_created, allocator) = counting_allocator();
        let pool: Pool<u64> = PoolConfig::new()
            .size(NonZeroUsize::new(1).expect("1 is nonzero"))
            .allocator(Arc::new(allocator))
            .expiration(Arc::new(NeverExpire))
            .build()
            .expect("pool must build");

        let obj = pool.claim(Duration::from_secs(1)).expect("claim must succeed");
        let completion = pool.shutdown();
        assert!(!completion.await_termination(Duration::from_millis(50)));
        drop(obj);
        assert!(completion.await_termination(Duration::from_secs(2)));

        let result = pool.claim(Duration::from_millis(50));
        assert!(matches!(result, Err(PoolError::Shutdown)));
    }
}
