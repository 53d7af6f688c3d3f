//! The background allocator loop: the single worker that performs every
//! allocation, deallocation, and reallocation off the claim/release hot
//! path.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::BackgroundScheduler;
use crate::error::Poison;
use crate::factory::SlotInfo;
use crate::pool::PoolInner;

/// Handle to the spawned allocator worker, joined by `PoolInner::drop`.
pub(crate) enum AllocatorHandle {
    Thread(std::thread::JoinHandle<()>),
    #[cfg(feature = "tokio-scheduler")]
    Tokio {
        runtime: tokio::runtime::Handle,
        join: tokio::task::JoinHandle<()>,
    },
}

impl AllocatorHandle {
    /// Block until the allocator thread/task has exited. No timeout: a
    /// leaked slot (claimed and never released) means this can block
    /// forever, which is documented pool-drop behavior, not a bug.
    pub(crate) fn join(self) {
        match self {
            AllocatorHandle::Thread(handle) => {
                if handle.join().is_err() {
                    tracing::error!("pool allocator thread panicked");
                }
            }
            #[cfg(feature = "tokio-scheduler")]
            AllocatorHandle::Tokio { runtime, join } => {
                if runtime.block_on(join).is_err() {
                    tracing::error!("pool allocator task panicked");
                }
            }
        }
    }
}

pub(crate) fn spawn<T>(
    inner: Arc<PoolInner<T>>,
    thread_name: String,
    scheduler: BackgroundScheduler,
    max_size: usize,
    initial_size: usize,
) -> AllocatorHandle
where
    T: Send + 'static,
{
    match scheduler {
        BackgroundScheduler::DedicatedThread => {
            let handle = std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || run_allocator_loop(inner, max_size, initial_size))
                .expect("failed to spawn pool allocator thread");
            AllocatorHandle::Thread(handle)
        }
        #[cfg(feature = "tokio-scheduler")]
        BackgroundScheduler::TokioBlocking(runtime) => {
            let runtime_for_join = runtime.clone();
            let join = runtime
                .spawn_blocking(move || run_allocator_loop(inner, max_size, initial_size));
            AllocatorHandle::Tokio { runtime: runtime_for_join, join }
        }
    }
}

/// The allocator loop's body, independent of which scheduler ran it.
///
/// `reserve` is a plain, non-atomic `Vec<usize>` of slot indices not
/// currently counted toward the pool's live capacity. Touched only here,
/// on this one thread, so it needs no synchronization of its own.
fn run_allocator_loop<T>(inner: Arc<PoolInner<T>>, max_size: usize, initial_size: usize)
where
    T: Send + 'static,
{
    let mut reserve: Vec<usize> = (initial_size..max_size).rev().collect();
    tracing::info!(initial_size, max_size, "pool allocator starting");

    loop {
        let shutting_down = inner.shutdown.load(Ordering::Acquire);
        if shutting_down {
            drain_live_channel(&inner, &mut reserve);
            if inner.live_and_claimed.load(Ordering::Acquire) == 0 {
                inner.completion.signal();
                tracing::info!("pool allocator exiting, shutdown complete");
                return;
            }
        } else {
            grow_if_needed(&inner, &mut reserve);
        }

        match pop_dead_blocking(&inner, Duration::from_millis(200)) {
            Some(index) => handle_dead_slot(&inner, index, &mut reserve, shutting_down),
            None => continue,
        }
    }
}

fn grow_if_needed<T>(inner: &PoolInner<T>, reserve: &mut Vec<usize>) {
    loop {
        let live = inner.live_and_claimed.load(Ordering::Acquire) as i64;
        let in_flight = inner.dead_queue.len() as i64;
        let target = inner.target_size.load(Ordering::Acquire) as i64;
        if target - live - in_flight <= 0 {
            return;
        }
        match reserve.pop() {
            Some(index) => push_dead(inner, index),
            None => {
                // target_size is clamped to max_size at the Pool API boundary;
                // reaching this means every slot is already live or in flight.
                return;
            }
        }
    }
}

fn drain_live_channel<T>(inner: &PoolInner<T>, reserve: &mut Vec<usize>) {
    while let Ok(index) = inner.live_rx.try_recv() {
        let slot = &inner.slots[index];
        // SAFETY: a slot popped off the live channel is reachable from
        // nowhere else (the channel held its only ready-for-claim
        // reference); during shutdown drain only this thread ever pops it.
        let existing = unsafe { slot.object_mut().take() };
        if let Some(object) = existing {
            inner.allocator.deallocate(object);
        }
        unsafe {
            *slot.poison_mut() = None;
        }
        slot.force_dead();
        inner.live_and_claimed.fetch_sub(1, Ordering::AcqRel);
        reserve.push(index);
    }
}

fn handle_dead_slot<T>(
    inner: &PoolInner<T>,
    index: usize,
    reserve: &mut Vec<usize>,
    shutting_down: bool,
) {
    let slot = &inner.slots[index];
    let live = inner.live_and_claimed.load(Ordering::Acquire);
    let target = inner.target_size.load(Ordering::Acquire);
    let shrink = shutting_down || live >= target;

    // SAFETY: slots reached via the dead channel are owned exclusively by
    // the allocator thread (the only consumer of that channel) until they
    // are republished via `slot.publish()` below.
    let existing = unsafe { slot.object_mut().take() };

    if shrink {
        if let Some(object) = existing {
            inner.allocator.deallocate(object);
        }
        unsafe {
            *slot.poison_mut() = None;
        }
        reserve.push(index);
        tracing::debug!(index, "pool slot retired (shrink or shutdown)");
        return;
    }

    let slot_info = SlotInfo::new(index, slot.generation());
    let result = match existing {
        Some(old) => inner.allocator.reallocate(&slot_info, old),
        None => inner.allocator.allocate(&slot_info),
    };
    slot.increment_generation();

    match result {
        Ok(object) => {
            unsafe {
                *slot.object_mut() = Some(object);
                *slot.poison_mut() = None;
                slot.set_created_at(Instant::now());
            }
            slot.reset_claim_count();
            tracing::debug!(index, "pool slot (re)allocated");
        }
        Err(err) => {
            tracing::warn!(index, error = %err, "pool slot allocation failed, publishing poisoned slot");
            unsafe {
                *slot.poison_mut() = Some(Poison(Arc::from(err)));
            }
        }
    }

    slot.publish();
    inner.live_and_claimed.fetch_add(1, Ordering::AcqRel);
    // The live channel's capacity is the arena's max_size, which bounds how
    // many slots can ever be simultaneously Living/Claimed/TlrClaimed, so
    // this send can never actually block.
    if inner.live_tx.send(index).is_err() {
        tracing::debug!(index, "live channel receiver gone, pool is being torn down");
    }
}

pub(crate) fn push_dead<T>(inner: &PoolInner<T>, index: usize) {
    inner.dead_queue.push(index);
    let _guard = inner.doorbell_mutex.lock();
    inner.doorbell_cv.notify_all();
}

fn pop_dead_blocking<T>(inner: &PoolInner<T>, timeout: Duration) -> Option<usize> {
    if let Some(index) = inner.dead_queue.pop() {
        return Some(index);
    }
    let mut guard = inner.doorbell_mutex.lock();
    if let Some(index) = inner.dead_queue.pop() {
        return Some(index);
    }
    let _ = inner.doorbell_cv.wait_for(&mut guard, timeout);
    drop(guard);
    inner.dead_queue.pop()
}
