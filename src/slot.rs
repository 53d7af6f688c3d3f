//! The per-slot state machine and metadata container.
//!
//! A `Slot<T>` is never moved once the arena is built (see [`crate::pool`]);
//! its index is its identity. All cross-thread coordination for a slot goes
//! through its atomic `state` field; every other field is mutated only by
//! whichever thread currently "owns" the slot under that state machine
//! (the allocator while `Dead`, a claimer while `Claimed`/`TlrClaimed`), and
//! published to the next owner by the state transition itself.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

use crate::error::Poison;
use crate::rng::Xorshift128;

/// A slot's lifecycle state. Stored as a `u8` so it fits the cache-line-
/// padded atomic below; matched exhaustively everywhere it's read.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    /// No live object; owned by the allocator, awaiting (re)allocation.
    Dead = 0,
    /// Holds a live object (or a poison); available to be claimed.
    Living = 1,
    /// Claimed via the normal live-channel path.
    Claimed = 2,
    /// Claimed via a thread's TLR cache fast path.
    TlrClaimed = 3,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => State::Dead,
            1 => State::Living,
            2 => State::Claimed,
            3 => State::TlrClaimed,
            other => unreachable!("invalid slot state byte {other}"),
        }
    }
}

/// Cache-line-padded atomic state word, so adjacent slots in the arena
/// don't false-share a cache line on their hottest field.
#[repr(align(64))]
struct PaddedState(AtomicU8);

/// One reusable slot. Count of slots equals the pool's configured maximum
/// capacity; slots below the current target size cycle through
/// `Dead -> Living -> {Claimed,TlrClaimed} -> Living -> ...`, while slots
/// at or above it sit `Dead` until a resize activates them.
pub(crate) struct Slot<T> {
    pub(crate) index: usize,
    state: PaddedState,
    object: UnsafeCell<Option<T>>,
    poison: UnsafeCell<Option<Poison>>,
    created_at: UnsafeCell<Instant>,
    claim_count: AtomicU64,
    generation: AtomicU64,
    stamp: UnsafeCell<u64>,
    rng: UnsafeCell<Xorshift128>,
}

// SAFETY: every field besides `state` and `claim_count` (already atomic) is
// touched only by the single thread that currently owns the slot under the
// state machine in this module's doc comment; `state`'s own atomicity is
// what establishes that ownership handoff happens-before the next owner's
// access. `T: Send` lets the object itself cross threads on claim/release.
unsafe impl<T: Send> Sync for Slot<T> {}

impl<T> Slot<T> {
    pub(crate) fn new(index: usize, seed: u64) -> Self {
        Self {
            index,
            state: PaddedState(AtomicU8::new(State::Dead as u8)),
            object: UnsafeCell::new(None),
            poison: UnsafeCell::new(None),
            created_at: UnsafeCell::new(Instant::now()),
            claim_count: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            stamp: UnsafeCell::new(0),
            rng: UnsafeCell::new(Xorshift128::seed(seed)),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_generation(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn load_state(&self) -> State {
        State::from_u8(self.state.0.load(Ordering::Acquire))
    }

    fn cas_state(&self, from: State, to: State) -> bool {
        self.state
            .0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// LIVING -> CLAIMED / LIVING -> TLR_CLAIMED.
    pub(crate) fn try_claim(&self, into_tlr: bool) -> bool {
        let to = if into_tlr { State::TlrClaimed } else { State::Claimed };
        self.cas_state(State::Living, to)
    }

    /// TLR_CLAIMED -> CLAIMED (another thread steals a TLR-cached slot).
    pub(crate) fn try_steal(&self) -> bool {
        self.cas_state(State::TlrClaimed, State::Claimed)
    }

    /// CLAIMED/TLR_CLAIMED -> LIVING (normal release) via CAS. Used for the
    /// TLR exit specifically because a concurrent steal can make this fail;
    /// `release_claimed` below is the non-racing CLAIMED exit.
    pub(crate) fn try_release_tlr_to_living(&self) -> bool {
        self.cas_state(State::TlrClaimed, State::Living)
    }

    pub(crate) fn try_release_tlr_to_dead(&self) -> bool {
        self.cas_state(State::TlrClaimed, State::Dead)
    }

    /// CLAIMED -> LIVING/DEAD. No CAS race is possible here: only the
    /// thread holding CLAIMED can be releasing it.
    pub(crate) fn release_claimed(&self, to_dead: bool) {
        let to = if to_dead { State::Dead } else { State::Living };
        self.state.0.store(to as u8, Ordering::Release);
    }

    /// Unconditional store to DEAD. Used by whichever exclusive owner has
    /// already established (via a prior successful CAS or channel pop)
    /// that no other thread can be touching this slot: a claimer retiring
    /// a poisoned/expired CLAIMED slot, or the allocator retiring a LIVING
    /// slot it just pulled off the live channel during shutdown drain.
    pub(crate) fn force_dead(&self) {
        self.state.0.store(State::Dead as u8, Ordering::Release);
    }

    /// LIVING -> DEAD, proactive eviction by the allocator during shrink.
    pub(crate) fn try_evict_living(&self) -> bool {
        self.cas_state(State::Living, State::Dead)
    }

    /// DEAD -> LIVING, publishing a freshly (re)allocated slot.
    pub(crate) fn publish(&self) {
        self.state.0.store(State::Living as u8, Ordering::Release);
    }

    // -- fields touched only by the current owner --

    /// # Safety
    /// Caller must currently own the slot (hold `Claimed`/`TlrClaimed`, or
    /// be the allocator with the slot `Dead`).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn object_mut(&self) -> &mut Option<T> {
        &mut *self.object.get()
    }

    /// # Safety: see [`Slot::object_mut`].
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn poison_mut(&self) -> &mut Option<Poison> {
        &mut *self.poison.get()
    }

    /// # Safety: see [`Slot::object_mut`].
    pub(crate) unsafe fn created_at(&self) -> Instant {
        *self.created_at.get()
    }

    /// # Safety: see [`Slot::object_mut`].
    pub(crate) unsafe fn set_created_at(&self, at: Instant) {
        *self.created_at.get() = at;
    }

    pub(crate) fn claim_count(&self) -> u64 {
        self.claim_count.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_claim_count(&self) {
        self.claim_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset_claim_count(&self) {
        self.claim_count.store(0, Ordering::Relaxed);
    }

    /// # Safety: see [`Slot::object_mut`].
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn stamp_mut(&self) -> &mut u64 {
        &mut *self.stamp.get()
    }

    /// # Safety: see [`Slot::object_mut`].
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn rng_mut(&self) -> &mut Xorshift128 {
        &mut *self.rng.get()
    }
}
