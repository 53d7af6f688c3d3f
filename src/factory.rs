//! The object factory trait, the only collaborator the pool needs in order
//! to create, destroy, and (optionally) recreate the resources it manages.

use crate::error::AllocError;

/// Identifies the slot a factory call is being made for.
///
/// Carries only the slot's index and how many times it has previously been
/// allocated, enough for a factory to log or to pick a round-robin target
/// (e.g. connecting to one of several upstream hosts) without exposing any
/// pool-internal state.
#[derive(Debug, Clone, Copy)]
pub struct SlotInfo {
    index: usize,
    generation: u64,
}

impl SlotInfo {
    pub(crate) fn new(index: usize, generation: u64) -> Self {
        Self { index, generation }
    }

    /// The slot's stable index within the pool's arena.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// How many times this slot has been (re)allocated before this call,
    /// including failed attempts.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Creates, destroys, and recreates the resource a [`crate::Pool`] manages.
///
/// Implementations never see slot state directly; the pool calls `allocate`
/// only on slots it has already committed to publishing, and `deallocate`
/// only on objects no thread can reach anymore. Both are called exclusively
/// from the pool's background allocator thread, never from a claimer.
pub trait Allocator<T>: Send + Sync {
    /// Construct a new instance of the pooled resource.
    ///
    /// Fallible: a returned error is captured as the slot's poison and
    /// surfaced to whichever thread next claims it, rather than propagated
    /// on the allocator thread. See the crate's error-handling policy.
    fn allocate(&self, slot: &SlotInfo) -> Result<T, AllocError>;

    /// Tear down an instance that will never be used again.
    ///
    /// Called for objects evicted by shrink, by shutdown, or replaced
    /// during reallocation. Must not panic; a destructor that can fail
    /// should log and swallow the error, since there is no further
    /// opportunity to report it.
    fn deallocate(&self, object: T);

    /// Replace a slot's object, optionally reusing resources from the old
    /// one (e.g. keeping a connection's buffer, issuing a cheaper "reset"
    /// command instead of a fresh handshake).
    ///
    /// The default implementation just deallocates then allocates; override
    /// only when recreation is meaningfully cheaper than full reconstruction.
    fn reallocate(&self, slot: &SlotInfo, old: T) -> Result<T, AllocError> {
        self.deallocate(old);
        self.allocate(slot)
    }
}

/// Wraps a pair of plain closures as an [`Allocator`], for callers whose
/// factory has no state worth a named type.
pub struct ClosureAllocator<A, D> {
    allocate: A,
    deallocate: D,
}

impl<T, A, D> ClosureAllocator<A, D>
where
    A: Fn(&SlotInfo) -> Result<T, AllocError> + Send + Sync,
    D: Fn(T) + Send + Sync,
{
    /// Build an allocator from an `allocate` closure and a `deallocate`
    /// closure. `reallocate` falls back to the default deallocate-then-
    /// allocate sequence.
    pub fn new(allocate: A, deallocate: D) -> Self {
        Self { allocate, deallocate }
    }
}

impl<T, A, D> Allocator<T> for ClosureAllocator<A, D>
where
    A: Fn(&SlotInfo) -> Result<T, AllocError> + Send + Sync,
    D: Fn(T) + Send + Sync,
{
    fn allocate(&self, slot: &SlotInfo) -> Result<T, AllocError> {
        (self.allocate)(slot)
    }

    fn deallocate(&self, object: T) {
        (self.deallocate)(object);
    }
}
