//! A [`Pool<Vec<u8>>`](crate::Pool) specialization for byte-buffer reuse,
//! integrating with `bytes::Bytes` for a zero-copy handoff out of the pool.
//!
//! Supplemented from the teacher crate's original semaphore-only buffer
//! pool, which pre-dated the generic claim/release engine in [`crate::pool`]
//! and duplicated its own slot bookkeeping. This module owns none of that:
//! it is a thin convenience layer over [`crate::Pool`], not a second pool
//! implementation.

use std::num::NonZeroUsize;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::{AllocError, PoolError};
use crate::factory::{Allocator, SlotInfo};
use crate::pool::{Pool, PooledObject};
use crate::config::PoolConfig;

/// A pool specialized for reusable byte buffers.
pub type BytePool = Pool<Vec<u8>>;

/// A buffer claimed from a [`BytePool`].
pub type PooledBuffer = PooledObject<Vec<u8>>;

/// Allocates fixed-capacity, zero-filled buffers; reallocation clears and
/// re-pads an existing buffer instead of reconstructing it from scratch.
pub struct FixedCapacityAllocator {
    capacity: usize,
}

impl FixedCapacityAllocator {
    /// Every buffer this allocator produces has exactly `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }
}

impl Allocator<Vec<u8>> for FixedCapacityAllocator {
    fn allocate(&self, _slot: &SlotInfo) -> Result<Vec<u8>, AllocError> {
        Ok(vec![0u8; self.capacity])
    }

    fn deallocate(&self, _object: Vec<u8>) {}

    fn reallocate(&self, _slot: &SlotInfo, mut old: Vec<u8>) -> Result<Vec<u8>, AllocError> {
        old.clear();
        old.resize(self.capacity, 0);
        Ok(old)
    }
}

/// Build a [`BytePool`] of `size` buffers, each `capacity` bytes, using the
/// default [`PoolConfig`] tunables for everything else.
///
/// # Errors
/// Propagates [`PoolError`] from [`PoolConfig::build`].
pub fn byte_pool(size: NonZeroUsize, capacity: usize) -> Result<BytePool, PoolError> {
    PoolConfig::new()
        .size(size)
        .allocator(Arc::new(FixedCapacityAllocator::new(capacity)))
        .build()
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self.deref().as_slice()
    }
}

/// Extension trait adding a zero-copy conversion out of the pool.
pub trait FreezeExt {
    /// Consume the claim and hand the underlying bytes to a [`bytes::Bytes`]
    /// whose `Drop` releases the slot back through the pool's ordinary
    /// claim/release state machine. No separate reference count or buffer
    /// copy is introduced.
    fn freeze(self) -> bytes::Bytes;
}

impl FreezeExt for PooledBuffer {
    fn freeze(self) -> bytes::Bytes {
        bytes::Bytes::from_owner(self)
    }
}
