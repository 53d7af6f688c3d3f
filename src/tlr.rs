//! Thread-local reuse (TLR) cache.
//!
//! Each thread remembers, per pool, the last slot it released, so a thread
//! that claims and releases in a tight loop against one pool never touches
//! the live channel at all. Keyed by the pool's globally-unique id rather
//! than by any pointer, so a dropped pool's stale entries are simply never
//! looked up again (no weak references, no enumerating live threads).

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Hand out a fresh id for a newly constructed pool. Never reused for the
/// lifetime of the process, so TLR entries referencing a dropped pool's id
/// simply never match a live pool again.
pub(crate) fn next_pool_id() -> u64 {
    NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    static TLR: RefCell<HashMap<u64, usize>> = RefCell::new(HashMap::new());
}

/// Read this thread's cached slot index for `pool_id`, if any.
pub(crate) fn get(pool_id: u64) -> Option<usize> {
    TLR.with(|cache| cache.borrow().get(&pool_id).copied())
}

/// Record this thread's cached slot index for `pool_id`.
pub(crate) fn set(pool_id: u64, index: usize) {
    TLR.with(|cache| {
        cache.borrow_mut().insert(pool_id, index);
    });
}

/// Remove this thread's cached entry for `pool_id`, if it currently points
/// at `index`. Used when the cached slot is found poisoned, expired, or
/// otherwise must not be handed out via the fast path again.
pub(crate) fn clear_if(pool_id: u64, index: usize) {
    TLR.with(|cache| {
        let mut cache = cache.borrow_mut();
        if cache.get(&pool_id) == Some(&index) {
            cache.remove(&pool_id);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear_roundtrip() {
        let id = next_pool_id();
        assert_eq!(get(id), None);
        set(id, 7);
        assert_eq!(get(id), Some(7));
        clear_if(id, 8);
        assert_eq!(get(id), Some(7), "clear_if must not remove a mismatched index");
        clear_if(id, 7);
        assert_eq!(get(id), None);
    }

    #[test]
    fn pool_ids_are_unique() {
        let a = next_pool_id();
        let b = next_pool_id();
        assert_ne!(a, b);
    }
}
