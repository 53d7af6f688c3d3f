//! Integration tests mirroring the pool's documented concurrency scenarios
//! and invariants: bounded capacity, no double-claim, release visibility,
//! proactive reallocation after transient factory failures, expiration-
//! driven slot rotation, shutdown idempotence, and resize convergence.
//!
//! These run against real OS threads rather than a property-testing
//! harness. This crate's dependency set has no `proptest`/`loom`, and a
//! hand-rolled stress loop is the pattern used for these invariants
//! elsewhere in this codebase.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use slotpool::{
    Allocator, AllocError, ClosureAllocator, Expiration, NeverExpire, Pool, PoolConfig, PoolError,
    SlotInfo, SlotMeta,
};

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).expect("test size must be nonzero")
}

fn trivial_allocator() -> ClosureAllocator<impl Fn(&SlotInfo) -> Result<u64, AllocError>, impl Fn(u64)> {
    ClosureAllocator::new(|_slot: &SlotInfo| Ok::<_, AllocError>(0u64), |_obj: u64| {})
}

/// S1: size=1 pool, two threads race for the single slot; both must
/// eventually succeed and the factory is only ever invoked once.
#[test]
fn s1_two_threads_share_one_slot() {
    let allocations = Arc::new(AtomicUsize::new(0));
    let allocations_clone = Arc::clone(&allocations);
    let allocator = ClosureAllocator::new(
        move |_slot: &SlotInfo| {
            allocations_clone.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AllocError>("A".to_string())
        },
        |_obj: String| {},
    );
    let pool: Arc<Pool<String>> = Arc::new(
        PoolConfig::new()
            .size(nz(1))
            .allocator(Arc::new(allocator))
            .expiration(Arc::new(NeverExpire))
            .build()
            .expect("pool must build"),
    );

    let barrier = Arc::new(Barrier::new(2));
    let start = Instant::now();
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let obj = pool.claim(Duration::from_secs(1)).expect("claim must succeed");
                assert_eq!(*obj, "A");
                thread::sleep(Duration::from_millis(100));
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("claimer thread must not panic");
    }
    let elapsed = start.elapsed();

    assert_eq!(allocations.load(Ordering::SeqCst), 1, "only one allocation should ever be observed");
    assert!(elapsed >= Duration::from_millis(180), "the two claims must serialize on the single slot");
    assert!(elapsed < Duration::from_secs(1), "both claims together must finish well inside the timeout");
}

/// S2: size=3, the factory fails the first two `allocate` calls with an
/// "net" error then succeeds. A single-thread claim/release loop sees the
/// failure captured as `Poisoned` exactly twice before a claim succeeds.
#[test]
fn s2_proactive_reallocation_after_transient_failures() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = Arc::clone(&attempts);
    let allocator = ClosureAllocator::new(
        move |_slot: &SlotInfo| {
            let n = attempts_clone.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err::<u64, AllocError>(Box::<dyn std::error::Error + Send + Sync>::from("net"))
            } else {
                Ok(n as u64)
            }
        },
        |_obj: u64| {},
    );
    let pool: Pool<u64> = PoolConfig::new()
        .size(nz(3))
        .allocator(Arc::new(allocator))
        .expiration(Arc::new(NeverExpire))
        .build()
        .expect("pool must build");

    let mut poisoned = 0;
    let mut succeeded = false;
    for _ in 0..5 {
        match pool.claim(Duration::from_secs(2)) {
            Err(PoolError::Poisoned(cause)) => {
                assert!(cause.to_string().contains("net"));
                poisoned += 1;
            }
            Ok(obj) => {
                succeeded = true;
                drop(obj);
                break;
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(poisoned, 2, "exactly the first two claims must surface the captured failure");
    assert!(succeeded, "a claim must eventually succeed once the factory recovers");
}

/// S3: size=5, 8 threads hammer claim/release; at no point may more than 5
/// objects be simultaneously outstanding.
#[test]
fn s3_bounded_concurrency_under_contention() {
    let pool: Arc<Pool<u64>> = Arc::new(
        PoolConfig::new()
            .size(nz(5))
            .allocator(Arc::new(trivial_allocator()))
            .expiration(Arc::new(NeverExpire))
            .build()
            .expect("pool must build"),
    );

    let concurrent = Arc::new(AtomicUsize::new(0));
    let max_concurrent = Arc::new(AtomicUsize::new(0));
    let total_claims = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let concurrent = Arc::clone(&concurrent);
            let max_concurrent = Arc::clone(&max_concurrent);
            let total_claims = Arc::clone(&total_claims);
            thread::spawn(move || {
                for _ in 0..300 {
                    let obj = pool.claim(Duration::from_secs(2)).expect("claim must succeed");
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(now, Ordering::SeqCst);
                    total_claims.fetch_add(1, Ordering::SeqCst);
                    thread::yield_now();
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                    drop(obj);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("claimer thread must not panic");
    }

    assert_eq!(total_claims.load(Ordering::SeqCst), 8 * 300);
    assert!(max_concurrent.load(Ordering::SeqCst) <= 5, "at most 5 slots may be claimed at once");
}

/// S4: an expiration predicate that retires a slot after its first
/// successful use forces sequential claims to rotate across slots and
/// triggers reallocation, rather than getting stuck on one object forever.
#[test]
fn s4_expire_after_first_use_rotates_slots() {
    struct ExpireAfterOneClaim;
    impl Expiration<u64> for ExpireAfterOneClaim {
        fn has_expired(&self, meta: &mut SlotMeta<'_>) -> bool {
            meta.claim_count() >= 1
        }
    }

    let allocations = Arc::new(AtomicUsize::new(0));
    let allocations_clone = Arc::clone(&allocations);
    let allocator = ClosureAllocator::new(
        move |_slot: &SlotInfo| Ok::<_, AllocError>(allocations_clone.fetch_add(1, Ordering::SeqCst) as u64),
        |_obj: u64| {},
    );
    let pool: Pool<u64> = PoolConfig::new()
        .size(nz(2))
        .allocator(Arc::new(allocator))
        .expiration(Arc::new(ExpireAfterOneClaim))
        .build()
        .expect("pool must build");

    let mut seen_slots = Vec::new();
    for _ in 0..3 {
        let obj = pool.claim(Duration::from_secs(2)).expect("claim must succeed");
        seen_slots.push(obj.slot_index());
        drop(obj);
    }

    assert_ne!(seen_slots[0], seen_slots[1], "the first two claims must land on different slots");
    assert!(
        allocations.load(Ordering::SeqCst) >= 3,
        "each claim after a slot's first use must force a reallocation"
    );
}

/// S5: shutdown does not complete while a claim is outstanding, completes
/// once every claim is released, and every claim after that fails.
#[test]
fn s5_shutdown_waits_for_outstanding_claims() {
    let pool: Pool<u64> = PoolConfig::new()
        .size(nz(4))
        .allocator(Arc::new(trivial_allocator()))
        .expiration(Arc::new(NeverExpire))
        .build()
        .expect("pool must build");

    let held: Vec<_> = (0..4)
        .map(|_| pool.claim(Duration::from_secs(2)).expect("claim must succeed"))
        .collect();

    let completion = pool.shutdown();
    assert!(!completion.await_termination(Duration::from_millis(100)));

    drop(held);
    assert!(completion.await_termination(Duration::from_secs(2)));

    let result = pool.claim(Duration::from_millis(100));
    assert!(matches!(result, Err(PoolError::Shutdown)));
}

/// S6: `set_target_size` grows a quiescent pool to the new target in
/// finite time, and the new target remains the concurrent-claim cap.
#[test]
fn s6_resize_grows_to_new_target() {
    let pool: Arc<Pool<u64>> = Arc::new(
        PoolConfig::new()
            .size(nz(2))
            .allocator(Arc::new(trivial_allocator()))
            .expiration(Arc::new(NeverExpire))
            .build()
            .expect("pool must build"),
    );

    pool.set_target_size(nz(10));
    assert_eq!(pool.target_size(), 10);

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut held = Vec::new();
    while held.len() < 10 && Instant::now() < deadline {
        if let Ok(obj) = pool.claim(Duration::from_millis(50)) {
            held.push(obj);
        }
    }
    assert_eq!(held.len(), 10, "pool must converge to 10 live slots in finite time");

    let overflow = pool.claim(Duration::from_millis(100));
    assert!(matches!(overflow, Err(PoolError::Timeout(_))), "target size caps concurrent claims at 10");
}

/// Writes made to an object before release must be visible to whichever
/// thread claims that slot next, the pool's principal memory-ordering
/// contract to callers.
#[test]
fn release_visibility_across_claims() {
    let pool: Pool<Vec<u32>> = PoolConfig::new()
        .size(nz(1))
        .allocator(Arc::new(ClosureAllocator::new(
            |_slot: &SlotInfo| Ok::<_, AllocError>(Vec::new()),
            |_obj: Vec<u32>| {},
        )))
        .expiration(Arc::new(NeverExpire))
        .build()
        .expect("pool must build");

    {
        let mut obj = pool.claim(Duration::from_secs(1)).expect("claim must succeed");
        obj.push(42);
    }
    let obj = pool.claim(Duration::from_secs(1)).expect("claim must succeed");
    assert_eq!(*obj, vec![42], "writes made before release must be visible to the next claim");
}

/// `shutdown()` called from multiple points on the same pool is
/// idempotent: every returned completion handle reports the same outcome.
#[test]
fn shutdown_is_idempotent_across_callers() {
    let pool: Pool<u64> = PoolConfig::new()
        .size(nz(1))
        .allocator(Arc::new(trivial_allocator()))
        .expiration(Arc::new(NeverExpire))
        .build()
        .expect("pool must build");

    let held = pool.claim(Duration::from_secs(1)).expect("claim must succeed");
    let completions: Vec<_> = (0..3).map(|_| pool.shutdown()).collect();
    for completion in &completions {
        assert!(!completion.await_termination(Duration::from_millis(50)));
    }
    drop(held);
    for completion in &completions {
        assert!(completion.await_termination(Duration::from_secs(2)));
    }
}

/// Stress test for the no-double-claim invariant: across many threads and
/// iterations, no two claim handles ever observe the same slot at once.
#[test]
fn stress_no_double_claim() {
    let pool: Arc<Pool<u64>> = Arc::new(
        PoolConfig::new()
            .size(nz(5))
            .allocator(Arc::new(trivial_allocator()))
            .expiration(Arc::new(NeverExpire))
            .build()
            .expect("pool must build"),
    );

    let held_by: Arc<Vec<AtomicUsize>> =
        Arc::new((0..pool.max_size()).map(|_| AtomicUsize::new(0)).collect());

    let handles: Vec<_> = (0..16)
        .map(|thread_id| {
            let pool = Arc::clone(&pool);
            let held_by = Arc::clone(&held_by);
            thread::spawn(move || {
                for _ in 0..300 {
                    let obj = pool.claim(Duration::from_secs(2)).expect("claim must succeed");
                    let index = obj.slot_index();
                    let prev = held_by[index].swap(thread_id + 1, Ordering::SeqCst);
                    assert_eq!(prev, 0, "slot {index} was claimed twice simultaneously");
                    thread::yield_now();
                    held_by[index].store(0, Ordering::SeqCst);
                    drop(obj);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("claimer thread must not panic");
    }
}
