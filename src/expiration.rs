//! The expiration predicate and its default time-spread implementation.

use std::time::{Duration, Instant};

use crate::rng::Xorshift128;

/// The metadata view an [`Expiration`] predicate is evaluated against.
///
/// Borrowed from the claimed slot for the duration of one `has_expired`
/// call; `stamp` and the PRNG are mutable scratch the predicate owns
/// entirely (the pool never reads `stamp` itself).
pub struct SlotMeta<'a> {
    created_at: Instant,
    claim_count: u64,
    stamp: &'a mut u64,
    rng: &'a mut Xorshift128,
}

impl<'a> SlotMeta<'a> {
    pub(crate) fn new(
        created_at: Instant,
        claim_count: u64,
        stamp: &'a mut u64,
        rng: &'a mut Xorshift128,
    ) -> Self {
        Self { created_at, claim_count, stamp, rng }
    }

    /// When the current object was last (re)allocated.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// How long ago the current object was (re)allocated.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Total successful claims over this slot's lifetime since its last
    /// (re)allocation.
    #[must_use]
    pub fn claim_count(&self) -> u64 {
        self.claim_count
    }

    /// Opaque scratch value the predicate may read and write freely across
    /// calls; reset to `0` whenever the slot is (re)allocated.
    #[must_use]
    pub fn stamp(&self) -> u64 {
        *self.stamp
    }

    /// Overwrite the scratch value.
    pub fn set_stamp(&mut self, value: u64) {
        *self.stamp = value;
    }

    /// The slot's own PRNG, for jittering thresholds without contending on
    /// a pool-wide generator.
    pub fn rng(&mut self) -> &mut Xorshift128 {
        self.rng
    }
}

/// User-supplied policy deciding when a slot's current object should be
/// retired and reallocated.
///
/// Called on every claim attempt (see the claim engine's algorithm), so
/// implementations must be cheap: no I/O, no blocking.
pub trait Expiration<T>: Send + Sync {
    /// Returns `true` if the slot's current object should be retired.
    fn has_expired(&self, meta: &mut SlotMeta<'_>) -> bool;
}

/// Default expiration policy: picks a random threshold uniformly within
/// `[lower, upper]` the first time a slot is evaluated, then compares age
/// against that threshold on every subsequent call.
///
/// De-synchronises end-of-life across the fleet of slots so a burst of
/// simultaneously-created slots doesn't later expire in the same instant
/// and cause a reallocation storm.
pub struct TimeSpreadExpiration {
    lower: Duration,
    upper: Duration,
}

impl TimeSpreadExpiration {
    /// Build a policy that expires slots after an age uniformly distributed
    /// in `[lower, upper]`. Swaps the bounds if given in the wrong order.
    #[must_use]
    pub fn new(lower: Duration, upper: Duration) -> Self {
        if lower <= upper {
            Self { lower, upper }
        } else {
            Self { lower: upper, upper: lower }
        }
    }
}

impl Default for TimeSpreadExpiration {
    fn default() -> Self {
        Self::new(Duration::from_secs(8 * 60), Duration::from_secs(10 * 60))
    }
}

/// `stamp == 0` means "no threshold chosen yet"; chosen thresholds are
/// stored as `nanos + 1` so a genuine zero-duration threshold never aliases
/// the sentinel.
const NO_THRESHOLD: u64 = 0;

impl<T> Expiration<T> for TimeSpreadExpiration {
    fn has_expired(&self, meta: &mut SlotMeta<'_>) -> bool {
        if meta.stamp() == NO_THRESHOLD {
            let span = self.upper.saturating_sub(self.lower).as_nanos().min(u128::from(u64::MAX - 1)) as u64;
            let offset = meta.rng().next_below(span.max(1));
            let threshold_nanos = self.lower.as_nanos() as u64 + offset;
            meta.set_stamp(threshold_nanos.saturating_add(1));
        }
        let threshold = Duration::from_nanos(meta.stamp() - 1);
        meta.age() >= threshold
    }
}

/// Expiration policy that never retires a slot on its own; only explicit
/// `PooledObject::expire` marks or shrink/shutdown retire it. Useful for
/// resources with no natural TTL.
pub struct NeverExpire;

impl<T> Expiration<T> for NeverExpire {
    fn has_expired(&self, _meta: &mut SlotMeta<'_>) -> bool {
        false
    }
}
