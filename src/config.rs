//! Pool configuration.

use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::error::PoolError;
use crate::expiration::{Expiration, TimeSpreadExpiration};
use crate::factory::Allocator;

/// Where the allocator loop's background worker runs.
#[derive(Clone)]
pub enum BackgroundScheduler {
    /// Spawn a dedicated `std::thread`, named via
    /// [`PoolConfig::allocator_thread_name`]. The default.
    DedicatedThread,
    /// Run the allocator loop on `tokio::task::spawn_blocking` instead of
    /// managing a bare OS thread. Requires the `tokio-scheduler` feature
    /// and an active Tokio runtime at pool construction time.
    #[cfg(feature = "tokio-scheduler")]
    TokioBlocking(tokio::runtime::Handle),
}

impl Default for BackgroundScheduler {
    fn default() -> Self {
        BackgroundScheduler::DedicatedThread
    }
}

/// Builder for a [`crate::Pool`]'s tunables.
///
/// `allocator` has no default and must be supplied before [`PoolConfig::build`]
/// is called; every other field has a production-sane default.
pub struct PoolConfig<T> {
    pub(crate) size: NonZeroUsize,
    pub(crate) max_size: Option<NonZeroUsize>,
    pub(crate) allocator: Option<Arc<dyn Allocator<T>>>,
    pub(crate) expiration: Arc<dyn Expiration<T>>,
    pub(crate) allocator_thread_name: String,
    pub(crate) background_scheduler: BackgroundScheduler,
}

impl<T: 'static> Default for PoolConfig<T> {
    fn default() -> Self {
        Self {
            size: NonZeroUsize::new(10).unwrap_or(NonZeroUsize::MIN),
            max_size: None,
            allocator: None,
            expiration: Arc::new(TimeSpreadExpiration::default()),
            allocator_thread_name: "pool-allocator".to_string(),
            background_scheduler: BackgroundScheduler::default(),
        }
    }
}

impl<T: 'static> PoolConfig<T> {
    /// Start building a config with every default tunable and no allocator
    /// set yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool's initial target size. `NonZeroUsize` rules out the
    /// `size < 1` structural failure at compile time rather than at
    /// construction.
    #[must_use]
    pub fn size(mut self, size: NonZeroUsize) -> Self {
        self.size = size;
        self
    }

    /// Set the arena's fixed maximum capacity, the highest value
    /// `set_target_size` will ever be allowed to reach. Defaults to
    /// `max(size * 4, size + 16)` if left unset.
    #[must_use]
    pub fn max_size(mut self, max_size: NonZeroUsize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Supply the object factory. Required; [`PoolConfig::build`] returns
    /// [`PoolError::Structural`] if this was never called.
    #[must_use]
    pub fn allocator(mut self, allocator: Arc<dyn Allocator<T>>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Supply the expiration predicate. Defaults to
    /// [`TimeSpreadExpiration`] with an 8–10 minute window.
    #[must_use]
    pub fn expiration(mut self, expiration: Arc<dyn Expiration<T>>) -> Self {
        self.expiration = expiration;
        self
    }

    /// Cosmetic name given to the allocator's dedicated OS thread (ignored
    /// under the `tokio-scheduler` feature's background scheduler, where
    /// spawned tasks are unnamed).
    #[must_use]
    pub fn allocator_thread_name(mut self, name: impl Into<String>) -> Self {
        self.allocator_thread_name = name.into();
        self
    }

    /// Choose where the allocator loop runs.
    #[must_use]
    pub fn background_scheduler(mut self, scheduler: BackgroundScheduler) -> Self {
        self.background_scheduler = scheduler;
        self
    }

    pub(crate) fn resolved_max_size(&self) -> NonZeroUsize {
        self.max_size.unwrap_or_else(|| {
            let size = self.size.get();
            NonZeroUsize::new((size * 4).max(size + 16)).unwrap_or(NonZeroUsize::MIN)
        })
    }

    pub(crate) fn take_allocator(&mut self) -> Result<Arc<dyn Allocator<T>>, PoolError> {
        self.allocator
            .take()
            .ok_or(PoolError::Structural("PoolConfig::allocator must be set before build()"))
    }
}
