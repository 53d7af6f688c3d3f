//! A generic, bounded, thread-safe object pool for reusable,
//! expensive-to-construct resources: database connections, sockets, large
//! buffers.
//!
//! Client threads [`Pool::claim`] an object, use it, and release it (either
//! explicitly via [`PooledObject::release`] or implicitly by dropping the
//! handle). A dedicated background allocator thread performs all
//! construction, destruction, and reconstruction off the claim/release hot
//! path, so a successful `claim` on an already-live slot never pays
//! construction cost.
//!
//! # Example
//!
//! ```
//! use std::num::NonZeroUsize;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use slotpool::{Allocator, PoolConfig, SlotInfo};
//!
//! struct Connection(u64);
//!
//! struct Connect;
//! impl Allocator<Connection> for Connect {
//!     fn allocate(&self, slot: &SlotInfo) -> Result<Connection, slotpool::AllocError> {
//!         Ok(Connection(slot.generation()))
//!     }
//!     fn deallocate(&self, _conn: Connection) {}
//! }
//!
//! let pool = PoolConfig::new()
//!     .size(NonZeroUsize::new(4).expect("4 is nonzero"))
//!     .allocator(Arc::new(Connect))
//!     .build()
//!     .expect("pool must build");
//!
//! let conn = pool.claim(Duration::from_secs(1)).expect("claim must succeed");
//! assert_eq!(conn.0, 0);
//! drop(conn);
//! ```
//!
//! # Design
//!
//! - [`slot`]: the per-slot state machine and metadata container.
//! - [`tlr`]: the thread-local-reuse fast path.
//! - [`allocator`]: the background allocator/reaper loop.
//! - [`expiration`]: the expiration predicate and its time-spread default.
//! - [`pool`]: the claim engine and the resize/shutdown controllers tying
//!   everything together.
//! - [`bytepool`]: a `Pool<Vec<u8>>` specialization with zero-copy
//!   `bytes::Bytes` handoff, for the "large buffers" use case named
//!   alongside connections and sockets.
//!
//! Pool identity/selection is explicitly out of scope: any live object
//! handed out by [`Pool::claim`] is interchangeable with any other. The pool
//! is not fair: when multiple threads are waiting for depletion to clear,
//! wakeup order is unspecified.

mod allocator;
pub mod bytepool;
mod completion;
pub mod config;
pub mod error;
pub mod expiration;
pub mod factory;
mod pool;
mod rng;
mod slot;
mod tlr;

pub use bytepool::{BytePool, PooledBuffer};
pub use completion::Completion;
pub use config::{BackgroundScheduler, PoolConfig};
pub use error::{AllocError, PoolError};
pub use expiration::{Expiration, NeverExpire, SlotMeta, TimeSpreadExpiration};
pub use factory::{Allocator, ClosureAllocator, SlotInfo};
pub use pool::{Pool, PooledObject};
pub use rng::Xorshift128;
