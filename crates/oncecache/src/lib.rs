//! A request-coalescing cache-fill layer.
//!
//! [`CoalescingFetcher`] looks values up in a [`CacheStore`] and, on a miss, runs the supplied
//! producer at most once per key no matter how many callers are asking concurrently. The produced
//! value is written through to the store before any of the coalesced callers are released.

#[macro_use]
pub mod metrics;

mod computations;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod handler;
pub mod logging;
pub mod memory;
pub mod store;

pub use error::{BoxError, FetchError, LoadError};
pub use fetcher::{CoalescingFetcher, Fetch};
pub use handler::{ErrorHandler, IgnoreErrors, LogErrors};
pub use memory::MemoryStore;
pub use store::{CacheStore, Ttl};
