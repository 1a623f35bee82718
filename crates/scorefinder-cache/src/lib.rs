//! In-memory caching primitives for Score Finder.
//!
//! The central type is the [`Fetcher`], which sits in front of an arbitrary asynchronous
//! "data-fetch operation" and provides two things:
//!
//! - A time-expiring [`ResultCache`] keyed by [`CacheKey`], optionally bounded in size with
//!   insertion-order eviction.
//! - Request coalescing: concurrent fetches for the same key share one execution of the
//!   underlying operation, and all of them observe the same outcome.
//!
//! The same type serves both deployment flavors. On the server it is created once per process
//! and shared by all request handlers. On the client it additionally supports cancellation of
//! superseded requests, and is usually driven through a [`Debouncer`].
//!
//! Failures are never cached. A failed or cancelled computation is removed from the pending
//! registry so that the next call for the same key starts from scratch.

#![warn(missing_docs)]

#[macro_use]
pub mod metrics;

mod config;
mod debounce;
mod error;
mod fetcher;
mod key;
mod store;
mod utils;

pub use config::FetcherConfig;
pub use debounce::{DebounceConfig, Debouncer, QuerySource, Suggestions};
pub use error::FetchError;
pub use fetcher::{Fetcher, WarmEntry, WarmReport};
pub use key::{CacheKey, CacheKeyBuilder};
pub use store::{CacheEntry, ResultCache};
pub use tokio_util::sync::CancellationToken;
