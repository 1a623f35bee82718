//! Client side of Score Finder.
//!
//! The [`ApiClient`] talks to the Score Finder HTTP API. The search form drives its
//! autocomplete inputs through an [`Autocomplete`], which debounces keystrokes, cancels
//! superseded requests and caches suggestions in a client-side [`Fetcher`].
//!
//! [`Fetcher`]: scorefinder_cache::Fetcher

mod api;
mod autocomplete;
mod response;

pub use api::{ApiClient, ClientError, QueryKind};
pub use autocomplete::{Autocomplete, AutocompleteConfig};
pub use response::{ApiResponse, Named, WrappedBody};
pub use scorefinder_cache::CancellationToken;
