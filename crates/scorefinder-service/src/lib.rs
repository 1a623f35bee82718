//! The Score Finder query service.
//!
//! This crate holds everything the HTTP server needs apart from the HTTP layer itself: the
//! configuration file, logging setup, the document store, and the [`ScoreService`] that answers
//! queries through the shared cache.
//!
//! [`ScoreService`]: service::ScoreService

pub mod config;
pub mod logging;
pub mod lookups;
pub mod queries;
pub mod service;
pub mod store;
pub mod types;

pub use scorefinder_cache::metrics;
pub use scorefinder_cache::metric;
