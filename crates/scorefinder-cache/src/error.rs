use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// An error that happens while fetching a value through the [`Fetcher`](crate::Fetcher).
///
/// The error is cheaply clonable, as the very same error is handed out to every caller that
/// was waiting on a shared computation.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The operation itself failed.
    ///
    /// The attached error is the one returned by the operation, unchanged.
    #[error("{0:#}")]
    Upstream(Arc<anyhow::Error>),
    /// The operation did not finish within the configured operation timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    /// The request was superseded or abandoned.
    ///
    /// This is not a real failure and should not be surfaced to users.
    #[error("request cancelled")]
    Cancelled,
    /// The computation went away without producing a result, for example because it panicked.
    #[error("computation dropped")]
    Dropped,
}

impl FetchError {
    /// Whether this error only signals a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the underlying operation error, if this is an upstream failure.
    pub fn upstream(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Upstream(err) => Some(err),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for FetchError {
    fn from(err: anyhow::Error) -> Self {
        Self::Upstream(Arc::new(err))
    }
}
