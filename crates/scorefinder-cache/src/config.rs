use std::time::Duration;

use serde::Deserialize;

/// Configuration of a single [`Fetcher`](crate::Fetcher) instance.
///
/// The server and the client run differently configured instances of the same type: the
/// server bounds its cache and never cancels, while the client typically runs unbounded but
/// supports cancellation of superseded requests.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FetcherConfig {
    /// The name of the cache, used in logs and as a metrics tag.
    pub name: String,

    /// Time-to-live for entries that are stored without an explicit TTL.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Maximum number of entries. `None` means unbounded.
    pub max_size: Option<usize>,

    /// Whether concurrent fetches for the same key share one computation.
    pub deduplicate: bool,

    /// Whether fetches may be cancelled via a [`CancellationToken`](crate::CancellationToken).
    pub supports_cancellation: bool,

    /// Gives up on operations that take longer than this.
    ///
    /// `None` waits indefinitely, in which case a hung operation keeps every caller for the
    /// same key waiting as well.
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Option<Duration>,
}

impl FetcherConfig {
    /// The default configuration of server-side fetchers.
    pub fn server() -> Self {
        Self {
            name: "server".into(),
            max_size: Some(1000),
            ..Default::default()
        }
    }

    /// The default configuration of client-side fetchers.
    pub fn client() -> Self {
        Self {
            name: "client".into(),
            supports_cancellation: true,
            ..Default::default()
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            default_ttl: Duration::from_secs(5 * 60),
            max_size: None,
            deduplicate: true,
            supports_cancellation: false,
            operation_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
            name: search
            default_ttl: 2m
            max_size: 10
        "#;
        let config: FetcherConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.default_ttl, Duration::from_secs(120));
        assert_eq!(config.max_size, Some(10));
        assert!(config.deduplicate);
        assert_eq!(config.operation_timeout, None);
    }

    #[test]
    fn test_timeout_yaml() {
        let yaml = r#"
            operation_timeout: 30s
            supports_cancellation: true
        "#;
        let config: FetcherConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.operation_timeout, Some(Duration::from_secs(30)));
        assert!(config.supports_cancellation);
        assert_eq!(config.name, "default");
    }
}
