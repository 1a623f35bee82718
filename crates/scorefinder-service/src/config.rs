use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use scorefinder_cache::FetcherConfig;
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level of the server.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "scorefinder".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Time-to-live of the results of the individual queries.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Ttls {
    /// Competitor autocomplete results.
    #[serde(with = "humantime_serde")]
    pub competitors: Duration,
    /// Filtered score searches.
    #[serde(with = "humantime_serde")]
    pub search: Duration,
    /// Filtered score searches that did not find anything.
    #[serde(with = "humantime_serde")]
    pub empty_search: Duration,
    /// The id to name maps of judges, styles and competitions.
    #[serde(with = "humantime_serde")]
    pub lookups: Duration,
    /// The ids of people matching a competitor name.
    #[serde(with = "humantime_serde")]
    pub person_ids: Duration,
    /// The competition history of a competitor.
    #[serde(with = "humantime_serde")]
    pub competition_history: Duration,
}

impl Default for Ttls {
    fn default() -> Self {
        const MINUTE: Duration = Duration::from_secs(60);
        Ttls {
            competitors: 10 * MINUTE,
            search: 2 * MINUTE,
            empty_search: 2 * MINUTE,
            lookups: 60 * MINUTE,
            person_ids: 10 * MINUTE,
            competition_history: 10 * MINUTE,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// The directory holding one JSON file per collection.
    pub data_dir: PathBuf,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// The shared query cache.
    ///
    /// Fields that are left out keep their [`FetcherConfig::server`] values.
    #[serde(deserialize_with = "deserialize_cache")]
    pub cache: FetcherConfig,

    /// Fine-tune how long query results are cached.
    pub ttls: Ttls,

    /// Whether the lookup maps are loaded into the cache on startup.
    pub warm_on_startup: bool,
}

/// Checks if we are running in docker.
fn is_docker() -> bool {
    if fs::metadata("/.dockerenv").is_ok() {
        return true;
    }

    fs::read_to_string("/proc/self/cgroup")
        .map(|s| s.contains("/docker"))
        .unwrap_or(false)
}

/// Default value for the "bind" configuration.
fn default_bind() -> String {
    if is_docker() {
        // Docker images rely on this service being exposed
        "0.0.0.0:3021".to_owned()
    } else {
        "127.0.0.1:3021".to_owned()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: default_bind(),
            data_dir: PathBuf::from("data"),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            cache: FetcherConfig::server(),
            ttls: Ttls::default(),
            warm_on_startup: true,
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    pub fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

/// The fields of a [`FetcherConfig`] that a config file sets explicitly.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CacheOverrides {
    name: Option<String>,
    #[serde(with = "humantime_serde")]
    default_ttl: Option<Duration>,
    #[serde(deserialize_with = "deserialize_present")]
    max_size: Option<Option<usize>>,
    deduplicate: Option<bool>,
    supports_cancellation: Option<bool>,
    #[serde(deserialize_with = "deserialize_present_duration")]
    operation_timeout: Option<Option<Duration>>,
}

/// Distinguishes an explicit `null` (`Some(None)`) from a missing field (`None`).
fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn deserialize_present_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Option<Duration>>, D::Error> {
    let timeout: Option<Duration> = humantime_serde::deserialize(deserializer)?;
    Ok(Some(timeout))
}

fn deserialize_cache<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<FetcherConfig, D::Error> {
    let overrides = Option::<CacheOverrides>::deserialize(deserializer)?.unwrap_or_default();
    let mut cache = FetcherConfig::server();
    if let Some(name) = overrides.name {
        cache.name = name;
    }
    if let Some(default_ttl) = overrides.default_ttl {
        cache.default_ttl = default_ttl;
    }
    if let Some(max_size) = overrides.max_size {
        cache.max_size = max_size;
    }
    if let Some(deduplicate) = overrides.deduplicate {
        cache.deduplicate = deduplicate;
    }
    if let Some(supports_cancellation) = overrides.supports_cancellation {
        cache.supports_cancellation = supports_cancellation;
    }
    if let Some(operation_timeout) = overrides.operation_timeout {
        cache.operation_timeout = operation_timeout;
    }
    Ok(cache)
}
