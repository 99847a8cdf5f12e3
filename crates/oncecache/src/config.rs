//! Configuration of binaries embedding the fetcher, read from YAML.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// How log lines are rendered.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `pretty` on a terminal, `simplified` otherwise.
    Auto,
    Pretty,
    /// Single lines without colors.
    Simplified,
    /// One JSON object per line, including the `fetch` span with fetcher name and key.
    Json,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Applies to our own crates; dependencies never log below `info` unless `RUST_LOG` says so.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    pub format: LogFormat,
    /// Forces `RUST_BACKTRACE` on, so panicking producers are reported with a backtrace.
    pub enable_backtraces: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Where the `fetch.*` metrics go.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// `host:port` of a statsd server. Defaults to the `STATSD_SERVER` environment variable.
    ///
    /// Metrics are not emitted at all without one.
    pub statsd: Option<String>,
    pub prefix: String,
    /// Tags added to every metric, next to the `fetcher` tag.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "oncecache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Settings of the in-memory [`MemoryStore`](crate::MemoryStore).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of entries held at once.
    pub capacity: u64,
    /// Expiry applied to entries written with [`Ttl::Default`](crate::Ttl::Default).
    ///
    /// `None` keeps such entries until they are evicted for capacity.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            default_ttl: Some(Duration::from_secs(300)),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub store: StoreConfig,
    /// Panicking producers are reported here.
    pub sentry_dsn: Option<Dsn>,
}

impl Config {
    /// Loads the configuration from a YAML file, or the defaults without one.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&yaml)
    }

    fn from_yaml(yaml: &str) -> Result<Self> {
        // serde_yaml would happily turn an empty document into the defaults
        anyhow::ensure!(!yaml.trim().is_empty(), "config file is empty");
        serde_yaml::from_str(yaml).context("failed to parse config YAML")
    }
}

/// Parses a level name such as `"debug"`, case-insensitively.
fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    let level = String::deserialize(deserializer)?;
    level.parse().map_err(|_| {
        de::Error::unknown_variant(&level, &["off", "error", "warn", "info", "debug", "trace"])
    })
}
