use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub logging: LoggingConfig,
}

/// Node pool and topology discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Seed node addresses (`http://host:port` or bare `host:port`)
    pub seeds: Vec<String>,
    /// Per-call bound for every probe (dial + response)
    pub request_timeout_ms: u64,
    /// Delay between health watch passes
    pub watch_interval_ms: u64,
    /// Learn members from node topology responses
    pub discover: bool,
    /// Run the background health watch
    pub watch: bool,
    /// Accept a peer's gossip as proof of life when a probe times out.
    /// Disabled when unset.
    pub gossip_max_age_secs: Option<u64>,
    /// How `NodePool::active_node` picks among active nodes
    pub selection: SelectionStrategy,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            request_timeout_ms: 5_000,
            watch_interval_ms: 30_000,
            discover: true,
            watch: true,
            gossip_max_age_secs: None,
            selection: SelectionStrategy::default(),
        }
    }
}

impl ClusterConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub const fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    #[must_use]
    pub fn gossip_max_age(&self) -> Option<Duration> {
        self.gossip_max_age_secs.map(Duration::from_secs)
    }
}

/// Node selection strategy used by request dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Uniform random choice
    #[default]
    Random,
    /// Rotate through the active list
    RoundRobin,
    /// Always the first active node
    First,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // STRATA_CLUSTER__SEEDS=a:8112,b:8112, STRATA_LOGGING__LEVEL=debug, ...
        builder = builder.add_source(
            Environment::with_prefix("STRATA")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("cluster.seeds")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check the loaded values, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.cluster.request_timeout_ms == 0 {
            errors.push("cluster.request_timeout_ms must be greater than zero".to_string());
        }
        if self.cluster.watch_interval_ms == 0 {
            errors.push("cluster.watch_interval_ms must be greater than zero".to_string());
        }
        if self.cluster.gossip_max_age_secs == Some(0) {
            errors.push("cluster.gossip_max_age_secs must be greater than zero when set".to_string());
        }
        for seed in &self.cluster.seeds {
            if let Err(e) = parse_seed(seed) {
                errors.push(format!("cluster.seeds: invalid address '{seed}': {e}"));
            }
        }

        if crate::logging::parse_log_level(&self.logging.level).is_err() {
            errors.push(format!("logging.level: unknown level '{}'", self.logging.level));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Parse a seed address, defaulting the scheme to `http`
pub fn parse_seed(raw: &str) -> Result<url::Url, url::ParseError> {
    let raw = raw.trim();
    let url = if raw.contains("://") {
        url::Url::parse(raw)?
    } else {
        url::Url::parse(&format!("http://{raw}"))?
    };
    if url.host_str().is_none_or(str::is_empty) {
        return Err(url::ParseError::EmptyHost);
    }
    Ok(url)
}
