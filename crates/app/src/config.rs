//! Configuration loading and validation for the collector.
//!
//! Configuration comes from a TOML file, with selected values overridable
//! through `COLLECTOR_*` environment variables.
//!
//! # Configuration Sections
//!
//! | Section | Description |
//! |---------|-------------|
//! | `distributor` | Distributor URL, request timeout and signing key |
//! | `database` | SQLite database path and connection pool |
//! | `sync` | Batch sizes, concurrency, paging and retry tuning |
//! | `logging` | Log level and format |
//!
//! # Example Configuration
//!
//! ```toml
//! [distributor]
//! url = "http://127.0.0.1:6100"
//! secret_key = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60"
//!
//! [database]
//! path = "data/collector.db"
//!
//! [sync]
//! concurrency = 20
//! ```
//!
//! # Environment Overrides
//!
//! - `COLLECTOR_DISTRIBUTOR_URL` - Distributor base URL
//! - `COLLECTOR_SECRET_KEY` - Hex Ed25519 seed used to sign requests
//! - `COLLECTOR_DATABASE_PATH` - Database file path
//! - `COLLECTOR_SYNC_CONCURRENCY` - Batches in flight
//! - `COLLECTOR_LOG_LEVEL` - Log level (trace, debug, info, warn, error)

use std::path::{Path, PathBuf};
use std::time::Duration;

use collector_distributor::{Ed25519Signer, HttpDistributorConfig};
use collector_sync::SyncConfig;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upstream distributor.
    #[serde(default)]
    pub distributor: DistributorConfig,

    /// Local store.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Sync engine tuning.
    #[serde(default)]
    pub sync: SyncSection,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Distributor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributorConfig {
    /// Base URL of the distributor.
    #[serde(default = "default_distributor_url")]
    pub url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Hex-encoded 32-byte Ed25519 seed used to sign requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            url: default_distributor_url(),
            request_timeout_secs: default_request_timeout_secs(),
            secret_key: None,
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_size: default_pool_size(),
        }
    }
}

/// Sync engine settings. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub cycles_per_batch: u64,
    pub concurrency: usize,
    pub dispatch_interval_ms: u64,
    pub cycles_per_request: u32,
    pub receipts_per_request: u32,
    pub original_txs_per_request: u32,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub anomaly_lookback_cycles: u64,
    pub verify_chunk_cycles: u64,
    pub progress_interval_ms: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        let defaults = SyncConfig::default();
        Self {
            cycles_per_batch: defaults.cycles_per_batch,
            concurrency: defaults.concurrency,
            dispatch_interval_ms: millis(defaults.dispatch_interval),
            cycles_per_request: defaults.cycles_per_request,
            receipts_per_request: defaults.receipts_per_request,
            original_txs_per_request: defaults.original_txs_per_request,
            retry_attempts: defaults.retry_attempts,
            retry_base_delay_ms: millis(defaults.retry_base_delay),
            anomaly_lookback_cycles: defaults.anomaly_lookback_cycles,
            verify_chunk_cycles: defaults.verify_chunk_cycles,
            progress_interval_ms: millis(defaults.progress_interval),
        }
    }
}

impl SyncSection {
    /// The engine configuration these settings describe.
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            cycles_per_batch: self.cycles_per_batch,
            concurrency: self.concurrency,
            dispatch_interval: Duration::from_millis(self.dispatch_interval_ms),
            cycles_per_request: self.cycles_per_request,
            receipts_per_request: self.receipts_per_request,
            original_txs_per_request: self.original_txs_per_request,
            retry_attempts: self.retry_attempts,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            anomaly_lookback_cycles: self.anomaly_lookback_cycles,
            verify_chunk_cycles: self.verify_chunk_cycles,
            progress_interval: Duration::from_millis(self.progress_interval_ms),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to use ANSI colors.
    #[serde(default = "default_true")]
    pub colors: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn default_distributor_url() -> String {
    "http://127.0.0.1:6100".to_string()
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_db_path() -> PathBuf {
    PathBuf::from("collector.db")
}

fn default_pool_size() -> u32 {
    collector_db::DEFAULT_POOL_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Environment variables take precedence over file configuration.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `COLLECTOR_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides looked up through `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("COLLECTOR_DISTRIBUTOR_URL") {
            self.distributor.url = val;
        }
        if let Some(val) = var("COLLECTOR_SECRET_KEY") {
            self.distributor.secret_key = Some(val);
        }
        if let Some(val) = var("COLLECTOR_DATABASE_PATH") {
            self.database.path = PathBuf::from(val);
        }
        if let Some(val) = var("COLLECTOR_SYNC_CONCURRENCY") {
            if let Ok(concurrency) = val.parse() {
                self.sync.concurrency = concurrency;
            }
        }
        if let Some(val) = var("COLLECTOR_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.distributor.url.trim().is_empty() {
            anyhow::bail!("distributor.url must be set");
        }
        url::Url::parse(&self.distributor.url)
            .map_err(|e| anyhow::anyhow!("Invalid distributor.url {:?}: {e}", self.distributor.url))?;

        if self.distributor.request_timeout_secs == 0 {
            anyhow::bail!("distributor.request_timeout_secs must be > 0");
        }

        match self.distributor.secret_key {
            Some(ref key) => {
                Ed25519Signer::from_hex(key)
                    .map_err(|e| anyhow::anyhow!("Invalid distributor.secret_key: {e}"))?;
            }
            None => anyhow::bail!("distributor.secret_key must be set"),
        }

        if self.database.pool_size == 0 {
            anyhow::bail!("database.pool_size must be > 0");
        }

        self.sync
            .to_sync_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid [sync] section: {e}"))?;
        Ok(())
    }

    /// Settings for the HTTP distributor client.
    pub fn distributor_client_config(&self) -> HttpDistributorConfig {
        HttpDistributorConfig {
            url: self.distributor.url.clone(),
            timeout: Duration::from_secs(self.distributor.request_timeout_secs),
        }
    }

    /// The request signer for the configured key.
    pub fn signer(&self) -> anyhow::Result<Ed25519Signer> {
        let key = self
            .distributor
            .secret_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("distributor.secret_key must be set"))?;
        Ed25519Signer::from_hex(key).map_err(|e| anyhow::anyhow!("Invalid distributor.secret_key: {e}"))
    }

    /// Generate a sample configuration file.
    pub fn sample_config() -> String {
        let mut config = Self::default();
        config.distributor.secret_key = Some("00".repeat(32));
        let body = toml::to_string_pretty(&config).unwrap_or_default();
        format!(
            "# Collector configuration.\n\
             # Replace distributor.secret_key with your hex Ed25519 seed.\n\
             # Durations in [sync] are milliseconds.\n\n{body}"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const KEY: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.distributor.secret_key = Some(KEY.to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.distributor.url, "http://127.0.0.1:6100");
        assert_eq!(config.database.pool_size, 10);
        assert_eq!(config.sync.to_sync_config(), SyncConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[distributor]
url = "http://distributor.example:9001"
secret_key = "{}"

[sync]
concurrency = 4
retry_base_delay_ms = 250
"#,
            KEY
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.distributor.url, "http://distributor.example:9001");
        assert_eq!(config.distributor.request_timeout_secs, 20);
        let sync = config.sync.to_sync_config();
        assert_eq!(sync.concurrency, 4);
        assert_eq!(sync.retry_base_delay, Duration::from_millis(250));
        assert_eq!(sync.cycles_per_batch, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("COLLECTOR_DISTRIBUTOR_URL", "http://override:1"),
            ("COLLECTOR_DATABASE_PATH", "/tmp/override.db"),
            ("COLLECTOR_SYNC_CONCURRENCY", "3"),
            ("COLLECTOR_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = valid();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.distributor.url, "http://override:1");
        assert_eq!(config.database.path, PathBuf::from("/tmp/override.db"));
        assert_eq!(config.sync.concurrency, 3);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.distributor.secret_key.as_deref(), Some(KEY));
    }

    #[test]
    fn test_unparseable_concurrency_override_is_ignored() {
        let mut config = valid();
        config.apply_overrides(|key| {
            (key == "COLLECTOR_SYNC_CONCURRENCY").then(|| "many".to_string())
        });
        assert_eq!(config.sync.concurrency, 10);
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let missing_key = AppConfig::default();
        assert!(missing_key.validate().is_err());

        let mut bad_key = valid();
        bad_key.distributor.secret_key = Some("abcd".into());
        assert!(bad_key.validate().is_err());

        let mut bad_url = valid();
        bad_url.distributor.url = "not a url".into();
        assert!(bad_url.validate().is_err());

        let mut bad_sync = valid();
        bad_sync.sync.cycles_per_batch = 0;
        let err = bad_sync.validate().unwrap_err();
        assert!(err.to_string().contains("cycles_per_batch"), "{err}");
    }

    #[test]
    fn test_sample_config_round_trips() {
        let sample = AppConfig::sample_config();
        assert!(sample.starts_with("# Collector configuration."));
        let parsed: AppConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.sync, SyncSection::default());
        assert!(parsed.validate().is_ok());
    }
}
