//! Configuration for the SQL gateway

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pool::PoolOptions;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "SQL_GATEWAY_CONFIG";

/// Environment variable overriding the database target
pub const DSN_ENV: &str = "DB_DSN";

/// SQL gateway configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Database target
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Open the database read-only
    /// Default: true
    #[serde(default = "default_true")]
    pub read_only: bool,

    /// Per-statement execution limit in seconds, 0 disables it
    /// Default: 30
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,

    /// How long to wait on a locked database before failing, in seconds
    /// Default: 5
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

/// Connection pool sizing
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,

    #[serde(default = "default_pool_max_idle")]
    pub max_idle: usize,

    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

/// Row, byte and statement size limits
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_rows")]
    pub default_max_rows: usize,

    #[serde(default = "default_max_bytes")]
    pub default_max_bytes: usize,

    #[serde(default = "default_max_rows_ceiling")]
    pub max_rows_ceiling: usize,

    #[serde(default = "default_max_bytes_ceiling")]
    pub max_bytes_ceiling: usize,

    /// Longest accepted SQL text, in characters
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
}

fn default_true() -> bool {
    true
}

fn default_statement_timeout() -> u64 {
    30
}

fn default_busy_timeout() -> u64 {
    5
}

fn default_pool_max_size() -> usize {
    4
}

fn default_pool_max_idle() -> usize {
    2
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_max_rows() -> usize {
    100
}

fn default_max_bytes() -> usize {
    10_000
}

fn default_max_rows_ceiling() -> usize {
    10_000
}

fn default_max_bytes_ceiling() -> usize {
    1024 * 1024
}

fn default_max_query_length() -> usize {
    1_000_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            read_only: true,
            statement_timeout_secs: default_statement_timeout(),
            busy_timeout_secs: default_busy_timeout(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            max_idle: default_pool_max_idle(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_max_rows: default_max_rows(),
            default_max_bytes: default_max_bytes(),
            max_rows_ceiling: default_max_rows_ceiling(),
            max_bytes_ceiling: default_max_bytes_ceiling(),
            max_query_length: default_max_query_length(),
        }
    }
}

impl DatabaseConfig {
    pub fn statement_timeout(&self) -> Option<Duration> {
        (self.statement_timeout_secs > 0).then(|| Duration::from_secs(self.statement_timeout_secs))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

impl PoolConfig {
    pub fn options(&self) -> PoolOptions {
        PoolOptions {
            max_size: self.max_size,
            max_idle: self.max_idle,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from file and environment
    ///
    /// Looks for config in:
    /// 1. `SQL_GATEWAY_CONFIG` environment variable (the file must exist)
    /// 2. `~/.binks/sql-gateway.toml` (optional)
    ///
    /// `DB_DSN` overrides the database path from either file.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let content = match &explicit {
            Some(path) => Some(read_config(path)?),
            None => match dirs::home_dir().map(|home| home.join(".binks").join("sql-gateway.toml")) {
                Some(path) if path.exists() => Some(read_config(&path)?),
                _ => None,
            },
        };
        let dsn = std::env::var(DSN_ENV).ok();
        Self::resolve(content.as_deref(), dsn.as_deref())
    }

    /// Build the config from optional TOML text and an optional `DB_DSN` value
    pub fn resolve(content: Option<&str>, dsn: Option<&str>) -> Result<Self> {
        let mut config: GatewayConfig = match content {
            Some(text) => toml::from_str(text).context("Failed to parse gateway config")?,
            None => GatewayConfig::default(),
        };

        if let Some(dsn) = dsn.map(str::trim).filter(|d| !d.is_empty()) {
            config.database.path = Some(PathBuf::from(dsn));
        }
        config.validate()?;
        Ok(config)
    }

    /// Create a default config pointing to a specific database
    pub fn with_database(path: impl Into<PathBuf>) -> Self {
        Self {
            database: DatabaseConfig {
                path: Some(path.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Database path; present once the config has been validated
    pub fn database_path(&self) -> Result<&Path> {
        self.database
            .path
            .as_deref()
            .context("No database configured; set DB_DSN or [database].path")
    }

    fn validate(&self) -> Result<()> {
        self.database_path()?;
        let limits = &self.limits;
        if limits.default_max_rows == 0 || limits.default_max_rows > limits.max_rows_ceiling {
            bail!("limits.default_max_rows must be between 1 and max_rows_ceiling");
        }
        if limits.default_max_bytes < crate::serializer::MIN_MAX_BYTES
            || limits.default_max_bytes > limits.max_bytes_ceiling
        {
            bail!(
                "limits.default_max_bytes must be between {} and max_bytes_ceiling",
                crate::serializer::MIN_MAX_BYTES
            );
        }
        if limits.max_query_length == 0 {
            bail!("limits.max_query_length must be positive");
        }
        if self.pool.max_size == 0 {
            bail!("pool.max_size must be positive");
        }
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read config from {:?}", path))
}
