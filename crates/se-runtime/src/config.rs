//! # Runtime Configuration
//!
//! Layered configuration for the `scrt-events` binary:
//!
//! 1. JSON file (`--config`, default `$HOME/.scrt-events/config.json`)
//! 2. Environment overrides (`SE_*`)
//! 3. Command-line flags
//!
//! A missing default file is not an error; a missing file named on the
//! command line is.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use se_block_ingestion::{ConfigError, IngestionConfig, TendermintWsConfig};

use crate::adapters::storage::RocksDbConfig;

/// Scheme accepted in front of a database connection string.
pub const ROCKSDB_SCHEME: &str = "rocksdb://";

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Tendermint RPC endpoint.
    pub node: TendermintWsConfig,
    /// Database location.
    pub database: DatabaseConfig,
    /// Pipeline settings.
    pub ingestion: IngestionConfig,
    /// RocksDB tuning.
    pub storage: StorageConfig,
}

/// Database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection string: a directory, optionally prefixed with `rocksdb://`.
    pub conn: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            conn: "./data/scrt-events".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Directory of the RocksDB database.
    pub fn rocksdb_path(&self) -> Result<PathBuf, ConfigError> {
        let conn = self.conn.trim();
        let path = match conn.split_once("://") {
            None => conn,
            Some(_) if conn.starts_with(ROCKSDB_SCHEME) => &conn[ROCKSDB_SCHEME.len()..],
            Some((scheme, _)) => {
                return Err(ConfigError::Invalid {
                    field: "database.conn".to_string(),
                    reason: format!("unsupported scheme `{scheme}`"),
                })
            }
        };
        if path.is_empty() {
            return Err(ConfigError::Invalid {
                field: "database.conn".to_string(),
                reason: "must name a directory".to_string(),
            });
        }
        Ok(PathBuf::from(path))
    }
}

/// RocksDB tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Block cache size in MiB.
    pub block_cache_mb: usize,
    /// Write buffer size in MiB.
    pub write_buffer_mb: usize,
    /// fsync every write.
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            block_cache_mb: 128,
            write_buffer_mb: 32,
            sync_writes: true,
        }
    }
}

/// Values given on the command line; `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Config file path.
    pub config: Option<PathBuf>,
    /// Node host.
    pub host: Option<String>,
    /// WebSocket path.
    pub path: Option<String>,
    /// Database connection string.
    pub db: Option<String>,
    /// Chain identifier.
    pub chain_id: Option<String>,
}

impl RuntimeConfig {
    /// Load all three layers from the process environment and validate.
    pub fn load(cli: &CliOverrides) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let load_error = |reason: String| ConfigError::Load {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| load_error(e.to_string()))
    }

    /// Apply `SE_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SE_NODE_HOST") {
            self.node.host = host;
        }
        if let Some(path) = lookup("SE_NODE_PATH") {
            self.node.path = path;
        }
        if let Some(conn) = lookup("SE_DATABASE_CONN") {
            self.database.conn = conn;
        }
        if let Some(chain_id) = lookup("SE_CHAIN_ID") {
            self.ingestion.chain_id = chain_id;
        }
        if let Some(capacity) = lookup("SE_CHANNEL_CAPACITY") {
            self.ingestion.channel_capacity = parse_env("SE_CHANNEL_CAPACITY", &capacity)?;
        }
        if let Some(attempts) = lookup("SE_WRITE_MAX_ATTEMPTS") {
            self.ingestion.write_retry.max_attempts = parse_env("SE_WRITE_MAX_ATTEMPTS", &attempts)?;
        }
        Ok(())
    }

    /// Apply command-line flags.
    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(host) = &cli.host {
            self.node.host = host.clone();
        }
        if let Some(path) = &cli.path {
            self.node.path = path.clone();
        }
        if let Some(db) = &cli.db {
            self.database.conn = db.clone();
        }
        if let Some(chain_id) = &cli.chain_id {
            self.ingestion.chain_id = chain_id.clone();
        }
    }

    /// Check every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.node.validate()?;
        self.ingestion.validate()?;
        self.database.rocksdb_path()?;
        if self.storage.write_buffer_mb == 0 {
            return Err(ConfigError::Zero {
                field: "storage.write_buffer_mb",
            });
        }
        Ok(())
    }

    /// RocksDB settings derived from the database and storage sections.
    pub fn rocksdb(&self) -> Result<RocksDbConfig, ConfigError> {
        Ok(RocksDbConfig {
            path: self.database.rocksdb_path()?,
            block_cache_size: self.storage.block_cache_mb * 1024 * 1024,
            write_buffer_size: self.storage.write_buffer_mb * 1024 * 1024,
            sync_writes: self.storage.sync_writes,
            ..RocksDbConfig::default()
        })
    }
}

/// `$HOME/.scrt-events/config.json`, when `HOME` is set.
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".scrt-events").join("config.json"))
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        field: key.to_string(),
        reason: e.to_string(),
    })
}
