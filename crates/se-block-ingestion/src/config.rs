//! # Ingestion Configuration
//!
//! Settings for the backfill pipeline and the Tendermint WebSocket source.

use serde::{Deserialize, Serialize};

use crate::domain::{
    AttributeEncoding, ChainId, ConfigError, DEFAULT_CHANNEL_CAPACITY, DEFAULT_WRITE_ATTEMPTS,
};

/// Pipeline configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Chain whose blocks are ingested.
    pub chain_id: String,

    /// Capacity of each bounded stage channel.
    pub channel_capacity: usize,

    /// Write retry schedule.
    pub write_retry: RetryConfig,

    /// Encoding of event attribute keys and values.
    pub attribute_encoding: AttributeEncoding,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chain_id: "secret-4".to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            write_retry: RetryConfig::default(),
            attribute_encoding: AttributeEncoding::default(),
        }
    }
}

impl IngestionConfig {
    /// Create a config for testing (no backoff delays).
    pub fn for_testing() -> Self {
        Self {
            chain_id: "secret-4".to_string(),
            channel_capacity: 4,
            write_retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 0,
                max_delay_ms: 0,
            },
            attribute_encoding: AttributeEncoding::Base64,
        }
    }

    /// Check every field, returning the parsed chain id.
    pub fn validate(&self) -> Result<ChainId, ConfigError> {
        let chain_id = ChainId::parse(self.chain_id.as_str())?;
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "channel_capacity",
            });
        }
        self.write_retry.validate()?;
        Ok(chain_id)
    }
}

/// Write retry schedule, in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per block, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay_ms: u64,
    /// Cap on any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_WRITE_ATTEMPTS,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "write_retry.max_attempts",
            });
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid {
                field: "write_retry.base_delay_ms".to_string(),
                reason: format!("exceeds max_delay_ms ({})", self.max_delay_ms),
            });
        }
        Ok(())
    }
}

/// Tendermint RPC WebSocket endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TendermintWsConfig {
    /// Host and optional port, e.g. `localhost:26657`.
    pub host: String,

    /// WebSocket path, e.g. `/websocket`.
    pub path: String,

    /// Seconds allowed for the connect and `status` handshake.
    pub connect_timeout_secs: u64,

    /// Subscribe to `NewBlock` events so live blocks above the tip arrive too.
    pub subscribe_new_blocks: bool,
}

impl Default for TendermintWsConfig {
    fn default() -> Self {
        Self {
            host: "localhost:26657".to_string(),
            path: "/websocket".to_string(),
            connect_timeout_secs: 10,
            subscribe_new_blocks: true,
        }
    }
}

impl TendermintWsConfig {
    /// Full `ws://` URL.
    pub fn url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        if self.path.starts_with('/') {
            format!("ws://{host}{}", self.path)
        } else {
            format!("ws://{host}/{}", self.path)
        }
    }

    /// Reject empty hosts and hosts carrying a scheme.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ConfigError::Invalid {
                field: "node.host".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if host.contains("://") {
            return Err(ConfigError::Invalid {
                field: "node.host".to_string(),
                reason: format!("`{host}` must not include a scheme"),
            });
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Zero {
                field: "node.connect_timeout_secs",
            });
        }
        Ok(())
    }
}
