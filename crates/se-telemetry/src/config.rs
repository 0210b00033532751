//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name on the startup log line
    pub service_name: String,

    /// Log filter directive (e.g. `info`, `se_block_ingestion=debug`)
    pub log_level: String,

    /// Whether the filter came from the environment
    pub level_from_env: bool,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "scrt-events".to_string(),
            log_level: "info".to_string(),
            level_from_env: false,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SE_SERVICE_NAME`: Service name (default: scrt-events)
    /// - `SE_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `SE_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();
        let env_level = env::var("SE_LOG_LEVEL")
            .or_else(|_| env::var("RUST_LOG"))
            .ok()
            .filter(|level| !level.trim().is_empty());

        Self {
            service_name: env::var("SE_SERVICE_NAME")
                .unwrap_or_else(|_| "scrt-events".to_string()),

            level_from_env: env_level.is_some(),
            log_level: env_level.unwrap_or_else(|| "info".to_string()),

            json_logs: env::var("SE_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),
        }
    }

    /// Apply a `--verbosity` flag. The environment still wins.
    pub fn with_verbosity(mut self, verbosity: Option<&str>) -> Self {
        if let Some(level) = verbosity.filter(|_| !self.level_from_env) {
            self.log_level = level.to_string();
        }
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}
