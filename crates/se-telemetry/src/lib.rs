//! # SE Telemetry
//!
//! Logging and metrics for scrt-events.
//!
//! ## Components
//!
//! - **Logs**: `tracing-subscriber` with an `EnvFilter`, pretty or JSON output
//! - **Metrics**: a Prometheus registry of `se_ingest_*` series
//!
//! ## Usage
//!
//! ```rust,ignore
//! use se_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env().with_verbosity(Some("debug"));
//! let _guard = init_telemetry(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SE_LOG_LEVEL` | - | Log filter, wins over everything else |
//! | `RUST_LOG` | - | Log filter when `SE_LOG_LEVEL` is unset |
//! | `SE_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |
//! | `SE_SERVICE_NAME` | `scrt-events` | Service name on the startup log line |

#![warn(missing_docs)]

mod config;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{encode_metrics, register_metrics, MetricsHandle};
pub use tracing_setup::init_logging;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// A metric could not be registered or encoded.
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    /// The log filter did not parse.
    #[error("Invalid log filter `{filter}`: {reason}")]
    InvalidFilter {
        /// Directive that was rejected
        filter: String,
        /// Parser message
        reason: String,
    },
}

/// Register metrics and install the log subscriber.
///
/// Hold the returned guard for the lifetime of the process.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    init_logging(config)?;
    Ok(TelemetryGuard { _metrics: metrics })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::debug!("Shutting down telemetry");
    }
}
