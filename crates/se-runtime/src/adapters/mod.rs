//! # Runtime Adapters
//!
//! Production implementations of the ingestion ports.

pub mod metrics;
pub mod storage;

pub use metrics::PrometheusMetrics;
pub use storage::{RocksDbBlockStore, RocksDbConfig};
