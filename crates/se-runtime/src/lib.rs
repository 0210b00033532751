//! # SE Runtime
//!
//! Production assembly of the scrt-events backfill pipeline.
//!
//! ## Modules
//!
//! ```text
//! se_runtime/
//! ├── adapters/   # RocksDB store and index, Prometheus metrics
//! ├── config.rs   # File, environment and CLI configuration layers
//! └── wiring.rs   # Pipeline assembly
//! ```

pub mod adapters;
pub mod config;
pub mod wiring;

pub use adapters::{PrometheusMetrics, RocksDbBlockStore, RocksDbConfig};
pub use config::{CliOverrides, DatabaseConfig, RuntimeConfig, StorageConfig};
pub use wiring::{build_pipeline, open_store, ProductionPipeline};
