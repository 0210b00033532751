//! # Wiring
//!
//! Builds the production pipeline: Tendermint WebSocket source, RocksDB
//! store, Prometheus metrics.

use std::sync::Arc;

use se_block_ingestion::{BackfillPipeline, IngestError, TendermintWsSource};

use crate::adapters::{PrometheusMetrics, RocksDbBlockStore};
use crate::config::RuntimeConfig;

/// Production pipeline type.
pub type ProductionPipeline = BackfillPipeline<TendermintWsSource, RocksDbBlockStore>;

/// Open the RocksDB store named by the configuration.
pub fn open_store(config: &RuntimeConfig) -> Result<Arc<RocksDbBlockStore>, IngestError> {
    let rocks = config.rocksdb()?;
    RocksDbBlockStore::open(rocks).map(Arc::new)
}

/// Assemble the pipeline over an opened store.
pub fn build_pipeline(
    config: &RuntimeConfig,
    store: Arc<RocksDbBlockStore>,
) -> Result<ProductionPipeline, IngestError> {
    let source = TendermintWsSource::new(config.node.clone());
    let pipeline = BackfillPipeline::new(source, store, &config.ingestion)?
        .with_metrics(Arc::new(PrometheusMetrics));
    Ok(pipeline)
}
