//! Prometheus metrics for the ingestion pipeline.
//!
//! All metrics follow the naming convention: `se_ingest_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: blocks requested, written, dropped, retried, abandoned
//! - **Gauge**: tip height and planned gap size of the current run
//! - **Histogram**: store write duration

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, Encoder, Gauge, Histogram, HistogramOpts, Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Heights handed to the block source
    pub static ref BLOCKS_REQUESTED: Counter = Counter::new(
        "se_ingest_blocks_requested_total",
        "Total heights requested from the block source"
    ).expect("metric creation failed");

    /// Blocks at or below the tip written to the store
    pub static ref BLOCKS_WRITTEN: Counter = Counter::new(
        "se_ingest_blocks_written_total",
        "Total backfilled blocks written to the store"
    ).expect("metric creation failed");

    /// Live blocks above the tip written to the store
    pub static ref BLOCKS_WRITTEN_ABOVE_TIP: Counter = Counter::new(
        "se_ingest_blocks_written_above_tip_total",
        "Total live blocks above the captured tip written to the store"
    ).expect("metric creation failed");

    /// Raw records that failed to decode
    pub static ref DECODE_FAILURES: Counter = Counter::new(
        "se_ingest_decode_failures_total",
        "Total raw records dropped because they failed to decode"
    ).expect("metric creation failed");

    /// Requested heights the source never answered
    pub static ref REQUESTS_UNANSWERED: Counter = Counter::new(
        "se_ingest_requests_unanswered_total",
        "Total requested heights the source stopped without answering"
    ).expect("metric creation failed");

    /// Write retries
    pub static ref WRITE_RETRIES: Counter = Counter::new(
        "se_ingest_write_retries_total",
        "Total failed writes that were retried"
    ).expect("metric creation failed");

    /// Writes abandoned after exhausting their attempts
    pub static ref WRITES_ABANDONED: Counter = Counter::new(
        "se_ingest_writes_abandoned_total",
        "Total writes abandoned after exhausting retries"
    ).expect("metric creation failed");

    /// Tip captured at connection time
    pub static ref TIP_HEIGHT: Gauge = Gauge::new(
        "se_ingest_tip_height",
        "Tip height reported by the block source when the run started"
    ).expect("metric creation failed");

    /// Heights the current run has to fill
    pub static ref BACKFILL_GAP_SIZE: Gauge = Gauge::new(
        "se_ingest_backfill_gap_size",
        "Number of missing heights planned for the current run"
    ).expect("metric creation failed");

    /// Store write duration
    pub static ref BLOCK_WRITE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "se_ingest_block_write_duration_seconds",
            "Time spent writing one block to the store"
        ).buckets(exponential_buckets(0.0001, 2.0, 14).expect("valid buckets"))
    ).expect("metric creation failed");
}

/// Handle on the registered metrics
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; metrics already registered are kept.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(BLOCKS_REQUESTED.clone()),
        Box::new(BLOCKS_WRITTEN.clone()),
        Box::new(BLOCKS_WRITTEN_ABOVE_TIP.clone()),
        Box::new(DECODE_FAILURES.clone()),
        Box::new(REQUESTS_UNANSWERED.clone()),
        Box::new(WRITE_RETRIES.clone()),
        Box::new(WRITES_ABANDONED.clone()),
        Box::new(TIP_HEIGHT.clone()),
        Box::new(BACKFILL_GAP_SIZE.clone()),
        Box::new(BLOCK_WRITE_DURATION.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
