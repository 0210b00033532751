//! # Prometheus Metrics Adapter
//!
//! Forwards pipeline events to the `se_ingest_*` series registered by
//! `se-telemetry`.

use std::time::Duration;

use se_block_ingestion::{Height, PipelineMetrics};
use se_telemetry::metrics::{
    BACKFILL_GAP_SIZE, BLOCKS_REQUESTED, BLOCKS_WRITTEN, BLOCKS_WRITTEN_ABOVE_TIP,
    BLOCK_WRITE_DURATION, DECODE_FAILURES, REQUESTS_UNANSWERED, TIP_HEIGHT, WRITES_ABANDONED, WRITE_RETRIES,
};

/// `PipelineMetrics` backed by the global Prometheus registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl PipelineMetrics for PrometheusMetrics {
    fn tip_observed(&self, tip: Height) {
        TIP_HEIGHT.set(tip as f64);
    }

    fn gap_planned(&self, missing: u64) {
        BACKFILL_GAP_SIZE.set(missing as f64);
    }

    fn block_requested(&self) {
        BLOCKS_REQUESTED.inc();
    }

    fn block_written(&self, above_tip: bool) {
        if above_tip {
            BLOCKS_WRITTEN_ABOVE_TIP.inc();
        } else {
            BLOCKS_WRITTEN.inc();
            BACKFILL_GAP_SIZE.dec();
        }
    }

    fn write_duration(&self, elapsed: Duration) {
        BLOCK_WRITE_DURATION.observe(elapsed.as_secs_f64());
    }

    fn decode_failed(&self) {
        DECODE_FAILURES.inc();
    }

    fn write_retried(&self) {
        WRITE_RETRIES.inc();
    }

    fn write_abandoned(&self) {
        WRITES_ABANDONED.inc();
    }

    fn request_unanswered(&self) {
        REQUESTS_UNANSWERED.inc();
    }
}
