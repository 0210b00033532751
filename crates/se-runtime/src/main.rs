//! # scrt-events
//!
//! Reconciles the local block-results store with a Tendermint node: finds the
//! heights missing up to the node's tip, fetches and decodes them, writes
//! them to RocksDB, and exits once the tip record has settled.
//!
//! ## Startup Sequence
//!
//! 1. Parse flags and initialize telemetry
//! 2. Load configuration (file, then `SE_*` environment, then flags)
//! 3. Open the RocksDB store
//! 4. Connect to the node and run one backfill pass
//!
//! Exit status is non-zero only when the node cannot be reached, the store
//! cannot be opened, the feed ends before the run settles, or the run is
//! interrupted. Heights that failed to decode or write, or that the node
//! never answered, are reported in the final log.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use se_block_ingestion::BackfillApi;
use se_runtime::{build_pipeline, open_store, CliOverrides, RuntimeConfig};
use se_telemetry::{encode_metrics, init_telemetry, TelemetryConfig};

/// Backfill Secret Network block results into a local store.
#[derive(Debug, Parser)]
#[command(name = "scrt-events", version, about)]
struct Args {
    /// JSON configuration file [default: $HOME/.scrt-events/config.json]
    #[arg(long, env = "SE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `se_block_ingestion=debug`
    #[arg(short, long)]
    verbosity: Option<String>,

    /// Node host and port, e.g. `localhost:26657`
    #[arg(long)]
    host: Option<String>,

    /// WebSocket path on the node, e.g. `/websocket`
    #[arg(long)]
    path: Option<String>,

    /// Database connection string, e.g. `rocksdb:///var/lib/scrt-events`
    #[arg(long)]
    db: Option<String>,

    /// Chain identifier the records are stored under
    #[arg(long)]
    chain_id: Option<String>,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config: self.config.clone(),
            host: self.host.clone(),
            path: self.path.clone(),
            db: self.db.clone(),
            chain_id: self.chain_id.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let telemetry = TelemetryConfig::from_env().with_verbosity(args.verbosity.as_deref());
    let _telemetry = init_telemetry(&telemetry).context("Failed to initialize telemetry")?;

    let config = RuntimeConfig::load(&args.overrides()).context("Failed to load configuration")?;
    info!(
        node = %config.node.url(),
        chain_id = %config.ingestion.chain_id,
        db = %config.database.conn,
        "[ingest] Starting scrt-events v{}",
        env!("CARGO_PKG_VERSION")
    );

    let store = open_store(&config).context("Failed to open block results store")?;
    let pipeline = build_pipeline(&config, store).context("Failed to build pipeline")?;

    // Ctrl-C flips the interrupt; the pipeline then joins its stages itself.
    let (interrupt_tx, interrupt_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[ingest] Received Ctrl-C, stopping after in-flight writes");
            let _ = interrupt_tx.send(true);
        }
    });

    let report = pipeline
        .with_interrupt(interrupt_rx)
        .run()
        .await
        .context("Backfill run failed")?;

    if report.already_complete {
        info!(tip = report.tip, "[ingest] Store already caught up");
    } else {
        info!(
            tip = report.tip,
            requested = report.requested,
            written = report.written,
            written_above_tip = report.written_above_tip,
            "[ingest] Backfill complete"
        );
    }
    if !report.is_clean() {
        warn!(
            decode_failures = report.decode_failures,
            abandoned = ?report.abandoned_heights,
            unanswered = ?report.unanswered_heights,
            "[ingest] Some requested heights were not stored"
        );
    }

    match encode_metrics() {
        Ok(snapshot) => debug!("[ingest] Final metrics\n{}", snapshot),
        Err(e) => debug!(error = %e, "[ingest] Could not encode metrics"),
    }

    Ok(())
}
