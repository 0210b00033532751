//! # SE Block Ingestion
//!
//! Reconciliation-and-ingestion backfill for Tendermint `block_results`.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Bring a block store up to date with a node: capture the node's tip,
//! compute the heights missing from the store, request them, decode each
//! answer and persist it idempotently. A run ends once the completion
//! target (the tip, or the highest missing height below a stored tip) has
//! been settled, and re-running always resumes where the last run left off.
//!
//! ## Failure Model
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Invalid configuration | Fatal before anything starts |
//! | Source unreachable | Fatal |
//! | Height index unreadable | Fatal |
//! | Undecodable block | Dropped, logged, counted |
//! | Failed write | Retried with backoff, then left for the next run |
//! | Feed lost mid-run | Stages drained, `StreamEnded` returned |
//!
//! ## Module Structure
//!
//! ```text
//! se-block-ingestion/
//! ├── domain/          # Height, ChainId, RawBlock, DecodedBlock, errors
//! ├── algorithms/      # Gap calculator, completion detector, decoder, retry
//! ├── ports/           # BackfillApi (inbound) + source/store/metrics (outbound)
//! ├── application/     # BackfillPipeline coordinator, PersistenceWriter
//! ├── adapters/        # TendermintWsSource
//! └── config.rs        # IngestionConfig, RetryConfig, TendermintWsConfig
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod test_utils;

// Re-exports
pub use adapters::TendermintWsSource;
pub use algorithms::{
    compute_gaps, decode_block, gap_ranges, scan_start, BlockDecoder, CompletionDetector,
    CompletionState, GapPlan, MissingHeights, RetryPolicy,
};
pub use application::{BackfillPipeline, PersistenceWriter, WriteOutcome};
pub use config::{IngestionConfig, RetryConfig, TendermintWsConfig};
pub use domain::{
    AbciEvent, AttributeEncoding, ChainId, ConfigError, DecodeError, DecodedBlock,
    EventAttribute, Height, IngestError, PersistedHeights, RawBlock, RunReport, TxResult,
    WriteError, FIRST_HEIGHT,
};
pub use ports::{
    BackfillApi, BlockSource, BlockStore, HeightIndex, InMemoryBlockStore, NoopMetrics,
    PipelineMetrics, ScriptedSource, SourceConnection,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
