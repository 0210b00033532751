//! # Pipeline Coordinator
//!
//! Wires source, decoder, writer and completion detector into four tokio
//! tasks joined by bounded channels:
//!
//! ```text
//! request driver ──► source ──► forward (decode) ──► writer ──► detector
//! ```
//!
//! Startup state (tip, persisted heights) is captured once and handed to the
//! tasks by value. Completion fires once the target height's write outcome
//! is known; the coordinator then flips the shutdown watch and joins every
//! task, so outstanding records are still written before `run` returns.
//! Heights the source never answered come back from its task and are
//! reported, not retried.
//!
//! An interrupt (see [`BackfillPipeline::with_interrupt`]) takes the same
//! shutdown path and fails the run with [`IngestError::Interrupted`].

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument, Level};
use uuid::Uuid;

use super::writer::{PersistenceWriter, WriteOutcome};
use crate::algorithms::{
    compute_gaps, gap_ranges, BlockDecoder, CompletionDetector, GapPlan, MissingHeights,
    RetryPolicy,
};
use crate::config::IngestionConfig;
use crate::domain::{
    ChainId, DecodedBlock, Height, IngestError, PersistedHeights, RawBlock, RunReport,
};
use crate::ports::{
    BackfillApi, BlockSource, BlockStore, HeightIndex, NoopMetrics, PipelineMetrics,
    SourceConnection,
};

/// Ranges listed in the debug plan log before it is truncated.
const MAX_LOGGED_RANGES: usize = 32;

/// What the forward stage hands to the writer for each raw record.
#[derive(Debug)]
enum Settlement {
    Decoded(DecodedBlock),
    Dropped { height: Height },
}

/// Distinct heights by write outcome; redelivered heights count once.
#[derive(Debug, Default)]
struct WriteTally {
    written: BTreeSet<Height>,
    written_above_tip: BTreeSet<Height>,
    decode_failures: u64,
    abandoned: BTreeSet<Height>,
}

impl WriteTally {
    /// Returns false when `height` was already counted as written.
    fn record_written(&mut self, height: Height, above_tip: bool) -> bool {
        self.abandoned.remove(&height);
        if above_tip {
            self.written_above_tip.insert(height)
        } else {
            self.written.insert(height)
        }
    }

    fn record_abandoned(&mut self, height: Height) {
        if !self.written.contains(&height) && !self.written_above_tip.contains(&height) {
            self.abandoned.insert(height);
        }
    }
}

/// Backfill pipeline over a block source and a store.
pub struct BackfillPipeline<Src, St> {
    source: Src,
    store: Arc<St>,
    chain_id: ChainId,
    decoder: BlockDecoder,
    retry: RetryPolicy,
    channel_capacity: usize,
    metrics: Arc<dyn PipelineMetrics>,
    interrupt: Option<watch::Receiver<bool>>,
}

impl<Src, St> BackfillPipeline<Src, St>
where
    Src: BlockSource + 'static,
    St: BlockStore + HeightIndex + 'static,
{
    /// Create a pipeline, validating `config` before anything starts.
    pub fn new(source: Src, store: Arc<St>, config: &IngestionConfig) -> Result<Self, IngestError> {
        let chain_id = config.validate()?;
        Ok(Self {
            source,
            store,
            decoder: BlockDecoder::new(chain_id.clone(), config.attribute_encoding),
            chain_id,
            retry: RetryPolicy::from(&config.write_retry),
            channel_capacity: config.channel_capacity,
            metrics: Arc::new(NoopMetrics),
            interrupt: None,
        })
    }

    /// Record pipeline metrics through `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Stop the run once `interrupt` turns true.
    ///
    /// Stages are shut down and joined as on completion, so records already
    /// received are still written; the run then fails with
    /// [`IngestError::Interrupted`].
    pub fn with_interrupt(mut self, interrupt: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    async fn execute(&self) -> Result<RunReport, IngestError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let SourceConnection {
            tip,
            requests,
            records,
            task: source_task,
        } = self
            .source
            .connect(self.channel_capacity, shutdown_rx.clone())
            .await?;
        info!(tip, endpoint = %self.source.endpoint(), "[ingest] Connected to block source");
        self.metrics.tip_observed(tip);

        let persisted = match self.read_persisted().await {
            Ok(persisted) => persisted,
            Err(e) => {
                let _ = shutdown_tx.send(true);
                drop((requests, records));
                let _ = source_task.await;
                return Err(e);
            }
        };

        let plan = GapPlan::new(&persisted, tip);
        self.metrics.gap_planned(plan.missing);
        let Some(target) = plan.completion_target else {
            info!(tip, stored = persisted.len(), "[ingest] Store already caught up");
            let _ = shutdown_tx.send(true);
            drop((requests, records));
            join(source_task, "source").await?;
            return Ok(RunReport::caught_up(self.chain_id.clone(), tip));
        };

        info!(
            start = plan.start,
            tip,
            missing = plan.missing,
            target,
            "[ingest] Backfill planned"
        );
        if tracing::enabled!(Level::DEBUG) {
            let ranges = gap_ranges(&compute_gaps(&persisted, tip));
            debug!(
                ranges = ?&ranges[..ranges.len().min(MAX_LOGGED_RANGES)],
                total_ranges = ranges.len(),
                "[ingest] Missing height ranges"
            );
        }

        let (settle_tx, settle_rx) = mpsc::channel(self.channel_capacity);
        let (detector, completion) = CompletionDetector::new(target);

        let driver = tokio::spawn(
            drive_requests(
                MissingHeights::new(persisted, tip),
                requests,
                shutdown_rx,
                Arc::clone(&self.metrics),
            )
            .in_current_span(),
        );
        let forward = tokio::spawn(
            forward_records(
                records,
                self.decoder.clone(),
                settle_tx,
                Arc::clone(&self.metrics),
            )
            .in_current_span(),
        );
        let writer = PersistenceWriter::new(
            Arc::clone(&self.store),
            self.retry,
            Arc::clone(&self.metrics),
        );
        let write_stage = tokio::spawn(
            write_settlements(settle_rx, writer, detector, tip, Arc::clone(&self.metrics))
                .in_current_span(),
        );

        let ending = tokio::select! {
            // Errs when the writer stage ends without settling the target.
            settled = completion => {
                if settled.is_ok() {
                    info!(target, "[ingest] Completion target settled, shutting down");
                    Ending::Completed
                } else {
                    warn!(target, "[ingest] Source feed ended before completion");
                    Ending::StreamEnded
                }
            }
            _ = interrupted(self.interrupt.clone()) => {
                warn!(target, "[ingest] Interrupted, shutting down");
                Ending::Interrupted
            }
        };
        let _ = shutdown_tx.send(true);

        let requested = join(driver, "request driver").await;
        let forwarded = join(forward, "forward").await;
        let tally = join(write_stage, "writer").await;
        let unanswered = join(source_task, "source").await;
        let (requested, tally, unanswered) = (requested?, tally?, unanswered?);
        forwarded?;

        for &height in &unanswered {
            warn!(
                height,
                chain_id = %self.chain_id,
                "[ingest] Source never answered requested height"
            );
            self.metrics.request_unanswered();
        }

        match ending {
            Ending::Completed => {}
            Ending::StreamEnded => return Err(IngestError::StreamEnded { target }),
            Ending::Interrupted => return Err(IngestError::Interrupted { target }),
        }

        let report = RunReport {
            chain_id: self.chain_id.clone(),
            tip,
            requested,
            written: tally.written.len() as u64,
            written_above_tip: tally.written_above_tip.len() as u64,
            decode_failures: tally.decode_failures,
            abandoned_heights: tally.abandoned.into_iter().collect(),
            unanswered_heights: unanswered,
            already_complete: false,
        };
        info!(
            requested = report.requested,
            written = report.written,
            written_above_tip = report.written_above_tip,
            decode_failures = report.decode_failures,
            abandoned = report.abandoned_heights.len(),
            unanswered = report.unanswered_heights.len(),
            "[ingest] Backfill finished"
        );
        Ok(report)
    }

    async fn read_persisted(&self) -> Result<PersistedHeights, IngestError> {
        let store = Arc::clone(&self.store);
        let chain_id = self.chain_id.clone();
        tokio::task::spawn_blocking(move || store.persisted_heights(&chain_id))
            .await
            .map_err(|e| IngestError::StageFailed {
                stage: "height index",
                reason: e.to_string(),
            })?
    }
}

#[async_trait]
impl<Src, St> BackfillApi for BackfillPipeline<Src, St>
where
    Src: BlockSource + 'static,
    St: BlockStore + HeightIndex + 'static,
{
    async fn run(&self) -> Result<RunReport, IngestError> {
        let span = info_span!("backfill", run_id = %Uuid::new_v4(), chain_id = %self.chain_id);
        self.execute().instrument(span).await
    }

    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }
}

/// How the coordinator stopped waiting on the completion target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Completed,
    StreamEnded,
    Interrupted,
}

/// Resolves once the interrupt flag is true; never without a receiver or
/// after its sender is dropped.
async fn interrupted(interrupt: Option<watch::Receiver<bool>>) {
    let Some(mut interrupt) = interrupt else {
        return std::future::pending().await;
    };
    while !*interrupt.borrow_and_update() {
        if interrupt.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

async fn join<T>(handle: JoinHandle<T>, stage: &'static str) -> Result<T, IngestError> {
    handle.await.map_err(|e| IngestError::StageFailed {
        stage,
        reason: e.to_string(),
    })
}

/// Feed missing heights into the source one at a time, ascending.
async fn drive_requests<I>(
    gaps: I,
    requests: mpsc::Sender<Height>,
    mut shutdown: watch::Receiver<bool>,
    metrics: Arc<dyn PipelineMetrics>,
) -> u64
where
    I: Iterator<Item = Height>,
{
    let mut sent = 0;
    for height in gaps {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            result = requests.send(height) => {
                if result.is_err() {
                    warn!(height, "[ingest] Source stopped accepting requests");
                    break;
                }
                sent += 1;
                metrics.block_requested();
            }
        }
    }
    debug!(sent, "[ingest] Request driver finished");
    sent
}

/// Decode every raw record; undecodable ones are settled as dropped.
async fn forward_records(
    mut records: mpsc::Receiver<RawBlock>,
    decoder: BlockDecoder,
    settlements: mpsc::Sender<Settlement>,
    metrics: Arc<dyn PipelineMetrics>,
) {
    while let Some(raw) = records.recv().await {
        let settlement = match decoder.decode(&raw) {
            Ok(block) => Settlement::Decoded(block),
            Err(e) => {
                warn!(
                    height = raw.height,
                    chain_id = %decoder.chain_id(),
                    "[ingest] Dropping undecodable block: {}",
                    e
                );
                metrics.decode_failed();
                Settlement::Dropped { height: raw.height }
            }
        };
        if settlements.send(settlement).await.is_err() {
            break;
        }
    }
}

/// Write decoded blocks and feed every settled height to the detector.
async fn write_settlements<S>(
    mut settlements: mpsc::Receiver<Settlement>,
    writer: PersistenceWriter<S>,
    mut detector: CompletionDetector,
    tip: Height,
    metrics: Arc<dyn PipelineMetrics>,
) -> WriteTally
where
    S: BlockStore + 'static,
{
    let mut tally = WriteTally::default();
    while let Some(settlement) = settlements.recv().await {
        let height = match settlement {
            Settlement::Dropped { height } => {
                tally.decode_failures += 1;
                height
            }
            Settlement::Decoded(block) => {
                let height = block.height;
                let above_tip = height > tip;
                match writer.write(block).await {
                    WriteOutcome::Written { .. } => {
                        if tally.record_written(height, above_tip) {
                            metrics.block_written(above_tip);
                        }
                    }
                    WriteOutcome::Abandoned { .. } => tally.record_abandoned(height),
                }
                height
            }
        };
        detector.observe(height);
    }
    tally
}
