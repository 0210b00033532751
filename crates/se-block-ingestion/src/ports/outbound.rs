//! # Outbound Ports
//!
//! Traits for the pipeline's external dependencies: the block source, the
//! persisted-height index, the block store and metrics.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::domain::{ChainId, DecodedBlock, Height, IngestError, PersistedHeights, RawBlock, WriteError};
use crate::test_utils::block_results_payload;

/// An open session with a block source.
///
/// Requests go out on `requests`; raw records come back on `records` in
/// arrival order, which need not match request order. The source may also
/// push records above `tip` on its own.
#[derive(Debug)]
pub struct SourceConnection {
    /// Highest height known to the source when the session opened.
    pub tip: Height,
    /// Height requests.
    pub requests: mpsc::Sender<Height>,
    /// Raw records, closed when the session ends.
    pub records: mpsc::Receiver<RawBlock>,
    /// The source's receive loop. Yields the requested heights it never
    /// answered, ascending.
    pub task: JoinHandle<Vec<Height>>,
}

/// Block source - outbound port.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Open a session and capture the tip.
    ///
    /// The session's task must stop once `shutdown` flips to `true` (or its
    /// sender is dropped), releasing the connection and closing `records`.
    /// Requests already taken off `requests` are answered before it stops;
    /// any it gives up on are returned by the task.
    async fn connect(
        &self,
        capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SourceConnection, IngestError>;

    /// Endpoint description for logs and errors.
    fn endpoint(&self) -> String;
}

/// Persisted-height index - outbound port.
pub trait HeightIndex: Send + Sync {
    /// Every height stored for `chain_id`.
    fn persisted_heights(&self, chain_id: &ChainId) -> Result<PersistedHeights, IngestError>;
}

/// Block store - outbound port.
///
/// Implementations block; the writer calls them from `spawn_blocking`.
pub trait BlockStore: Send + Sync {
    /// Insert or replace the block keyed on `(chain_id, height)`.
    fn upsert(&self, block: &DecodedBlock) -> Result<(), WriteError>;
}

/// Pipeline metrics - outbound port. Every method defaults to a no-op.
pub trait PipelineMetrics: Send + Sync {
    /// Tip captured for the run.
    fn tip_observed(&self, _tip: Height) {}
    /// Number of heights the run will request.
    fn gap_planned(&self, _missing: u64) {}
    /// A height was handed to the source.
    fn block_requested(&self) {}
    /// A block was persisted.
    fn block_written(&self, _above_tip: bool) {}
    /// Duration of one successful store call.
    fn write_duration(&self, _elapsed: Duration) {}
    /// A raw record was dropped.
    fn decode_failed(&self) {}
    /// A failed write is being retried.
    fn write_retried(&self) {}
    /// A write gave up after exhausting its attempts.
    fn write_abandoned(&self) {}
    /// A requested height was never answered.
    fn request_unanswered(&self) {}
}

/// Metrics sink that records nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl PipelineMetrics for NoopMetrics {}

// =============================================================================
// In-memory implementations for testing
// =============================================================================

/// In-memory block store with write-failure injection.
///
/// Clones share state, so a test can keep a handle after moving one into a
/// pipeline.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBlockStore {
    blocks: Arc<RwLock<BTreeMap<(ChainId, Height), DecodedBlock>>>,
    transient_failures: Arc<Mutex<HashMap<Height, u32>>>,
    broken_heights: Arc<RwLock<HashSet<Height>>>,
    index_unavailable: Arc<AtomicBool>,
    upsert_calls: Arc<AtomicU64>,
}

impl InMemoryBlockStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with empty blocks at `heights`.
    pub fn with_heights(chain_id: &ChainId, heights: impl IntoIterator<Item = Height>) -> Self {
        let store = Self::new();
        {
            let mut blocks = store.blocks.write();
            for height in heights {
                blocks.insert(
                    (chain_id.clone(), height),
                    DecodedBlock {
                        chain_id: chain_id.clone(),
                        height,
                        txs_results: Vec::new(),
                        begin_block_events: Vec::new(),
                        end_block_events: Vec::new(),
                        validator_updates: serde_json::Value::Null,
                        consensus_param_updates: serde_json::Value::Null,
                    },
                );
            }
        }
        store
    }

    /// Fail the next `times` writes of `height`.
    pub fn fail_writes(&self, height: Height, times: u32) {
        self.transient_failures.lock().insert(height, times);
    }

    /// Fail every write of `height`.
    pub fn break_height(&self, height: Height) {
        self.broken_heights.write().insert(height);
    }

    /// Make the height index unreadable.
    pub fn fail_index(&self) {
        self.index_unavailable.store(true, Ordering::SeqCst);
    }

    /// Stored heights for `chain_id`, ascending.
    pub fn heights(&self, chain_id: &ChainId) -> Vec<Height> {
        self.blocks
            .read()
            .keys()
            .filter(|(chain, _)| chain == chain_id)
            .map(|(_, height)| *height)
            .collect()
    }

    /// Stored block, if any.
    pub fn get(&self, chain_id: &ChainId, height: Height) -> Option<DecodedBlock> {
        self.blocks.read().get(&(chain_id.clone(), height)).cloned()
    }

    /// Total store calls, failed ones included.
    pub fn upsert_calls(&self) -> u64 {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

impl HeightIndex for InMemoryBlockStore {
    fn persisted_heights(&self, chain_id: &ChainId) -> Result<PersistedHeights, IngestError> {
        if self.index_unavailable.load(Ordering::SeqCst) {
            return Err(IngestError::Storage("height index unavailable".to_string()));
        }
        Ok(self.heights(chain_id).into_iter().collect())
    }
}

impl BlockStore for InMemoryBlockStore {
    fn upsert(&self, block: &DecodedBlock) -> Result<(), WriteError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        if self.broken_heights.read().contains(&block.height) {
            return Err(WriteError::Io(format!("height {} is unwritable", block.height)));
        }
        if let Some(remaining) = self.transient_failures.lock().get_mut(&block.height) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(WriteError::Io("transient write failure".to_string()));
            }
        }

        self.blocks
            .write()
            .insert((block.chain_id.clone(), block.height), block.clone());
        Ok(())
    }
}

/// Scripted block source simulating a node.
///
/// Answers requests with [`block_results_payload`] fixtures. Can reorder
/// answers within a window, reject heights, deliver duplicates, push live
/// records above the tip and drop the connection early.
#[derive(Clone, Debug)]
pub struct ScriptedSource {
    /// Tip reported on connect.
    pub tip: Height,
    /// Refuse to connect.
    pub should_fail: bool,
    /// Requests buffered before answering them in reverse order; 1 keeps order.
    pub reorder_window: usize,
    /// Heights answered with a JSON-RPC error.
    pub rejected: HashSet<Height>,
    /// Heights answered twice.
    pub duplicated: HashSet<Height>,
    /// Heights never answered.
    pub silenced: HashSet<Height>,
    /// Records pushed unprompted right after connect.
    pub live_heights: Vec<Height>,
    /// Close the feed after this many records.
    pub end_after: Option<usize>,
    requests_seen: Arc<Mutex<Vec<Height>>>,
}

impl ScriptedSource {
    /// In-order source reporting `tip`.
    pub fn new(tip: Height) -> Self {
        Self {
            tip,
            should_fail: false,
            reorder_window: 1,
            rejected: HashSet::new(),
            duplicated: HashSet::new(),
            silenced: HashSet::new(),
            live_heights: Vec::new(),
            end_after: None,
            requests_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Source that refuses connections.
    pub fn unreachable() -> Self {
        Self {
            should_fail: true,
            ..Self::new(0)
        }
    }

    /// Answer requests in reverse order, `window` at a time.
    pub fn with_reorder_window(mut self, window: usize) -> Self {
        self.reorder_window = window.max(1);
        self
    }

    /// Answer `height` with an RPC error.
    pub fn reject(mut self, height: Height) -> Self {
        self.rejected.insert(height);
        self
    }

    /// Answer `height` twice.
    pub fn duplicate(mut self, height: Height) -> Self {
        self.duplicated.insert(height);
        self
    }

    /// Never answer `height`.
    pub fn silence(mut self, height: Height) -> Self {
        self.silenced.insert(height);
        self
    }

    /// Push records for `heights` unprompted.
    pub fn with_live_heights(mut self, heights: impl IntoIterator<Item = Height>) -> Self {
        self.live_heights = heights.into_iter().collect();
        self
    }

    /// Close the feed after `records` records.
    pub fn end_after(mut self, records: usize) -> Self {
        self.end_after = Some(records);
        self
    }

    /// Heights requested so far, in request order.
    pub fn requests_seen(&self) -> Vec<Height> {
        self.requests_seen.lock().clone()
    }

    fn record_for(&self, height: Height) -> RawBlock {
        if self.rejected.contains(&height) {
            RawBlock::rejected(
                height,
                json!({
                    "code": -32603,
                    "message": "Internal error",
                    "data": format!("could not find results for height #{height}"),
                }),
            )
        } else {
            RawBlock::new(height, block_results_payload(height))
        }
    }

    async fn serve(
        self,
        mut requests: mpsc::Receiver<Height>,
        records: mpsc::Sender<RawBlock>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Vec<Height> {
        let mut feed = Feed {
            records,
            sent: 0,
            limit: self.end_after,
        };
        let mut unanswered = Vec::new();

        for &height in &self.live_heights {
            if !feed.push(self.record_for(height)).await {
                return unanswered;
            }
        }

        let mut pending = Vec::new();
        let mut open = true;
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    // Requests already taken off the channel are still answered.
                    self.flush(&mut pending, &mut feed).await;
                    break;
                }
                request = requests.recv(), if open => {
                    match request {
                        Some(height) => {
                            self.requests_seen.lock().push(height);
                            if self.silenced.contains(&height) {
                                unanswered.push(height);
                                continue;
                            }
                            pending.push(height);
                            if pending.len() >= self.reorder_window && !self.flush(&mut pending, &mut feed).await {
                                break;
                            }
                        }
                        None => {
                            open = false;
                            if !self.flush(&mut pending, &mut feed).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        unanswered.append(&mut pending);
        unanswered.sort_unstable();
        unanswered
    }

    /// Answers `pending` newest first. A height stays in `pending` until its
    /// record is on the feed.
    async fn flush(&self, pending: &mut Vec<Height>, feed: &mut Feed) -> bool {
        while let Some(&height) = pending.last() {
            if !feed.push(self.record_for(height)).await {
                return false;
            }
            pending.pop();
            if self.duplicated.contains(&height) && !feed.push(self.record_for(height)).await {
                return false;
            }
        }
        true
    }
}

struct Feed {
    records: mpsc::Sender<RawBlock>,
    sent: usize,
    limit: Option<usize>,
}

impl Feed {
    /// Returns `false` once the feed is closed.
    async fn push(&mut self, record: RawBlock) -> bool {
        if self.limit.is_some_and(|limit| self.sent >= limit) {
            return false;
        }
        if self.records.send(record).await.is_err() {
            return false;
        }
        self.sent += 1;
        true
    }
}

#[async_trait]
impl BlockSource for ScriptedSource {
    async fn connect(
        &self,
        capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SourceConnection, IngestError> {
        if self.should_fail {
            return Err(IngestError::Connect {
                endpoint: self.endpoint(),
                reason: "connection refused".to_string(),
            });
        }

        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (record_tx, record_rx) = mpsc::channel(capacity);
        let task = tokio::spawn(self.clone().serve(request_rx, record_tx, shutdown));

        Ok(SourceConnection {
            tip: self.tip,
            requests: request_tx,
            records: record_rx,
            task,
        })
    }

    fn endpoint(&self) -> String {
        "scripted://node".to_string()
    }
}
