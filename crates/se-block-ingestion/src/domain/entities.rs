//! # Domain Entities
//!
//! Records flowing through the pipeline: [`RawBlock`] from the source,
//! [`DecodedBlock`] to the store.

use serde::{Deserialize, Serialize};

use super::value_objects::{ChainId, Height};

/// Block results as received from the source.
///
/// Opaque to the pipeline except for `height`; the payload is only
/// interpreted by the decoder.
#[derive(Clone, Debug, PartialEq)]
pub struct RawBlock {
    /// Height the source delivered this payload for.
    pub height: Height,
    /// JSON `result` of the `block_results` call, or `{"error": ...}`.
    pub payload: serde_json::Value,
}

impl RawBlock {
    /// Wrap a payload received for `height`.
    pub fn new(height: Height, payload: serde_json::Value) -> Self {
        Self { height, payload }
    }

    /// Record standing in for a request the node refused.
    pub fn rejected(height: Height, error: serde_json::Value) -> Self {
        Self {
            height,
            payload: serde_json::json!({ "error": error }),
        }
    }
}

/// One key/value pair attached to an ABCI event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    /// Attribute key.
    pub key: String,
    /// Attribute value.
    pub value: String,
    /// Whether the node indexed this attribute.
    pub index: bool,
}

/// ABCI event emitted during block execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciEvent {
    /// Event type (e.g. `transfer`, `wasm`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Decoded attributes.
    pub attributes: Vec<EventAttribute>,
}

/// Execution result of one transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    /// ABCI response code (0 = success).
    pub code: u32,
    /// Module namespace of a failure code.
    pub codespace: String,
    /// Raw log.
    pub log: String,
    /// Additional info.
    pub info: String,
    /// Response data (base64, as returned).
    pub data: Option<String>,
    /// Gas requested.
    pub gas_wanted: i64,
    /// Gas consumed.
    pub gas_used: i64,
    /// Events emitted by the transaction.
    pub events: Vec<AbciEvent>,
}

impl TxResult {
    /// Whether the transaction succeeded.
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Storage-ready block results for one height.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodedBlock {
    /// Chain the block belongs to.
    pub chain_id: ChainId,
    /// Block height.
    pub height: Height,
    /// Per-transaction results in block order.
    pub txs_results: Vec<TxResult>,
    /// BeginBlock events.
    pub begin_block_events: Vec<AbciEvent>,
    /// EndBlock events.
    pub end_block_events: Vec<AbciEvent>,
    /// Validator set changes, as returned by the node.
    pub validator_updates: serde_json::Value,
    /// Consensus parameter changes, as returned by the node.
    pub consensus_param_updates: serde_json::Value,
}

impl DecodedBlock {
    /// Number of transactions in the block.
    pub fn tx_count(&self) -> usize {
        self.txs_results.len()
    }

    /// Number of failed transactions.
    pub fn failed_tx_count(&self) -> usize {
        self.txs_results.iter().filter(|tx| !tx.is_success()).count()
    }
}
