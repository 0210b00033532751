//! # Block Decoder
//!
//! Turns a `block_results` payload into a [`DecodedBlock`]. Pure and
//! deterministic in `(RawBlock, ChainId, AttributeEncoding)`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;

use crate::domain::{
    AbciEvent, AttributeEncoding, ChainId, DecodeError, DecodedBlock, EventAttribute, Height,
    RawBlock, TxResult,
};

/// Decoder bound to one chain.
#[derive(Clone, Debug)]
pub struct BlockDecoder {
    chain_id: ChainId,
    encoding: AttributeEncoding,
}

impl BlockDecoder {
    /// Create a decoder for `chain_id`.
    pub fn new(chain_id: ChainId, encoding: AttributeEncoding) -> Self {
        Self { chain_id, encoding }
    }

    /// Chain the decoder stamps on every block.
    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    /// Decode one raw block.
    pub fn decode(&self, raw: &RawBlock) -> Result<DecodedBlock, DecodeError> {
        decode_block(raw, &self.chain_id, self.encoding)
    }
}

/// Decode a raw `block_results` payload for `chain_id`.
pub fn decode_block(
    raw: &RawBlock,
    chain_id: &ChainId,
    encoding: AttributeEncoding,
) -> Result<DecodedBlock, DecodeError> {
    let object = raw
        .payload
        .as_object()
        .ok_or_else(|| DecodeError::Malformed("payload is not a JSON object".to_string()))?;

    if let Some(error) = object.get("error") {
        return Err(DecodeError::SourceRejected(rpc_error_message(error)));
    }

    let wire = WireBlockResults::deserialize(&raw.payload)
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let found = wire
        .height
        .to_u64()
        .ok_or_else(|| DecodeError::Malformed("height is not a non-negative integer".to_string()))?;
    if found != raw.height {
        return Err(DecodeError::HeightMismatch {
            expected: raw.height,
            found,
        });
    }

    let txs_results = wire
        .txs_results
        .unwrap_or_default()
        .into_iter()
        .map(|tx| decode_tx(tx, encoding))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DecodedBlock {
        chain_id: chain_id.clone(),
        height: found,
        txs_results,
        begin_block_events: decode_events(wire.begin_block_events, encoding)?,
        end_block_events: decode_events(wire.end_block_events, encoding)?,
        validator_updates: wire.validator_updates,
        consensus_param_updates: wire.consensus_param_updates,
    })
}

fn decode_tx(tx: WireTxResult, encoding: AttributeEncoding) -> Result<TxResult, DecodeError> {
    Ok(TxResult {
        code: tx.code,
        codespace: tx.codespace.unwrap_or_default(),
        log: tx.log.unwrap_or_default(),
        info: tx.info.unwrap_or_default(),
        data: tx.data,
        gas_wanted: gas(tx.gas_wanted, "gas_wanted")?,
        gas_used: gas(tx.gas_used, "gas_used")?,
        events: decode_events(tx.events, encoding)?,
    })
}

fn gas(value: Option<WireInt>, field: &str) -> Result<i64, DecodeError> {
    match value {
        None => Ok(0),
        Some(v) => v
            .to_i64()
            .ok_or_else(|| DecodeError::Malformed(format!("{field} is not an integer"))),
    }
}

fn decode_events(
    events: Option<Vec<WireEvent>>,
    encoding: AttributeEncoding,
) -> Result<Vec<AbciEvent>, DecodeError> {
    events
        .unwrap_or_default()
        .into_iter()
        .map(|event| {
            let attributes = event
                .attributes
                .unwrap_or_default()
                .into_iter()
                .map(|attr| {
                    Ok(EventAttribute {
                        key: decode_text(attr.key, encoding, &event.kind, "key")?,
                        value: decode_text(attr.value, encoding, &event.kind, "value")?,
                        index: attr.index,
                    })
                })
                .collect::<Result<Vec<_>, DecodeError>>()?;
            Ok(AbciEvent {
                kind: event.kind,
                attributes,
            })
        })
        .collect()
}

fn decode_text(
    text: Option<String>,
    encoding: AttributeEncoding,
    event: &str,
    part: &'static str,
) -> Result<String, DecodeError> {
    let text = text.unwrap_or_default();
    match encoding {
        AttributeEncoding::Plain => Ok(text),
        AttributeEncoding::Base64 => {
            let invalid = |reason: String| DecodeError::InvalidAttribute {
                event: event.to_string(),
                part,
                reason,
            };
            let bytes = STANDARD.decode(text.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            String::from_utf8(bytes).map_err(|e| invalid(e.to_string()))
        }
    }
}

fn rpc_error_message(error: &serde_json::Value) -> String {
    let message = error.get("message").and_then(|m| m.as_str());
    let data = error.get("data").and_then(|d| d.as_str());
    match (message, data) {
        (Some(m), Some(d)) => format!("{m}: {d}"),
        (Some(m), None) => m.to_string(),
        _ => error.to_string(),
    }
}

// =============================================================================
// Wire format (Tendermint RPC `block_results`)
// =============================================================================

/// Integers arrive as decimal strings from Tendermint, as numbers elsewhere.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireInt {
    Number(serde_json::Number),
    Text(String),
}

impl WireInt {
    fn to_u64(&self) -> Option<Height> {
        match self {
            WireInt::Number(n) => n.as_u64(),
            WireInt::Text(s) => s.trim().parse().ok(),
        }
    }

    fn to_i64(&self) -> Option<i64> {
        match self {
            WireInt::Number(n) => n.as_i64(),
            WireInt::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireBlockResults {
    height: WireInt,
    #[serde(default)]
    txs_results: Option<Vec<WireTxResult>>,
    #[serde(default)]
    begin_block_events: Option<Vec<WireEvent>>,
    #[serde(default)]
    end_block_events: Option<Vec<WireEvent>>,
    #[serde(default)]
    validator_updates: serde_json::Value,
    #[serde(default)]
    consensus_param_updates: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireTxResult {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    log: Option<String>,
    #[serde(default)]
    info: Option<String>,
    #[serde(default)]
    gas_wanted: Option<WireInt>,
    #[serde(default)]
    gas_used: Option<WireInt>,
    #[serde(default)]
    events: Option<Vec<WireEvent>>,
    #[serde(default)]
    codespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Option<Vec<WireAttribute>>,
}

#[derive(Debug, Deserialize)]
struct WireAttribute {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    index: bool,
}
