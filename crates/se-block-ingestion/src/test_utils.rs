//! # Test Fixtures
//!
//! `block_results` payloads shaped like a Tendermint 0.34 node's answer.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};

use crate::domain::Height;

/// Number of transactions in a fixture block at `height`.
pub fn fixture_tx_count(height: Height) -> usize {
    (height % 3) as usize
}

/// A `block_results` result object for `height` with base64 attributes.
///
/// The transaction count cycles through 0, 1 and 2 so fixtures cover empty
/// blocks; every second transaction fails with code 5.
pub fn block_results_payload(height: Height) -> Value {
    let txs: Vec<Value> = (0..fixture_tx_count(height))
        .map(|i| {
            let (code, log, codespace) = if i % 2 == 1 {
                (5, "insufficient funds", "sdk")
            } else {
                (0, "[]", "")
            };
            let gas_used = (50_000 + i * 1_000).to_string();
            json!({
                "code": code,
                "data": null,
                "log": log,
                "info": "",
                "gas_wanted": "200000",
                "gas_used": gas_used,
                "events": [event("message", &[("action", "execute"), ("module", "compute")])],
                "codespace": codespace,
            })
        })
        .collect();

    let txs_results = if txs.is_empty() {
        Value::Null
    } else {
        Value::Array(txs)
    };
    json!({
        "height": height.to_string(),
        "txs_results": txs_results,
        "begin_block_events": [event("mint", &[("amount", "3113925uscrt")])],
        "end_block_events": null,
        "validator_updates": null,
        "consensus_param_updates": null,
    })
}

fn event(kind: &str, attributes: &[(&str, &str)]) -> Value {
    let attributes: Vec<Value> = attributes
        .iter()
        .map(|(key, value)| {
            json!({
                "key": STANDARD.encode(key),
                "value": STANDARD.encode(value),
                "index": true,
            })
        })
        .collect();
    json!({ "type": kind, "attributes": attributes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::decode_block;
    use crate::domain::{AttributeEncoding, ChainId, RawBlock};

    #[test]
    fn test_fixture_decodes() {
        let chain = ChainId::parse("secret-4").unwrap();
        for height in 1..=6 {
            let raw = RawBlock::new(height, block_results_payload(height));
            let block = decode_block(&raw, &chain, AttributeEncoding::Base64).unwrap();
            assert_eq!(block.tx_count(), fixture_tx_count(height));
            assert_eq!(block.begin_block_events[0].attributes[0].key, "amount");
        }
    }

    #[test]
    fn test_fixture_contains_failed_tx() {
        let chain = ChainId::parse("secret-4").unwrap();
        let raw = RawBlock::new(2, block_results_payload(2));
        let block = decode_block(&raw, &chain, AttributeEncoding::Base64).unwrap();
        assert_eq!(block.failed_tx_count(), 1);
    }
}
