//! Ledger data types: transactions, blocks, and the payload wrapper
//! carried inside `blockchain_concoin` gossip messages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Hex-encoded SHA-256 digest.
pub type Hash = String;

/// Account identifier. Plain usernames in this iteration.
pub type Username = String;

/// Signed coin amount. Balance deltas can be negative.
pub type Amount = i64;

/// A value transfer between two accounts.
///
/// The signature is base64-encoded DER ECDSA (P-256) over the canonical
/// JSON of `{from, to, amount}` — see [`crate::crypto::canonical_tx_bytes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Username,
    pub to: Username,
    pub amount: Amount,
    pub signature: String,
}

/// A proposed or accepted block.
///
/// `balances_delta` is a `BTreeMap` on purpose: the canonical block-hash
/// form serializes the map with sorted keys, and keeping it sorted in
/// memory makes the canonical form fall out of plain serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: Hash,
    #[serde(rename = "difficultyTarget")]
    pub difficulty_target: String,
    #[serde(rename = "balancesDelta")]
    pub balances_delta: BTreeMap<Username, Amount>,
    pub txs: Vec<Transaction>,
    pub nonce: String,
    pub miner: Username,
    pub reward: Amount,
    pub time: i64,
    #[serde(rename = "prevBlock", default, skip_serializing_if = "Option::is_none")]
    pub prev_block_hash: Option<Hash>,
}

/// Payload of a `blockchain_concoin` gossip message.
///
/// Externally tagged: `{"transaction": {...}}` or `{"block": {...}}`.
/// The chain hook owns decoding; unknown shapes are rejected there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainPayload {
    Transaction(Transaction),
    Block(Block),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        Block {
            hash: "0000abcd".into(),
            difficulty_target: "0000".into(),
            balances_delta: BTreeMap::from([("alice".into(), -10), ("bob".into(), 10)]),
            txs: vec![Transaction {
                from: "alice".into(),
                to: "bob".into(),
                amount: 10,
                signature: "c2ln".into(),
            }],
            nonce: "7".into(),
            miner: "bob".into(),
            reward: 1,
            time: 1_700_000_000,
            prev_block_hash: None,
        }
    }

    #[test]
    fn transaction_field_order_is_stable() {
        let tx = Transaction {
            from: "alice".into(),
            to: "bob".into(),
            amount: 40,
            signature: "c2ln".into(),
        };
        let json = serde_json::to_string(&tx).unwrap();
        assert_eq!(
            json,
            r#"{"from":"alice","to":"bob","amount":40,"signature":"c2ln"}"#
        );
    }

    #[test]
    fn block_roundtrip_without_parent() {
        let block = sample_block();
        let json = serde_json::to_string(&block).unwrap();
        assert!(!json.contains("prevBlock"));

        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn block_roundtrip_with_parent() {
        let mut block = sample_block();
        block.prev_block_hash = Some("0000ffff".into());
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"prevBlock\":\"0000ffff\""));

        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back.prev_block_hash.as_deref(), Some("0000ffff"));
    }

    #[test]
    fn balances_delta_serializes_sorted() {
        let mut block = sample_block();
        block.balances_delta = BTreeMap::from([
            ("zoe".into(), 1),
            ("adam".into(), -1),
            ("mia".into(), 0),
        ]);
        let json = serde_json::to_string(&block).unwrap();
        let adam = json.find("adam").unwrap();
        let mia = json.find("mia").unwrap();
        let zoe = json.find("zoe").unwrap();
        assert!(adam < mia && mia < zoe);
    }

    #[test]
    fn chain_payload_tags() {
        let payload = ChainPayload::Transaction(Transaction {
            from: "a".into(),
            to: "b".into(),
            amount: 1,
            signature: String::new(),
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("transaction").is_some());

        let block_payload = ChainPayload::Block(sample_block());
        let value = serde_json::to_value(&block_payload).unwrap();
        assert!(value.get("block").is_some());
    }
}
