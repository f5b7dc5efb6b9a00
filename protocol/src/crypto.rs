//! # Canonical Forms & Signatures
//!
//! Cryptographic plumbing shared by the validator, the chain hook, and
//! client-side signing helpers:
//!
//! - **Transaction signatures** — ECDSA over NIST P-256, DER-encoded,
//!   transported as base64. The signed payload is the canonical JSON of
//!   `{from, to, amount}` in exactly that field order, and the digest is
//!   SHA-256 (the standard P-256 ECDSA prehash).
//! - **Block hashes** — SHA-256 over a canonical JSON form with a fixed
//!   field order and sorted delta keys. The hex digest doubles as the
//!   proof-of-work subject: a valid block hash starts with the
//!   difficulty target.
//!
//! Canonical here means byte-for-byte reproducible: compact encoding, no
//! whitespace, field order pinned by struct declaration. Two nodes must
//! derive identical bytes from identical records or signatures and hashes
//! stop verifying across the network.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::model::{Amount, Block, Hash, Transaction, Username};

/// Errors during signature checks.
///
/// Intentionally coarse — callers get "which step failed", not an oracle
/// for why.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("malformed signature")]
    MalformedSignature,

    #[error("signature verification failed")]
    VerificationFailed,
}

// ---------------------------------------------------------------------------
// Transaction signing
// ---------------------------------------------------------------------------

/// The signable view of a transaction. Field order is the wire contract.
#[derive(Serialize)]
struct TxSigningForm<'a> {
    from: &'a str,
    to: &'a str,
    amount: Amount,
}

/// Canonical payload bytes a transaction signature commits to.
pub fn canonical_tx_bytes(from: &str, to: &str, amount: Amount) -> Vec<u8> {
    serde_json::to_vec(&TxSigningForm { from, to, amount }).unwrap_or_default()
}

/// Sign a transfer and return the base64-encoded DER signature.
///
/// The ECDSA implementation hashes the payload with SHA-256 internally
/// (RFC 6979 deterministic nonces — same key and payload, same signature).
pub fn sign_transfer(key: &SigningKey, from: &str, to: &str, amount: Amount) -> String {
    let payload = canonical_tx_bytes(from, to, amount);
    let signature: Signature = key.sign(&payload);
    BASE64.encode(signature.to_der().as_bytes())
}

/// Verify a transaction signature against a hex-encoded SEC1 P-256 point.
pub fn verify_tx_signature(public_key_hex: &str, tx: &Transaction) -> Result<(), SignatureError> {
    let key_bytes = hex::decode(public_key_hex).map_err(|_| SignatureError::InvalidPublicKey)?;
    let verifying_key =
        VerifyingKey::from_sec1_bytes(&key_bytes).map_err(|_| SignatureError::InvalidPublicKey)?;

    let der = BASE64
        .decode(&tx.signature)
        .map_err(|_| SignatureError::MalformedSignature)?;
    let signature = Signature::from_der(&der).map_err(|_| SignatureError::MalformedSignature)?;

    let payload = canonical_tx_bytes(&tx.from, &tx.to, tx.amount);
    verifying_key
        .verify(&payload, &signature)
        .map_err(|_| SignatureError::VerificationFailed)
}

/// Hex-encode a verifying key as an uncompressed SEC1 point, the format
/// ledger snapshots store under `public_keys`.
pub fn public_key_hex(key: &VerifyingKey) -> String {
    hex::encode(key.to_encoded_point(false).as_bytes())
}

// ---------------------------------------------------------------------------
// Block hashing
// ---------------------------------------------------------------------------

/// The hashable view of a block: every consensus field except the hash
/// itself, in the canonical order. `prevBlock` is omitted entirely for a
/// genesis extension, not serialized as null.
#[derive(Serialize)]
struct BlockDigestForm<'a> {
    #[serde(rename = "balancesDelta")]
    balances_delta: &'a std::collections::BTreeMap<Username, Amount>,
    #[serde(rename = "difficultyTarget")]
    difficulty_target: &'a str,
    miner: &'a str,
    nonce: &'a str,
    reward: Amount,
    time: i64,
    txs: &'a [Transaction],
    #[serde(rename = "prevBlock", skip_serializing_if = "Option::is_none")]
    prev_block_hash: Option<&'a Hash>,
}

/// Recompute a block's hash from its contents.
pub fn block_hash(block: &Block) -> Hash {
    let form = BlockDigestForm {
        balances_delta: &block.balances_delta,
        difficulty_target: &block.difficulty_target,
        miner: &block.miner,
        nonce: &block.nonce,
        reward: block.reward,
        time: block.time,
        txs: &block.txs,
        prev_block_hash: block.prev_block_hash.as_ref(),
    };
    let payload = serde_json::to_vec(&form).unwrap_or_default();
    sha256_hex(&payload)
}

/// Hex-encoded SHA-256 digest of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
