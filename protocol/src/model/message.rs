//! Overlay message types: peers, gossip envelopes, and PEX exchanges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A known network participant.
///
/// A peer table holds at most one entry per `node_id`, and a node never
/// lists its own address. `last_seen` drives both TTL-based eviction and
/// oldest-first displacement when the table is full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    /// Stable node identifier, e.g. `node-3000` or `seed-127.0.0.1:3001`.
    pub node_id: String,
    /// Reachable `host:port` address.
    pub address: String,
    /// Last successful contact, UTC.
    pub last_seen: DateTime<Utc>,
}

impl Peer {
    /// Convenience constructor stamping `last_seen` with the current time.
    pub fn new(node_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
            last_seen: Utc::now(),
        }
    }
}

/// An epidemic-protocol envelope.
///
/// Immutable once created, except for `ttl` which is decremented by
/// exactly one on every forwarding hop. `message_id` is the
/// deduplication key; a message is never re-persisted under a new id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipMessage {
    /// Opaque unique identifier; the dedup key.
    pub message_id: String,
    /// Node id of the originator.
    pub origin_id: String,
    /// Creation time, UTC.
    pub timestamp: DateTime<Utc>,
    /// Remaining hop budget. Messages arriving with `ttl <= 0` are dropped.
    pub ttl: i32,
    /// Tag selecting which hooks handle the payload.
    pub message_type: String,
    /// Opaque structured payload; decoded by the hook owning `message_type`.
    pub payload: serde_json::Value,
}

/// Discriminator for the two PEX message directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PexMessageType {
    #[serde(rename = "pex_request")]
    Request,
    #[serde(rename = "pex_response")]
    Response,
}

/// A peer-exchange message. Ephemeral — never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PexMessage {
    pub message_id: String,
    #[serde(rename = "type")]
    pub kind: PexMessageType,
    pub timestamp: DateTime<Utc>,
    pub peers: Vec<Peer>,
}
