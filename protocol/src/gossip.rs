//! # Gossip Protocol
//!
//! Epidemic message dissemination with a bounded hop count. Every
//! message carries a TTL that drops by one per forwarding hop; a bounded
//! history of recently seen message ids stops re-propagation. Together
//! they guarantee a finite fan-out for any message, even on a cyclic
//! overlay.
//!
//! ## Pipeline
//!
//! An incoming message passes through, in order: TTL check, age check,
//! dedup (history, then storage), hook validation, history insertion,
//! persistence, spread to a random peer subset, and hook processing.
//! The first three produce *silent* drops — duplicates and expired
//! messages are normal operation, not errors.
//!
//! ## Spreading
//!
//! Spread targets are a random sample of `branching_factor` peers (all
//! peers when fewer are known). The POSTs run concurrently and are
//! joined before the call returns, so one broadcast never holds more
//! than `branching_factor` connections. Individual send failures are
//! logged and absorbed; the anti-entropy sync in the PEX layer covers
//! whatever push delivery misses.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::GossipConfig;
use crate::hooks::{HookManager, Phase};
use crate::model::{GossipMessage, Peer};
use crate::storage::Storage;

/// Errors surfaced to the caller of [`GossipProtocol::handle_message`].
///
/// Everything else (duplicates, expired TTLs, send failures) is absorbed
/// as normal operation.
#[derive(Debug, Error)]
pub enum GossipError {
    #[error("message validation failed: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Dedup history
// ---------------------------------------------------------------------------

/// Bounded map of recently seen message ids.
///
/// A monotonic sequence number per insertion gives an age order without
/// trusting wall-clock uniqueness; the B-tree index over sequences makes
/// oldest-first eviction O(log n).
struct MessageHistory {
    capacity: usize,
    entries: HashMap<String, HistoryEntry>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

struct HistoryEntry {
    seen_at: DateTime<Utc>,
    seq: u64,
}

impl MessageHistory {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    fn contains(&self, message_id: &str) -> bool {
        self.entries.contains_key(message_id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn insert(&mut self, message_id: &str) {
        if self.entries.contains_key(message_id) {
            return;
        }

        if self.capacity > 0 && self.entries.len() >= self.capacity {
            if let Some((_, oldest_id)) = self.order.pop_first() {
                self.entries.remove(&oldest_id);
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            message_id.to_string(),
            HistoryEntry {
                seen_at: Utc::now(),
                seq,
            },
        );
        self.order.insert(seq, message_id.to_string());
    }

    fn prune_older_than(&mut self, max_age: chrono::Duration) {
        let now = Utc::now();
        let expired: Vec<u64> = self
            .entries
            .values()
            .filter(|entry| now - entry.seen_at > max_age)
            .map(|entry| entry.seq)
            .collect();

        for seq in expired {
            if let Some(id) = self.order.remove(&seq) {
                self.entries.remove(&id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// The epidemic dissemination engine.
///
/// Owns the dedup history exclusively. The peer list is a read-mostly
/// snapshot refreshed by the PEX subscriber callback.
pub struct GossipProtocol {
    config: GossipConfig,
    node_id: String,
    history: RwLock<MessageHistory>,
    peers: RwLock<Vec<Peer>>,
    storage: Arc<Storage>,
    hooks: Arc<HookManager>,
    client: reqwest::Client,
}

impl GossipProtocol {
    /// Outbound POSTs must never hang a broadcast; the anti-entropy sync
    /// picks up anything a slow peer misses.
    const SEND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

    pub fn new(
        config: GossipConfig,
        node_id: impl Into<String>,
        storage: Arc<Storage>,
        hooks: Arc<HookManager>,
    ) -> Self {
        let history = MessageHistory::new(config.history_size);
        Self {
            config,
            node_id: node_id.into(),
            history: RwLock::new(history),
            peers: RwLock::new(Vec::new()),
            storage,
            hooks,
            client: reqwest::Client::builder()
                .timeout(Self::SEND_TIMEOUT)
                .build()
                .expect("default HTTP client configuration"),
        }
    }

    /// Replace the spread target set. Invoked by the PEX subscriber with
    /// a fresh snapshot after every peer-table mutation.
    pub fn update_peers(&self, peers: Vec<Peer>) {
        *self.peers.write() = peers;
    }

    /// Number of currently known spread targets.
    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Number of ids currently held in the dedup history.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    /// Process a message received from a peer.
    ///
    /// Drops (TTL, age, duplicate) return `Ok` — the peer did nothing
    /// wrong. Only a hook-validation failure is an error, because the
    /// message must then be neither persisted nor re-spread.
    pub async fn handle_message(&self, mut message: GossipMessage) -> Result<(), GossipError> {
        if message.ttl <= 0 {
            debug!(message_id = %message.message_id, "dropping message with exhausted ttl");
            return Ok(());
        }

        if Utc::now() - message.timestamp > self.config.message_max_age() {
            debug!(message_id = %message.message_id, "dropping message past max age");
            return Ok(());
        }

        if self.history.read().contains(&message.message_id)
            || self.storage.has_message(&message.message_id)
        {
            debug!(message_id = %message.message_id, "dropping duplicate message");
            return Ok(());
        }

        if !self.hooks.validate_message(&message, Phase::Pull) {
            warn!(message_id = %message.message_id, "message failed hook validation");
            return Err(GossipError::Validation(message.message_id));
        }

        self.history.write().insert(&message.message_id);

        // Persist before spreading: a crash in between re-emerges as a
        // missed propagation, which the pairwise sync repairs.
        if let Err(err) = self.storage.save_message(&message) {
            warn!(message_id = %message.message_id, error = %err, "failed to persist message");
        }

        message.ttl -= 1;
        self.spread(&message).await;

        self.hooks.process_message(&message, Phase::Pull);
        Ok(())
    }

    /// Synthesize a fresh locally originated message. The id is
    /// server-assigned and the TTL seeded from configuration.
    pub fn originate(&self, message_type: &str, payload: serde_json::Value) -> GossipMessage {
        let now = Utc::now();
        GossipMessage {
            message_id: format!("msg-{}", now.timestamp_nanos_opt().unwrap_or_default()),
            origin_id: self.node_id.clone(),
            timestamp: now,
            ttl: self.config.message_ttl,
            message_type: message_type.to_string(),
            payload,
        }
    }

    /// Record a locally accepted message in the history and push it to
    /// peers. Used by the node façade after its own validate-and-persist
    /// pipeline has run.
    pub async fn submit(&self, message: &GossipMessage) {
        self.history.write().insert(&message.message_id);
        self.spread(message).await;
    }

    /// Originator path: synthesize, record, and spread in one call.
    pub async fn broadcast(
        &self,
        message_type: &str,
        payload: serde_json::Value,
    ) -> GossipMessage {
        let message = self.originate(message_type, payload);
        self.submit(&message).await;
        message
    }

    /// Fire-and-forget fan-out to a random peer subset, joined before
    /// returning so a broadcast is bounded by `branching_factor`.
    async fn spread(&self, message: &GossipMessage) {
        let targets = self.select_spread_targets();
        if targets.is_empty() {
            debug!(message_id = %message.message_id, "no peers to spread message to");
            return;
        }

        let mut sends = JoinSet::new();
        for peer in targets {
            let client = self.client.clone();
            let message = message.clone();
            sends.spawn(async move {
                let url = format!("http://{}/gossip", peer.address);
                match client.post(&url).json(&message).send().await {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) => warn!(
                        peer = %peer.node_id,
                        status = %response.status(),
                        "peer rejected gossip message"
                    ),
                    Err(err) => warn!(
                        peer = %peer.node_id,
                        error = %err,
                        "failed to send gossip message"
                    ),
                }
            });
        }
        while sends.join_next().await.is_some() {}
    }

    fn select_spread_targets(&self) -> Vec<Peer> {
        let peers = self.peers.read();
        if peers.len() <= self.config.branching_factor {
            return peers.clone();
        }
        peers
            .choose_multiple(&mut rand::thread_rng(), self.config.branching_factor)
            .cloned()
            .collect()
    }

    /// Spawn the periodic history garbage collector.
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("starting gossip protocol");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.sync_interval());
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        this.history.write().prune_older_than(this.config.message_max_age());
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("gossip history gc stopped");
        });
    }
}
