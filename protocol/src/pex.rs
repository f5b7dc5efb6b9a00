//! # PEX — Peer Exchange
//!
//! Membership management for the overlay: discovering peers, vetting
//! them, churning out the dead, and keeping the gossip layer supplied
//! with fresh spread targets.
//!
//! ## Lifecycle
//!
//! At startup the table is seeded from storage (stale records skipped)
//! or, when empty, from the configured seed addresses. From then on two
//! loops run: a peer *exchange* loop that periodically trades peer lists
//! with one random neighbor (more aggressively while connectivity is
//! low), and an hourly *cleanup* loop that evicts peers not seen within
//! their TTL.
//!
//! ## Admission
//!
//! Every candidate peer — from a PEX response, a PEX request, or a seed
//! exchange — passes through [`PexProtocol::add_peer`]: the node's own
//! address is refused, the address must parse as `host:port` with an IP
//! or `localhost` host, and the peer must answer `GET /ping` within two
//! seconds. Admission of a new peer also schedules a pairwise message
//! sync, the anti-entropy counterweight to push gossip: whatever the
//! epidemic path missed is fetched here.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::PexConfig;
use crate::hooks::{HookManager, Phase};
use crate::model::{GossipMessage, Peer, PexMessage, PexMessageType};
use crate::storage::{Storage, StorageError};

/// Errors from PEX network operations. All of them are absorbed by the
/// loops that trigger them — a failed exchange or sync is logged and the
/// next tick tries again.
#[derive(Debug, Error)]
pub enum PexError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("peer returned status {0}")]
    BadStatus(reqwest::StatusCode),

    #[error("message validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Subscriber invoked with a table snapshot after every mutation.
type PeerListCallback = Box<dyn Fn(Vec<Peer>) + Send + Sync>;

/// The peer-exchange engine. Exclusive owner of the peer table.
pub struct PexProtocol {
    config: PexConfig,
    node_id: String,
    self_address: String,
    seed_nodes: Vec<String>,
    table: RwLock<HashMap<String, Peer>>,
    storage: Arc<Storage>,
    hooks: Arc<HookManager>,
    on_peers_list: RwLock<Option<PeerListCallback>>,
    client: reqwest::Client,
    probe: reqwest::Client,
}

impl PexProtocol {
    /// Liveness probe budget for `GET /ping`.
    const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

    /// General outbound budget for exchanges and message sync.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Period of the stale-peer cleanup loop.
    const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

    /// Only peers seen this recently are shared in PEX responses.
    const SHARE_WINDOW_MINUTES: i64 = 30;

    pub fn new(
        config: PexConfig,
        node_id: impl Into<String>,
        self_address: impl Into<String>,
        seed_nodes: Vec<String>,
        storage: Arc<Storage>,
        hooks: Arc<HookManager>,
    ) -> Self {
        Self {
            config,
            node_id: node_id.into(),
            self_address: self_address.into(),
            seed_nodes,
            table: RwLock::new(HashMap::new()),
            storage,
            hooks,
            on_peers_list: RwLock::new(None),
            client: reqwest::Client::builder()
                .timeout(Self::REQUEST_TIMEOUT)
                .build()
                .expect("default HTTP client configuration"),
            probe: reqwest::Client::builder()
                .timeout(Self::PROBE_TIMEOUT)
                .build()
                .expect("default HTTP client configuration"),
        }
    }

    /// Install the subscriber notified after every table mutation. The
    /// gossip layer uses this to refresh its spread targets.
    pub fn set_on_peers_list(&self, callback: impl Fn(Vec<Peer>) + Send + Sync + 'static) {
        *self.on_peers_list.write() = Some(Box::new(callback));
    }

    /// Snapshot of all known peers.
    pub fn peers(&self) -> Vec<Peer> {
        self.table.read().values().cloned().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.table.read().len()
    }

    // -- Startup -------------------------------------------------------------

    /// Fill the table from storage, falling back to the configured seed
    /// nodes when nothing (fresh) was persisted.
    pub fn bootstrap(&self) {
        self.load_peers_from_storage();

        if self.table.read().is_empty() {
            info!("no stored peers, injecting seed nodes");
            self.add_seed_nodes();
        }

        info!(peers = self.peer_count(), "peer table bootstrapped");
        self.notify_peers_updated();
    }

    fn load_peers_from_storage(&self) {
        let stored = match self.storage.list_peers() {
            Ok(peers) => peers,
            Err(err) => {
                warn!(error = %err, "failed to load peers from storage");
                return;
            }
        };

        let mut table = self.table.write();
        for peer in stored {
            if Utc::now() - peer.last_seen > self.config.peer_ttl() {
                debug!(peer = %peer.node_id, "skipping expired stored peer");
                continue;
            }
            if peer.address == self.self_address {
                continue;
            }
            table.insert(peer.node_id.clone(), peer);
        }
        info!(peers = table.len(), "loaded peers from storage");
    }

    fn add_seed_nodes(&self) {
        let mut table = self.table.write();
        for address in &self.seed_nodes {
            if *address == self.self_address {
                debug!(%address, "skipping own address in seed list");
                continue;
            }
            let peer = Peer::new(format!("seed-{address}"), address.clone());
            info!(%address, "added seed node");
            table.insert(peer.node_id.clone(), peer);
        }
    }

    /// Run bootstrap and spawn the exchange and cleanup loops.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!("starting pex protocol");
        self.bootstrap();

        let this = Arc::clone(self);
        let mut exchange_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                // Re-evaluated every round: low connectivity shortens the
                // wait fivefold until the table fills back up.
                let mut interval = this.config.exchange_interval();
                if this.peer_count() < this.config.low_connectivity_threshold {
                    interval /= 5;
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => this.exchange_once().await,
                    _ = exchange_shutdown.changed() => break,
                }
            }
            debug!("pex exchange loop stopped");
        });

        let this = Arc::clone(self);
        let mut cleanup_shutdown = shutdown;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Self::CLEANUP_INTERVAL);
            ticker.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => this.cleanup_inactive_peers(),
                    _ = cleanup_shutdown.changed() => break,
                }
            }
            debug!("pex cleanup loop stopped");
        });
    }

    // -- Admission -----------------------------------------------------------

    /// Vet and admit a candidate peer. Returns whether the table changed.
    pub async fn add_peer(self: &Arc<Self>, peer: Peer) -> bool {
        debug!(peer = %peer.node_id, address = %peer.address, "considering peer");

        if peer.address == self.self_address {
            debug!(address = %peer.address, "refusing own address");
            return false;
        }

        if !is_valid_address(&peer.address) {
            warn!(address = %peer.address, "refusing malformed peer address");
            return false;
        }

        if !self.probe_peer(&peer.address).await {
            debug!(address = %peer.address, "peer did not answer ping");
            return false;
        }

        if !self.admit(peer.clone()) {
            return false;
        }

        // Persistence and the pairwise sync both run off the hot path.
        let storage = Arc::clone(&self.storage);
        let persisted = peer.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(err) = storage.save_peer(&persisted) {
                warn!(peer = %persisted.node_id, error = %err, "failed to persist peer");
            }
        });

        let this = Arc::clone(self);
        let sync_target = peer.clone();
        tokio::spawn(async move {
            if let Err(err) = this.sync_messages_with_peer(&sync_target).await {
                warn!(peer = %sync_target.node_id, error = %err, "message sync failed");
            }
        });

        self.notify_peers_updated();
        true
    }

    /// Table-only admission: newer existing records win, and a full
    /// table displaces its oldest entry for a new node id.
    fn admit(&self, peer: Peer) -> bool {
        let mut table = self.table.write();

        if let Some(existing) = table.get(&peer.node_id) {
            if existing.last_seen > peer.last_seen {
                debug!(peer = %peer.node_id, "existing record is newer, keeping it");
                return false;
            }
        } else if table.len() >= self.config.max_peers {
            let oldest = table
                .values()
                .min_by_key(|candidate| candidate.last_seen)
                .map(|candidate| candidate.node_id.clone());
            if let Some(oldest_id) = oldest {
                info!(evicted = %oldest_id, "peer table full, evicting oldest");
                table.remove(&oldest_id);
            }
        }

        info!(peer = %peer.node_id, address = %peer.address, "peer admitted");
        table.insert(peer.node_id.clone(), peer);
        true
    }

    /// `GET /ping` within [`Self::PROBE_TIMEOUT`].
    async fn probe_peer(&self, address: &str) -> bool {
        let url = format!("http://{address}/ping");
        match self.probe.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    // -- Exchange ------------------------------------------------------------

    /// One round of the exchange loop: pick a random peer and trade lists.
    async fn exchange_once(self: &Arc<Self>) {
        let target = {
            let table = self.table.read();
            let peers: Vec<Peer> = table.values().cloned().collect();
            peers.choose(&mut rand::thread_rng()).cloned()
        };

        let Some(target) = target else {
            warn!("no peers available for exchange");
            return;
        };

        debug!(peer = %target.node_id, "exchanging peers");
        self.send_pex_request(&target).await;
    }

    /// POST a PEX request carrying only our self-descriptor and fold the
    /// response's peer list back through admission.
    async fn send_pex_request(self: &Arc<Self>, peer: &Peer) {
        let request = PexMessage {
            message_id: format!("pex-req-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
            kind: PexMessageType::Request,
            timestamp: Utc::now(),
            peers: vec![self.self_descriptor()],
        };

        let url = format!("http://{}/pex", peer.address);
        let response = match self.client.post(&url).json(&request).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(peer = %peer.node_id, error = %err, "pex request failed");
                return;
            }
        };

        self.touch_peer(&peer.node_id);

        if !response.status().is_success() {
            warn!(peer = %peer.node_id, status = %response.status(), "pex request rejected");
            return;
        }

        let reply: PexMessage = match response.json().await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(peer = %peer.node_id, error = %err, "undecodable pex response");
                return;
            }
        };

        info!(peer = %peer.node_id, received = reply.peers.len(), "pex response received");
        let mut added = 0;
        for candidate in reply.peers {
            if self.add_peer(candidate).await {
                added += 1;
            }
        }
        info!(peer = %peer.node_id, added, "pex exchange complete");
    }

    /// Serve an incoming PEX request: admit what the requester shared,
    /// answer with a recent random sample plus our self-descriptor.
    pub async fn handle_pex_request(self: &Arc<Self>, request: PexMessage) -> PexMessage {
        info!(received = request.peers.len(), "handling pex request");

        let mut added = 0;
        for candidate in request.peers {
            if self.add_peer(candidate).await {
                added += 1;
            }
        }
        debug!(added, "admitted peers from pex request");

        let mut shared = self.random_recent_peers(self.config.max_peers_per_exchange);
        shared.push(self.self_descriptor());

        PexMessage {
            message_id: format!("pex-res-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
            kind: PexMessageType::Response,
            timestamp: Utc::now(),
            peers: shared,
        }
    }

    /// A random sample of peers seen within the share window.
    fn random_recent_peers(&self, count: usize) -> Vec<Peer> {
        let window = chrono::Duration::minutes(Self::SHARE_WINDOW_MINUTES);
        let table = self.table.read();
        let recent: Vec<Peer> = table
            .values()
            .filter(|peer| Utc::now() - peer.last_seen < window)
            .cloned()
            .collect();

        if recent.len() <= count {
            return recent;
        }
        recent
            .choose_multiple(&mut rand::thread_rng(), count)
            .cloned()
            .collect()
    }

    // -- Maintenance ---------------------------------------------------------

    /// Evict peers not seen within their TTL.
    fn cleanup_inactive_peers(&self) {
        let ttl = self.config.peer_ttl();
        let evicted = {
            let mut table = self.table.write();
            let before = table.len();
            table.retain(|_, peer| Utc::now() - peer.last_seen <= ttl);
            before - table.len()
        };

        if evicted > 0 {
            info!(evicted, "evicted inactive peers");
        }
        self.notify_peers_updated();
    }

    /// Refresh a peer's `last_seen` after successful contact and persist
    /// the update off the hot path.
    fn touch_peer(&self, node_id: &str) {
        let refreshed = {
            let mut table = self.table.write();
            match table.get_mut(node_id) {
                Some(peer) => {
                    peer.last_seen = Utc::now();
                    Some(peer.clone())
                }
                None => None,
            }
        };

        if let Some(peer) = refreshed {
            let storage = Arc::clone(&self.storage);
            tokio::task::spawn_blocking(move || {
                if let Err(err) = storage.save_peer(&peer) {
                    warn!(peer = %peer.node_id, error = %err, "failed to persist peer refresh");
                }
            });
        }
    }

    fn self_descriptor(&self) -> Peer {
        Peer::new(self.node_id.clone(), self.self_address.clone())
    }

    fn notify_peers_updated(&self) {
        // Snapshot first so the callback never runs under the table lock.
        let snapshot: Vec<Peer> = self.table.read().values().cloned().collect();
        if let Some(callback) = self.on_peers_list.read().as_ref() {
            callback(snapshot);
        }
    }

    // -- Anti-entropy sync ---------------------------------------------------

    /// Fetch every message the peer has that we do not, validating and
    /// persisting each. A failure on one message skips it and moves on.
    async fn sync_messages_with_peer(&self, peer: &Peer) -> Result<(), PexError> {
        info!(peer = %peer.node_id, "starting message sync");

        let local: HashSet<String> = self.storage.list_message_ids()?.into_iter().collect();

        let url = format!("http://{}/messages", peer.address);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(PexError::BadStatus(response.status()));
        }
        let remote: Vec<String> = response.json().await?;

        let mut synced = 0;
        for message_id in remote {
            if local.contains(&message_id) {
                continue;
            }
            match self.download_message(peer, &message_id).await {
                Ok(()) => synced += 1,
                Err(err) => {
                    warn!(peer = %peer.node_id, %message_id, error = %err, "skipping unsyncable message");
                }
            }
        }

        info!(peer = %peer.node_id, synced, "message sync complete");
        Ok(())
    }

    async fn download_message(&self, peer: &Peer, message_id: &str) -> Result<(), PexError> {
        let url = format!("http://{}/messages/{}", peer.address, message_id);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(PexError::BadStatus(response.status()));
        }
        let message: GossipMessage = response.json().await?;

        if !self.hooks.validate_message(&message, Phase::Loaded) {
            return Err(PexError::Validation(message.message_id));
        }

        self.storage.save_message(&message)?;
        self.hooks.process_message(&message, Phase::Loaded);
        Ok(())
    }
}

/// Whether an address is a well-formed `host:port` with an IP or
/// `localhost` host.
fn is_valid_address(address: &str) -> bool {
    let Some((host, port)) = address.rsplit_once(':') else {
        return false;
    };
    if port.parse::<u16>().map(|p| p == 0).unwrap_or(true) {
        return false;
    }
    host == "localhost" || host.parse::<IpAddr>().is_ok()
}
