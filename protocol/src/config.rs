//! # Node Configuration
//!
//! Every tunable of a running node lives here, together with the on-disk
//! layout it owns. The configuration is JSON-persisted to
//! `<data_dir>/config/config.json` on startup so an operator can inspect
//! exactly what a node is running with.
//!
//! Durations are stored as integer `_secs` fields — JSON has no native
//! duration type, and seconds keep the file human-editable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or persisting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Gossip
// ---------------------------------------------------------------------------

/// Tunables for the epidemic dissemination layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Number of peers each message is forwarded to per hop.
    pub branching_factor: usize,
    /// Initial hop budget stamped on locally originated messages.
    pub message_ttl: i32,
    /// Period of the dedup-history garbage collection tick, in seconds.
    pub sync_interval_secs: u64,
    /// Maximum number of message ids kept in the dedup history.
    pub history_size: usize,
    /// Messages older than this are dropped on arrival, in seconds.
    pub message_max_age_secs: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            branching_factor: 4,
            message_ttl: 5,
            sync_interval_secs: 5,
            history_size: 10_000,
            message_max_age_secs: 30 * 60,
        }
    }
}

impl GossipConfig {
    /// History-GC period as a [`Duration`].
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Drop threshold for message age.
    pub fn message_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.message_max_age_secs as i64)
    }
}

// ---------------------------------------------------------------------------
// PEX
// ---------------------------------------------------------------------------

/// Tunables for the peer-exchange layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PexConfig {
    /// Period between outgoing PEX exchanges, in seconds. Shortened 5x
    /// while the peer count is below `low_connectivity_threshold`.
    pub exchange_interval_secs: u64,
    /// Maximum number of peers shared per exchange (self excluded).
    pub max_peers_per_exchange: usize,
    /// Peers not seen for this long are evicted, in seconds.
    pub peer_ttl_secs: u64,
    /// Capacity of the peer table.
    pub max_peers: usize,
    /// Below this peer count the node exchanges more aggressively.
    pub low_connectivity_threshold: usize,
}

impl Default for PexConfig {
    fn default() -> Self {
        Self {
            exchange_interval_secs: 15,
            max_peers_per_exchange: 10,
            peer_ttl_secs: 3 * 60 * 60,
            max_peers: 100,
            low_connectivity_threshold: 10,
        }
    }
}

impl PexConfig {
    /// Exchange period as a [`Duration`].
    pub fn exchange_interval(&self) -> Duration {
        Duration::from_secs(self.exchange_interval_secs)
    }

    /// Peer lifetime threshold.
    pub fn peer_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.peer_ttl_secs as i64)
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Complete configuration of one node process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Stable identifier announced to peers.
    pub node_id: String,
    /// HTTP listen port.
    pub port: u16,
    /// Root of all node state on disk.
    pub data_dir: PathBuf,
    /// Addresses injected into the peer table when it is empty at startup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seed_nodes: Vec<String>,
    pub gossip: GossipConfig,
    pub pex: PexConfig,
}

impl NodeConfig {
    /// Default configuration for a node listening on `port`, optionally
    /// seeded from a localhost node on `seed_port` (0 disables seeding).
    pub fn for_port(port: u16, seed_port: u16) -> Self {
        let mut seed_nodes = Vec::new();
        if seed_port > 0 && seed_port != port {
            seed_nodes.push(format!("127.0.0.1:{seed_port}"));
        }

        Self {
            node_id: format!("node-{port}"),
            port,
            data_dir: PathBuf::from(".nodedata").join(format!("port{port}")),
            seed_nodes,
            gossip: GossipConfig::default(),
            pex: PexConfig::default(),
        }
    }

    /// The address this node announces about itself.
    pub fn self_address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Persist this configuration to `<data_dir>/config/config.json`.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_dir = self.data_dir.join("config");
        std::fs::create_dir_all(&config_dir)?;
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(config_dir.join("config.json"), data)?;
        Ok(())
    }

    /// Create the directory tree the node writes into.
    pub fn create_data_dirs(&self) -> Result<(), ConfigError> {
        for dir in ["config", "peers", "messages"] {
            std::fs::create_dir_all(self.data_dir.join(dir))?;
        }
        Ok(())
    }

    /// Remove all node state. Used by `--clean` starts.
    pub fn clean_data_dirs(&self) -> Result<(), ConfigError> {
        if self.data_dir.exists() {
            std::fs::remove_dir_all(&self.data_dir)?;
        }
        Ok(())
    }
}
