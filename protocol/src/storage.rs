//! # File-Backed Storage
//!
//! Content-addressed persistence for the two record families a node owns:
//!
//! | Family     | Path                          | Semantics                  |
//! |------------|-------------------------------|----------------------------|
//! | peers      | `peers/<node_id>.json`        | overwritten on update      |
//! | messages   | `messages/<message_id>.json`  | write-once, idempotent     |
//!
//! Records are pretty-printed JSON, one file per record. Writers serialize
//! per family through a reader-writer lock; readers run in parallel.
//! Corrupt files never fail enumeration — they are skipped with a warning
//! so one bad record cannot take the node down.

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

use crate::model::{GossipMessage, Peer};

/// Errors raised by storage operations.
///
/// `NotFound` is deliberately distinct from `Io`: a missing record is an
/// expected condition (HTTP 404 material), a failed read is not.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid record id: {0}")]
    InvalidId(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// File-backed store rooted at a node's data directory.
pub struct Storage {
    data_dir: PathBuf,
    peers_lock: RwLock<()>,
    messages_lock: RwLock<()>,
}

impl Storage {
    /// Create a store over `data_dir`. Directories are created lazily on
    /// first write, so constructing a store never fails.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            peers_lock: RwLock::new(()),
            messages_lock: RwLock::new(()),
        }
    }

    // -- Peers ---------------------------------------------------------------

    /// Persist a peer record, overwriting any previous one.
    pub fn save_peer(&self, peer: &Peer) -> Result<(), StorageError> {
        let path = self.record_path("peers", &peer.node_id)?;
        let data = serde_json::to_vec_pretty(peer)?;

        let _guard = self.peers_lock.write();
        std::fs::create_dir_all(self.data_dir.join("peers"))?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Enumerate all parseable peer records. Corrupt files are skipped
    /// with a warning; a missing directory yields an empty list.
    pub fn list_peers(&self) -> Result<Vec<Peer>, StorageError> {
        let _guard = self.peers_lock.read();
        let dir = self.data_dir.join("peers");
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut peers = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match read_record::<Peer>(&path) {
                Ok(peer) => peers.push(peer),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping corrupt peer record"),
            }
        }
        Ok(peers)
    }

    // -- Messages ------------------------------------------------------------

    /// Persist a gossip message. Re-writes are permitted and idempotent:
    /// the same message always produces the same file content.
    pub fn save_message(&self, message: &GossipMessage) -> Result<(), StorageError> {
        let path = self.record_path("messages", &message.message_id)?;
        let data = serde_json::to_vec_pretty(message)?;

        let _guard = self.messages_lock.write();
        std::fs::create_dir_all(self.data_dir.join("messages"))?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Fetch a stored message by id.
    pub fn get_message(&self, message_id: &str) -> Result<GossipMessage, StorageError> {
        let path = self.record_path("messages", message_id)?;

        let _guard = self.messages_lock.read();
        match std::fs::read(&path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(message_id.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// List the ids of all stored messages (file stems, extension stripped).
    pub fn list_message_ids(&self) -> Result<Vec<String>, StorageError> {
        let _guard = self.messages_lock.read();
        let dir = self.data_dir.join("messages");
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        Ok(ids)
    }

    /// Cheap existence check (a `stat`, no parse).
    pub fn has_message(&self, message_id: &str) -> bool {
        match self.record_path("messages", message_id) {
            Ok(path) => {
                let _guard = self.messages_lock.read();
                path.is_file()
            }
            Err(_) => false,
        }
    }

    /// Whether a stored message's age exceeds `max_age`.
    pub fn is_message_expired(
        &self,
        message_id: &str,
        max_age: chrono::Duration,
    ) -> Result<bool, StorageError> {
        let message = self.get_message(message_id)?;
        Ok(Utc::now() - message.timestamp > max_age)
    }

    // -- Internals -----------------------------------------------------------

    /// Resolve `<data_dir>/<family>/<id>.json`, rejecting ids that could
    /// escape the family directory. Record ids come off the wire.
    fn record_path(&self, family: &str, id: &str) -> Result<PathBuf, StorageError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(StorageError::InvalidId(id.to_string()));
        }
        Ok(self.data_dir.join(family).join(format!("{id}.json")))
    }
}

/// Read and parse one JSON record file.
fn read_record<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_message(id: &str) -> GossipMessage {
        GossipMessage {
            message_id: id.to_string(),
            origin_id: "node-3000".into(),
            timestamp: Utc::now(),
            ttl: 5,
            message_type: "user_message".into(),
            payload: serde_json::json!({"text": "hi"}),
        }
    }

    #[test]
    fn save_and_get_message() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        let msg = make_message("msg-1");
        storage.save_message(&msg).unwrap();

        let back = storage.get_message("msg-1").unwrap();
        assert_eq!(back.message_id, "msg-1");
        assert_eq!(back.payload, msg.payload);
    }

    #[test]
    fn missing_message_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        match storage.get_message("nope") {
            Err(StorageError::NotFound(id)) => assert_eq!(id, "nope"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn save_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        let msg = make_message("msg-2");
        storage.save_message(&msg).unwrap();
        let first = std::fs::read(dir.path().join("messages/msg-2.json")).unwrap();

        storage.save_message(&msg).unwrap();
        let second = std::fs::read(dir.path().join("messages/msg-2.json")).unwrap();

        assert_eq!(first, second);
        assert_eq!(storage.list_message_ids().unwrap().len(), 1);
    }

    #[test]
    fn has_message_checks_existence() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        assert!(!storage.has_message("msg-3"));
        storage.save_message(&make_message("msg-3")).unwrap();
        assert!(storage.has_message("msg-3"));
    }

    #[test]
    fn list_message_ids_strips_extension() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        storage.save_message(&make_message("msg-a")).unwrap();
        storage.save_message(&make_message("msg-b")).unwrap();

        let mut ids = storage.list_message_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["msg-a", "msg-b"]);
    }

    #[test]
    fn empty_store_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("never-created"));

        assert!(storage.list_message_ids().unwrap().is_empty());
        assert!(storage.list_peers().unwrap().is_empty());
    }

    #[test]
    fn corrupt_message_skipped_on_enumeration_but_listed_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        storage.save_message(&make_message("msg-good")).unwrap();
        std::fs::write(dir.path().join("messages/msg-bad.json"), b"{not json").unwrap();

        // Enumeration is by filename, so both ids appear...
        assert_eq!(storage.list_message_ids().unwrap().len(), 2);
        // ...but fetching the corrupt one reports it as malformed.
        assert!(matches!(
            storage.get_message("msg-bad"),
            Err(StorageError::Malformed(_))
        ));
    }

    #[test]
    fn corrupt_peer_skipped_on_enumeration() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        storage.save_peer(&Peer::new("node-1", "127.0.0.1:3001")).unwrap();
        std::fs::write(dir.path().join("peers/broken.json"), b"][").unwrap();

        let peers = storage.list_peers().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].node_id, "node-1");
    }

    #[test]
    fn peer_overwrite_keeps_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        let mut peer = Peer::new("node-1", "127.0.0.1:3001");
        storage.save_peer(&peer).unwrap();
        peer.address = "127.0.0.1:4001".into();
        storage.save_peer(&peer).unwrap();

        let peers = storage.list_peers().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address, "127.0.0.1:4001");
    }

    #[test]
    fn message_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        let mut old = make_message("msg-old");
        old.timestamp = Utc::now() - Duration::hours(2);
        storage.save_message(&old).unwrap();
        storage.save_message(&make_message("msg-fresh")).unwrap();

        assert!(storage.is_message_expired("msg-old", Duration::hours(1)).unwrap());
        assert!(!storage.is_message_expired("msg-fresh", Duration::hours(1)).unwrap());
        assert!(matches!(
            storage.is_message_expired("msg-none", Duration::hours(1)),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn hostile_record_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        let mut msg = make_message("ok");
        msg.message_id = "../escape".into();
        assert!(matches!(
            storage.save_message(&msg),
            Err(StorageError::InvalidId(_))
        ));
        assert!(!storage.has_message("../escape"));
        assert!(matches!(
            storage.get_message("a/b"),
            Err(StorageError::InvalidId(_))
        ));
    }
}
