//! Read-only ledger snapshot backing a validation call.
//!
//! The snapshot is loaded from `actual_state.json` under the ledger
//! directory; accepted blocks and mempool transactions are fetched
//! lazily from `db/<hash>.json` and `mempool/<hash>.json`. The state
//! file keys (`cc-1`, `cc-3`) are a wire contract with the tooling that
//! produces them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::model::{Amount, Block, Hash, Transaction, Username};

/// Errors raised while reading ledger state.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("user not found: {0}")]
    UserNotFound(Username),

    #[error("ledger record missing: {0}")]
    Missing(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed ledger record: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A resolved account: balance plus the key transactions are verified with.
#[derive(Debug, Clone)]
pub struct User {
    pub username: Username,
    pub balance: Amount,
    /// Hex-encoded uncompressed SEC1 P-256 point.
    pub public_key: String,
}

/// On-disk shape of `actual_state.json`.
#[derive(Debug, Deserialize)]
struct ActualState {
    #[serde(rename = "cc-1")]
    user_balances: HashMap<Username, Amount>,
    #[serde(rename = "cc-3")]
    public_keys: HashMap<Username, String>,
    last_block_hash: Option<Hash>,
}

/// Read-only view of the ledger at one instant.
#[derive(Debug)]
pub struct Ledger {
    db_path: PathBuf,
    pub last_block_hash: Option<Hash>,
    pub public_keys: HashMap<Username, String>,
    pub user_balances: HashMap<Username, Amount>,
}

impl Ledger {
    /// Load the snapshot from `<db_path>/actual_state.json`.
    pub fn load(db_path: &Path) -> Result<Self, LedgerError> {
        let state: ActualState = read_json(&db_path.join("actual_state.json"))?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
            last_block_hash: state.last_block_hash,
            public_keys: state.public_keys,
            user_balances: state.user_balances,
        })
    }

    /// Build a snapshot directly. Used by tests and by callers that
    /// already hold the state in memory.
    pub fn new(
        db_path: impl Into<PathBuf>,
        last_block_hash: Option<Hash>,
        public_keys: HashMap<Username, String>,
        user_balances: HashMap<Username, Amount>,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            last_block_hash,
            public_keys,
            user_balances,
        }
    }

    /// Resolve a username to a [`User`]. A user must have both a balance
    /// and a public key; anything less is an unknown sender.
    pub fn fetch_user(&self, username: &str) -> Result<User, LedgerError> {
        let balance = *self
            .user_balances
            .get(username)
            .ok_or_else(|| LedgerError::UserNotFound(username.to_string()))?;
        let public_key = self
            .public_keys
            .get(username)
            .ok_or_else(|| LedgerError::UserNotFound(username.to_string()))?
            .clone();

        Ok(User {
            username: username.to_string(),
            balance,
            public_key,
        })
    }

    /// Fetch an accepted block from `db/<hash>.json`.
    pub fn fetch_accepted_block(&self, hash: &str) -> Result<Block, LedgerError> {
        read_json(&self.db_path.join("db").join(format!("{hash}.json")))
    }

    /// Fetch a pending transaction from `mempool/<tx_hash>.json`.
    pub fn fetch_mempool_transaction(&self, tx_hash: &str) -> Result<Transaction, LedgerError> {
        read_json(&self.db_path.join("mempool").join(format!("{tx_hash}.json")))
    }

    /// Fetch the block currently proposed for validation.
    pub fn fetch_proposed_block(&self) -> Result<Block, LedgerError> {
        read_json(&self.db_path.join("proposed_block.json"))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, LedgerError> {
    match std::fs::read(path) {
        Ok(data) => Ok(serde_json::from_slice(&data)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(LedgerError::Missing(path.display().to_string()))
        }
        Err(err) => Err(err.into()),
    }
}
