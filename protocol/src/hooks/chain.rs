//! The consensus hook for `blockchain_concoin` traffic.

use std::path::PathBuf;

use tracing::{info, warn};

use super::{Hook, HookError, Phase};
use crate::model::{ChainPayload, GossipMessage};
use crate::validator::{validate_block, validate_transaction, Ledger};

/// Claims `blockchain_concoin` and delegates to the validator.
///
/// `validate` decodes the payload as a [`ChainPayload`], loads the ledger
/// snapshot from the node's data directory, and runs the consensus
/// checks. `handle` records the accepted record; persisting mempool and
/// db entries is the storage layer's concern, not this hook's.
pub struct ChainHook {
    ledger_dir: PathBuf,
}

impl ChainHook {
    pub fn new(ledger_dir: impl Into<PathBuf>) -> Self {
        Self {
            ledger_dir: ledger_dir.into(),
        }
    }

    fn decode(&self, message: &GossipMessage) -> Result<ChainPayload, serde_json::Error> {
        serde_json::from_value(message.payload.clone())
    }
}

impl Hook for ChainHook {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn should_handle(&self, message_type: &str) -> bool {
        message_type == "blockchain_concoin"
    }

    fn validate(&self, message: &GossipMessage, phase: Phase) -> bool {
        let payload = match self.decode(message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(message_id = %message.message_id, error = %err, "undecodable chain payload");
                return false;
            }
        };

        let ledger = match Ledger::load(&self.ledger_dir) {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!(message_id = %message.message_id, error = %err, "ledger snapshot unavailable");
                return false;
            }
        };

        let verdict = match &payload {
            ChainPayload::Transaction(tx) => validate_transaction(&ledger, tx)
                .map_err(|err| err.to_string()),
            ChainPayload::Block(block) => {
                validate_block(&ledger, block).map_err(|err| err.to_string())
            }
        };

        match verdict {
            Ok(()) => true,
            Err(reason) => {
                warn!(message_id = %message.message_id, %phase, %reason, "chain payload rejected");
                false
            }
        }
    }

    fn handle(&self, message: &GossipMessage, phase: Phase) -> Result<(), HookError> {
        match self.decode(message)? {
            ChainPayload::Transaction(tx) => {
                info!(
                    message_id = %message.message_id,
                    %phase,
                    from = %tx.from,
                    to = %tx.to,
                    amount = tx.amount,
                    "accepted transaction proposal"
                );
            }
            ChainPayload::Block(block) => {
                info!(
                    message_id = %message.message_id,
                    %phase,
                    hash = %block.hash,
                    miner = %block.miner,
                    txs = block.txs.len(),
                    "accepted block proposal"
                );
            }
        }
        Ok(())
    }
}
