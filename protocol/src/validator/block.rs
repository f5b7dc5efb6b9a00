//! Block validity over a ledger snapshot.

use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use super::ledger::Ledger;
use super::tx::{validate_transaction, TransactionError};
use crate::crypto::block_hash;
use crate::model::{Amount, Block, Hash, Username};

/// The required difficulty prefix. Fixed in this iteration.
pub const DIFFICULTY_TARGET: &str = "0000";

/// The fixed coinbase reward per block.
pub const BLOCK_REWARD: Amount = 1;

/// Why a block was rejected. Variants follow the check order; the first
/// failing check wins.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("difficulty target must be \"0000\", got {0}")]
    WrongDifficultyTarget(String),

    #[error("block hash mismatch: recomputed {computed}")]
    HashMismatch { computed: Hash },

    #[error("block hash does not satisfy the difficulty prefix")]
    InsufficientDifficulty,

    #[error("previous block hash does not match the chain tip")]
    PrevHashMismatch,

    #[error("previous block unavailable: {0}")]
    PrevBlockUnavailable(String),

    #[error("block time must be after the previous block's time")]
    TimeNotAfterPrev,

    #[error("block time is in the future")]
    TimeInFuture,

    #[error("block reward must be 1, got {0}")]
    WrongReward(Amount),

    #[error("block has no transactions")]
    NoTransactions,

    #[error("transaction {index} invalid: {source}")]
    InvalidTransaction {
        index: usize,
        source: TransactionError,
    },

    #[error("balance delta overflow for {0}")]
    DeltaOverflow(Username),

    #[error("balance deltas do not match the transactions")]
    DeltaMismatch,
}

/// Check a proposed block against the snapshot.
///
/// Checks run in order and short-circuit on the first failure:
///
/// 1. The difficulty target is the fixed network target.
/// 2. The recomputed canonical hash equals the stored hash.
/// 3. The hash carries the difficulty prefix.
/// 4. `prevBlock` matches the snapshot's chain tip (both absent for a
///    genesis extension).
/// 5. With a parent present, the block's time is strictly after it.
/// 6. The block's time is not in the future.
/// 7. The coinbase reward is exactly [`BLOCK_REWARD`].
/// 8. The block carries at least one transaction.
/// 9. Every transaction validates against the same pre-block snapshot,
///    while per-user deltas accumulate with checked arithmetic.
/// 10. The miner's reward is added to the deltas.
/// 11. The accumulated deltas equal `balancesDelta` exactly — a
///     self-payment leaves an explicit zero entry, not a missing one.
pub fn validate_block(ledger: &Ledger, block: &Block) -> Result<(), BlockError> {
    debug!(hash = %block.hash, txs = block.txs.len(), "validating block");

    if block.difficulty_target != DIFFICULTY_TARGET {
        return Err(BlockError::WrongDifficultyTarget(
            block.difficulty_target.clone(),
        ));
    }

    let computed = block_hash(block);
    if computed != block.hash {
        return Err(BlockError::HashMismatch { computed });
    }

    if !computed.starts_with(DIFFICULTY_TARGET) {
        return Err(BlockError::InsufficientDifficulty);
    }

    if block.prev_block_hash != ledger.last_block_hash {
        return Err(BlockError::PrevHashMismatch);
    }

    if let Some(prev_hash) = &block.prev_block_hash {
        let prev = ledger
            .fetch_accepted_block(prev_hash)
            .map_err(|err| BlockError::PrevBlockUnavailable(err.to_string()))?;
        if block.time <= prev.time {
            return Err(BlockError::TimeNotAfterPrev);
        }
    }

    if block.time > Utc::now().timestamp() {
        return Err(BlockError::TimeInFuture);
    }

    if block.reward != BLOCK_REWARD {
        return Err(BlockError::WrongReward(block.reward));
    }

    if block.txs.is_empty() {
        return Err(BlockError::NoTransactions);
    }

    // Transactions are validated against the pre-block snapshot: deltas
    // accumulate on the side and are only compared at the end.
    let mut deltas: BTreeMap<Username, Amount> = BTreeMap::new();
    for (index, tx) in block.txs.iter().enumerate() {
        validate_transaction(ledger, tx)
            .map_err(|source| BlockError::InvalidTransaction { index, source })?;
        apply_delta(&mut deltas, &tx.from, -tx.amount)?;
        apply_delta(&mut deltas, &tx.to, tx.amount)?;
    }

    apply_delta(&mut deltas, &block.miner, block.reward)?;

    if deltas != block.balances_delta {
        return Err(BlockError::DeltaMismatch);
    }

    Ok(())
}

/// Add `amount` to a user's delta, rejecting integer overflow.
fn apply_delta(
    deltas: &mut BTreeMap<Username, Amount>,
    user: &str,
    amount: Amount,
) -> Result<(), BlockError> {
    let entry = deltas.entry(user.to_string()).or_insert(0);
    *entry = entry
        .checked_add(amount)
        .ok_or_else(|| BlockError::DeltaOverflow(user.to_string()))?;
    Ok(())
}
