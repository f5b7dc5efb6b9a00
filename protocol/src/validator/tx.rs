//! Transaction validity over a ledger snapshot.

use thiserror::Error;
use tracing::debug;

use super::ledger::{Ledger, LedgerError};
use crate::crypto;
use crate::model::Transaction;

/// Why a transaction was rejected. The `Display` form is the diagnostic
/// surfaced to operators and test assertions.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("amount is negative")]
    NegativeAmount,

    #[error("amount exceeds balance")]
    AmountExceedsBalance,
}

impl From<LedgerError> for TransactionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UserNotFound(user) => TransactionError::UserNotFound(user),
            other => TransactionError::UserNotFound(other.to_string()),
        }
    }
}

/// Check a single transaction against the snapshot.
///
/// Checks run in order and short-circuit:
///
/// 1. The sender must exist (balance and public key present).
/// 2. The ECDSA P-256 signature must verify over the canonical payload
///    (SHA-256 digest of the `{from, to, amount}` JSON form).
/// 3. The amount must be non-negative and within the sender's balance.
///
/// Self-payments are allowed; amount zero is allowed.
pub fn validate_transaction(ledger: &Ledger, tx: &Transaction) -> Result<(), TransactionError> {
    let sender = ledger.fetch_user(&tx.from)?;
    debug!(from = %tx.from, to = %tx.to, amount = tx.amount, "validating transaction");

    if let Err(err) = crypto::verify_tx_signature(&sender.public_key, tx) {
        debug!(from = %tx.from, error = %err, "transaction signature rejected");
        return Err(TransactionError::SignatureInvalid);
    }

    if tx.amount < 0 {
        return Err(TransactionError::NegativeAmount);
    }
    if tx.amount > sender.balance {
        return Err(TransactionError::AmountExceedsBalance);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{public_key_hex, sign_transfer};
    use p256::ecdsa::SigningKey;
    use std::collections::HashMap;

    fn keypair() -> (SigningKey, String) {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let pk = public_key_hex(key.verifying_key());
        (key, pk)
    }

    /// Snapshot with Alice at 100 and Bob at 0, both with registered keys.
    fn snapshot(alice_pk: &str, bob_pk: &str) -> Ledger {
        Ledger::new(
            "/nonexistent",
            None,
            HashMap::from([
                ("Alice".to_string(), alice_pk.to_string()),
                ("Bob".to_string(), bob_pk.to_string()),
            ]),
            HashMap::from([("Alice".to_string(), 100), ("Bob".to_string(), 0)]),
        )
    }

    fn transfer(key: &SigningKey, from: &str, to: &str, amount: i64) -> Transaction {
        Transaction {
            from: from.into(),
            to: to.into(),
            amount,
            signature: sign_transfer(key, from, to, amount),
        }
    }

    #[test]
    fn happy_transfer_is_valid() {
        let (alice_key, alice_pk) = keypair();
        let (_, bob_pk) = keypair();
        let ledger = snapshot(&alice_pk, &bob_pk);

        let tx = transfer(&alice_key, "Alice", "Bob", 40);
        assert!(validate_transaction(&ledger, &tx).is_ok());
    }

    #[test]
    fn overspend_is_rejected() {
        let (alice_key, alice_pk) = keypair();
        let (_, bob_pk) = keypair();
        let ledger = snapshot(&alice_pk, &bob_pk);

        let tx = transfer(&alice_key, "Alice", "Bob", 150);
        let err = validate_transaction(&ledger, &tx).unwrap_err();
        assert_eq!(err.to_string(), "amount exceeds balance");
    }

    #[test]
    fn unknown_sender_is_rejected() {
        let (carol_key, alice_pk) = keypair();
        let (_, bob_pk) = keypair();
        let ledger = snapshot(&alice_pk, &bob_pk);

        let tx = transfer(&carol_key, "Carol", "Bob", 1);
        let err = validate_transaction(&ledger, &tx).unwrap_err();
        assert_eq!(err.to_string(), "user not found: Carol");
    }

    #[test]
    fn forged_signature_is_rejected() {
        let (alice_key, alice_pk) = keypair();
        let (_, bob_pk) = keypair();
        let ledger = snapshot(&alice_pk, &bob_pk);

        // Signature over a different payload than the transaction claims.
        let mut tx = transfer(&alice_key, "Alice", "Bob", 40);
        tx.signature = sign_transfer(&alice_key, "Alice", "Bob", 99);

        let err = validate_transaction(&ledger, &tx).unwrap_err();
        assert_eq!(err.to_string(), "signature invalid");
    }

    #[test]
    fn negative_amount_is_rejected() {
        let (alice_key, alice_pk) = keypair();
        let (_, bob_pk) = keypair();
        let ledger = snapshot(&alice_pk, &bob_pk);

        let tx = transfer(&alice_key, "Alice", "Bob", -5);
        let err = validate_transaction(&ledger, &tx).unwrap_err();
        assert_eq!(err.to_string(), "amount is negative");
    }

    #[test]
    fn zero_amount_and_exact_balance_are_allowed() {
        let (alice_key, alice_pk) = keypair();
        let (_, bob_pk) = keypair();
        let ledger = snapshot(&alice_pk, &bob_pk);

        let zero = transfer(&alice_key, "Alice", "Bob", 0);
        assert!(validate_transaction(&ledger, &zero).is_ok());

        let all_in = transfer(&alice_key, "Alice", "Bob", 100);
        assert!(validate_transaction(&ledger, &all_in).is_ok());
    }

    #[test]
    fn self_payment_within_balance_is_allowed() {
        let (alice_key, alice_pk) = keypair();
        let (_, bob_pk) = keypair();
        let ledger = snapshot(&alice_pk, &bob_pk);

        let tx = transfer(&alice_key, "Alice", "Alice", 30);
        assert!(validate_transaction(&ledger, &tx).is_ok());
    }

    #[test]
    fn purity_identical_inputs_identical_results() {
        let (alice_key, alice_pk) = keypair();
        let (_, bob_pk) = keypair();
        let ledger = snapshot(&alice_pk, &bob_pk);
        let tx = transfer(&alice_key, "Alice", "Bob", 40);

        for _ in 0..3 {
            assert!(validate_transaction(&ledger, &tx).is_ok());
        }
        assert_eq!(ledger.user_balances["Alice"], 100);
    }
}
