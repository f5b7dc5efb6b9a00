// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Concoin Validator
//!
//! Standalone CLI that checks a single ledger record against the current
//! snapshot. Exit code is the verdict: 0 for valid, 1 for invalid or any
//! error. Diagnostics go to stderr.
//!
//! ```text
//! concoin-valid transaction <db_path> <tx_hash>
//! concoin-valid proposed-block <db_path>
//! ```
//!
//! The `--malicious` flag short-circuits every check to "valid". It
//! exists for network-level fault-injection tests and must keep working.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use concoin_protocol::validator::{validate_block, validate_transaction, Ledger};

/// Concoin ledger validator.
#[derive(Parser, Debug)]
#[command(name = "concoin-valid", about = "Concoin ledger validator", version)]
struct ValidCli {
    /// Accept everything without checking (fault-injection test hook).
    #[arg(long, global = true)]
    malicious: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a mempool transaction against the ledger snapshot.
    Transaction {
        /// Ledger directory holding `actual_state.json` and `mempool/`.
        db_path: PathBuf,
        /// Hash of the transaction to check, as stored under `mempool/`.
        tx_hash: String,
    },
    /// Validate the proposed block against the ledger snapshot.
    ProposedBlock {
        /// Ledger directory holding `actual_state.json`, `db/`, and
        /// `proposed_block.json`.
        db_path: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = ValidCli::parse();

    if cli.malicious {
        info!("malicious mode: skipping all checks");
        return ExitCode::SUCCESS;
    }

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("invalid: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Transaction { db_path, tx_hash } => {
            info!(db_path = %db_path.display(), %tx_hash, "validating transaction");
            let ledger = Ledger::load(&db_path).context("failed to load ledger snapshot")?;
            let tx = ledger
                .fetch_mempool_transaction(&tx_hash)
                .context("failed to fetch transaction from mempool")?;
            validate_transaction(&ledger, &tx).context("transaction rejected")?;
            info!("transaction is valid");
        }
        Command::ProposedBlock { db_path } => {
            info!(db_path = %db_path.display(), "validating proposed block");
            let ledger = Ledger::load(&db_path).context("failed to load ledger snapshot")?;
            let block = ledger
                .fetch_proposed_block()
                .context("failed to fetch proposed block")?;
            validate_block(&ledger, &block).context("block rejected")?;
            info!("block is valid");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        ValidCli::command().debug_assert();
    }

    #[test]
    fn transaction_subcommand_parses() {
        let cli = ValidCli::parse_from(["concoin-valid", "transaction", "/tmp/db", "abc123"]);
        assert!(!cli.malicious);
        match cli.command {
            Command::Transaction { db_path, tx_hash } => {
                assert_eq!(db_path, PathBuf::from("/tmp/db"));
                assert_eq!(tx_hash, "abc123");
            }
            other => panic!("expected Transaction, got {other:?}"),
        }
    }

    #[test]
    fn proposed_block_subcommand_parses() {
        let cli = ValidCli::parse_from(["concoin-valid", "proposed-block", "/tmp/db"]);
        match cli.command {
            Command::ProposedBlock { db_path } => {
                assert_eq!(db_path, PathBuf::from("/tmp/db"));
            }
            other => panic!("expected ProposedBlock, got {other:?}"),
        }
    }

    #[test]
    fn malicious_flag_is_global() {
        let cli =
            ValidCli::parse_from(["concoin-valid", "transaction", "/tmp/db", "abc", "--malicious"]);
        assert!(cli.malicious);
    }
}
