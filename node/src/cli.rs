//! # CLI Interface
//!
//! Command-line arguments for `concoin-node` via `clap` derive. The node
//! is deliberately flag-light: a port, an optional seed port on
//! localhost, and a clean-start switch. Everything else lives in the
//! persisted configuration file.

use clap::Parser;

/// Concoin network node.
///
/// Maintains a peer table via PEX, spreads signed messages over the
/// gossip overlay, persists them locally, and validates blockchain
/// traffic against the current ledger state.
#[derive(Parser, Debug)]
#[command(name = "concoin-node", about = "Concoin peer-to-peer network node", version)]
pub struct NodeCli {
    /// Port to listen on.
    #[arg(long, env = "CONCOIN_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Localhost port of a seed node to bootstrap from (0 = none).
    #[arg(long, env = "CONCOIN_SEED", default_value_t = 0)]
    pub seed: u16,

    /// Remove all node data before starting.
    #[arg(long)]
    pub clean: bool,
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
        // Ensures the derive macros produce a valid CLI definition.
        NodeCli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = NodeCli::parse_from(["concoin-node"]);
        assert_eq!(cli.port, 3000);
        assert_eq!(cli.seed, 0);
        assert!(!cli.clean);
    }

    #[test]
    fn custom_flags() {
        let cli = NodeCli::parse_from([
            "concoin-node",
            "--port",
            "3100",
            "--seed",
            "3000",
            "--clean",
        ]);
        assert_eq!(cli.port, 3100);
        assert_eq!(cli.seed, 3000);
        assert!(cli.clean);
    }
}
