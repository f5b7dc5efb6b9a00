// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Concoin Node
//!
//! Entry point for the `concoin-node` binary. Parses CLI arguments,
//! initializes logging and the data directory, wires the protocol
//! components together, starts the PEX and gossip loops, and serves the
//! HTTP façade until signaled.

mod api;
mod cli;
mod logging;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use concoin_protocol::config::NodeConfig;
use concoin_protocol::gossip::GossipProtocol;
use concoin_protocol::hooks::{ChainHook, DebugHook, HookManager};
use concoin_protocol::pex::PexProtocol;
use concoin_protocol::storage::Storage;

use cli::NodeCli;
use logging::LogFormat;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = NodeCli::parse();
    logging::init_logging(
        "concoin_node=info,concoin_protocol=info,tower_http=warn",
        LogFormat::Pretty,
    );

    info!(port = cli.port, seed = cli.seed, clean = cli.clean, "starting concoin-node");

    // --- Configuration & data directory ---
    let config = NodeConfig::for_port(cli.port, cli.seed);

    if cli.clean {
        config
            .clean_data_dirs()
            .context("failed to clean data directories")?;
        info!("cleaned all data directories");
    }

    config
        .create_data_dirs()
        .context("failed to create data directories")?;
    config.save().context("failed to save config")?;
    let config = Arc::new(config);

    // --- Storage ---
    let storage = Arc::new(Storage::new(config.data_dir.clone()));

    // --- Hooks ---
    let mut hooks = HookManager::new();
    hooks.register(Box::new(DebugHook::new()));
    hooks.register(Box::new(ChainHook::new(config.data_dir.clone())));
    let hooks = Arc::new(hooks);

    // --- Protocols ---
    let gossip = Arc::new(GossipProtocol::new(
        config.gossip.clone(),
        config.node_id.clone(),
        Arc::clone(&storage),
        Arc::clone(&hooks),
    ));
    let pex = Arc::new(PexProtocol::new(
        config.pex.clone(),
        config.node_id.clone(),
        config.self_address(),
        config.seed_nodes.clone(),
        Arc::clone(&storage),
        Arc::clone(&hooks),
    ));

    // Every peer-table mutation refreshes the gossip spread targets.
    let gossip_targets = Arc::clone(&gossip);
    pex.set_on_peers_list(move |peers| gossip_targets.update_peers(peers));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    pex.start(shutdown_rx.clone());
    gossip.start(shutdown_rx);

    // --- HTTP façade ---
    let state = api::AppState {
        storage,
        gossip,
        pex,
        hooks,
    };
    let router = api::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind listener on {addr}"))?;
    info!(node_id = %config.node_id, %addr, "node listening");

    tokio::select! {
        res = axum::serve(listener, router) => {
            if let Err(err) = res {
                error!(error = %err, "api server error");
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, stopping");
        }
    }

    let _ = shutdown_tx.send(true);
    info!("concoin-node stopped");
    Ok(())
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
