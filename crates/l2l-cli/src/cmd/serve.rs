//! `l2l serve`: offer a module directory to other peers.

use super::start_peer;
use crate::ui;
use l2l_types::config::ModulesConfig;
use l2l_types::error::L2lResult;
use tracing::{info, warn};

pub async fn cmd_serve(mut config: ModulesConfig) -> L2lResult<()> {
    let peer = start_peer(&config).await?;
    let system = peer.modules.default_system();

    ui::section("l2l module server");
    ui::kv("Session", peer.session().session_id());
    ui::kv("Listening", &peer.node.local_addr().to_string());
    ui::kv("Modules", system.base_url());
    ui::kv("System", system.name());

    for addr in std::mem::take(&mut config.peers) {
        match peer.connect(&addr).await {
            Ok(session_id) => ui::success(&format!("Connected to {session_id} at {addr}")),
            Err(e) => warn!(peer = %addr, error = %e, "Could not connect to peer"),
        }
    }
    ui::hint(&format!(
        "fetch with: l2l fetch l2l://{}/<path> --peer {}",
        peer.session().session_id(),
        peer.node.local_addr()
    ));

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C, shutting down");
    }
    info!("Shutting down");
    peer.shutdown();
    Ok(())
}
