//! The mesh daemon binary: loads a local identity and a TOML config, opens
//! the sqlite-backed store, starts the configured transports, and runs the
//! router until interrupted. An illustrative wiring of the libraries, not
//! part of the routing core itself.

mod bootstrap;
mod config;
mod identity;

use std::path::PathBuf;

use clap::Parser;
use mesh_router::StatusEvent;

#[derive(Parser, Debug)]
#[command(name = "meshd", version, about = "Infrastructure-free mesh messaging daemon")]
pub struct Args {
    /// Path to the node's identity file, minted on first run.
    #[arg(long, default_value = "identity.json")]
    identity: PathBuf,

    /// Display name used when minting a fresh identity.
    #[arg(long, default_value = "mesh-node")]
    display_name: String,

    /// Path to a TOML daemon config. Falls back to built-in defaults
    /// (NeighborDiscovery only) when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sqlite database path, or `:memory:` for a throwaway in-process store.
    #[arg(long, default_value = "mesh.sqlite3")]
    db: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let context = bootstrap::bootstrap(&args).await?;
    log::info!("meshd: started");

    let mut status_updates = context.router.status_bus().subscribe_status_updates();
    tokio::spawn(async move {
        while let Ok(event) = status_updates.recv().await {
            log_status_event(&event);
        }
    });

    tokio::signal::ctrl_c().await?;
    log::info!("meshd: shutting down");
    context.router.stop_background_tasks();
    context.dispatcher.stop_all().await;
    Ok(())
}

fn log_status_event(event: &StatusEvent) {
    match event {
        StatusEvent::MessageDelivered(packet_id) => log::debug!("message delivered: {packet_id}"),
        StatusEvent::PeerDiscovered(peer) => log::info!("peer discovered: {}", peer.mesh_id),
        StatusEvent::PeerConnected(peer) => log::info!("peer connected: {}", peer.mesh_id),
        StatusEvent::PeerDisconnected(peer) => log::info!("peer disconnected: {}", peer.mesh_id),
        StatusEvent::SOSReceived { sender_name, .. } => log::warn!("SOS received from {sender_name}"),
        StatusEvent::Error(message) => log::error!("{message}"),
        StatusEvent::MessageReceived => {}
    }
}
