//! Wires the persistence backend, dispatcher, transports, and router into
//! one running daemon. Mirrors `reticulumd::bootstrap`'s role: everything
//! here is infrastructure, no routing logic of its own.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use mesh_protocol::MeshId;
use mesh_router::{ConversationStore, MessageStore, PeerStore, Router};
use mesh_storage_sqlite::SqliteStore;
use mesh_transport::{
    AudioBeaconTransport, DirectIpTransport, Dispatcher, NeighborDiscoveryTransport, PeerAnnouncer,
    PairedRadioTransport, Transport,
};

use crate::config::{DaemonConfig, TransportKindConfig};
use crate::identity::Identity;
use crate::Args;

pub struct Context {
    pub router: Arc<Router>,
    pub dispatcher: Arc<Dispatcher>,
}

pub async fn bootstrap(args: &Args) -> anyhow::Result<Context> {
    let identity = Identity::load_or_create(&args.identity, &args.display_name)?;
    log::info!("meshd: local identity mesh_id={} display_name={}", identity.mesh_id, identity.display_name);

    let config = match &args.config {
        Some(path) => DaemonConfig::from_path(path)?,
        None => DaemonConfig::default(),
    };

    let store = Arc::new(if args.db == PathBuf::from(":memory:") {
        SqliteStore::in_memory()?
    } else {
        SqliteStore::open(&args.db)?
    });

    let transports = build_transports(&config, &identity)?;
    let dispatcher = Arc::new(Dispatcher::new(transports));

    let router = Router::new(
        MeshId::new(identity.mesh_id),
        identity.display_name,
        config.router.to_router_config(),
        store.clone() as Arc<dyn MessageStore>,
        store.clone() as Arc<dyn PeerStore>,
        store as Arc<dyn ConversationStore>,
        dispatcher.clone(),
    );
    dispatcher.set_announcer(router.clone() as Arc<dyn PeerAnnouncer>);

    let channels = dispatcher.start_all().await;
    router.spawn_ingestion(channels);

    Ok(Context { router, dispatcher })
}

fn build_transports(config: &DaemonConfig, identity: &Identity) -> anyhow::Result<Vec<Arc<dyn Transport>>> {
    let mut transports: Vec<Arc<dyn Transport>> = Vec::new();

    for entry in &config.transports {
        if !entry.enabled {
            continue;
        }
        match &entry.kind {
            TransportKindConfig::NeighborDiscovery => {
                transports.push(Arc::new(NeighborDiscoveryTransport::new()));
            }
            TransportKindConfig::PairedRadio => {
                transports.push(Arc::new(PairedRadioTransport::new()));
            }
            TransportKindConfig::DirectIp => {
                let bind = entry
                    .bind
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("direct-ip transport requires a `bind` address"))?;
                let addr: SocketAddr = bind.parse()?;
                transports.push(Arc::new(DirectIpTransport::new(addr)));
            }
            TransportKindConfig::AudioBeacon => {
                transports.push(Arc::new(AudioBeaconTransport::new(identity.mesh_id.clone())));
            }
        }
    }

    Ok(transports)
}
