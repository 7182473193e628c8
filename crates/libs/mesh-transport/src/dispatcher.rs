//! Owns the set of active transports, presents one send surface and one
//! merged receive surface to the router. The router itself is reached only
//! through the [`PeerAnnouncer`] handle set after construction — the
//! dispatcher never holds a direct router reference, which is what breaks
//! the router/dispatcher reference cycle at construction time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use mesh_protocol::MeshPacket;

use crate::error::TransportError;
use crate::events::{new_event_channels, PacketReceived, PeerConnected, PeerDisconnected};
use crate::transport::{EndpointId, Transport, TransportKind};

const ANNOUNCEMENT_INTERVAL: Duration = Duration::from_secs(60);

/// Invoked periodically by the dispatcher's announcement ticker. The router
/// implements this; the dispatcher only ever sees the trait object.
#[async_trait]
pub trait PeerAnnouncer: Send + Sync {
    async fn broadcast_peer_announcement(&self);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateStatus {
    pub is_active: bool,
    pub active_transports: Vec<TransportKind>,
    pub connected_peer_count: usize,
    pub per_transport_active: HashMap<TransportKind, bool>,
}

struct RegisteredTransport {
    transport: Arc<dyn Transport>,
}

pub struct Dispatcher {
    transports: Vec<RegisteredTransport>,
    status_tx: watch::Sender<AggregateStatus>,
    status_rx: watch::Receiver<AggregateStatus>,
    connected_endpoints: Mutex<std::collections::HashSet<EndpointId>>,
    announcer: RwLock<Option<Arc<dyn PeerAnnouncer>>>,
    ticker_cancel: Mutex<Option<CancellationToken>>,
}

impl Dispatcher {
    /// Registers transports in priority order regardless of the order
    /// they're passed in: `NeighborDiscovery > PairedRadio > DirectIP >
    /// AudioBeacon` (`TransportKind`'s `Ord` impl), since `start_all` and
    /// targeted-send both rely on that order when more than one transport
    /// could reach a peer.
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        let (status_tx, status_rx) = watch::channel(AggregateStatus::default());
        let mut transports = transports;
        transports.sort_by_key(|transport| transport.kind());
        Self {
            transports: transports.into_iter().map(|transport| RegisteredTransport { transport }).collect(),
            status_tx,
            status_rx,
            connected_endpoints: Mutex::new(std::collections::HashSet::new()),
            announcer: RwLock::new(None),
            ticker_cancel: Mutex::new(None),
        }
    }

    /// Set once after construction, per the design note that breaks the
    /// router/dispatcher cycle.
    pub fn set_announcer(&self, announcer: Arc<dyn PeerAnnouncer>) {
        *self.announcer.write().expect("announcer lock poisoned") = Some(announcer);
    }

    pub fn status(&self) -> watch::Receiver<AggregateStatus> {
        self.status_rx.clone()
    }

    fn transport_for(&self, kind: TransportKind) -> Option<&Arc<dyn Transport>> {
        self.transports.iter().find(|r| r.transport.kind() == kind).map(|r| &r.transport)
    }

    /// Starts each transport in priority order, tolerating individual
    /// failures. Returns the merged event channels for the caller (the
    /// router's ingestion loop) to drain.
    pub async fn start_all(&self) -> crate::events::TransportEventChannels {
        let (events, channels) = new_event_channels();

        for registered in &self.transports {
            match registered.transport.start(events.clone()).await {
                Ok(()) => log::debug!("dispatcher: started {}", registered.transport.name()),
                Err(err) => log::warn!(
                    "dispatcher: failed to start {}: {err}",
                    registered.transport.name()
                ),
            }
        }
        self.publish_status().await;
        self.start_announcement_ticker().await;
        channels
    }

    /// Calls `stop()` on every transport regardless of individual errors,
    /// then clears the active set.
    pub async fn stop_all(&self) {
        if let Some(cancel) = self.ticker_cancel.lock().await.take() {
            cancel.cancel();
        }
        for registered in &self.transports {
            registered.transport.stop().await;
        }
        self.connected_endpoints.lock().await.clear();
        self.publish_status().await;
    }

    /// Route an outbound packet. If `transport_kind` is set, send only
    /// through that transport (if active); otherwise fan out to every
    /// active transport. Errors from individual transports are logged and
    /// swallowed — one transport's failure never blocks another's send.
    pub async fn send(
        &self,
        packet: &MeshPacket,
        endpoint: Option<&EndpointId>,
        transport_kind: Option<TransportKind>,
    ) {
        let targets: Vec<&Arc<dyn Transport>> = match transport_kind {
            Some(kind) => self.transport_for(kind).into_iter().collect(),
            None => self.transports.iter().map(|r| &r.transport).collect(),
        };

        for transport in targets {
            if !transport.is_active() {
                continue;
            }
            if let Err(err) = transport.send_packet(packet, endpoint).await {
                log::warn!(
                    "dispatcher: send via {} failed: {err}",
                    transport.name()
                );
            }
        }
    }

    pub async fn on_peer_connected(&self, event: &PeerConnected) {
        self.connected_endpoints.lock().await.insert(event.endpoint_id.clone());
        self.publish_status().await;
    }

    pub async fn on_peer_disconnected(&self, event: &PeerDisconnected) {
        self.connected_endpoints.lock().await.remove(&event.endpoint_id);
        self.publish_status().await;
    }

    pub async fn on_packet_received(&self, _event: &PacketReceived) {
        // Packet traffic doesn't change aggregate link status; retained as
        // an explicit hook so callers have one place to observe all three
        // dispatcher-relevant event kinds.
    }

    async fn publish_status(&self) {
        let mut per_transport_active = HashMap::new();
        let mut active_transports = Vec::new();
        for registered in &self.transports {
            let active = registered.transport.is_active();
            per_transport_active.insert(registered.transport.kind(), active);
            if active {
                active_transports.push(registered.transport.kind());
            }
        }
        let status = AggregateStatus {
            is_active: !active_transports.is_empty(),
            connected_peer_count: self.connected_endpoints.lock().await.len(),
            active_transports,
            per_transport_active,
        };
        let _ = self.status_tx.send(status);
    }

    async fn start_announcement_ticker(&self) {
        let cancel = CancellationToken::new();
        *self.ticker_cancel.lock().await = Some(cancel.clone());

        // The announcer is read through a weak-free `RwLock` snapshot each
        // tick since it's set once, shortly after construction, and never
        // cleared.
        let announcer = self.announcer.read().expect("announcer lock poisoned").clone();
        let Some(announcer) = announcer else {
            log::debug!("dispatcher: no announcer registered, skipping ticker");
            return;
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ANNOUNCEMENT_INTERVAL) => {
                        announcer.broadcast_peer_announcement().await;
                    }
                }
            }
        });
    }
}
