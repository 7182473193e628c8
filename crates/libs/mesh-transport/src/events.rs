//! The capability bundle a transport is handed before `start()`, standing in
//! for the three callback slots of the interface contract. A transport
//! clones the senders it needs and pushes events from its own tasks; it
//! never calls back into the dispatcher directly, which is what breaks the
//! router/dispatcher/transport reference cycle at construction time.

use tokio::sync::mpsc;

use mesh_protocol::MeshPacket;

use crate::transport::{EndpointId, TransportKind};

/// A packet arrived on some transport's link.
#[derive(Debug, Clone)]
pub struct PacketReceived {
    pub transport: TransportKind,
    pub from_endpoint: EndpointId,
    pub packet: MeshPacket,
}

/// A new endpoint became reachable, optionally with an identity already
/// known at the link layer (NeighborDiscovery upgrades this later).
#[derive(Debug, Clone)]
pub struct PeerConnected {
    pub transport: TransportKind,
    pub endpoint_id: EndpointId,
    pub mesh_id: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PeerDisconnected {
    pub transport: TransportKind,
    pub endpoint_id: EndpointId,
}

/// Senders cloned into a transport before `start()`. A transport pushes
/// into these from whatever background tasks it spawns; the dispatcher owns
/// the receiving ends.
#[derive(Clone)]
pub struct TransportEvents {
    pub packet_received: mpsc::Sender<PacketReceived>,
    pub peer_connected: mpsc::Sender<PeerConnected>,
    pub peer_disconnected: mpsc::Sender<PeerDisconnected>,
}

/// The receiving halves the dispatcher keeps, one merged stream per event
/// kind across all registered transports.
pub struct TransportEventChannels {
    pub packet_received: mpsc::Receiver<PacketReceived>,
    pub peer_connected: mpsc::Receiver<PeerConnected>,
    pub peer_disconnected: mpsc::Receiver<PeerDisconnected>,
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub fn new_event_channels() -> (TransportEvents, TransportEventChannels) {
    let (packet_tx, packet_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (connect_tx, connect_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (disconnect_tx, disconnect_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    (
        TransportEvents {
            packet_received: packet_tx,
            peer_connected: connect_tx,
            peer_disconnected: disconnect_tx,
        },
        TransportEventChannels {
            packet_received: packet_rx,
            peer_connected: connect_rx,
            peer_disconnected: disconnect_rx,
        },
    )
}
