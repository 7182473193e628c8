//! Connectionless, session-oriented discovery transport: many-to-many, MTU
//! large enough that packets are never chunked. An endpoint starts out known
//! only by its opaque handle; the real `mesh_id` becomes known once its
//! first packet arrives, at which point the link identity is upgraded.
//!
//! As with [`crate::paired_radio`], the radio-level discovery/advertising
//! driver is out of scope; this transport is exercised over in-process
//! duplex channels, one whole encoded packet per send (no chunking).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use mesh_protocol::{codec, MeshId, MeshPacket};

use crate::error::TransportError;
use crate::events::{PacketReceived, PeerConnected, TransportEvents};
use crate::transport::{EndpointId, Transport, TransportKind};

struct Link {
    outbound: mpsc::Sender<Vec<u8>>,
    identity: Option<MeshId>,
}

struct Inner {
    links: Mutex<HashMap<EndpointId, Link>>,
    events: Mutex<Option<TransportEvents>>,
    active: std::sync::atomic::AtomicBool,
}

pub struct NeighborDiscoveryTransport {
    inner: Arc<Inner>,
}

impl Default for NeighborDiscoveryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl NeighborDiscoveryTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                links: Mutex::new(HashMap::new()),
                events: Mutex::new(None),
                active: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    /// Attach a simulated session peer. Returns the sender the peer's side
    /// should use to push whole encoded packets toward us.
    pub async fn attach_session(
        &self,
        endpoint: EndpointId,
        outbound: mpsc::Sender<Vec<u8>>,
    ) -> mpsc::Sender<Vec<u8>> {
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<Vec<u8>>(64);

        self.inner.links.lock().await.insert(
            endpoint.clone(),
            Link { outbound, identity: None },
        );

        let inner = self.inner.clone();
        let endpoint_for_task = endpoint.clone();
        tokio::spawn(async move {
            while let Some(bytes) = inbound_rx.recv().await {
                inner.on_packet_bytes(endpoint_for_task.clone(), bytes).await;
            }
        });

        inbound_tx
    }
}

impl Inner {
    async fn on_packet_bytes(&self, endpoint: EndpointId, bytes: Vec<u8>) {
        let packet = match codec::decode(&bytes) {
            Ok(packet) => packet,
            Err(err) => {
                log::debug!("neighbor-discovery: dropping malformed packet: {err}");
                return;
            }
        };

        let mut newly_identified = None;
        {
            let mut links = self.links.lock().await;
            if let Some(link) = links.get_mut(&endpoint) {
                if link.identity.is_none() {
                    link.identity = Some(packet.sender_id.clone());
                    newly_identified = Some(packet.sender_id.clone());
                }
            }
        }

        if let Some(mesh_id) = newly_identified {
            if let Some(events) = self.events.lock().await.clone() {
                let _ = events
                    .peer_connected
                    .send(PeerConnected {
                        transport: TransportKind::NeighborDiscovery,
                        endpoint_id: endpoint.clone(),
                        mesh_id: Some(mesh_id.to_string()),
                        display_name: Some(packet.sender_name.clone()),
                    })
                    .await;
            }
        }

        if let Some(events) = self.events.lock().await.clone() {
            let _ = events
                .packet_received
                .send(PacketReceived {
                    transport: TransportKind::NeighborDiscovery,
                    from_endpoint: endpoint,
                    packet,
                })
                .await;
        }
    }
}

#[async_trait]
impl Transport for NeighborDiscoveryTransport {
    fn name(&self) -> &'static str {
        "neighbor-discovery"
    }

    fn kind(&self) -> TransportKind {
        TransportKind::NeighborDiscovery
    }

    fn is_active(&self) -> bool {
        self.inner.active.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn start(&self, events: TransportEvents) -> Result<(), TransportError> {
        if self.is_active() {
            return Ok(());
        }
        *self.inner.events.lock().await = Some(events);
        self.inner.active.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.inner.active.store(false, std::sync::atomic::Ordering::SeqCst);
        self.inner.links.lock().await.clear();
        *self.inner.events.lock().await = None;
    }

    async fn send_packet(
        &self,
        packet: &MeshPacket,
        endpoint: Option<&EndpointId>,
    ) -> Result<(), TransportError> {
        let bytes = codec::encode(packet)?;
        self.send_bytes(&bytes, endpoint).await
    }

    async fn send_bytes(
        &self,
        data: &[u8],
        endpoint: Option<&EndpointId>,
    ) -> Result<(), TransportError> {
        if !self.is_active() {
            return Err(TransportError::NotActive("neighbor-discovery"));
        }
        let links = self.inner.links.lock().await;
        let targets: Vec<&Link> = match endpoint {
            Some(id) => links
                .get(id)
                .map(|l| vec![l])
                .ok_or_else(|| TransportError::UnknownEndpoint(id.to_string()))?,
            None => links.values().collect(),
        };
        for link in targets {
            link.outbound
                .send(data.to_vec())
                .await
                .map_err(|_| TransportError::ChannelClosed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_protocol::{ContentKind, MeshId, PacketId, PacketKind};

    fn packet_from(sender: &str) -> MeshPacket {
        MeshPacket {
            packet_id: PacketId::generate(),
            version: mesh_protocol::PROTOCOL_VERSION,
            kind: PacketKind::Message,
            sender_id: MeshId::new(sender),
            sender_name: "Neighbor".into(),
            destination_id: MeshId::broadcast(),
            hop_count: 0,
            max_hops: mesh_protocol::DEFAULT_MAX_HOPS,
            timestamp: 0,
            previous_hop: None,
            route_path: Vec::new(),
            content_kind: ContentKind::Text,
            content: b"hi".to_vec(),
            media_info: None,
            ack_for_packet_id: None,
        }
    }

    #[tokio::test]
    async fn first_packet_upgrades_placeholder_identity() {
        let nd = NeighborDiscoveryTransport::new();
        let (events, mut channels) = crate::events::new_event_channels();
        nd.start(events).await.unwrap();

        let (out_tx, _out_rx) = mpsc::channel(16);
        let in_tx = nd.attach_session(EndpointId::new("session-1"), out_tx).await;

        let packet = packet_from("real-mesh-id");
        in_tx.send(codec::encode(&packet).unwrap()).await.unwrap();

        let connected = channels.peer_connected.recv().await.unwrap();
        assert_eq!(connected.mesh_id.as_deref(), Some("real-mesh-id"));

        let received = channels.packet_received.recv().await.unwrap();
        assert_eq!(received.packet.sender_id, MeshId::new("real-mesh-id"));
    }
}
