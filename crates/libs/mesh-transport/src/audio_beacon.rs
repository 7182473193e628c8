//! Lossy audio-band presence beacon. Carries no packets at all: only a
//! fixed `"HELLO:<short_id>"` string (<= 255 bytes), where `short_id` is the
//! first four characters of the local mesh id. Symbol demodulation for full
//! packet recovery is an open question the source never resolves (see
//! DESIGN.md) and is not attempted here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use mesh_protocol::MeshPacket;

use crate::error::TransportError;
use crate::events::{PeerConnected, TransportEvents};
use crate::transport::{EndpointId, Transport, TransportKind};

const MAX_BEACON_BYTES: usize = 255;
const BEACON_PREFIX: &str = "HELLO:";

fn beacon_for(local_mesh_id: &str) -> String {
    let short_id: String = local_mesh_id.chars().take(4).collect();
    format!("{BEACON_PREFIX}{short_id}")
}

fn detected_short_id(beacon: &str) -> Option<&str> {
    beacon.strip_prefix(BEACON_PREFIX)
}

struct Inner {
    local_mesh_id: String,
    events: Mutex<Option<TransportEvents>>,
    active: AtomicBool,
    peers: Mutex<Vec<mpsc::Sender<Vec<u8>>>>,
}

pub struct AudioBeaconTransport {
    inner: Arc<Inner>,
}

impl AudioBeaconTransport {
    pub fn new(local_mesh_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                local_mesh_id: local_mesh_id.into(),
                events: Mutex::new(None),
                active: AtomicBool::new(false),
                peers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Attach a simulated audio-band neighbor able to hear our beacon and
    /// whose beacons we, in turn, detect.
    pub async fn attach_listener(&self, outbound: mpsc::Sender<Vec<u8>>) -> mpsc::Sender<Vec<u8>> {
        self.inner.peers.lock().await.push(outbound);

        let (inbound_tx, mut inbound_rx) = mpsc::channel::<Vec<u8>>(16);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(bytes) = inbound_rx.recv().await {
                inner.on_beacon_heard(bytes).await;
            }
        });
        inbound_tx
    }

    /// Emit one beacon to every attached listener.
    pub async fn emit_beacon(&self) -> Result<(), TransportError> {
        let beacon = beacon_for(&self.inner.local_mesh_id);
        self.send_bytes(beacon.as_bytes(), None).await
    }
}

impl Inner {
    async fn on_beacon_heard(&self, bytes: Vec<u8>) {
        let Ok(text) = std::str::from_utf8(&bytes) else {
            return;
        };
        let Some(short_id) = detected_short_id(text) else {
            log::debug!("audio-beacon: ignoring non-beacon audio activity");
            return;
        };
        // A synthetic identity: detection alone never carries the full
        // mesh id, so the endpoint handle is derived from what was heard.
        let endpoint = EndpointId::new(format!("audio:{short_id}"));
        if let Some(events) = self.events.lock().await.clone() {
            let _ = events
                .peer_connected
                .send(PeerConnected {
                    transport: TransportKind::AudioBeacon,
                    endpoint_id: endpoint,
                    mesh_id: None,
                    display_name: None,
                })
                .await;
        }
    }
}

#[async_trait]
impl Transport for AudioBeaconTransport {
    fn name(&self) -> &'static str {
        "audio-beacon"
    }

    fn kind(&self) -> TransportKind {
        TransportKind::AudioBeacon
    }

    fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    async fn start(&self, events: TransportEvents) -> Result<(), TransportError> {
        *self.inner.events.lock().await = Some(events);
        self.inner.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        self.inner.peers.lock().await.clear();
        *self.inner.events.lock().await = None;
    }

    /// AudioBeacon never carries full packets; per the interface contract
    /// this is a hard no-op failure rather than a silent drop.
    async fn send_packet(
        &self,
        _packet: &MeshPacket,
        _endpoint: Option<&EndpointId>,
    ) -> Result<(), TransportError> {
        Err(TransportError::PayloadTooLarge(usize::MAX, MAX_BEACON_BYTES))
    }

    async fn send_bytes(
        &self,
        data: &[u8],
        _endpoint: Option<&EndpointId>,
    ) -> Result<(), TransportError> {
        if !self.is_active() {
            return Err(TransportError::NotActive("audio-beacon"));
        }
        if data.len() > MAX_BEACON_BYTES {
            return Err(TransportError::PayloadTooLarge(data.len(), MAX_BEACON_BYTES));
        }
        for peer in self.inner.peers.lock().await.iter() {
            let _ = peer.send(data.to_vec()).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_fixed_hello_beacon_with_four_char_short_id() {
        let beacon = AudioBeaconTransport::new("aaaaaaaa-node");
        let (events, _channels) = crate::events::new_event_channels();
        beacon.start(events).await.unwrap();

        let (out_tx, mut out_rx) = mpsc::channel(4);
        beacon.attach_listener(out_tx).await;

        beacon.emit_beacon().await.unwrap();
        let heard = out_rx.recv().await.unwrap();
        assert_eq!(heard, b"HELLO:aaaa");
    }

    #[tokio::test]
    async fn detecting_a_beacon_emits_peer_connected_with_synthetic_identity() {
        let listener = AudioBeaconTransport::new("bbbb");
        let (events, mut channels) = crate::events::new_event_channels();
        listener.start(events).await.unwrap();

        let (out_tx, _out_rx) = mpsc::channel(4);
        let hear_tx = listener.attach_listener(out_tx).await;
        hear_tx.send(b"HELLO:cccc".to_vec()).await.unwrap();

        let connected = channels.peer_connected.recv().await.unwrap();
        assert_eq!(connected.endpoint_id, EndpointId::new("audio:cccc"));
        assert!(connected.mesh_id.is_none());
    }

    #[tokio::test]
    async fn full_packet_send_is_rejected() {
        use mesh_protocol::{ContentKind, MeshId, PacketId, PacketKind};
        let beacon = AudioBeaconTransport::new("aaaa");
        let (events, _channels) = crate::events::new_event_channels();
        beacon.start(events).await.unwrap();

        let packet = MeshPacket {
            packet_id: PacketId::generate(),
            version: mesh_protocol::PROTOCOL_VERSION,
            kind: PacketKind::Ping,
            sender_id: MeshId::new("aaaa"),
            sender_name: "A".into(),
            destination_id: MeshId::broadcast(),
            hop_count: 0,
            max_hops: mesh_protocol::DEFAULT_MAX_HOPS,
            timestamp: 0,
            previous_hop: None,
            route_path: Vec::new(),
            content_kind: ContentKind::Ping,
            content: Vec::new(),
            media_info: None,
            ack_for_packet_id: None,
        };
        assert!(beacon.send_packet(&packet, None).await.is_err());
    }
}
