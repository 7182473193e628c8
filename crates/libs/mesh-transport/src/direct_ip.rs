//! TCP-framed transport over a direct IP link (e.g. Wi-Fi Direct/P2P group
//! owner socket). Each packet is preceded by a 4-byte little-endian length
//! prefix; payloads larger than [`MAX_PAYLOAD_BYTES`] are rejected.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use mesh_protocol::{codec, MeshPacket};

use crate::error::TransportError;
use crate::events::{PacketReceived, PeerConnected, PeerDisconnected, TransportEvents};
use crate::transport::{EndpointId, Transport, TransportKind};

pub const MAX_PAYLOAD_BYTES: usize = 10_000_000;
const LENGTH_PREFIX_BYTES: usize = 4;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

struct Connection {
    write_half: Mutex<tokio::net::tcp::OwnedWriteHalf>,
    cancel: CancellationToken,
}

struct Inner {
    connections: Mutex<HashMap<EndpointId, Connection>>,
    events: Mutex<Option<TransportEvents>>,
    listen_cancel: CancellationToken,
    active: std::sync::atomic::AtomicBool,
}

pub struct DirectIpTransport {
    bind_addr: SocketAddr,
    inner: Arc<Inner>,
}

impl DirectIpTransport {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            inner: Arc::new(Inner {
                connections: Mutex::new(HashMap::new()),
                events: Mutex::new(None),
                listen_cancel: CancellationToken::new(),
                active: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    /// Actively connect to a peer's listening socket; used when this side
    /// initiates the P2P link rather than accepting it.
    pub async fn connect_to(&self, addr: SocketAddr) -> Result<EndpointId, TransportError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "direct-ip connect timed out",
            )))??;
        let endpoint = EndpointId::new(addr.to_string());
        self.adopt_stream(endpoint.clone(), stream).await;
        Ok(endpoint)
    }

    async fn adopt_stream(&self, endpoint: EndpointId, stream: TcpStream) {
        let (mut read_half, write_half) = stream.into_split();
        let cancel = CancellationToken::new();

        self.inner.connections.lock().await.insert(
            endpoint.clone(),
            Connection { write_half: Mutex::new(write_half), cancel: cancel.clone() },
        );

        if let Some(events) = self.inner.events.lock().await.clone() {
            let _ = events
                .peer_connected
                .send(PeerConnected {
                    transport: TransportKind::DirectIP,
                    endpoint_id: endpoint.clone(),
                    mesh_id: None,
                    display_name: None,
                })
                .await;
        }

        let inner = self.inner.clone();
        let endpoint_for_task = endpoint.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = read_framed(&mut read_half) => {
                        match result {
                            Ok(Some(bytes)) => inner.on_frame(endpoint_for_task.clone(), bytes).await,
                            Ok(None) => break,
                            Err(err) => {
                                log::warn!("direct-ip: read error on {endpoint_for_task}: {err}");
                                break;
                            }
                        }
                    }
                }
            }
            inner.on_disconnect(endpoint_for_task).await;
        });
    }
}

async fn read_framed(
    stream: &mut tokio::net::tcp::OwnedReadHalf,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; LENGTH_PREFIX_BYTES];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_PAYLOAD_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("direct-ip frame of {len} bytes exceeds {MAX_PAYLOAD_BYTES} byte limit"),
        ));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

impl Inner {
    async fn on_frame(&self, endpoint: EndpointId, bytes: Vec<u8>) {
        match codec::decode(&bytes) {
            Ok(packet) => {
                if let Some(events) = self.events.lock().await.clone() {
                    let _ = events
                        .packet_received
                        .send(PacketReceived {
                            transport: TransportKind::DirectIP,
                            from_endpoint: endpoint,
                            packet,
                        })
                        .await;
                }
            }
            Err(err) => log::debug!("direct-ip: dropping malformed frame from {endpoint}: {err}"),
        }
    }

    async fn on_disconnect(&self, endpoint: EndpointId) {
        self.connections.lock().await.remove(&endpoint);
        if let Some(events) = self.events.lock().await.clone() {
            let _ = events
                .peer_disconnected
                .send(PeerDisconnected { transport: TransportKind::DirectIP, endpoint_id: endpoint })
                .await;
        }
    }
}

#[async_trait]
impl Transport for DirectIpTransport {
    fn name(&self) -> &'static str {
        "direct-ip"
    }

    fn kind(&self) -> TransportKind {
        TransportKind::DirectIP
    }

    fn is_active(&self) -> bool {
        self.inner.active.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn start(&self, events: TransportEvents) -> Result<(), TransportError> {
        if self.is_active() {
            return Ok(());
        }
        *self.inner.events.lock().await = Some(events);

        let listener = TcpListener::bind(self.bind_addr).await?;
        self.inner.active.store(true, std::sync::atomic::Ordering::SeqCst);

        let inner = self.inner.clone();
        let cancel = self.inner.listen_cancel.clone();
        let self_ptr = DirectIpAcceptor { inner: inner.clone() };
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => self_ptr.adopt(stream, addr).await,
                            Err(err) => log::warn!("direct-ip: accept error: {err}"),
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        self.inner.listen_cancel.cancel();
        self.inner.active.store(false, std::sync::atomic::Ordering::SeqCst);
        let mut connections = self.inner.connections.lock().await;
        for connection in connections.values() {
            connection.cancel.cancel();
        }
        connections.clear();
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
            return Err(TransportError::NotActive("direct-ip"));
        }
        if data.len() > MAX_PAYLOAD_BYTES {
            return Err(TransportError::PayloadTooLarge(data.len(), MAX_PAYLOAD_BYTES));
        }

        let connections = self.inner.connections.lock().await;
        let targets: Vec<&Connection> = match endpoint {
            Some(id) => connections
                .get(id)
                .map(|c| vec![c])
                .ok_or_else(|| TransportError::UnknownEndpoint(id.to_string()))?,
            None => connections.values().collect(),
        };

        let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + data.len());
        frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
        frame.extend_from_slice(data);

        for connection in targets {
            let mut write_half = connection.write_half.lock().await;
            write_half.write_all(&frame).await?;
        }
        Ok(())
    }
}

/// Thin handle the accept loop uses so `adopt_stream` can run outside the
/// borrow of `DirectIpTransport` itself.
struct DirectIpAcceptor {
    inner: Arc<Inner>,
}

impl DirectIpAcceptor {
    async fn adopt(&self, stream: TcpStream, addr: SocketAddr) {
        let endpoint = EndpointId::new(addr.to_string());
        let (mut read_half, write_half) = stream.into_split();
        let cancel = CancellationToken::new();

        self.inner.connections.lock().await.insert(
            endpoint.clone(),
            Connection { write_half: Mutex::new(write_half), cancel: cancel.clone() },
        );

        if let Some(events) = self.inner.events.lock().await.clone() {
            let _ = events
                .peer_connected
                .send(PeerConnected {
                    transport: TransportKind::DirectIP,
                    endpoint_id: endpoint.clone(),
                    mesh_id: None,
                    display_name: None,
                })
                .await;
        }

        let inner = self.inner.clone();
        let endpoint_for_task = endpoint.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = read_framed(&mut read_half) => {
                        match result {
                            Ok(Some(bytes)) => inner.on_frame(endpoint_for_task.clone(), bytes).await,
                            Ok(None) => break,
                            Err(err) => {
                                log::warn!("direct-ip: read error on {endpoint_for_task}: {err}");
                                break;
                            }
                        }
                    }
                }
            }
            inner.on_disconnect(endpoint_for_task).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_protocol::{ContentKind, MeshId, PacketId, PacketKind};

    fn sample_packet() -> MeshPacket {
        MeshPacket {
            packet_id: PacketId::generate(),
            version: mesh_protocol::PROTOCOL_VERSION,
            kind: PacketKind::Message,
            sender_id: MeshId::new("aaa"),
            sender_name: "Alice".into(),
            destination_id: MeshId::new("bbb"),
            hop_count: 0,
            max_hops: mesh_protocol::DEFAULT_MAX_HOPS,
            timestamp: 0,
            previous_hop: None,
            route_path: Vec::new(),
            content_kind: ContentKind::Text,
            content: b"over tcp".to_vec(),
            media_info: None,
            ack_for_packet_id: None,
        }
    }

    #[tokio::test]
    async fn round_trips_a_packet_over_real_tcp() {
        let server = DirectIpTransport::new("127.0.0.1:0".parse().unwrap());
        let (server_events, mut server_channels) = crate::events::new_event_channels();
        // Bind an ephemeral port, then discover it for the client.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let bound_addr = listener.local_addr().unwrap();
        drop(listener);
        let server = DirectIpTransport::new(bound_addr);
        server.start(server_events).await.unwrap();

        let client = DirectIpTransport::new("127.0.0.1:0".parse().unwrap());
        let (client_events, _client_channels) = crate::events::new_event_channels();
        client.start(client_events).await.unwrap();

        let endpoint = client.connect_to(bound_addr).await.unwrap();

        let packet = sample_packet();
        client.send_packet(&packet, Some(&endpoint)).await.unwrap();

        let received = server_channels.packet_received.recv().await.unwrap();
        assert_eq!(received.packet, packet);
    }

    #[tokio::test]
    async fn rejects_oversize_payload_before_writing() {
        let transport = DirectIpTransport::new("127.0.0.1:0".parse().unwrap());
        let (events, _channels) = crate::events::new_event_channels();
        transport.start(events).await.unwrap();

        let oversized = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        let result = transport.send_bytes(&oversized, None).await;
        assert!(matches!(result, Err(TransportError::PayloadTooLarge(_, _))));
    }
}
