//! The brain: accepts inbound packets from the dispatcher and outbound send
//! requests from the application, implements routing, forwarding, ACK
//! generation, peer-discovery handling, store-and-forward, and emits status
//! events. The router, dispatcher, and seen-cache are owned by a single
//! top-level service struct ([`Router`] itself plays that role here) built
//! at startup — there is no global singleton.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mesh_protocol::{
    ContentKind, MeshId, MeshPacket, PacketId, PacketKind, PeerAnnouncement, DEFAULT_MAX_HOPS,
    PROTOCOL_VERSION,
};
use mesh_transport::{
    AggregateStatus, Dispatcher, EndpointId, PacketReceived, PeerAnnouncer, PeerConnected,
    PeerDisconnected, TransportEventChannels, TransportKind,
};

use crate::config::{RouterConfig, RouterStats, RouterStatsSnapshot};
use crate::error::RouterError;
use crate::model::{
    preview_for, ConnectionState, Conversation, MeshMessage, MessageStatus, Peer,
    BROADCAST_CONVERSATION_ID,
};
use crate::persistence::{ConversationStore, MessageStore, PeerStore};
use crate::seen_cache::{SeenCache, SWEEP_INTERVAL as SEEN_SWEEP_INTERVAL};
use crate::status_bus::{StatusBus, StatusEvent};
use crate::time::now_epoch_ms;

pub struct Router {
    local_mesh_id: MeshId,
    local_display_name: String,
    config: RouterConfig,
    seen: SeenCache,
    messages: Arc<dyn MessageStore>,
    peers: Arc<dyn PeerStore>,
    conversations: Arc<dyn ConversationStore>,
    status_bus: StatusBus,
    dispatcher: Arc<Dispatcher>,
    stats: RouterStats,
    sweep_cancel: std::sync::Mutex<Option<CancellationToken>>,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_mesh_id: MeshId,
        local_display_name: String,
        config: RouterConfig,
        messages: Arc<dyn MessageStore>,
        peers: Arc<dyn PeerStore>,
        conversations: Arc<dyn ConversationStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_mesh_id,
            local_display_name,
            config,
            seen: SeenCache::new(),
            messages,
            peers,
            conversations,
            status_bus: StatusBus::new(),
            dispatcher,
            stats: RouterStats::default(),
            sweep_cancel: std::sync::Mutex::new(None),
        })
    }

    pub fn status_bus(&self) -> &StatusBus {
        &self.status_bus
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Drains the dispatcher's merged event channels for the lifetime of
    /// the router, and runs the periodic retention sweep, periodic
    /// seen-cache sweep, and dispatcher-status forwarding as their own
    /// tasks. Spawned as one independent task per subsystem, matching the
    /// concurrency model.
    pub fn spawn_ingestion(self: &Arc<Self>, mut channels: TransportEventChannels) {
        let router = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = channels.packet_received.recv() => {
                        router.clone().handle_inbound(event).await;
                    }
                    Some(event) = channels.peer_connected.recv() => {
                        router.dispatcher.on_peer_connected(&event).await;
                        router.clone().on_peer_connected(event).await;
                    }
                    Some(event) = channels.peer_disconnected.recv() => {
                        router.dispatcher.on_peer_disconnected(&event).await;
                        router.clone().on_peer_disconnected(event).await;
                    }
                    else => break,
                }
            }
        });

        let cancel = CancellationToken::new();
        *self.sweep_cancel.lock().expect("sweep_cancel lock poisoned") = Some(cancel.clone());

        let router = self.clone();
        tokio::spawn({
            let interval = self.config.retention_sweep_interval;
            let cancel = cancel.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => router.run_retention_sweep().await,
                    }
                }
            }
        });

        let router = self.clone();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(SEEN_SWEEP_INTERVAL) => router.seen.sweep().await,
                    }
                }
            }
        });

        let router = self.clone();
        tokio::spawn(async move {
            let mut status_rx = router.dispatcher.status();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = status_rx.changed() => {
                        if result.is_err() {
                            break;
                        }
                        let status = status_rx.borrow().clone();
                        router.status_bus.publish_connection_status(status);
                    }
                }
            }
        });
    }

    /// Cancels the retention sweep, seen-cache sweep, and status-forwarding
    /// tasks. The ingestion loop itself ends when the dispatcher's event
    /// channels close (i.e. after `stop_all`).
    pub fn stop_background_tasks(&self) {
        if let Some(cancel) = self.sweep_cancel.lock().expect("sweep_cancel lock poisoned").take() {
            cancel.cancel();
        }
    }

    async fn run_retention_sweep(&self) {
        let threshold = now_epoch_ms().saturating_sub(self.config.persistence_retention.as_millis() as u64);
        match self.messages.delete_older_than(threshold).await {
            Ok(count) if count > 0 => log::debug!("router: retention sweep removed {count} messages"),
            Ok(_) => {}
            Err(err) => log::warn!("router: retention sweep failed: {err}"),
        }
    }

    // ---- 4.5.1 Inbound pipeline -------------------------------------------------

    async fn handle_inbound(self: Arc<Self>, event: PacketReceived) {
        self.stats.packets_received();
        let packet = event.packet;

        if self.seen.contains(&packet.packet_id).await {
            self.stats.packets_dropped_duplicate();
            log::debug!("router: dropping duplicate packet {}", packet.packet_id);
            return;
        }
        self.seen.insert(packet.packet_id).await;

        if packet.is_expired() {
            self.stats.packets_dropped_ttl();
            log::debug!("router: dropping expired packet {}", packet.packet_id);
            return;
        }

        if packet.carries(&self.local_mesh_id) {
            self.stats.packets_dropped_loop();
            log::debug!("router: dropping looped packet {}", packet.packet_id);
            return;
        }

        match packet.kind {
            PacketKind::Message | PacketKind::MediaChunk => self.handle_message(packet).await,
            PacketKind::Ack => self.handle_ack(packet).await,
            PacketKind::PeerAnnounce => self.handle_peer_announce(packet).await,
            PacketKind::PeerLeave => self.handle_peer_leave(packet).await,
            PacketKind::Ping => self.handle_ping(packet).await,
            PacketKind::Pong => self.handle_pong(packet).await,
            PacketKind::Sos => self.handle_sos(packet).await,
            PacketKind::RouteRequest => self.handle_route_request(packet).await,
            PacketKind::RouteReply => self.handle_route_reply(packet).await,
            PacketKind::RelayTable => {
                log::debug!("router: received advisory RELAY_TABLE packet, not merged into peer store");
            }
            PacketKind::Unknown => {
                log::debug!("router: dropping packet with unrecognised kind from {}", packet.sender_id);
            }
        }
    }

    async fn handle_message(self: &Arc<Self>, packet: MeshPacket) {
        let for_us = packet.is_for(&self.local_mesh_id);
        let broadcast = packet.is_broadcast();

        if for_us || broadcast {
            self.deliver(&packet).await;
            if for_us && !broadcast {
                self.send_ack_for(&packet).await;
            }
        }

        if broadcast || !for_us {
            self.forward(&packet).await;
        }
    }

    async fn handle_ack(self: &Arc<Self>, packet: MeshPacket) {
        if packet.is_for(&self.local_mesh_id) {
            if let Some(acked) = packet.ack_for_packet_id {
                if let Err(err) = self.messages.update_status(&acked, MessageStatus::Delivered).await {
                    log::warn!("router: failed to mark {acked} delivered: {err}");
                    self.status_bus.publish_status_event(StatusEvent::Error(err.to_string()));
                    return;
                }
                self.status_bus.publish_status_event(StatusEvent::MessageDelivered(acked));
            }
        } else {
            self.forward(&packet).await;
        }
    }

    async fn handle_peer_announce(self: &Arc<Self>, packet: MeshPacket) {
        let Ok(announcement) = rmp_serde::from_slice::<PeerAnnouncement>(&packet.content) else {
            log::debug!("router: dropping malformed PEER_ANNOUNCE payload");
            return;
        };

        let now = now_epoch_ms();
        let connection_state = if packet.hop_count == 0 {
            ConnectionState::Connected
        } else {
            ConnectionState::Discovered
        };

        let existing = self.peers.get_by_mesh_id(&announcement.mesh_id).await.ok().flatten();
        let first_seen = existing.as_ref().map(|p| p.first_seen).unwrap_or(now);

        let peer = Peer {
            mesh_id: announcement.mesh_id.clone(),
            display_name: announcement.display_name.clone(),
            device_name: announcement.device_name.clone(),
            endpoint_id: existing.as_ref().and_then(|p| p.endpoint_id.clone()),
            connection_state,
            transport: existing.as_ref().and_then(|p| p.transport),
            signal_strength: existing.as_ref().and_then(|p| p.signal_strength),
            hop_distance: packet.hop_count,
            latitude: announcement.latitude,
            longitude: announcement.longitude,
            last_seen: now,
            first_seen,
            messages_relayed: existing.as_ref().map(|p| p.messages_relayed).unwrap_or(0),
            is_blocked: existing.as_ref().map(|p| p.is_blocked).unwrap_or(false),
            is_favorite: existing.as_ref().map(|p| p.is_favorite).unwrap_or(false),
            avatar_color: existing
                .as_ref()
                .map(|p| p.avatar_color.clone())
                .unwrap_or_else(|| crate::model::avatar_color_for(announcement.mesh_id.as_str())),
        };

        if let Err(err) = self.peers.upsert(peer.clone()).await {
            log::warn!("router: failed to upsert peer {}: {err}", announcement.mesh_id);
            return;
        }
        self.status_bus.publish_status_event(StatusEvent::PeerDiscovered(peer));

        self.forward(&packet).await;
        self.store_and_forward(&announcement.mesh_id).await;
    }

    async fn handle_peer_leave(self: &Arc<Self>, packet: MeshPacket) {
        if let Err(err) = self
            .peers
            .update_connection_state(&packet.sender_id, ConnectionState::Disconnected)
            .await
        {
            log::warn!("router: failed to mark {} disconnected: {err}", packet.sender_id);
        }
        self.forward(&packet).await;
    }

    async fn handle_ping(self: &Arc<Self>, packet: MeshPacket) {
        if packet.is_for(&self.local_mesh_id) {
            let pong = self.build_reply(&packet, PacketKind::Pong, ContentKind::Ping, Vec::new());
            self.emit(&pong).await;
        } else {
            self.forward(&packet).await;
        }
    }

    /// A PONG only ever answers one of our own PINGs, so it always touches a
    /// peer already known to us; bumps `last_seen` on that record.
    async fn handle_pong(self: &Arc<Self>, packet: MeshPacket) {
        if !packet.is_for(&self.local_mesh_id) {
            self.forward(&packet).await;
            return;
        }
        if let Ok(Some(mut peer)) = self.peers.get_by_mesh_id(&packet.sender_id).await {
            peer.last_seen = now_epoch_ms();
            if let Err(err) = self.peers.upsert(peer).await {
                log::warn!("router: failed to record PONG presence for {}: {err}", packet.sender_id);
            }
        }
    }

    async fn handle_sos(self: &Arc<Self>, packet: MeshPacket) {
        self.deliver(&packet).await;
        self.status_bus.publish_status_event(StatusEvent::SOSReceived {
            sender_name: packet.sender_name.clone(),
            message: self.to_mesh_message(&packet, false),
        });
        self.stats.sos_received();
        self.forward(&packet).await;
    }

    async fn handle_route_request(self: &Arc<Self>, packet: MeshPacket) {
        let target = MeshId::new(String::from_utf8_lossy(&packet.content).into_owned());
        if let Ok(Some(peer)) = self.peers.get_by_mesh_id(&target).await {
            if peer.connection_state == ConnectionState::Connected {
                let reply = self.build_reply(
                    &packet,
                    PacketKind::RouteReply,
                    ContentKind::Text,
                    target.as_str().as_bytes().to_vec(),
                );
                self.emit(&reply).await;
            }
        }
        self.forward(&packet).await;
    }

    async fn handle_route_reply(self: &Arc<Self>, packet: MeshPacket) {
        if !packet.is_for(&self.local_mesh_id) {
            self.forward(&packet).await;
        }
        // Route knowledge beyond forwarding is not modeled by the
        // persistence contract; noting the route is a no-op here.
    }

    // ---- 4.5.2 Delivery ----------------------------------------------------------

    async fn deliver(self: &Arc<Self>, packet: &MeshPacket) {
        let message = self.to_mesh_message(packet, false);
        let packet_id = message.packet_id;

        if let Err(err) = self.messages.insert_ignore(message.clone()).await {
            log::warn!("router: failed to persist message {packet_id}: {err}");
            self.status_bus.publish_status_event(StatusEvent::Error(err.to_string()));
            return;
        }

        self.ensure_conversation(packet).await;
        let preview = preview_for(packet.content_kind, &packet.content);
        let increment_unread = !message.is_outgoing;
        if let Err(err) = self
            .conversations
            .update_last_message(&message.conversation_id, &preview, message.received_at, increment_unread)
            .await
        {
            log::warn!("router: failed to update conversation preview: {err}");
        }

        self.stats.messages_delivered();
        self.status_bus.publish_incoming_message(message);
        self.status_bus.publish_status_event(StatusEvent::MessageReceived);
    }

    async fn ensure_conversation(&self, packet: &MeshPacket) {
        let conversation_id = self.peer_conversation_id(&packet.sender_id, packet.destination_id.is_sentinel());
        if self.conversations.get_by_id(&conversation_id).await.ok().flatten().is_some() {
            return;
        }
        let now = now_epoch_ms();
        let conversation = if packet.is_broadcast() || packet.is_sos_broadcast() {
            Conversation::new_broadcast(now)
        } else {
            Conversation::new_for_peer(conversation_id, packet.sender_id.clone(), packet.sender_name.clone(), now)
        };
        if let Err(err) = self.conversations.upsert(conversation).await {
            log::warn!("router: failed to create conversation: {err}");
        }
    }

    /// Derives the conversation a packet belongs to from the *other party*
    /// in the exchange — the remote sender on inbound, the destination on
    /// outbound — never from our own id, so a 1:1 conversation is keyed the
    /// same way regardless of which direction a given message travelled.
    fn peer_conversation_id(&self, other_party: &MeshId, is_broadcast: bool) -> String {
        if is_broadcast {
            BROADCAST_CONVERSATION_ID.to_string()
        } else {
            other_party.as_str().to_string()
        }
    }

    fn to_mesh_message(&self, packet: &MeshPacket, is_outgoing: bool) -> MeshMessage {
        MeshMessage {
            packet_id: packet.packet_id,
            conversation_id: self.peer_conversation_id(&packet.sender_id, packet.destination_id.is_sentinel()),
            sender_id: packet.sender_id.clone(),
            sender_name: packet.sender_name.clone(),
            destination_id: packet.destination_id.clone(),
            content_kind: packet.content_kind,
            content: packet.content.clone(),
            media_info: packet.media_info.clone(),
            timestamp: packet.timestamp,
            received_at: now_epoch_ms(),
            hop_count: packet.hop_count,
            max_hops: packet.max_hops,
            status: if is_outgoing { MessageStatus::Sending } else { MessageStatus::Delivered },
            is_outgoing,
            is_read: is_outgoing,
        }
    }

    // ---- 4.5.3 Forwarding ----------------------------------------------------------

    async fn forward(self: &Arc<Self>, packet: &MeshPacket) {
        if packet.is_expired() {
            return;
        }
        let forwarded = packet.forwarded_via(&self.local_mesh_id);
        self.stats.packets_forwarded();
        self.emit(&forwarded).await;
    }

    async fn send_ack_for(self: &Arc<Self>, packet: &MeshPacket) {
        let mut ack = self.build_reply(packet, PacketKind::Ack, ContentKind::Ack, Vec::new());
        ack.ack_for_packet_id = Some(packet.packet_id);
        self.stats.acks_sent();
        self.emit(&ack).await;
    }

    fn build_reply(
        &self,
        in_reply_to: &MeshPacket,
        kind: PacketKind,
        content_kind: ContentKind,
        content: Vec<u8>,
    ) -> MeshPacket {
        MeshPacket {
            packet_id: PacketId::generate(),
            version: PROTOCOL_VERSION,
            kind,
            sender_id: self.local_mesh_id.clone(),
            sender_name: self.local_display_name.clone(),
            destination_id: in_reply_to.sender_id.clone(),
            hop_count: 0,
            max_hops: DEFAULT_MAX_HOPS,
            timestamp: now_epoch_ms(),
            previous_hop: None,
            route_path: Vec::new(),
            content_kind,
            content,
            media_info: None,
            ack_for_packet_id: None,
        }
    }

    // ---- 4.5.4 Outbound send -------------------------------------------------------

    pub async fn send_message(
        self: &Arc<Self>,
        destination_id: MeshId,
        content: Vec<u8>,
        content_kind: ContentKind,
        media_info: Option<mesh_protocol::MediaInfo>,
    ) -> Result<MeshMessage, RouterError> {
        let packet_id = PacketId::generate();
        let now = now_epoch_ms();

        let conversation_id = self.peer_conversation_id(&destination_id, destination_id.is_sentinel());
        self.get_or_create_outbound_conversation(&conversation_id, &destination_id).await;

        let kind = if content_kind == ContentKind::Sos { PacketKind::Sos } else { PacketKind::Message };

        let message = MeshMessage {
            packet_id,
            conversation_id: conversation_id.clone(),
            sender_id: self.local_mesh_id.clone(),
            sender_name: self.local_display_name.clone(),
            destination_id: destination_id.clone(),
            content_kind,
            content: content.clone(),
            media_info: media_info.clone(),
            timestamp: now,
            received_at: now,
            hop_count: 0,
            max_hops: DEFAULT_MAX_HOPS,
            status: MessageStatus::Sending,
            is_outgoing: true,
            is_read: true,
        };
        self.messages.insert_ignore(message.clone()).await?;

        let preview = preview_for(content_kind, &content);
        self.conversations.update_last_message(&conversation_id, &preview, now, false).await?;

        let packet = MeshPacket {
            packet_id,
            version: PROTOCOL_VERSION,
            kind,
            sender_id: self.local_mesh_id.clone(),
            sender_name: self.local_display_name.clone(),
            destination_id,
            hop_count: 0,
            max_hops: DEFAULT_MAX_HOPS,
            timestamp: now,
            previous_hop: None,
            route_path: Vec::new(),
            content_kind,
            content,
            media_info,
            ack_for_packet_id: None,
        };

        self.seen.insert(packet_id).await;
        self.emit(&packet).await;
        self.messages.update_status(&packet_id, MessageStatus::Sent).await?;

        let mut sent = message;
        sent.status = MessageStatus::Sent;
        Ok(sent)
    }

    pub async fn send_sos(self: &Arc<Self>, message: Vec<u8>) -> Result<MeshMessage, RouterError> {
        self.send_message(MeshId::sos_broadcast(), message, ContentKind::Sos, None).await
    }

    pub async fn broadcast_peer_announcement(self: &Arc<Self>, latitude: Option<f64>, longitude: Option<f64>) {
        self.publish_peer_announcement(latitude, longitude).await;
    }

    async fn publish_peer_announcement(&self, latitude: Option<f64>, longitude: Option<f64>) {
        let status = self.dispatcher.status().borrow().clone();
        let announcement = PeerAnnouncement {
            mesh_id: self.local_mesh_id.clone(),
            display_name: self.local_display_name.clone(),
            device_name: None,
            latitude,
            longitude,
            capabilities: Vec::new(),
            connected_peer_count: status.connected_peer_count as u32,
            battery_level: None,
            protocol_version: PROTOCOL_VERSION,
        };
        let Ok(content) = rmp_serde::to_vec_named(&announcement) else {
            log::warn!("router: failed to encode peer announcement");
            return;
        };

        let packet = MeshPacket {
            packet_id: PacketId::generate(),
            version: PROTOCOL_VERSION,
            kind: PacketKind::PeerAnnounce,
            sender_id: self.local_mesh_id.clone(),
            sender_name: self.local_display_name.clone(),
            destination_id: MeshId::broadcast(),
            hop_count: 0,
            max_hops: DEFAULT_MAX_HOPS,
            timestamp: now_epoch_ms(),
            previous_hop: None,
            route_path: Vec::new(),
            content_kind: ContentKind::PeerAnnounce,
            content,
            media_info: None,
            ack_for_packet_id: None,
        };
        self.seen.insert(packet.packet_id).await;
        self.emit(&packet).await;
    }

    async fn get_or_create_outbound_conversation(&self, conversation_id: &str, destination_id: &MeshId) {
        if self.conversations.get_by_id(conversation_id).await.ok().flatten().is_some() {
            return;
        }
        let now = now_epoch_ms();
        let conversation = if destination_id.is_sentinel() {
            Conversation::new_broadcast(now)
        } else {
            let display_name = self
                .peers
                .get_by_mesh_id(destination_id)
                .await
                .ok()
                .flatten()
                .map(|p| p.display_name)
                .unwrap_or_else(|| destination_id.to_string());
            Conversation::new_for_peer(conversation_id.to_string(), destination_id.clone(), display_name, now)
        };
        if let Err(err) = self.conversations.upsert(conversation).await {
            log::warn!("router: failed to create outbound conversation: {err}");
        }
    }

    // ---- 4.5.5 Outbound path selection ----------------------------------------------

    async fn resolve_send_target(&self, destination_id: &MeshId) -> (Option<EndpointId>, Option<TransportKind>) {
        if destination_id.is_sentinel() {
            return (None, None);
        }
        match self.peers.get_by_mesh_id(destination_id).await {
            Ok(Some(peer)) if peer.connection_state == ConnectionState::Connected => {
                let endpoint = peer.endpoint_id.map(EndpointId::new);
                (endpoint, peer.transport)
            }
            _ => (None, None),
        }
    }

    async fn emit(&self, packet: &MeshPacket) {
        let (endpoint, transport_kind) = self.resolve_send_target(&packet.destination_id).await;
        self.dispatcher.send(packet, endpoint.as_ref(), transport_kind).await;
    }

    // ---- 4.5.6 Peer lifecycle hooks -----------------------------------------------

    async fn on_peer_connected(self: Arc<Self>, event: PeerConnected) {
        let Some(mesh_id) = event.mesh_id.map(MeshId::new) else {
            // NeighborDiscovery upgrades identity on first packet, not on
            // connect; other transports may legitimately connect without
            // one yet.
            return;
        };
        let now = now_epoch_ms();
        let existing = self.peers.get_by_mesh_id(&mesh_id).await.ok().flatten();
        let peer = Peer {
            mesh_id: mesh_id.clone(),
            display_name: event.display_name.unwrap_or_else(|| mesh_id.to_string()),
            device_name: existing.as_ref().and_then(|p| p.device_name.clone()),
            endpoint_id: Some(event.endpoint_id.to_string()),
            connection_state: ConnectionState::Connected,
            transport: Some(event.transport),
            signal_strength: existing.as_ref().and_then(|p| p.signal_strength),
            hop_distance: 0,
            latitude: existing.as_ref().and_then(|p| p.latitude),
            longitude: existing.as_ref().and_then(|p| p.longitude),
            last_seen: now,
            first_seen: existing.as_ref().map(|p| p.first_seen).unwrap_or(now),
            messages_relayed: existing.as_ref().map(|p| p.messages_relayed).unwrap_or(0),
            is_blocked: existing.as_ref().map(|p| p.is_blocked).unwrap_or(false),
            is_favorite: existing.as_ref().map(|p| p.is_favorite).unwrap_or(false),
            avatar_color: existing
                .as_ref()
                .map(|p| p.avatar_color.clone())
                .unwrap_or_else(|| crate::model::avatar_color_for(mesh_id.as_str())),
        };
        if let Err(err) = self.peers.upsert(peer.clone()).await {
            log::warn!("router: failed to upsert connected peer {mesh_id}: {err}");
            return;
        }
        self.status_bus.publish_status_event(StatusEvent::PeerConnected(peer));
        self.store_and_forward(&mesh_id).await;
        self.broadcast_peer_announcement(None, None).await;
    }

    async fn on_peer_disconnected(self: Arc<Self>, event: PeerDisconnected) {
        let Ok(Some(peer)) = self.peers.get_by_endpoint_id(event.endpoint_id.as_str()).await else {
            return;
        };
        if let Err(err) = self.peers.update_connection_state(&peer.mesh_id, ConnectionState::Disconnected).await {
            log::warn!("router: failed to mark {} disconnected: {err}", peer.mesh_id);
            return;
        }
        let mut disconnected = peer;
        disconnected.connection_state = ConnectionState::Disconnected;
        self.status_bus.publish_status_event(StatusEvent::PeerDisconnected(disconnected));
    }

    // ---- 4.5.7 Store-and-forward ----------------------------------------------------

    async fn store_and_forward(self: &Arc<Self>, peer_id: &MeshId) {
        let pending = match self.messages.get_undelivered_for_peer(peer_id).await {
            Ok(pending) => pending,
            Err(err) => {
                log::warn!("router: failed to load undelivered messages for {peer_id}: {err}");
                return;
            }
        };
        for message in pending {
            let packet = MeshPacket {
                packet_id: message.packet_id,
                version: PROTOCOL_VERSION,
                kind: if message.content_kind == ContentKind::Sos { PacketKind::Sos } else { PacketKind::Message },
                sender_id: message.sender_id,
                sender_name: message.sender_name,
                destination_id: message.destination_id,
                hop_count: 0,
                max_hops: message.max_hops,
                timestamp: message.timestamp,
                previous_hop: None,
                route_path: Vec::new(),
                content_kind: message.content_kind,
                content: message.content,
                media_info: message.media_info,
                ack_for_packet_id: None,
            };
            self.emit(&packet).await;
        }
    }
}

#[async_trait]
impl PeerAnnouncer for Router {
    /// Reached by the dispatcher's 60 s ticker through the trait object; no
    /// geo fix is available on that path, so it announces without one.
    async fn broadcast_peer_announcement(&self) {
        self.publish_peer_announcement(None, None).await;
    }
}

/// Aggregate link status, re-exported so callers don't need to depend on
/// `mesh-transport` directly just to read it off the router.
pub type ConnectionStatus = AggregateStatus;
