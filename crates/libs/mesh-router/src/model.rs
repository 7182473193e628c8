//! Application-visible, persisted data model: messages, peers, and
//! conversations. These are distinct from [`mesh_protocol::MeshPacket`],
//! the wire envelope — a packet becomes (at most) one `MeshMessage`.

use mesh_protocol::{ContentKind, MediaInfo, MeshId, PacketId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Sending,
    Sent,
    Relayed,
    Delivered,
    Read,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshMessage {
    pub packet_id: PacketId,
    pub conversation_id: String,
    pub sender_id: MeshId,
    pub sender_name: String,
    pub destination_id: MeshId,
    pub content_kind: ContentKind,
    pub content: Vec<u8>,
    pub media_info: Option<MediaInfo>,
    pub timestamp: u64,
    pub received_at: u64,
    pub hop_count: u32,
    pub max_hops: u32,
    pub status: MessageStatus,
    pub is_outgoing: bool,
    pub is_read: bool,
}

/// Short symbolic preview for a message, used by conversation summaries.
/// Same derivation for inbound and outbound messages.
pub fn preview_for(content_kind: ContentKind, content: &[u8]) -> String {
    const TEXT_PREVIEW_LIMIT: usize = 100;
    match content_kind {
        ContentKind::Text => {
            let text = String::from_utf8_lossy(content);
            if text.chars().count() > TEXT_PREVIEW_LIMIT {
                format!("{}…", text.chars().take(TEXT_PREVIEW_LIMIT).collect::<String>())
            } else {
                text.into_owned()
            }
        }
        ContentKind::Audio => "🎤 Voice message".to_string(),
        ContentKind::Image => "📷 Photo".to_string(),
        ContentKind::File => "📎 File".to_string(),
        ContentKind::Location => "📍 Location".to_string(),
        ContentKind::Sos => "🆘 SOS".to_string(),
        ContentKind::Ack => "✓ Delivered".to_string(),
        ContentKind::PeerAnnounce => "👋 Peer announcement".to_string(),
        ContentKind::Ping => "· Ping".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Discovered,
    Connecting,
    Connected,
    Authenticated,
    Disconnected,
    Lost,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub mesh_id: MeshId,
    pub display_name: String,
    pub device_name: Option<String>,
    pub endpoint_id: Option<String>,
    pub connection_state: ConnectionState,
    pub transport: Option<mesh_transport::TransportKind>,
    pub signal_strength: Option<i32>,
    pub hop_distance: u32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub last_seen: u64,
    pub first_seen: u64,
    pub messages_relayed: u64,
    pub is_blocked: bool,
    pub is_favorite: bool,
    pub avatar_color: String,
}

impl Peer {
    pub fn new_discovered(mesh_id: MeshId, display_name: String, now: u64) -> Self {
        Self {
            mesh_id,
            display_name,
            device_name: None,
            endpoint_id: None,
            connection_state: ConnectionState::Discovered,
            transport: None,
            signal_strength: None,
            hop_distance: 0,
            latitude: None,
            longitude: None,
            last_seen: now,
            first_seen: now,
            messages_relayed: 0,
            is_blocked: false,
            is_favorite: false,
            avatar_color: avatar_color_for(&format!("{}", now)),
        }
    }
}

/// Deterministic pseudo-random color assignment for a new peer's avatar.
pub fn avatar_color_for(seed: &str) -> String {
    const PALETTE: &[&str] = &["#E57373", "#64B5F6", "#81C784", "#FFD54F", "#BA68C8", "#4DB6AC"];
    let hash = seed.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    PALETTE[(hash as usize) % PALETTE.len()].to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversationFlags {
    pub pinned: bool,
    pub muted: bool,
    pub is_broadcast: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub peer_id: Option<MeshId>,
    pub peer_name: String,
    pub last_message_preview: String,
    pub last_message_time: u64,
    pub unread_count: u32,
    pub flags: ConversationFlags,
    pub created_at: u64,
    pub updated_at: u64,
}

/// The conversation id the broadcast sentinel always maps to.
pub const BROADCAST_CONVERSATION_ID: &str = "broadcast";

impl Conversation {
    pub fn new_broadcast(now: u64) -> Self {
        Self {
            id: BROADCAST_CONVERSATION_ID.to_string(),
            peer_id: None,
            peer_name: "Broadcast".to_string(),
            last_message_preview: String::new(),
            last_message_time: now,
            unread_count: 0,
            flags: ConversationFlags { is_broadcast: true, ..Default::default() },
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_for_peer(id: String, peer_id: MeshId, peer_name: String, now: u64) -> Self {
        Self {
            id,
            peer_id: Some(peer_id),
            peer_name,
            last_message_preview: String::new(),
            last_message_time: now,
            unread_count: 0,
            flags: ConversationFlags::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_preview_truncates_at_100_chars() {
        let content = "x".repeat(150);
        let preview = preview_for(ContentKind::Text, content.as_bytes());
        assert_eq!(preview.chars().count(), 101); // 100 chars + ellipsis
    }

    #[test]
    fn short_text_preview_is_unchanged() {
        let preview = preview_for(ContentKind::Text, b"hi there");
        assert_eq!(preview, "hi there");
    }

    #[test]
    fn non_text_kinds_get_symbolic_previews() {
        assert!(preview_for(ContentKind::Sos, b"").contains("SOS"));
        assert!(preview_for(ContentKind::Image, b"").contains("Photo"));
    }
}
