//! The sole wire-level envelope (`MeshPacket`) and its payload-adjacent types.

use serde::{Deserialize, Serialize};

use crate::ids::{MeshId, PacketId, DEFAULT_MAX_HOPS, PROTOCOL_VERSION};

/// Discriminates what a packet is for; the router, not the codec, decides
/// how an unrecognised kind is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum PacketKind {
    Message,
    Ack,
    PeerAnnounce,
    PeerLeave,
    Ping,
    Pong,
    RouteRequest,
    RouteReply,
    MediaChunk,
    Sos,
    RelayTable,
    #[serde(other)]
    Unknown,
}

/// What kind of payload `MeshPacket::content` carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Text,
    Audio,
    Image,
    File,
    Location,
    Ack,
    PeerAnnounce,
    Ping,
    Sos,
}

/// Present on packets carrying file/media payloads, chunked or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub file_name: String,
    pub mime_type: String,
    pub total_size: u64,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub checksum: String,
}

/// Payload carried inside a `PEER_ANNOUNCE` packet's `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerAnnouncement {
    pub mesh_id: MeshId,
    pub display_name: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub connected_peer_count: u32,
    #[serde(default)]
    pub battery_level: Option<u8>,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
}

fn default_protocol_version() -> u32 {
    PROTOCOL_VERSION
}

/// The sole wire-level envelope. Invariants (enforced by callers, not the
/// type itself, mirroring the codec's "pure, no I/O" contract):
/// `hop_count <= max_hops`; `sender_id` never mutated after origin;
/// `route_path` append-only; `packet_id` set once and preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshPacket {
    pub packet_id: PacketId,
    #[serde(default = "default_protocol_version")]
    pub version: u32,
    pub kind: PacketKind,
    pub sender_id: MeshId,
    pub sender_name: String,
    pub destination_id: MeshId,
    #[serde(default)]
    pub hop_count: u32,
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
    pub timestamp: u64,
    #[serde(default)]
    pub previous_hop: Option<MeshId>,
    #[serde(default)]
    pub route_path: Vec<MeshId>,
    pub content_kind: ContentKind,
    #[serde(with = "serde_bytes")]
    pub content: Vec<u8>,
    #[serde(default)]
    pub media_info: Option<MediaInfo>,
    #[serde(default)]
    pub ack_for_packet_id: Option<PacketId>,
}

fn default_max_hops() -> u32 {
    DEFAULT_MAX_HOPS
}

impl MeshPacket {
    /// True once `hop_count` has reached the ceiling; an expired packet is
    /// never forwarded.
    pub fn is_expired(&self) -> bool {
        self.hop_count >= self.max_hops
    }

    /// Has this node already touched the packet, as origin or forwarder?
    pub fn carries(&self, mesh_id: &MeshId) -> bool {
        &self.sender_id == mesh_id || self.route_path.iter().any(|hop| hop == mesh_id)
    }

    /// Build the next-hop packet: increments `hop_count`, stamps
    /// `previous_hop`, and appends to `route_path`. All other fields are
    /// unchanged, per the forwarding invariant.
    pub fn forwarded_via(&self, forwarder: &MeshId) -> MeshPacket {
        let mut next = self.clone();
        next.hop_count += 1;
        next.previous_hop = Some(forwarder.clone());
        next.route_path.push(forwarder.clone());
        next
    }

    pub fn is_for(&self, mesh_id: &MeshId) -> bool {
        &self.destination_id == mesh_id
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination_id.is_broadcast()
    }

    pub fn is_sos_broadcast(&self) -> bool {
        self.destination_id.is_sos_broadcast()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_packet() -> MeshPacket {
        MeshPacket {
            packet_id: PacketId::generate(),
            version: PROTOCOL_VERSION,
            kind: PacketKind::Message,
            sender_id: MeshId::new("aaa"),
            sender_name: "Alice".into(),
            destination_id: MeshId::new("ccc"),
            hop_count: 0,
            max_hops: DEFAULT_MAX_HOPS,
            timestamp: 1_000,
            previous_hop: None,
            route_path: Vec::new(),
            content_kind: ContentKind::Text,
            content: b"hi".to_vec(),
            media_info: None,
            ack_for_packet_id: None,
        }
    }

    #[test]
    fn expiry_at_max_hops() {
        let mut packet = base_packet();
        packet.hop_count = packet.max_hops;
        assert!(packet.is_expired());
    }

    #[test]
    fn forwarding_updates_only_hop_fields() {
        let packet = base_packet();
        let forwarded = packet.forwarded_via(&MeshId::new("bbb"));
        assert_eq!(forwarded.hop_count, packet.hop_count + 1);
        assert_eq!(forwarded.previous_hop, Some(MeshId::new("bbb")));
        assert_eq!(forwarded.route_path, vec![MeshId::new("bbb")]);
        assert_eq!(forwarded.packet_id, packet.packet_id);
        assert_eq!(forwarded.sender_id, packet.sender_id);
        assert_eq!(forwarded.content, packet.content);
    }

    #[test]
    fn carries_detects_origin_and_route_path() {
        let mut packet = base_packet();
        assert!(packet.carries(&MeshId::new("aaa")));
        packet.route_path.push(MeshId::new("bbb"));
        assert!(packet.carries(&MeshId::new("bbb")));
        assert!(!packet.carries(&MeshId::new("ccc")));
    }
}
