//! # mesh-protocol
//!
//! Wire packet format and codec for the infrastructure-free mesh messaging
//! core. This crate owns the single envelope type (`MeshPacket`) that every
//! transport and the router agree on, and nothing else — no transport I/O,
//! no routing policy, no persistence.
//!
//! ## Format
//!
//! ```text
//! MeshPacket { packet_id, version, kind, sender_id, sender_name,
//!              destination_id, hop_count, max_hops, timestamp,
//!              previous_hop, route_path, content_kind, content,
//!              media_info, ack_for_packet_id }
//!   -> rmp_serde::to_vec_named (MessagePack, map mode)
//! ```
//!
//! Map-mode encoding is what buys forward compatibility: an older decoder
//! ignores map keys it doesn't recognise, and `#[serde(default)]` fills in
//! anything a newer encoder omitted.
//!
//! ## Example
//!
//! ```rust
//! use mesh_protocol::{codec, ContentKind, MeshId, MeshPacket, PacketId, PacketKind};
//!
//! let packet = MeshPacket {
//!     packet_id: PacketId::generate(),
//!     version: mesh_protocol::PROTOCOL_VERSION,
//!     kind: PacketKind::Message,
//!     sender_id: MeshId::new("node-a"),
//!     sender_name: "Alice".into(),
//!     destination_id: MeshId::broadcast(),
//!     hop_count: 0,
//!     max_hops: mesh_protocol::DEFAULT_MAX_HOPS,
//!     timestamp: 0,
//!     previous_hop: None,
//!     route_path: Vec::new(),
//!     content_kind: ContentKind::Text,
//!     content: b"hello mesh".to_vec(),
//!     media_info: None,
//!     ack_for_packet_id: None,
//! };
//! let bytes = codec::encode(&packet).unwrap();
//! let decoded = codec::decode(&bytes).unwrap();
//! assert_eq!(decoded.sender_name, "Alice");
//! ```

pub mod codec;
pub mod ids;
pub mod packet;

pub use codec::{decode, encode, CodecError, MAX_CORE_PAYLOAD_BYTES, MAX_MEDIA_PAYLOAD_BYTES};
pub use ids::{MeshId, PacketId, BROADCAST, DEFAULT_MAX_HOPS, PROTOCOL_VERSION, SOS_BROADCAST};
pub use packet::{ContentKind, MediaInfo, MeshPacket, PacketKind, PeerAnnouncement};
