//! Packet codec: converts a [`MeshPacket`] to/from a self-describing byte
//! string with forward-compatible field ignoring.
//!
//! Encoding uses MessagePack in map mode (field name -> value), which is
//! what makes "unknown fields are ignored" and "missing optional fields take
//! their defaults" fall out of plain `serde` derive instead of hand-rolled
//! parsing: a future decoder simply never looks up a map key it doesn't
//! know, and `#[serde(default)]` fills in anything absent. The codec is
//! pure — no I/O, no allocation beyond the output buffer.

use crate::packet::MeshPacket;

/// Core payloads (anything that isn't a media chunk) are bounded to 64 KiB.
pub const MAX_CORE_PAYLOAD_BYTES: usize = 64 * 1024;
/// Media chunk payloads are bounded to 256 KiB.
pub const MAX_MEDIA_PAYLOAD_BYTES: usize = 256 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("packet too large: {0} bytes (limit {1})")]
    TooLarge(usize, usize),
    #[error("msgpack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

fn payload_limit(packet: &MeshPacket) -> usize {
    if packet.media_info.is_some() {
        MAX_MEDIA_PAYLOAD_BYTES
    } else {
        MAX_CORE_PAYLOAD_BYTES
    }
}

/// Encode a packet to its wire byte string.
pub fn encode(packet: &MeshPacket) -> Result<Vec<u8>, CodecError> {
    let limit = payload_limit(packet);
    if packet.content.len() > limit {
        return Err(CodecError::TooLarge(packet.content.len(), limit));
    }

    let bytes = rmp_serde::to_vec_named(packet)?;
    Ok(bytes)
}

/// Decode a packet from wire bytes. Returns `Err` on malformed input;
/// unknown fields are ignored and missing optional fields take their
/// defaults, satisfying the spec's "decode or None" contract (the `Err`
/// variant stands in for `None` — callers that only care about validity can
/// `.ok()` it).
pub fn decode(bytes: &[u8]) -> Result<MeshPacket, CodecError> {
    let trimmed = trim_trailing_whitespace(bytes);
    let packet: MeshPacket = rmp_serde::from_slice(trimmed)?;
    Ok(packet)
}

fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{MeshId, PacketId, DEFAULT_MAX_HOPS, PROTOCOL_VERSION};
    use crate::packet::{ContentKind, MediaInfo, PacketKind};

    fn sample() -> MeshPacket {
        MeshPacket {
            packet_id: PacketId::generate(),
            version: PROTOCOL_VERSION,
            kind: PacketKind::Message,
            sender_id: MeshId::new("aaa"),
            sender_name: "Alice".into(),
            destination_id: MeshId::new("ccc"),
            hop_count: 0,
            max_hops: DEFAULT_MAX_HOPS,
            timestamp: 12_345,
            previous_hop: None,
            route_path: Vec::new(),
            content_kind: ContentKind::Text,
            content: b"hello mesh".to_vec(),
            media_info: None,
            ack_for_packet_id: None,
        }
    }

    #[test]
    fn round_trip() {
        let packet = sample();
        let bytes = encode(&packet).expect("encode");
        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(decode(&[0xFF, 0x00, 0x01]).is_err());
    }

    #[test]
    fn decode_tolerates_trailing_whitespace() {
        let packet = sample();
        let mut bytes = encode(&packet).expect("encode");
        bytes.extend_from_slice(b"   \n");
        let decoded = decode(&bytes).expect("decode with trailing whitespace");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn decode_ignores_unknown_fields_and_fills_defaults() {
        let packet = sample();
        let bytes = encode(&packet).expect("encode");
        let mut value: rmpv::Value = rmp_serde::from_slice(&bytes).expect("to value");
        if let rmpv::Value::Map(ref mut entries) = value {
            entries.push((
                rmpv::Value::String("from_the_future".into()),
                rmpv::Value::Boolean(true),
            ));
            // Drop an optional field entirely to exercise #[serde(default)].
            entries.retain(|(key, _)| key.as_str() != Some("previous_hop"));
        } else {
            panic!("expected map-encoded packet");
        }
        let bytes = rmp_serde::to_vec_named(&value).expect("re-encode with extra field");

        let decoded = decode(&bytes).expect("decode should ignore unknown field");
        assert_eq!(decoded.previous_hop, None);
        assert_eq!(decoded.sender_id, packet.sender_id);
    }

    #[test]
    fn encode_rejects_oversize_core_payload() {
        let mut packet = sample();
        packet.content = vec![0u8; MAX_CORE_PAYLOAD_BYTES + 1];
        assert!(matches!(encode(&packet), Err(CodecError::TooLarge(_, _))));
    }

    #[test]
    fn encode_allows_larger_media_chunk_payload() {
        let mut packet = sample();
        packet.content_kind = ContentKind::File;
        packet.content = vec![0u8; MAX_CORE_PAYLOAD_BYTES + 1];
        packet.media_info = Some(MediaInfo {
            file_name: "photo.jpg".into(),
            mime_type: "image/jpeg".into(),
            total_size: packet.content.len() as u64,
            chunk_index: 0,
            total_chunks: 1,
            checksum: "deadbeef".into(),
        });
        let bytes = encode(&packet).expect("media chunk under 256 KiB encodes");
        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded, packet);
    }
}
