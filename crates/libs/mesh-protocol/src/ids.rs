//! Identity and sentinel handling.
//!
//! Mesh ids are opaque, stable per-device strings (see spec data model) —
//! unlike a content-addressed hash, they carry no cryptographic meaning here,
//! so they are modelled as a thin `String` newtype rather than a fixed-size
//! byte array.

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved destination meaning "all peers".
pub const BROADCAST: &str = "BROADCAST";
/// Reserved destination meaning "all peers, emergency priority".
pub const SOS_BROADCAST: &str = "SOS_BROADCAST";

/// Default hop ceiling for a freshly originated packet.
pub const DEFAULT_MAX_HOPS: u32 = 7;
/// Current protocol version understood by this codec.
pub const PROTOCOL_VERSION: u32 = 1;

/// A stable per-device mesh identity, independent of transport endpoint handles.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MeshId(pub String);

impl MeshId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn broadcast() -> Self {
        Self(BROADCAST.to_string())
    }

    pub fn sos_broadcast() -> Self {
        Self(SOS_BROADCAST.to_string())
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST
    }

    pub fn is_sos_broadcast(&self) -> bool {
        self.0 == SOS_BROADCAST
    }

    /// True for either sentinel destination.
    pub fn is_sentinel(&self) -> bool {
        self.is_broadcast() || self.is_sos_broadcast()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MeshId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MeshId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Globally unique packet identifier, 128-bit equivalent, treated as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PacketId(pub [u8; 16]);

impl PacketId {
    /// Mint a fresh random id at origin.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        let mut out = String::with_capacity(32);
        for byte in self.0 {
            use std::fmt::Write;
            let _ = write!(&mut out, "{byte:02x}");
        }
        out
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_recognised() {
        assert!(MeshId::broadcast().is_broadcast());
        assert!(MeshId::sos_broadcast().is_sos_broadcast());
        assert!(!MeshId::new("aaa").is_sentinel());
    }

    #[test]
    fn packet_ids_are_unique() {
        let a = PacketId::generate();
        let b = PacketId::generate();
        assert_ne!(a, b);
        assert_eq!(a.to_hex().len(), 32);
    }
}
