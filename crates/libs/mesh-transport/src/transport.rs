use async_trait::async_trait;

use mesh_protocol::MeshPacket;

use crate::error::TransportError;
use crate::events::TransportEvents;

/// A transport-specific opaque handle: link address, session id, or IP
/// string, depending on which family issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The sealed family of link technologies. Declaration order is dispatch
/// priority (`NeighborDiscovery > PairedRadio > DirectIP > AudioBeacon`):
/// `start_all` starts in this order and targeted-send / unicast-path
/// selection consult it when more than one transport could reach a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportKind {
    NeighborDiscovery,
    PairedRadio,
    DirectIP,
    AudioBeacon,
}

impl TransportKind {
    pub const ALL: [TransportKind; 4] = [
        TransportKind::NeighborDiscovery,
        TransportKind::PairedRadio,
        TransportKind::DirectIP,
        TransportKind::AudioBeacon,
    ];
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportKind::NeighborDiscovery => "neighbor-discovery",
            TransportKind::PairedRadio => "paired-radio",
            TransportKind::DirectIP => "direct-ip",
            TransportKind::AudioBeacon => "audio-beacon",
        };
        write!(f, "{name}")
    }
}

/// The abstract contract every link technology implements. Implementers
/// choose channel-based message passing internally (via the
/// [`TransportEvents`] bundle handed to `start`) rather than storing
/// function references, per the capability-bundle redesign of the
/// callback-slot contract.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> TransportKind;

    fn is_active(&self) -> bool;

    /// Begin advertising/discovery/listening. Idempotent: calling `start`
    /// on an already-active transport is a no-op that returns `Ok(())`.
    async fn start(&self, events: TransportEvents) -> Result<(), TransportError>;

    /// Cease all activity and release resources. Idempotent.
    async fn stop(&self);

    /// `endpoint` of `None` means "every currently connected endpoint on
    /// this transport."
    async fn send_packet(
        &self,
        packet: &MeshPacket,
        endpoint: Option<&EndpointId>,
    ) -> Result<(), TransportError>;

    /// Raw byte channel, used when a packet is already encoded or the
    /// transport only speaks a lower-level beacon (AudioBeacon).
    async fn send_bytes(
        &self,
        data: &[u8],
        endpoint: Option<&EndpointId>,
    ) -> Result<(), TransportError>;
}
