//! # mesh-transport
//!
//! The transport abstraction layer: one trait every link technology
//! implements, four concrete transports, and a dispatcher that presents
//! them to the router as a single send/receive surface.
//!
//! Each transport's inner driver (radio advertising intervals, channel
//! negotiation, OS permission flows) is out of scope; what's implemented
//! here is the chunking, reassembly, framing, and identity-upgrade behavior
//! the dispatcher and router actually depend on, exercised over real TCP
//! sockets (`DirectIP`) or in-process duplex channels standing in for the
//! radio link (`PairedRadio`, `NeighborDiscovery`, `AudioBeacon`).

pub mod audio_beacon;
pub mod direct_ip;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod neighbor_discovery;
pub mod paired_radio;
pub mod transport;

pub use audio_beacon::AudioBeaconTransport;
pub use direct_ip::DirectIpTransport;
pub use dispatcher::{AggregateStatus, Dispatcher, PeerAnnouncer};
pub use error::TransportError;
pub use events::{
    new_event_channels, PacketReceived, PeerConnected, PeerDisconnected, TransportEventChannels,
    TransportEvents,
};
pub use neighbor_discovery::NeighborDiscoveryTransport;
pub use paired_radio::PairedRadioTransport;
pub use transport::{EndpointId, Transport, TransportKind};
