//! The set of asynchronous event streams published to consumers.
//! `incoming_messages` and `status_updates` are broadcast streams with a
//! bounded overflow buffer (oldest dropped first); `connection_status` is a
//! latest-value cell.

use mesh_protocol::PacketId;
use mesh_transport::AggregateStatus;
use tokio::sync::{broadcast, watch};

use crate::model::{MeshMessage, Peer};

const INCOMING_MESSAGES_CAPACITY: usize = 64;
const STATUS_UPDATES_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub enum StatusEvent {
    MessageReceived,
    MessageDelivered(PacketId),
    PeerDiscovered(Peer),
    PeerConnected(Peer),
    PeerDisconnected(Peer),
    SOSReceived { sender_name: String, message: MeshMessage },
    Error(String),
}

pub struct StatusBus {
    incoming_messages: broadcast::Sender<MeshMessage>,
    status_updates: broadcast::Sender<StatusEvent>,
    connection_status: watch::Sender<AggregateStatus>,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBus {
    pub fn new() -> Self {
        let (incoming_messages, _) = broadcast::channel(INCOMING_MESSAGES_CAPACITY);
        let (status_updates, _) = broadcast::channel(STATUS_UPDATES_CAPACITY);
        let (connection_status, _) = watch::channel(AggregateStatus::default());
        Self { incoming_messages, status_updates, connection_status }
    }

    pub fn subscribe_incoming_messages(&self) -> broadcast::Receiver<MeshMessage> {
        self.incoming_messages.subscribe()
    }

    pub fn subscribe_status_updates(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_updates.subscribe()
    }

    pub fn connection_status(&self) -> watch::Receiver<AggregateStatus> {
        self.connection_status.subscribe()
    }

    /// Never suspends: a closed/full broadcast channel just drops the
    /// event, matching the "emission never blocks" concurrency guarantee.
    pub fn publish_incoming_message(&self, message: MeshMessage) {
        let _ = self.incoming_messages.send(message);
    }

    pub fn publish_status_event(&self, event: StatusEvent) {
        let _ = self.status_updates.send(event);
    }

    pub fn publish_connection_status(&self, status: AggregateStatus) {
        let _ = self.connection_status.send(status);
    }
}
