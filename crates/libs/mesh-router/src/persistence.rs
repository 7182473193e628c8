//! The persistence contract: three narrow DAO surfaces the router reads and
//! writes through. The database engine itself is out of scope — this
//! module only defines the traits and an in-memory reference
//! implementation good enough for tests and for composing a router without
//! a real backing store.

use async_trait::async_trait;
use tokio::sync::watch;

use mesh_protocol::{MeshId, PacketId};

use crate::model::{Conversation, MeshMessage, MessageStatus, Peer};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Idempotent on `packet_id`: a re-insert of an already-known message is
    /// a no-op, not an error.
    async fn insert_ignore(&self, message: MeshMessage) -> Result<(), StoreError>;
    async fn exists(&self, packet_id: &PacketId) -> Result<bool, StoreError>;
    async fn update_status(&self, packet_id: &PacketId, status: MessageStatus) -> Result<(), StoreError>;
    async fn mark_all_read(&self, conversation_id: &str) -> Result<(), StoreError>;
    async fn get_undelivered_for_peer(&self, peer_id: &MeshId) -> Result<Vec<MeshMessage>, StoreError>;
    async fn get_relayable_since(&self, since_epoch_ms: u64) -> Result<Vec<MeshMessage>, StoreError>;
    async fn get_by_packet_id(&self, packet_id: &PacketId) -> Result<Option<MeshMessage>, StoreError>;
    /// A live view of a conversation's messages: the receiver's initial value
    /// is the current snapshot, and it observes every subsequent mutation
    /// touching that conversation (a one-shot read is `receiver.borrow().clone()`).
    async fn get_for_conversation_observable(
        &self,
        conversation_id: &str,
    ) -> Result<watch::Receiver<Vec<MeshMessage>>, StoreError>;
    async fn delete_older_than(&self, threshold_epoch_ms: u64) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait PeerStore: Send + Sync {
    /// Upserts preserving prior flags, counters, and avatar color for
    /// already-known peers; new peers record `first_seen`.
    async fn upsert(&self, peer: Peer) -> Result<(), StoreError>;
    async fn get_by_mesh_id(&self, mesh_id: &MeshId) -> Result<Option<Peer>, StoreError>;
    async fn get_by_endpoint_id(&self, endpoint_id: &str) -> Result<Option<Peer>, StoreError>;
    async fn update_connection_state(
        &self,
        mesh_id: &MeshId,
        state: crate::model::ConnectionState,
    ) -> Result<(), StoreError>;
    async fn get_connected_list(&self) -> Result<Vec<Peer>, StoreError>;
    /// A live view of one peer's record, `None` until it is first seen.
    async fn observe_peer(&self, mesh_id: &MeshId) -> Result<watch::Receiver<Option<Peer>>, StoreError>;
    async fn mark_lost(&self, stale_threshold_epoch_ms: u64) -> Result<usize, StoreError>;
    async fn disconnect_all(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn upsert(&self, conversation: Conversation) -> Result<(), StoreError>;
    async fn get_by_id(&self, id: &str) -> Result<Option<Conversation>, StoreError>;
    async fn get_by_peer_id(&self, peer_id: &MeshId) -> Result<Option<Conversation>, StoreError>;
    /// A live view of one conversation's record, `None` until it exists.
    async fn observe_by_id(&self, id: &str) -> Result<watch::Receiver<Option<Conversation>>, StoreError>;
    async fn update_last_message(
        &self,
        id: &str,
        preview: &str,
        timestamp: u64,
        increment_unread: bool,
    ) -> Result<(), StoreError>;
    async fn clear_unread(&self, id: &str) -> Result<(), StoreError>;
}

pub mod in_memory {
    use std::collections::HashMap;

    use tokio::sync::Mutex;

    use super::*;
    use crate::model::ConnectionState;

    #[derive(Default)]
    pub struct InMemoryMessageStore {
        messages: Mutex<HashMap<PacketId, MeshMessage>>,
        conversation_watchers: Mutex<HashMap<String, watch::Sender<Vec<MeshMessage>>>>,
    }

    impl InMemoryMessageStore {
        /// Pushes the current snapshot to an already-subscribed watcher, if
        /// any. Never creates a watcher just to satisfy a write.
        async fn refresh_conversation_watch(
            &self,
            conversation_id: &str,
            messages: &HashMap<PacketId, MeshMessage>,
        ) {
            let watchers = self.conversation_watchers.lock().await;
            if let Some(tx) = watchers.get(conversation_id) {
                let snapshot: Vec<MeshMessage> =
                    messages.values().filter(|m| m.conversation_id == conversation_id).cloned().collect();
                let _ = tx.send(snapshot);
            }
        }
    }

    #[async_trait]
    impl MessageStore for InMemoryMessageStore {
        async fn insert_ignore(&self, message: MeshMessage) -> Result<(), StoreError> {
            let mut messages = self.messages.lock().await;
            let conversation_id = message.conversation_id.clone();
            messages.entry(message.packet_id).or_insert(message);
            self.refresh_conversation_watch(&conversation_id, &messages).await;
            Ok(())
        }

        async fn exists(&self, packet_id: &PacketId) -> Result<bool, StoreError> {
            Ok(self.messages.lock().await.contains_key(packet_id))
        }

        async fn update_status(&self, packet_id: &PacketId, status: MessageStatus) -> Result<(), StoreError> {
            let mut messages = self.messages.lock().await;
            let conversation_id = if let Some(message) = messages.get_mut(packet_id) {
                message.status = status;
                Some(message.conversation_id.clone())
            } else {
                None
            };
            if let Some(conversation_id) = conversation_id {
                self.refresh_conversation_watch(&conversation_id, &messages).await;
            }
            Ok(())
        }

        async fn mark_all_read(&self, conversation_id: &str) -> Result<(), StoreError> {
            let mut messages = self.messages.lock().await;
            for message in messages.values_mut() {
                if message.conversation_id == conversation_id {
                    message.is_read = true;
                }
            }
            self.refresh_conversation_watch(conversation_id, &messages).await;
            Ok(())
        }

        async fn get_undelivered_for_peer(&self, peer_id: &MeshId) -> Result<Vec<MeshMessage>, StoreError> {
            Ok(self
                .messages
                .lock()
                .await
                .values()
                .filter(|m| {
                    &m.destination_id == peer_id
                        && !matches!(m.status, MessageStatus::Delivered | MessageStatus::Read)
                })
                .cloned()
                .collect())
        }

        async fn get_relayable_since(&self, since_epoch_ms: u64) -> Result<Vec<MeshMessage>, StoreError> {
            Ok(self
                .messages
                .lock()
                .await
                .values()
                .filter(|m| m.received_at >= since_epoch_ms)
                .cloned()
                .collect())
        }

        async fn get_by_packet_id(&self, packet_id: &PacketId) -> Result<Option<MeshMessage>, StoreError> {
            Ok(self.messages.lock().await.get(packet_id).cloned())
        }

        async fn get_for_conversation_observable(
            &self,
            conversation_id: &str,
        ) -> Result<watch::Receiver<Vec<MeshMessage>>, StoreError> {
            let messages = self.messages.lock().await;
            let mut watchers = self.conversation_watchers.lock().await;
            let tx = watchers.entry(conversation_id.to_string()).or_insert_with(|| {
                let initial: Vec<MeshMessage> =
                    messages.values().filter(|m| m.conversation_id == conversation_id).cloned().collect();
                watch::channel(initial).0
            });
            Ok(tx.subscribe())
        }

        async fn delete_older_than(&self, threshold_epoch_ms: u64) -> Result<usize, StoreError> {
            let mut messages = self.messages.lock().await;
            let before = messages.len();
            messages.retain(|_, m| m.received_at >= threshold_epoch_ms);
            let removed = before - messages.len();
            if removed > 0 {
                let conversation_ids: Vec<String> =
                    self.conversation_watchers.lock().await.keys().cloned().collect();
                for conversation_id in conversation_ids {
                    self.refresh_conversation_watch(&conversation_id, &messages).await;
                }
            }
            Ok(removed)
        }
    }

    #[derive(Default)]
    pub struct InMemoryPeerStore {
        peers: Mutex<HashMap<MeshId, Peer>>,
        peer_watchers: Mutex<HashMap<MeshId, watch::Sender<Option<Peer>>>>,
    }

    impl InMemoryPeerStore {
        async fn refresh_peer_watch(&self, mesh_id: &MeshId, peers: &HashMap<MeshId, Peer>) {
            let watchers = self.peer_watchers.lock().await;
            if let Some(tx) = watchers.get(mesh_id) {
                let _ = tx.send(peers.get(mesh_id).cloned());
            }
        }
    }

    #[async_trait]
    impl PeerStore for InMemoryPeerStore {
        async fn upsert(&self, mut peer: Peer) -> Result<(), StoreError> {
            let mut peers = self.peers.lock().await;
            if let Some(existing) = peers.get(&peer.mesh_id) {
                peer.first_seen = existing.first_seen;
                peer.is_blocked = existing.is_blocked;
                peer.is_favorite = existing.is_favorite;
                peer.messages_relayed = existing.messages_relayed;
                peer.avatar_color = existing.avatar_color.clone();
            }
            let mesh_id = peer.mesh_id.clone();
            peers.insert(mesh_id.clone(), peer);
            self.refresh_peer_watch(&mesh_id, &peers).await;
            Ok(())
        }

        async fn get_by_mesh_id(&self, mesh_id: &MeshId) -> Result<Option<Peer>, StoreError> {
            Ok(self.peers.lock().await.get(mesh_id).cloned())
        }

        async fn get_by_endpoint_id(&self, endpoint_id: &str) -> Result<Option<Peer>, StoreError> {
            Ok(self
                .peers
                .lock()
                .await
                .values()
                .find(|p| p.endpoint_id.as_deref() == Some(endpoint_id))
                .cloned())
        }

        async fn update_connection_state(
            &self,
            mesh_id: &MeshId,
            state: ConnectionState,
        ) -> Result<(), StoreError> {
            let mut peers = self.peers.lock().await;
            if let Some(peer) = peers.get_mut(mesh_id) {
                peer.connection_state = state;
            }
            self.refresh_peer_watch(mesh_id, &peers).await;
            Ok(())
        }

        async fn get_connected_list(&self) -> Result<Vec<Peer>, StoreError> {
            Ok(self
                .peers
                .lock()
                .await
                .values()
                .filter(|p| p.connection_state == ConnectionState::Connected)
                .cloned()
                .collect())
        }

        async fn observe_peer(&self, mesh_id: &MeshId) -> Result<watch::Receiver<Option<Peer>>, StoreError> {
            let peers = self.peers.lock().await;
            let mut watchers = self.peer_watchers.lock().await;
            let tx = watchers
                .entry(mesh_id.clone())
                .or_insert_with(|| watch::channel(peers.get(mesh_id).cloned()).0);
            Ok(tx.subscribe())
        }

        async fn mark_lost(&self, stale_threshold_epoch_ms: u64) -> Result<usize, StoreError> {
            let mut peers = self.peers.lock().await;
            let mut count = 0;
            let mut changed = Vec::new();
            for peer in peers.values_mut() {
                if peer.last_seen < stale_threshold_epoch_ms
                    && peer.connection_state != ConnectionState::Lost
                {
                    peer.connection_state = ConnectionState::Lost;
                    changed.push(peer.mesh_id.clone());
                    count += 1;
                }
            }
            for mesh_id in &changed {
                self.refresh_peer_watch(mesh_id, &peers).await;
            }
            Ok(count)
        }

        async fn disconnect_all(&self) -> Result<(), StoreError> {
            let mut peers = self.peers.lock().await;
            let mesh_ids: Vec<MeshId> = peers.keys().cloned().collect();
            for peer in peers.values_mut() {
                peer.connection_state = ConnectionState::Disconnected;
            }
            for mesh_id in &mesh_ids {
                self.refresh_peer_watch(mesh_id, &peers).await;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct InMemoryConversationStore {
        conversations: Mutex<HashMap<String, Conversation>>,
        conversation_watchers: Mutex<HashMap<String, watch::Sender<Option<Conversation>>>>,
    }

    impl InMemoryConversationStore {
        async fn refresh_conversation_watch(&self, id: &str, conversations: &HashMap<String, Conversation>) {
            let watchers = self.conversation_watchers.lock().await;
            if let Some(tx) = watchers.get(id) {
                let _ = tx.send(conversations.get(id).cloned());
            }
        }
    }

    #[async_trait]
    impl ConversationStore for InMemoryConversationStore {
        async fn upsert(&self, conversation: Conversation) -> Result<(), StoreError> {
            let mut conversations = self.conversations.lock().await;
            let id = conversation.id.clone();
            conversations.insert(id.clone(), conversation);
            self.refresh_conversation_watch(&id, &conversations).await;
            Ok(())
        }

        async fn get_by_id(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
            Ok(self.conversations.lock().await.get(id).cloned())
        }

        async fn get_by_peer_id(&self, peer_id: &MeshId) -> Result<Option<Conversation>, StoreError> {
            Ok(self
                .conversations
                .lock()
                .await
                .values()
                .find(|c| c.peer_id.as_ref() == Some(peer_id))
                .cloned())
        }

        async fn observe_by_id(&self, id: &str) -> Result<watch::Receiver<Option<Conversation>>, StoreError> {
            let conversations = self.conversations.lock().await;
            let mut watchers = self.conversation_watchers.lock().await;
            let tx = watchers
                .entry(id.to_string())
                .or_insert_with(|| watch::channel(conversations.get(id).cloned()).0);
            Ok(tx.subscribe())
        }

        async fn update_last_message(
            &self,
            id: &str,
            preview: &str,
            timestamp: u64,
            increment_unread: bool,
        ) -> Result<(), StoreError> {
            let mut conversations = self.conversations.lock().await;
            if let Some(conversation) = conversations.get_mut(id) {
                conversation.last_message_preview = preview.to_string();
                conversation.last_message_time = timestamp;
                conversation.updated_at = timestamp;
                if increment_unread {
                    conversation.unread_count += 1;
                }
            }
            self.refresh_conversation_watch(id, &conversations).await;
            Ok(())
        }

        async fn clear_unread(&self, id: &str) -> Result<(), StoreError> {
            let mut conversations = self.conversations.lock().await;
            if let Some(conversation) = conversations.get_mut(id) {
                conversation.unread_count = 0;
            }
            self.refresh_conversation_watch(id, &conversations).await;
            Ok(())
        }
    }
}
