//! SQLite-backed [`MessageStore`], [`PeerStore`], and [`ConversationStore`]
//! implementations for `mesh-router`'s persistence contract. One [`Connection`]
//! is shared behind a [`std::sync::Mutex`] and all queries run on the blocking
//! pool via [`tokio::task::spawn_blocking`] — `rusqlite` has no async API of
//! its own.
//!
//! Schema is created with `CREATE TABLE IF NOT EXISTS` on open, matching the
//! additive, no-down-migration style of a single-writer embedded database.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::watch;

use mesh_protocol::{ContentKind, MediaInfo, MeshId, PacketId};
use mesh_router::{
    Conversation, ConversationFlags, ConversationStore, MessageStatus, MessageStore, MeshMessage,
    Peer, PeerStore, StoreError,
};
use mesh_transport::TransportKind;

/// Shared handle to the on-disk (or in-memory) mesh database. Implements all
/// three persistence traits; callers cast an `Arc<SqliteStore>` to whichever
/// trait object a given component needs.
///
/// The `*_watchers` maps back the reactive `observe_*` operations: a `watch`
/// channel per subscribed key, refreshed by re-querying the database after
/// each write that could affect it. Never created except on first subscribe.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    conversation_message_watchers: tokio::sync::Mutex<HashMap<String, watch::Sender<Vec<MeshMessage>>>>,
    peer_watchers: tokio::sync::Mutex<HashMap<MeshId, watch::Sender<Option<Peer>>>>,
    conversation_watchers: tokio::sync::Mutex<HashMap<String, watch::Sender<Option<Conversation>>>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(sqlite_err)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            conversation_message_watchers: tokio::sync::Mutex::new(HashMap::new()),
            peer_watchers: tokio::sync::Mutex::new(HashMap::new()),
            conversation_watchers: tokio::sync::Mutex::new(HashMap::new()),
        };
        store.init_schema_sync()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sqlite_err)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            conversation_message_watchers: tokio::sync::Mutex::new(HashMap::new()),
            peer_watchers: tokio::sync::Mutex::new(HashMap::new()),
            conversation_watchers: tokio::sync::Mutex::new(HashMap::new()),
        };
        store.init_schema_sync()?;
        Ok(store)
    }

    fn init_schema_sync(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                packet_id BLOB PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                destination_id TEXT NOT NULL,
                content_kind TEXT NOT NULL,
                content BLOB NOT NULL,
                media_info TEXT,
                timestamp INTEGER NOT NULL,
                received_at INTEGER NOT NULL,
                hop_count INTEGER NOT NULL,
                max_hops INTEGER NOT NULL,
                status TEXT NOT NULL,
                is_outgoing INTEGER NOT NULL,
                is_read INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS messages_destination_idx ON messages(destination_id);
            CREATE INDEX IF NOT EXISTS messages_conversation_idx ON messages(conversation_id);

            CREATE TABLE IF NOT EXISTS peers (
                mesh_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                device_name TEXT,
                endpoint_id TEXT,
                connection_state TEXT NOT NULL,
                transport TEXT,
                signal_strength INTEGER,
                hop_distance INTEGER NOT NULL,
                latitude REAL,
                longitude REAL,
                last_seen INTEGER NOT NULL,
                first_seen INTEGER NOT NULL,
                messages_relayed INTEGER NOT NULL,
                is_blocked INTEGER NOT NULL,
                is_favorite INTEGER NOT NULL,
                avatar_color TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                peer_id TEXT,
                peer_name TEXT NOT NULL,
                last_message_preview TEXT NOT NULL,
                last_message_time INTEGER NOT NULL,
                unread_count INTEGER NOT NULL,
                pinned INTEGER NOT NULL,
                muted INTEGER NOT NULL,
                is_broadcast INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .map_err(sqlite_err)?;
        Ok(())
    }

    /// Runs `f` against the shared connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("sqlite connection lock poisoned");
            f(&conn)
        })
        .await
        .map_err(|err| StoreError::Backend(format!("blocking task panicked: {err}")))?
        .map_err(sqlite_err)
    }

    /// Re-reads a conversation's messages and pushes them to an
    /// already-subscribed watcher, if any. Never queries just to discard the
    /// result.
    async fn refresh_conversation_message_watch(&self, conversation_id: &str) {
        if !self.conversation_message_watchers.lock().await.contains_key(conversation_id) {
            return;
        }
        if let Ok(messages) = self.query_for_conversation(conversation_id).await {
            if let Some(tx) = self.conversation_message_watchers.lock().await.get(conversation_id) {
                let _ = tx.send(messages);
            }
        }
    }

    async fn query_for_conversation(&self, conversation_id: &str) -> Result<Vec<MeshMessage>, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 ORDER BY timestamp ASC"
            ))?;
            let rows = stmt.query_map(params![conversation_id], message_from_row)?;
            rows.collect()
        })
        .await
    }

    /// Re-reads one peer and pushes it to an already-subscribed watcher, if any.
    async fn refresh_peer_watch(&self, mesh_id: &MeshId) {
        if !self.peer_watchers.lock().await.contains_key(mesh_id) {
            return;
        }
        if let Ok(peer) = PeerStore::get_by_mesh_id(self, mesh_id).await {
            if let Some(tx) = self.peer_watchers.lock().await.get(mesh_id) {
                let _ = tx.send(peer);
            }
        }
    }

    /// Re-reads one conversation and pushes it to an already-subscribed
    /// watcher, if any.
    async fn refresh_conversation_watch(&self, id: &str) {
        if !self.conversation_watchers.lock().await.contains_key(id) {
            return;
        }
        if let Ok(conversation) = ConversationStore::get_by_id(self, id).await {
            if let Some(tx) = self.conversation_watchers.lock().await.get(id) {
                let _ = tx.send(conversation);
            }
        }
    }
}

fn sqlite_err(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

// ---- enum <-> TEXT mappings --------------------------------------------------

fn content_kind_to_str(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Text => "text",
        ContentKind::Audio => "audio",
        ContentKind::Image => "image",
        ContentKind::File => "file",
        ContentKind::Location => "location",
        ContentKind::Ack => "ack",
        ContentKind::PeerAnnounce => "peer_announce",
        ContentKind::Ping => "ping",
        ContentKind::Sos => "sos",
    }
}

fn content_kind_from_str(s: &str) -> rusqlite::Result<ContentKind> {
    Ok(match s {
        "text" => ContentKind::Text,
        "audio" => ContentKind::Audio,
        "image" => ContentKind::Image,
        "file" => ContentKind::File,
        "location" => ContentKind::Location,
        "ack" => ContentKind::Ack,
        "peer_announce" => ContentKind::PeerAnnounce,
        "ping" => ContentKind::Ping,
        "sos" => ContentKind::Sos,
        other => return Err(unknown_variant("content_kind", other)),
    })
}

fn status_to_str(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Sending => "sending",
        MessageStatus::Sent => "sent",
        MessageStatus::Relayed => "relayed",
        MessageStatus::Delivered => "delivered",
        MessageStatus::Read => "read",
        MessageStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> rusqlite::Result<MessageStatus> {
    Ok(match s {
        "sending" => MessageStatus::Sending,
        "sent" => MessageStatus::Sent,
        "relayed" => MessageStatus::Relayed,
        "delivered" => MessageStatus::Delivered,
        "read" => MessageStatus::Read,
        "failed" => MessageStatus::Failed,
        other => return Err(unknown_variant("status", other)),
    })
}

fn connection_state_to_str(state: mesh_router::ConnectionState) -> &'static str {
    use mesh_router::ConnectionState::*;
    match state {
        Discovered => "discovered",
        Connecting => "connecting",
        Connected => "connected",
        Authenticated => "authenticated",
        Disconnected => "disconnected",
        Lost => "lost",
    }
}

fn connection_state_from_str(s: &str) -> rusqlite::Result<mesh_router::ConnectionState> {
    use mesh_router::ConnectionState::*;
    Ok(match s {
        "discovered" => Discovered,
        "connecting" => Connecting,
        "connected" => Connected,
        "authenticated" => Authenticated,
        "disconnected" => Disconnected,
        "lost" => Lost,
        other => return Err(unknown_variant("connection_state", other)),
    })
}

fn transport_to_str(kind: TransportKind) -> String {
    kind.to_string()
}

fn transport_from_str(s: &str) -> rusqlite::Result<TransportKind> {
    Ok(match s {
        "neighbor-discovery" => TransportKind::NeighborDiscovery,
        "paired-radio" => TransportKind::PairedRadio,
        "direct-ip" => TransportKind::DirectIP,
        "audio-beacon" => TransportKind::AudioBeacon,
        other => return Err(unknown_variant("transport", other)),
    })
}

fn unknown_variant(column: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(
        0,
        format!("unrecognised {column} value {value:?}"),
        rusqlite::types::Type::Text,
    )
}

fn packet_id_from_blob(bytes: Vec<u8>) -> rusqlite::Result<PacketId> {
    let array: [u8; 16] = bytes
        .try_into()
        .map_err(|_| unknown_variant("packet_id", "wrong-length blob"))?;
    Ok(PacketId(array))
}

// ---- row <-> MeshMessage ------------------------------------------------------

const MESSAGE_COLUMNS: &str = "packet_id, conversation_id, sender_id, sender_name, destination_id, \
     content_kind, content, media_info, timestamp, received_at, hop_count, max_hops, status, \
     is_outgoing, is_read";

fn message_from_row(row: &Row) -> rusqlite::Result<MeshMessage> {
    let packet_id: Vec<u8> = row.get(0)?;
    let media_info_json: Option<String> = row.get(7)?;
    let media_info = media_info_json
        .map(|json| serde_json::from_str::<MediaInfo>(&json))
        .transpose()
        .map_err(|err| unknown_variant("media_info", &err.to_string()))?;
    let content_kind: String = row.get(5)?;
    let status: String = row.get(12)?;
    Ok(MeshMessage {
        packet_id: packet_id_from_blob(packet_id)?,
        conversation_id: row.get(1)?,
        sender_id: MeshId::new(row.get::<_, String>(2)?),
        sender_name: row.get(3)?,
        destination_id: MeshId::new(row.get::<_, String>(4)?),
        content_kind: content_kind_from_str(&content_kind)?,
        content: row.get(6)?,
        media_info,
        timestamp: row.get::<_, i64>(8)? as u64,
        received_at: row.get::<_, i64>(9)? as u64,
        hop_count: row.get(10)?,
        max_hops: row.get(11)?,
        status: status_from_str(&status)?,
        is_outgoing: row.get::<_, i64>(13)? != 0,
        is_read: row.get::<_, i64>(14)? != 0,
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert_ignore(&self, message: MeshMessage) -> Result<(), StoreError> {
        let conversation_id = message.conversation_id.clone();
        self.run(move |conn| {
            let media_info_json = message
                .media_info
                .as_ref()
                .map(|info| serde_json::to_string(info).unwrap_or_default());
            conn.execute(
                &format!("INSERT OR IGNORE INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"),
                params![
                    message.packet_id.as_bytes().to_vec(),
                    message.conversation_id,
                    message.sender_id.as_str(),
                    message.sender_name,
                    message.destination_id.as_str(),
                    content_kind_to_str(message.content_kind),
                    message.content,
                    media_info_json,
                    message.timestamp as i64,
                    message.received_at as i64,
                    message.hop_count,
                    message.max_hops,
                    status_to_str(message.status),
                    message.is_outgoing as i64,
                    message.is_read as i64,
                ],
            )?;
            Ok(())
        })
        .await?;
        self.refresh_conversation_message_watch(&conversation_id).await;
        Ok(())
    }

    async fn exists(&self, packet_id: &PacketId) -> Result<bool, StoreError> {
        let bytes = packet_id.as_bytes().to_vec();
        self.run(move |conn| {
            conn.query_row("SELECT 1 FROM messages WHERE packet_id = ?1", params![bytes], |_| Ok(()))
                .optional()
                .map(|found| found.is_some())
        })
        .await
    }

    async fn update_status(&self, packet_id: &PacketId, status: MessageStatus) -> Result<(), StoreError> {
        let bytes = packet_id.as_bytes().to_vec();
        let conversation_id = self
            .run(move |conn| {
                conn.execute(
                    "UPDATE messages SET status = ?1 WHERE packet_id = ?2",
                    params![status_to_str(status), bytes],
                )?;
                conn.query_row(
                    "SELECT conversation_id FROM messages WHERE packet_id = ?1",
                    params![packet_id.as_bytes().to_vec()],
                    |row| row.get::<_, String>(0),
                )
                .optional()
            })
            .await?;
        if let Some(conversation_id) = conversation_id {
            self.refresh_conversation_message_watch(&conversation_id).await;
        }
        Ok(())
    }

    async fn mark_all_read(&self, conversation_id: &str) -> Result<(), StoreError> {
        let owned_conversation_id = conversation_id.to_string();
        let conversation_id = owned_conversation_id.clone();
        self.run(move |conn| {
            conn.execute("UPDATE messages SET is_read = 1 WHERE conversation_id = ?1", params![conversation_id])?;
            Ok(())
        })
        .await?;
        self.refresh_conversation_message_watch(&owned_conversation_id).await;
        Ok(())
    }

    async fn get_undelivered_for_peer(&self, peer_id: &MeshId) -> Result<Vec<MeshMessage>, StoreError> {
        let peer_id = peer_id.as_str().to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE destination_id = ?1 AND status NOT IN ('delivered', 'read')"
            ))?;
            let rows = stmt.query_map(params![peer_id], message_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn get_relayable_since(&self, since_epoch_ms: u64) -> Result<Vec<MeshMessage>, StoreError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE received_at >= ?1"
            ))?;
            let rows = stmt.query_map(params![since_epoch_ms as i64], message_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn get_by_packet_id(&self, packet_id: &PacketId) -> Result<Option<MeshMessage>, StoreError> {
        let bytes = packet_id.as_bytes().to_vec();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE packet_id = ?1"),
                params![bytes],
                message_from_row,
            )
            .optional()
        })
        .await
    }

    async fn get_for_conversation_observable(
        &self,
        conversation_id: &str,
    ) -> Result<watch::Receiver<Vec<MeshMessage>>, StoreError> {
        let mut watchers = self.conversation_message_watchers.lock().await;
        if let Some(tx) = watchers.get(conversation_id) {
            return Ok(tx.subscribe());
        }
        let current = self.query_for_conversation(conversation_id).await?;
        let (tx, rx) = watch::channel(current);
        watchers.insert(conversation_id.to_string(), tx);
        Ok(rx)
    }

    async fn delete_older_than(&self, threshold_epoch_ms: u64) -> Result<usize, StoreError> {
        let deleted = self
            .run(move |conn| {
                conn.execute("DELETE FROM messages WHERE received_at < ?1", params![threshold_epoch_ms as i64])
            })
            .await?;
        let watched: Vec<String> = self.conversation_message_watchers.lock().await.keys().cloned().collect();
        for conversation_id in watched {
            self.refresh_conversation_message_watch(&conversation_id).await;
        }
        Ok(deleted)
    }
}

// ---- row <-> Peer --------------------------------------------------------------

const PEER_COLUMNS: &str = "mesh_id, display_name, device_name, endpoint_id, connection_state, \
     transport, signal_strength, hop_distance, latitude, longitude, last_seen, first_seen, \
     messages_relayed, is_blocked, is_favorite, avatar_color";

fn peer_from_row(row: &Row) -> rusqlite::Result<Peer> {
    let connection_state: String = row.get(4)?;
    let transport: Option<String> = row.get(5)?;
    Ok(Peer {
        mesh_id: MeshId::new(row.get::<_, String>(0)?),
        display_name: row.get(1)?,
        device_name: row.get(2)?,
        endpoint_id: row.get(3)?,
        connection_state: connection_state_from_str(&connection_state)?,
        transport: transport.map(|t| transport_from_str(&t)).transpose()?,
        signal_strength: row.get(6)?,
        hop_distance: row.get(7)?,
        latitude: row.get(8)?,
        longitude: row.get(9)?,
        last_seen: row.get::<_, i64>(10)? as u64,
        first_seen: row.get::<_, i64>(11)? as u64,
        messages_relayed: row.get::<_, i64>(12)? as u64,
        is_blocked: row.get::<_, i64>(13)? != 0,
        is_favorite: row.get::<_, i64>(14)? != 0,
        avatar_color: row.get(15)?,
    })
}

#[async_trait]
impl PeerStore for SqliteStore {
    async fn upsert(&self, peer: Peer) -> Result<(), StoreError> {
        let mesh_id = peer.mesh_id.clone();
        self.run(move |conn| {
            let existing: Option<(u64, bool, bool, u64, String)> = conn
                .query_row(
                    "SELECT first_seen, is_blocked, is_favorite, messages_relayed, avatar_color FROM peers WHERE mesh_id = ?1",
                    params![peer.mesh_id.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)? as u64,
                            row.get::<_, i64>(1)? != 0,
                            row.get::<_, i64>(2)? != 0,
                            row.get::<_, i64>(3)? as u64,
                            row.get(4)?,
                        ))
                    },
                )
                .optional()?;

            let (first_seen, is_blocked, is_favorite, messages_relayed, avatar_color) = existing
                .unwrap_or((peer.first_seen, peer.is_blocked, peer.is_favorite, peer.messages_relayed, peer.avatar_color.clone()));

            conn.execute(
                &format!(
                    "INSERT INTO peers ({PEER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                     ON CONFLICT(mesh_id) DO UPDATE SET
                        display_name = excluded.display_name,
                        device_name = excluded.device_name,
                        endpoint_id = excluded.endpoint_id,
                        connection_state = excluded.connection_state,
                        transport = excluded.transport,
                        signal_strength = excluded.signal_strength,
                        hop_distance = excluded.hop_distance,
                        latitude = excluded.latitude,
                        longitude = excluded.longitude,
                        last_seen = excluded.last_seen,
                        first_seen = excluded.first_seen,
                        messages_relayed = excluded.messages_relayed,
                        is_blocked = excluded.is_blocked,
                        is_favorite = excluded.is_favorite,
                        avatar_color = excluded.avatar_color"
                ),
                params![
                    peer.mesh_id.as_str(),
                    peer.display_name,
                    peer.device_name,
                    peer.endpoint_id,
                    connection_state_to_str(peer.connection_state),
                    peer.transport.map(transport_to_str),
                    peer.signal_strength,
                    peer.hop_distance,
                    peer.latitude,
                    peer.longitude,
                    peer.last_seen as i64,
                    first_seen as i64,
                    messages_relayed as i64,
                    is_blocked as i64,
                    is_favorite as i64,
                    avatar_color,
                ],
            )?;
            Ok(())
        })
        .await?;
        self.refresh_peer_watch(&mesh_id).await;
        Ok(())
    }

    async fn get_by_mesh_id(&self, mesh_id: &MeshId) -> Result<Option<Peer>, StoreError> {
        let mesh_id = mesh_id.as_str().to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {PEER_COLUMNS} FROM peers WHERE mesh_id = ?1"),
                params![mesh_id],
                peer_from_row,
            )
            .optional()
        })
        .await
    }

    async fn get_by_endpoint_id(&self, endpoint_id: &str) -> Result<Option<Peer>, StoreError> {
        let endpoint_id = endpoint_id.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {PEER_COLUMNS} FROM peers WHERE endpoint_id = ?1"),
                params![endpoint_id],
                peer_from_row,
            )
            .optional()
        })
        .await
    }

    async fn update_connection_state(
        &self,
        mesh_id: &MeshId,
        state: mesh_router::ConnectionState,
    ) -> Result<(), StoreError> {
        let mesh_id_str = mesh_id.as_str().to_string();
        self.run(move |conn| {
            conn.execute(
                "UPDATE peers SET connection_state = ?1 WHERE mesh_id = ?2",
                params![connection_state_to_str(state), mesh_id_str],
            )?;
            Ok(())
        })
        .await?;
        self.refresh_peer_watch(mesh_id).await;
        Ok(())
    }

    async fn observe_peer(&self, mesh_id: &MeshId) -> Result<watch::Receiver<Option<Peer>>, StoreError> {
        let mut watchers = self.peer_watchers.lock().await;
        if let Some(tx) = watchers.get(mesh_id) {
            return Ok(tx.subscribe());
        }
        let current = PeerStore::get_by_mesh_id(self, mesh_id).await?;
        let (tx, rx) = watch::channel(current);
        watchers.insert(mesh_id.clone(), tx);
        Ok(rx)
    }

    async fn get_connected_list(&self) -> Result<Vec<Peer>, StoreError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PEER_COLUMNS} FROM peers WHERE connection_state = 'connected'"
            ))?;
            let rows = stmt.query_map([], peer_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn mark_lost(&self, stale_threshold_epoch_ms: u64) -> Result<usize, StoreError> {
        let updated = self
            .run(move |conn| {
                conn.execute(
                    "UPDATE peers SET connection_state = 'lost' WHERE last_seen < ?1 AND connection_state != 'lost'",
                    params![stale_threshold_epoch_ms as i64],
                )
            })
            .await?;
        let watched: Vec<MeshId> = self.peer_watchers.lock().await.keys().cloned().collect();
        for mesh_id in &watched {
            self.refresh_peer_watch(mesh_id).await;
        }
        Ok(updated)
    }

    async fn disconnect_all(&self) -> Result<(), StoreError> {
        self.run(move |conn| {
            conn.execute("UPDATE peers SET connection_state = 'disconnected'", [])?;
            Ok(())
        })
        .await?;
        let watched: Vec<MeshId> = self.peer_watchers.lock().await.keys().cloned().collect();
        for mesh_id in &watched {
            self.refresh_peer_watch(mesh_id).await;
        }
        Ok(())
    }
}

// ---- row <-> Conversation --------------------------------------------------------

const CONVERSATION_COLUMNS: &str = "id, peer_id, peer_name, last_message_preview, last_message_time, \
     unread_count, pinned, muted, is_broadcast, created_at, updated_at";

fn conversation_from_row(row: &Row) -> rusqlite::Result<Conversation> {
    let peer_id: Option<String> = row.get(1)?;
    Ok(Conversation {
        id: row.get(0)?,
        peer_id: peer_id.map(MeshId::new),
        peer_name: row.get(2)?,
        last_message_preview: row.get(3)?,
        last_message_time: row.get::<_, i64>(4)? as u64,
        unread_count: row.get(5)?,
        flags: ConversationFlags {
            pinned: row.get::<_, i64>(6)? != 0,
            muted: row.get::<_, i64>(7)? != 0,
            is_broadcast: row.get::<_, i64>(8)? != 0,
        },
        created_at: row.get::<_, i64>(9)? as u64,
        updated_at: row.get::<_, i64>(10)? as u64,
    })
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn upsert(&self, conversation: Conversation) -> Result<(), StoreError> {
        let id = conversation.id.clone();
        self.run(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO conversations ({CONVERSATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT(id) DO UPDATE SET
                        peer_name = excluded.peer_name,
                        last_message_preview = excluded.last_message_preview,
                        last_message_time = excluded.last_message_time,
                        unread_count = excluded.unread_count,
                        pinned = excluded.pinned,
                        muted = excluded.muted,
                        updated_at = excluded.updated_at"
                ),
                params![
                    conversation.id,
                    conversation.peer_id.map(|id| id.as_str().to_string()),
                    conversation.peer_name,
                    conversation.last_message_preview,
                    conversation.last_message_time as i64,
                    conversation.unread_count,
                    conversation.flags.pinned as i64,
                    conversation.flags.muted as i64,
                    conversation.flags.is_broadcast as i64,
                    conversation.created_at as i64,
                    conversation.updated_at as i64,
                ],
            )?;
            Ok(())
        })
        .await?;
        self.refresh_conversation_watch(&id).await;
        Ok(())
    }

    async fn observe_by_id(&self, id: &str) -> Result<watch::Receiver<Option<Conversation>>, StoreError> {
        let mut watchers = self.conversation_watchers.lock().await;
        if let Some(tx) = watchers.get(id) {
            return Ok(tx.subscribe());
        }
        let current = ConversationStore::get_by_id(self, id).await?;
        let (tx, rx) = watch::channel(current);
        watchers.insert(id.to_string(), tx);
        Ok(rx)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                params![id],
                conversation_from_row,
            )
            .optional()
        })
        .await
    }

    async fn get_by_peer_id(&self, peer_id: &MeshId) -> Result<Option<Conversation>, StoreError> {
        let peer_id = peer_id.as_str().to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE peer_id = ?1"),
                params![peer_id],
                conversation_from_row,
            )
            .optional()
        })
        .await
    }

    async fn update_last_message(
        &self,
        id: &str,
        preview: &str,
        timestamp: u64,
        increment_unread: bool,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let id_owned = id.clone();
        let preview = preview.to_string();
        self.run(move |conn| {
            conn.execute(
                "UPDATE conversations SET last_message_preview = ?1, last_message_time = ?2, updated_at = ?2,
                    unread_count = unread_count + ?3 WHERE id = ?4",
                params![preview, timestamp as i64, increment_unread as i64, id],
            )?;
            Ok(())
        })
        .await?;
        self.refresh_conversation_watch(&id_owned).await;
        Ok(())
    }

    async fn clear_unread(&self, id: &str) -> Result<(), StoreError> {
        let owned_id = id.to_string();
        let id = owned_id.clone();
        self.run(move |conn| {
            conn.execute("UPDATE conversations SET unread_count = 0 WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await?;
        self.refresh_conversation_watch(&owned_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_router::now_epoch_ms;

    fn sample_message(destination: &str, status: MessageStatus) -> MeshMessage {
        MeshMessage {
            packet_id: PacketId::generate(),
            conversation_id: destination.to_string(),
            sender_id: MeshId::new("aaa"),
            sender_name: "Alice".into(),
            destination_id: MeshId::new(destination),
            content_kind: ContentKind::Text,
            content: b"hello".to_vec(),
            media_info: None,
            timestamp: now_epoch_ms(),
            received_at: now_epoch_ms(),
            hop_count: 0,
            max_hops: 7,
            status,
            is_outgoing: true,
            is_read: true,
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_message_round_trips() {
        let store = SqliteStore::in_memory().expect("open");
        let message = sample_message("bbb", MessageStatus::Sent);
        let packet_id = message.packet_id;
        store.insert_ignore(message.clone()).await.expect("insert");

        let fetched = store.get_by_packet_id(&packet_id).await.expect("query").expect("present");
        assert_eq!(fetched.content, message.content);
        assert_eq!(fetched.destination_id, message.destination_id);
    }

    #[tokio::test]
    async fn insert_ignore_is_idempotent_on_packet_id() {
        let store = SqliteStore::in_memory().expect("open");
        let message = sample_message("bbb", MessageStatus::Sent);
        let packet_id = message.packet_id;
        store.insert_ignore(message.clone()).await.expect("first insert");

        let mut second = message.clone();
        second.content = b"different".to_vec();
        store.insert_ignore(second).await.expect("second insert is a no-op");

        let fetched = store.get_by_packet_id(&packet_id).await.expect("query").expect("present");
        assert_eq!(fetched.content, b"hello");
    }

    #[tokio::test]
    async fn undelivered_messages_exclude_delivered_and_read() {
        let store = SqliteStore::in_memory().expect("open");
        store.insert_ignore(sample_message("ccc", MessageStatus::Sent)).await.unwrap();
        store.insert_ignore(sample_message("ccc", MessageStatus::Delivered)).await.unwrap();

        let pending = store.get_undelivered_for_peer(&MeshId::new("ccc")).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn update_status_persists() {
        let store = SqliteStore::in_memory().expect("open");
        let message = sample_message("ddd", MessageStatus::Sent);
        let packet_id = message.packet_id;
        store.insert_ignore(message).await.unwrap();
        store.update_status(&packet_id, MessageStatus::Delivered).await.unwrap();

        let fetched = store.get_by_packet_id(&packet_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn peer_upsert_preserves_first_seen_and_flags() {
        let store = SqliteStore::in_memory().expect("open");
        let now = now_epoch_ms();
        let mut peer = Peer::new_discovered(MeshId::new("eee"), "Eve".into(), now);
        peer.is_favorite = true;
        store.upsert(peer.clone()).await.unwrap();

        let mut updated = peer.clone();
        updated.is_favorite = false;
        updated.last_seen = now + 1_000;
        updated.connection_state = mesh_router::ConnectionState::Connected;
        store.upsert(updated).await.unwrap();

        let fetched = store.get_by_mesh_id(&MeshId::new("eee")).await.unwrap().unwrap();
        assert!(fetched.is_favorite, "favorite flag should survive the upsert");
        assert_eq!(fetched.first_seen, now);
        assert_eq!(fetched.connection_state, mesh_router::ConnectionState::Connected);
    }

    #[tokio::test]
    async fn conversation_upsert_and_unread_tracking() {
        let store = SqliteStore::in_memory().expect("open");
        let now = now_epoch_ms();
        let conversation = Conversation::new_for_peer("fff".into(), MeshId::new("fff"), "Frank".into(), now);
        store.upsert(conversation).await.unwrap();

        store.update_last_message("fff", "hi", now + 10, true).await.unwrap();
        store.update_last_message("fff", "hi again", now + 20, true).await.unwrap();

        let fetched = store.get_by_id("fff").await.unwrap().unwrap();
        assert_eq!(fetched.unread_count, 2);
        assert_eq!(fetched.last_message_preview, "hi again");

        store.clear_unread("fff").await.unwrap();
        let cleared = store.get_by_id("fff").await.unwrap().unwrap();
        assert_eq!(cleared.unread_count, 0);
    }

    #[tokio::test]
    async fn opens_a_file_backed_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mesh.sqlite3");
        let store = SqliteStore::open(&path).expect("open file-backed store");
        store.insert_ignore(sample_message("ggg", MessageStatus::Sent)).await.unwrap();
        drop(store);

        let reopened = SqliteStore::open(&path).expect("reopen");
        let pending = reopened.get_undelivered_for_peer(&MeshId::new("ggg")).await.unwrap();
        assert_eq!(pending.len(), 1);
    }
}
