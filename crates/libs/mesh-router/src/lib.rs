//! # mesh-router
//!
//! The mesh routing core: flood routing with TTL, loop avoidance and
//! duplicate suppression, store-and-forward for offline destinations, the
//! persistence contract those decisions are recorded through, and the
//! status bus that publishes them to consumers.
//!
//! This crate depends on [`mesh_transport`] only through its `Transport`
//! interface and `Dispatcher` send surface — it never touches a concrete
//! transport. It depends on no concrete storage backend; `mesh-storage-sqlite`
//! supplies one, and an in-memory reference implementation lives in
//! [`persistence::in_memory`] for tests and small deployments.

pub mod config;
pub mod error;
pub mod model;
pub mod persistence;
pub mod router;
pub mod seen_cache;
pub mod status_bus;
mod time;

pub use config::{RouterConfig, RouterStats, RouterStatsSnapshot};
pub use error::RouterError;
pub use model::{
    avatar_color_for, preview_for, ConnectionState, Conversation, ConversationFlags, MeshMessage,
    MessageStatus, Peer, BROADCAST_CONVERSATION_ID,
};
pub use persistence::{ConversationStore, MessageStore, PeerStore, StoreError};
pub use router::{ConnectionStatus, Router};
pub use seen_cache::SeenCache;
pub use status_bus::{StatusBus, StatusEvent};
pub use time::now_epoch_ms;
