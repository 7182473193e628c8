//! Bounded, time-indexed set of recently processed packet identifiers. Used
//! to suppress duplicate delivery/forwarding of a packet the mesh has
//! already seen via another path.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use mesh_protocol::PacketId;

/// Hard ceiling on cache size after a sweep.
pub const MAX_ENTRIES: usize = 10_000;
/// Entries older than this are eligible for removal on sweep.
pub const MAX_AGE: Duration = Duration::from_secs(60 * 60);
/// Periodic sweep cadence.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct SeenCache {
    entries: Mutex<HashMap<PacketId, Instant>>,
}

impl Default for SeenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SeenCache {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    pub async fn contains(&self, id: &PacketId) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    /// Records a monotonic timestamp for `id`. Triggers a sweep if this
    /// insertion would push the cache past [`MAX_ENTRIES`].
    pub async fn insert(&self, id: PacketId) {
        let mut entries = self.entries.lock().await;
        entries.insert(id, Instant::now());
        let overflow = entries.len() > MAX_ENTRIES;
        drop(entries);
        if overflow {
            self.sweep().await;
        }
    }

    /// Removes entries older than [`MAX_AGE`]; if the cache is still over
    /// [`MAX_ENTRIES`] afterward, removes the oldest half by timestamp.
    pub async fn sweep(&self) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, inserted_at| now.duration_since(*inserted_at) < MAX_AGE);

        if entries.len() > MAX_ENTRIES {
            let mut by_age: Vec<(PacketId, Instant)> =
                entries.iter().map(|(id, at)| (*id, *at)).collect();
            by_age.sort_by_key(|(_, at)| *at);
            let remove_count = by_age.len() / 2;
            for (id, _) in by_age.into_iter().take(remove_count) {
                entries.remove(&id);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_id() -> PacketId {
        PacketId::generate()
    }

    #[tokio::test]
    async fn contains_reflects_insertions() {
        let cache = SeenCache::new();
        let id = fresh_id();
        assert!(!cache.contains(&id).await);
        cache.insert(id).await;
        assert!(cache.contains(&id).await);
    }

    #[tokio::test]
    async fn sweep_removes_entries_older_than_max_age() {
        let cache = SeenCache::new();
        let id = fresh_id();
        cache.entries.lock().await.insert(id, Instant::now() - MAX_AGE - Duration::from_secs(1));
        cache.sweep().await;
        assert!(!cache.contains(&id).await);
    }

    #[tokio::test]
    async fn sweep_trims_oldest_half_on_overflow() {
        let cache = SeenCache::new();
        {
            let mut entries = cache.entries.lock().await;
            for i in 0..(MAX_ENTRIES + 10) {
                let mut bytes = [0u8; 16];
                bytes[..8].copy_from_slice(&(i as u64).to_le_bytes());
                entries.insert(PacketId(bytes), Instant::now());
            }
        }
        cache.sweep().await;
        assert!(cache.len().await <= MAX_ENTRIES);
    }
}
