use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Policy knobs that don't affect wire compatibility, only local behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterConfig {
    /// How far back `get_relayable_since` / replay look for store-and-forward
    /// candidates.
    pub relay_replay_window: Duration,
    /// Age at which persisted messages are eligible for the retention sweep.
    pub persistence_retention: Duration,
    /// Cadence of the retention sweep task.
    pub retention_sweep_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            relay_replay_window: Duration::from_secs(24 * 60 * 60),
            persistence_retention: Duration::from_secs(30 * 24 * 60 * 60),
            retention_sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Operational counters, useful for the status bus's visibility story but
/// not part of the routing contract itself.
#[derive(Default)]
pub struct RouterStats {
    packets_received: AtomicU64,
    packets_dropped_duplicate: AtomicU64,
    packets_dropped_ttl: AtomicU64,
    packets_dropped_loop: AtomicU64,
    packets_forwarded: AtomicU64,
    messages_delivered: AtomicU64,
    acks_sent: AtomicU64,
    sos_received: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub packets_received: u64,
    pub packets_dropped_duplicate: u64,
    pub packets_dropped_ttl: u64,
    pub packets_dropped_loop: u64,
    pub packets_forwarded: u64,
    pub messages_delivered: u64,
    pub acks_sent: u64,
    pub sos_received: u64,
}

macro_rules! counter_methods {
    ($($field:ident),+ $(,)?) => {
        $(
            pub(crate) fn $field(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )+
    };
}

impl RouterStats {
    counter_methods!(
        packets_received,
        packets_dropped_duplicate,
        packets_dropped_ttl,
        packets_dropped_loop,
        packets_forwarded,
        messages_delivered,
        acks_sent,
        sos_received,
    );

    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_dropped_duplicate: self.packets_dropped_duplicate.load(Ordering::Relaxed),
            packets_dropped_ttl: self.packets_dropped_ttl.load(Ordering::Relaxed),
            packets_dropped_loop: self.packets_dropped_loop.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            sos_received: self.sos_received.load(Ordering::Relaxed),
        }
    }
}
