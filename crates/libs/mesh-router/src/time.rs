use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock epoch milliseconds, the unit every timestamp in the data
/// model is expressed in.
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
