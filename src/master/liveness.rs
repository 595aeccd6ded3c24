use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

use tracing::trace;

/// Tracks when each chunkserver last heartbeated.
///
/// `sweep` is where dead-chunkserver detection would go. It is deliberately
/// unimplemented: no eviction threshold exists, so it never reports a server.
pub trait LivenessTracker: Send + Sync {
    fn record_heartbeat(&self, address: &str);

    fn last_seen(&self, address: &str) -> Option<SystemTime>;

    /// Chunkservers that have heartbeated at least once.
    fn known_chunkservers(&self) -> Vec<String>;

    /// Periodic maintenance. Returns the chunkservers considered dead.
    fn sweep(&self, now: SystemTime) -> Vec<String>;
}

/// Timestamp table keyed by chunkserver address. Entries are never removed.
#[derive(Debug, Default)]
pub struct HeartbeatTable {
    last_seen: RwLock<HashMap<String, SystemTime>>,
}

impl HeartbeatTable {
    pub fn new() -> HeartbeatTable {
        HeartbeatTable::default()
    }

    pub(crate) fn record_heartbeat_at(&self, address: &str, now: SystemTime) {
        let mut table = self.last_seen.write().unwrap_or_else(PoisonError::into_inner);
        table.insert(address.to_string(), now);
    }
}

impl LivenessTracker for HeartbeatTable {
    fn record_heartbeat(&self, address: &str) {
        self.record_heartbeat_at(address, SystemTime::now());
    }

    fn last_seen(&self, address: &str) -> Option<SystemTime> {
        let table = self.last_seen.read().unwrap_or_else(PoisonError::into_inner);
        table.get(address).copied()
    }

    fn known_chunkservers(&self) -> Vec<String> {
        let table = self.last_seen.read().unwrap_or_else(PoisonError::into_inner);
        let mut servers: Vec<String> = table.keys().cloned().collect();
        servers.sort();
        servers
    }

    fn sweep(&self, _now: SystemTime) -> Vec<String> {
        let table = self.last_seen.read().unwrap_or_else(PoisonError::into_inner);
        trace!(tracked = table.len(), "liveness sweep");
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn heartbeat_overwrites_timestamp() {
        let table = HeartbeatTable::new();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let t1 = t0 + Duration::from_secs(5);
        assert_eq!(table.last_seen("a:1"), None);

        table.record_heartbeat_at("a:1", t0);
        assert_eq!(table.last_seen("a:1"), Some(t0));
        table.record_heartbeat_at("a:1", t1);
        assert_eq!(table.last_seen("a:1"), Some(t1));

        table.record_heartbeat_at("b:1", t0);
        assert_eq!(table.known_chunkservers(), vec!["a:1".to_string(), "b:1".to_string()]);
    }

    #[test]
    fn sweep_never_evicts() {
        let table = HeartbeatTable::new();
        table.record_heartbeat_at("a:1", SystemTime::UNIX_EPOCH);
        let far_future = SystemTime::now() + Duration::from_secs(365 * 24 * 3600);
        assert!(table.sweep(far_future).is_empty());
        assert_eq!(table.last_seen("a:1"), Some(SystemTime::UNIX_EPOCH));
    }
}
