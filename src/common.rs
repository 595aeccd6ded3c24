use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Globally unique identifier of a chunk.
pub type ChunkHandle = u64;

/// Number of replicas placed for every new chunk.
pub const REPLICATION_FACTOR: usize = 3;

/// Chunk size is 64MB.
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 64 * 1024 * 1024;

/// How long a granted lease stays valid without an extension.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Interval of the master's background maintenance tick.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Logical address of a chunk: a file path and the zero-based chunk index within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathIndex {
    pub path: String,
    pub index: u64,
}

impl PathIndex {
    pub fn new(path: impl Into<String>, index: u64) -> PathIndex {
        PathIndex {
            path: path.into(),
            index,
        }
    }
}

impl fmt::Display for PathIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path, self.index)
    }
}

/// Durable per-chunk record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub handle: ChunkHandle,
    /// Reserved for chunk versioning; never populated yet.
    #[serde(default)]
    pub version: Option<u64>,
}

/// path -> (chunk index -> record).
pub type ChunkMap = HashMap<String, HashMap<u64, ChunkRecord>>;

/// handle -> (path, chunk index), the inverse of [`ChunkMap`].
pub type HandleMap = HashMap<ChunkHandle, PathIndex>;

/// Chunkservers currently known to hold replicas of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLocationInfo {
    pub handle: ChunkHandle,
    pub locations: Vec<String>,
}

impl ChunkLocationInfo {
    pub fn new(handle: ChunkHandle) -> ChunkLocationInfo {
        ChunkLocationInfo {
            handle,
            locations: Vec::new(),
        }
    }

    /// Add a location, keeping set semantics. Returns true if it was new.
    pub fn insert(&mut self, address: &str) -> bool {
        if self.locations.iter().any(|a| a == address) {
            return false;
        }
        self.locations.push(address.to_string());
        true
    }

    pub fn contains(&self, address: &str) -> bool {
        self.locations.iter().any(|a| a == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_insert_is_idempotent() {
        let mut info = ChunkLocationInfo::new(7);
        assert!(info.insert("cs-a:1"));
        assert!(info.insert("cs-b:1"));
        assert!(!info.insert("cs-a:1"));
        assert_eq!(info.locations, vec!["cs-a:1".to_string(), "cs-b:1".to_string()]);
        assert!(info.contains("cs-b:1"));
        assert!(!info.contains("cs-c:1"));
    }

    #[test]
    fn path_index_display() {
        assert_eq!(PathIndex::new("/a/b", 3).to_string(), "/a/b#3");
    }
}
