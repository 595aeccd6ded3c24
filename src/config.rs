use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use byte_unit::Byte;
use thiserror::Error;
use tracing::warn;

use crate::common::{
    DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_LEASE_DURATION, DEFAULT_TICK_INTERVAL, REPLICATION_FACTOR,
};

const SNAPSHOT_FILE: &str = "chunk_snapshot";
const SERVER_META_FILE: &str = "server_meta";

/// Runtime configuration of a master.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// This server's own listen address.
    pub listen_addr: SocketAddr,
    /// Static list of chunkservers eligible for replica placement.
    pub chunkservers: Vec<String>,
    /// Directory holding the chunk snapshot and the server meta file.
    pub data_dir: PathBuf,
    pub chunk_size: u64,
    pub lease_duration: Duration,
    pub tick_interval: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("chunk size must be non-zero")]
    ZeroChunkSize,
    #[error("lease duration must be non-zero")]
    ZeroLeaseDuration,
    #[error("tick interval must be non-zero")]
    ZeroTickInterval,
    #[error("invalid chunk size {0:?}")]
    BadChunkSize(String),
}

impl MasterConfig {
    pub fn new(
        listen_addr: SocketAddr,
        chunkservers: Vec<String>,
        data_dir: PathBuf,
    ) -> MasterConfig {
        MasterConfig {
            listen_addr,
            chunkservers,
            data_dir,
            chunk_size: DEFAULT_CHUNK_SIZE_BYTES,
            lease_duration: DEFAULT_LEASE_DURATION,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }

    pub fn server_meta_path(&self) -> PathBuf {
        self.data_dir.join(SERVER_META_FILE)
    }

    /// Reject unusable values. A cluster smaller than the replication factor
    /// is allowed to start, but every chunk allocation will fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.lease_duration.is_zero() {
            return Err(ConfigError::ZeroLeaseDuration);
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }
        if self.chunkservers.len() < REPLICATION_FACTOR {
            warn!(
                chunkservers = self.chunkservers.len(),
                replication = REPLICATION_FACTOR,
                "fewer chunkservers than the replication factor; chunk allocation will fail"
            );
        }
        Ok(())
    }
}

/// Parse a human readable size such as `64MiB` or `1024`.
pub fn parse_chunk_size(s: &str) -> Result<u64, ConfigError> {
    Byte::parse_str(s, true)
        .map(|b| b.as_u64())
        .map_err(|_| ConfigError::BadChunkSize(s.to_string()))
}

/// Split a comma separated address list, dropping empty entries and duplicates.
pub fn parse_chunkserver_list(s: &str) -> Vec<String> {
    let mut servers: Vec<String> = Vec::new();
    for addr in s.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        if !servers.iter().any(|s| s == addr) {
            servers.push(addr.to_string());
        }
    }
    servers
}
