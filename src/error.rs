use std::path::PathBuf;

use thiserror::Error;

use crate::common::ChunkHandle;

/// Convenience alias for `Result<T, MasterError>`.
pub type MasterResult<T> = Result<T, MasterError>;

/// Errors surfaced by the master to its callers.
///
/// - not-found (`PathNotFound`, `ChunkIndexNotFound`, `HandleNotFound`) and
///   conflict (`ChunkAlreadyExists`) errors never mutate state.
/// - `LocationsUnavailable` means a chunk is known but no replica has been
///   seeded or reported for it.
/// - `Snapshot` / `ServerMeta` are fatal at startup.
#[derive(Error, Debug)]
pub enum MasterError {
    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("chunk index {index} not found for {path}")]
    ChunkIndexNotFound { path: String, index: u64 },

    #[error("locations not available for chunk {0}")]
    LocationsUnavailable(ChunkHandle),

    #[error("chunk index {index} already exists for {path}")]
    ChunkAlreadyExists { path: String, index: u64 },

    #[error("chunk handle {0} not found")]
    HandleNotFound(ChunkHandle),

    #[error("chunk handle space exhausted")]
    HandlesExhausted,

    #[error("not enough chunkservers: need {needed}, have {available}")]
    NotEnoughChunkservers { needed: usize, available: usize },

    #[error("namespace error: {0}")]
    Namespace(#[from] NamespaceError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("server meta error: {0}")]
    ServerMeta(#[from] ServerMetaError),
}

/// Errors from the namespace collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamespaceError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
}

/// Snapshot encode/decode and I/O failures.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("snapshot has bad magic header")]
    BadMagic,

    #[error("snapshot truncated: {0} bytes")]
    Truncated(usize),

    #[error("snapshot checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Checksum { stored: u32, computed: u32 },

    #[error("snapshot inconsistent: {0}")]
    Inconsistent(String),
}

/// Failures reading or writing the server meta file.
#[derive(Error, Debug)]
pub enum ServerMetaError {
    #[error("server meta io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown server meta key {key:?} on line {line}")]
    UnknownKey { key: String, line: usize },

    #[error("bad value {value:?} for {key} on line {line}")]
    BadValue {
        key: String,
        value: String,
        line: usize,
    },

    #[error("client id space exhausted")]
    ClientIdsExhausted,
}
