//! On-disk snapshot of the chunk registry's durable state.
//!
//! Layout: `GFSM` magic, little-endian CRC32 of the body, JSON body. The file
//! is always replaced wholesale through a temporary sibling and a rename, so
//! an interrupted write leaves the previous snapshot intact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::{ChunkMap, HandleMap};
use crate::error::SnapshotError;

const MAGIC: &[u8; 4] = b"GFSM";
const HEADER_LEN: usize = 8;

/// The durable subset of registry state, written and read as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentSnapshot {
    pub handle_counter: u64,
    pub chunks: ChunkMap,
    pub handles: HandleMap,
}

impl PersistentSnapshot {
    /// Check the forward/inverse bijection and that the counter is ahead of
    /// every allocated handle.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let mut forward = 0usize;
        for (path, indexes) in &self.chunks {
            for (index, record) in indexes {
                forward += 1;
                if record.handle >= self.handle_counter {
                    return Err(SnapshotError::Inconsistent(format!(
                        "handle {} not below counter {}",
                        record.handle, self.handle_counter
                    )));
                }
                match self.handles.get(&record.handle) {
                    Some(pi) if pi.path == *path && pi.index == *index => {}
                    _ => {
                        return Err(SnapshotError::Inconsistent(format!(
                            "handle {} for {path}#{index} missing from inverse map",
                            record.handle
                        )))
                    }
                }
            }
        }
        if forward != self.handles.len() {
            return Err(SnapshotError::Inconsistent(format!(
                "{} chunk records but {} inverse entries",
                forward,
                self.handles.len()
            )));
        }
        Ok(())
    }
}

pub fn encode(snapshot: &PersistentSnapshot) -> Result<Vec<u8>, SnapshotError> {
    let body = serde_json::to_vec(snapshot)?;
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> Result<PersistentSnapshot, SnapshotError> {
    if bytes.len() < HEADER_LEN {
        return Err(SnapshotError::Truncated(bytes.len()));
    }
    if &bytes[..4] != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let stored = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let body = &bytes[HEADER_LEN..];
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(SnapshotError::Checksum { stored, computed });
    }
    let snapshot: PersistentSnapshot = serde_json::from_slice(body)?;
    snapshot.validate()?;
    Ok(snapshot)
}

/// Encode and atomically replace the file at `path`.
pub fn write_file(path: &Path, snapshot: &PersistentSnapshot) -> Result<(), SnapshotError> {
    let bytes = encode(snapshot)?;
    let tmp = tmp_path(path);

    let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
    file.write_all(&bytes).map_err(io_err(&tmp))?;
    file.sync_all().map_err(io_err(&tmp))?;
    drop(file);
    fs::rename(&tmp, path).map_err(io_err(path))?;
    Ok(())
}

pub fn read_file(path: &Path) -> Result<PersistentSnapshot, SnapshotError> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    decode(&bytes)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SnapshotError {
    let path = path.to_path_buf();
    move |source| SnapshotError::Io { path, source }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
