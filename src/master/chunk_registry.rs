use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use crate::common::{
    ChunkHandle, ChunkLocationInfo, ChunkMap, ChunkRecord, HandleMap, PathIndex,
    REPLICATION_FACTOR,
};
use crate::error::{MasterError, MasterResult, SnapshotError};
use crate::master::lease::LeaseTable;
use crate::master::snapshot::{self, PersistentSnapshot};

/// Monotonic chunk handle allocator. Handles are never reused.
#[derive(Debug, Default)]
pub(crate) struct HandleCounter(u64);

impl HandleCounter {
    fn allocate_next(&mut self) -> MasterResult<ChunkHandle> {
        let handle = self.0;
        self.0 = handle.checked_add(1).ok_or(MasterError::HandlesExhausted)?;
        Ok(handle)
    }
}

/// Everything guarded by the registry lock.
///
/// Leases live here too so that a grant reads the replica set and records the
/// primary in the same critical section.
#[derive(Default)]
pub(crate) struct RegistryState {
    counter: HandleCounter,
    /// (path, chunk index) -> chunk record (persistent)
    chunks: ChunkMap,
    /// chunk handle -> (path, chunk index) (inverse of chunks)
    handles: HandleMap,
    /// chunk handle -> chunk locations (in-memory)
    pub(crate) locations: HashMap<ChunkHandle, ChunkLocationInfo>,
    pub(crate) leases: LeaseTable,
}

impl RegistryState {
    pub(crate) fn is_allocated(&self, handle: ChunkHandle) -> bool {
        self.handles.contains_key(&handle)
    }

    fn to_snapshot(&self) -> PersistentSnapshot {
        PersistentSnapshot {
            handle_counter: self.counter.0,
            chunks: self.chunks.clone(),
            handles: self.handles.clone(),
        }
    }

    fn chunk_record(&self, path: &str, index: u64) -> MasterResult<&ChunkRecord> {
        let indexes = self
            .chunks
            .get(path)
            .ok_or_else(|| MasterError::PathNotFound(path.to_string()))?;
        indexes.get(&index).ok_or_else(|| MasterError::ChunkIndexNotFound {
            path: path.to_string(),
            index,
        })
    }
}

/// Maps (path, chunk index) to chunk handles and handles to replica locations.
///
/// Owns handle allocation and replica placement. Leases for the same handles
/// are granted through this type as well (see `master::lease`).
pub struct ChunkRegistry {
    state: RwLock<RegistryState>,
    chunkservers: Vec<String>,
    pub(crate) lease_duration: Duration,
}

impl ChunkRegistry {
    pub fn new(chunkservers: Vec<String>, lease_duration: Duration) -> ChunkRegistry {
        ChunkRegistry {
            state: RwLock::new(RegistryState::default()),
            chunkservers,
            lease_duration,
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Chunkservers eligible for replica placement.
    pub fn chunkservers(&self) -> &[String] {
        &self.chunkservers
    }

    /// Number of allocated chunks.
    pub fn chunk_count(&self) -> usize {
        self.read().handles.len()
    }

    /// Find chunkserver locations associated with a file path and a chunk index.
    pub fn find_locations(&self, path: &str, index: u64) -> MasterResult<ChunkLocationInfo> {
        let state = self.read();
        let record = state.chunk_record(path, index)?;
        state
            .locations
            .get(&record.handle)
            .cloned()
            .ok_or(MasterError::LocationsUnavailable(record.handle))
    }

    /// Allocate a new chunk handle and `REPLICATION_FACTOR` random chunkservers
    /// for a file's chunk. Not idempotent: a second call for the same pair fails.
    pub fn add_chunk(&self, path: &str, index: u64) -> MasterResult<ChunkLocationInfo> {
        self.add_chunk_with_rng(path, index, &mut rand::thread_rng())
    }

    pub(crate) fn add_chunk_with_rng<R: Rng + ?Sized>(
        &self,
        path: &str,
        index: u64,
        rng: &mut R,
    ) -> MasterResult<ChunkLocationInfo> {
        let mut state = self.write();
        if state.chunks.get(path).is_some_and(|m| m.contains_key(&index)) {
            return Err(MasterError::ChunkAlreadyExists {
                path: path.to_string(),
                index,
            });
        }
        let locations = pick_replicas(&self.chunkservers, REPLICATION_FACTOR, rng)?;

        let handle = state.counter.allocate_next()?;
        state
            .chunks
            .entry(path.to_string())
            .or_default()
            .insert(index, ChunkRecord {
                handle,
                version: None,
            });
        state.handles.insert(handle, PathIndex::new(path, index));
        let info = ChunkLocationInfo { handle, locations };
        state.locations.insert(handle, info.clone());

        debug!(handle, path, index, locations = ?info.locations, "allocated chunk");
        Ok(info)
    }

    /// Get (path, chunk index) associated with a chunk handle.
    pub fn get_path_index_from_handle(&self, handle: ChunkHandle) -> MasterResult<PathIndex> {
        self.read()
            .handles
            .get(&handle)
            .cloned()
            .ok_or(MasterError::HandleNotFound(handle))
    }

    /// Record that `address` holds a replica of `handle`. A no-op when the
    /// address is already listed.
    pub fn set_chunk_location(&self, handle: ChunkHandle, address: &str) -> MasterResult<()> {
        let mut state = self.write();
        if !state.is_allocated(handle) {
            return Err(MasterError::HandleNotFound(handle));
        }
        let info = state
            .locations
            .entry(handle)
            .or_insert_with(|| ChunkLocationInfo::new(handle));
        if info.insert(address) {
            debug!(handle, address, "added chunk location");
        }
        Ok(())
    }

    /// Copy out the durable state.
    pub fn snapshot(&self) -> PersistentSnapshot {
        self.read().to_snapshot()
    }

    /// Write the handle counter, chunk map and inverse map to `path`.
    ///
    /// Holds the read lock for the whole write, so mutations wait until the
    /// file is on disk.
    pub fn store(&self, path: &Path) -> Result<(), SnapshotError> {
        let state = self.read();
        let snap = state.to_snapshot();
        snapshot::write_file(path, &snap)?;
        info!(path = %path.display(), chunks = snap.handles.len(), "stored chunk snapshot");
        Ok(())
    }

    /// Replace all in-memory state with the snapshot at `path`. Locations and
    /// leases are volatile and start out empty; chunkserver reports rebuild them.
    pub fn load(&self, path: &Path) -> Result<(), SnapshotError> {
        let mut state = self.write();
        let snap = snapshot::read_file(path)?;
        *state = RegistryState {
            counter: HandleCounter(snap.handle_counter),
            chunks: snap.chunks,
            handles: snap.handles,
            locations: HashMap::new(),
            leases: LeaseTable::default(),
        };
        info!(
            path = %path.display(),
            chunks = state.handles.len(),
            next_handle = state.counter.0,
            "loaded chunk snapshot"
        );
        Ok(())
    }
}

impl fmt::Display for ChunkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        writeln!(f, "----- Chunk Registry -----")?;
        writeln!(f, "Next handle {}", state.counter.0)?;
        writeln!(f, "Chunk map:")?;
        let mut paths: Vec<_> = state.chunks.iter().collect();
        paths.sort_by(|a, b| a.0.cmp(b.0));
        for (path, indexes) in paths {
            writeln!(f, "- File: {path}")?;
            let mut indexes: Vec<_> = indexes.iter().collect();
            indexes.sort_by_key(|(i, _)| **i);
            for (index, record) in indexes {
                writeln!(f, "-- Index: {index}, Handle: {}", record.handle)?;
            }
        }
        writeln!(f, "Inverse map:")?;
        let mut handles: Vec<_> = state.handles.iter().collect();
        handles.sort_by_key(|(h, _)| **h);
        for (handle, pi) in handles {
            writeln!(f, "{handle}: {pi}")?;
        }
        write!(f, "----- Chunk Registry -----")
    }
}

/// Pick `n` distinct servers uniformly at random.
fn pick_replicas<R: Rng + ?Sized>(
    servers: &[String],
    n: usize,
    rng: &mut R,
) -> MasterResult<Vec<String>> {
    if servers.len() < n {
        return Err(MasterError::NotEnoughChunkservers {
            needed: n,
            available: servers.len(),
        });
    }
    Ok(servers.choose_multiple(rng, n).cloned().collect())
}
