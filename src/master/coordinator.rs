use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use tracing::{debug, error, info, trace, warn};

use crate::common::{ChunkHandle, ChunkLocationInfo};
use crate::config::MasterConfig;
use crate::error::{MasterError, MasterResult};
use crate::master::chunk_registry::ChunkRegistry;
use crate::master::lease::LeaseInfo;
use crate::master::liveness::{HeartbeatTable, LivenessTracker};
use crate::master::namespace::{InMemoryNamespace, Namespace};
use crate::master::server_meta::ServerMeta;
use crate::rpc::{
    ChunkLocationsReply, HeartbeatArgs, LeaseHolderReply, Reply, Request, Response, RpcError,
};

const HEARTBEAT_ACK: &str = "ack";

/// Routes client and chunkserver requests to the registry, the lease
/// authority, the liveness tracker and the namespace.
pub struct MasterCoordinator {
    chunk_size: u64,
    snapshot_path: PathBuf,
    registry: ChunkRegistry,
    liveness: Box<dyn LivenessTracker>,
    namespace: Box<dyn Namespace>,
    server_meta: ServerMeta,
    /// Serializes the read-compare-write of file lengths in `report_chunk`.
    length_update: Mutex<()>,
}

impl MasterCoordinator {
    /// Build a master with the in-memory namespace and heartbeat table.
    pub fn open(config: &MasterConfig) -> MasterResult<MasterCoordinator> {
        MasterCoordinator::with_parts(
            config,
            Box::new(InMemoryNamespace::new()),
            Box::new(HeartbeatTable::new()),
        )
    }

    /// Load the server meta file and, when present, the chunk snapshot.
    /// Either failing to load is fatal to the caller.
    pub fn with_parts(
        config: &MasterConfig,
        namespace: Box<dyn Namespace>,
        liveness: Box<dyn LivenessTracker>,
    ) -> MasterResult<MasterCoordinator> {
        let server_meta = ServerMeta::open(config.server_meta_path())?;
        let registry = ChunkRegistry::new(config.chunkservers.clone(), config.lease_duration);
        let snapshot_path = config.snapshot_path();
        if snapshot_path.exists() {
            registry.load(&snapshot_path)?;
            debug!("restored chunk registry\n{registry}");
        } else {
            info!(path = %snapshot_path.display(), "no chunk snapshot, starting empty");
        }
        Ok(MasterCoordinator {
            chunk_size: config.chunk_size,
            snapshot_path,
            registry,
            liveness,
            namespace,
            server_meta,
            length_update: Mutex::new(()),
        })
    }

    pub fn registry(&self) -> &ChunkRegistry {
        &self.registry
    }

    pub fn liveness(&self) -> &dyn LivenessTracker {
        self.liveness.as_ref()
    }

    /// Serve one decoded request.
    pub fn handle(&self, request: Request) -> Response {
        let method = request.method();
        let result = self.dispatch(request);
        if let Err(err) = &result {
            debug!(method, code = ?err.code, message = %err.message, "request failed");
        }
        result.into()
    }

    fn dispatch(&self, request: Request) -> Result<Reply, RpcError> {
        let reply = match request {
            Request::Heartbeat(args) => Reply::Heartbeat(self.heartbeat(&args)),
            Request::NewClientId => Reply::ClientId(self.new_client_id().map_err(rpc_err)?),
            Request::Create(args) => Reply::Success(self.create(&args.path).map_err(rpc_err)?),
            Request::Mkdir(args) => Reply::Success(self.mkdir(&args.path).map_err(rpc_err)?),
            Request::List(args) => Reply::Paths(self.list(&args.path).map_err(rpc_err)?),
            Request::Delete(args) => Reply::Success(self.delete(&args.path).map_err(rpc_err)?),
            Request::FindLocations(args) => {
                let info = self.find_locations(&args.path, args.chunk_index).map_err(rpc_err)?;
                Reply::Locations(locations_reply(info))
            }
            Request::FindLeaseHolder(args) => {
                let lease = self.find_lease_holder(args.chunk_handle).map_err(rpc_err)?;
                Reply::LeaseHolder(LeaseHolderReply {
                    primary: lease.primary,
                    lease_ends: lease.expiration,
                })
            }
            Request::AddChunk(args) => {
                let info = self.add_chunk(&args.path, args.chunk_index).map_err(rpc_err)?;
                Reply::Locations(locations_reply(info))
            }
            Request::ReportChunk(args) => {
                self.report_chunk(args.chunk_handle, &args.server_address, args.length)
                    .map_err(rpc_err)?;
                Reply::Ack
            }
            Request::GetFileLength(args) => {
                Reply::FileLength(self.get_file_length(&args.path).map_err(rpc_err)?)
            }
            Request::StoreSnapshot => {
                self.store_snapshot().map_err(rpc_err)?;
                Reply::Ack
            }
        };
        Ok(reply)
    }

    /// Record liveness and forward any pending lease extensions. Never fails.
    pub fn heartbeat(&self, args: &HeartbeatArgs) -> String {
        self.liveness.record_heartbeat(&args.address);
        if !args.pending_extensions.is_empty() {
            self.registry.extend_lease(&args.address, &args.pending_extensions);
        }
        HEARTBEAT_ACK.to_string()
    }

    pub fn new_client_id(&self) -> MasterResult<u64> {
        Ok(self.server_meta.next_client_id()?)
    }

    pub fn create(&self, path: &str) -> MasterResult<bool> {
        Ok(self.namespace.create(path)?)
    }

    pub fn mkdir(&self, path: &str) -> MasterResult<bool> {
        Ok(self.namespace.mkdir(path)?)
    }

    pub fn list(&self, path: &str) -> MasterResult<Vec<String>> {
        Ok(self.namespace.list(path)?)
    }

    pub fn delete(&self, path: &str) -> MasterResult<bool> {
        Ok(self.namespace.delete(path)?)
    }

    pub fn find_locations(&self, path: &str, chunk_index: u64) -> MasterResult<ChunkLocationInfo> {
        self.registry.find_locations(path, chunk_index)
    }

    /// If there is no current lease holder, one of the replicas is selected as
    /// primary and granted a lease.
    pub fn find_lease_holder(&self, handle: ChunkHandle) -> MasterResult<LeaseInfo> {
        self.registry.find_lease_holder(handle)
    }

    pub fn add_chunk(&self, path: &str, chunk_index: u64) -> MasterResult<ChunkLocationInfo> {
        let info = self.registry.add_chunk(path, chunk_index)?;
        info!(handle = info.handle, path, chunk_index, "added chunk");
        Ok(info)
    }

    /// A chunkserver reports it holds `handle` with `length` defined bytes.
    ///
    /// The server joins the chunk's location set, and the file length grows
    /// to cover the reported bytes. It never shrinks.
    pub fn report_chunk(
        &self,
        handle: ChunkHandle,
        address: &str,
        length: i64,
    ) -> MasterResult<()> {
        let path_index = self.registry.get_path_index_from_handle(handle)?;
        self.registry.set_chunk_location(handle, address)?;

        let chunk_start = i64::try_from(self.chunk_size)
            .unwrap_or(i64::MAX)
            .saturating_mul(i64::try_from(path_index.index).unwrap_or(i64::MAX));
        let calculated = chunk_start.saturating_add(length);

        let _guard = self.length_update.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.namespace.get_file_length(&path_index.path)?;
        if calculated > current {
            self.namespace.set_file_length(&path_index.path, calculated)?;
            debug!(path = %path_index.path, from = current, to = calculated, "file length grew");
        }
        Ok(())
    }

    pub fn get_file_length(&self, path: &str) -> MasterResult<i64> {
        Ok(self.namespace.get_file_length(path)?)
    }

    /// Write the chunk snapshot now.
    pub fn store_snapshot(&self) -> MasterResult<()> {
        if let Err(err) = self.registry.store(&self.snapshot_path) {
            error!(
                path = %self.snapshot_path.display(),
                error = %err,
                "failed to store chunk snapshot"
            );
            return Err(err.into());
        }
        debug!("stored chunk registry\n{}", self.registry);
        Ok(())
    }

    /// Background maintenance, run once per tick interval.
    pub fn tick(&self) {
        trace!(chunkservers = ?self.liveness.known_chunkservers(), "tick");
        for dead in self.liveness.sweep(SystemTime::now()) {
            warn!(chunkserver = %dead, "chunkserver considered dead");
        }
    }
}

fn rpc_err(err: MasterError) -> RpcError {
    RpcError::from(&err)
}

fn locations_reply(info: ChunkLocationInfo) -> ChunkLocationsReply {
    ChunkLocationsReply {
        chunk_handle: info.handle,
        chunk_locations: info.locations,
    }
}
