use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::common::{ChunkHandle, ChunkLocationInfo};
use crate::rpc::{
    ChunkArgs, FindLeaseHolderArgs, HeartbeatArgs, LeaseHolderReply, PathArgs, Reply,
    ReportChunkArgs, Request, Response, RpcError,
};
use crate::server::MAX_FRAME_BYTES;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Codec(#[from] LinesCodecError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed by master")]
    Closed,

    #[error("master returned {0}")]
    Rpc(#[from] RpcError),

    #[error("unexpected reply to {method}: {reply:?}")]
    UnexpectedReply { method: &'static str, reply: Reply },
}

/// Connection to a master. Requests on one connection are answered in order.
pub struct MasterClient {
    framed: Framed<TcpStream, LinesCodec>,
}

impl MasterClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<MasterClient, ClientError> {
        let socket = TcpStream::connect(addr).await?;
        socket.set_nodelay(true)?;
        Ok(MasterClient {
            framed: Framed::new(socket, LinesCodec::new_with_max_length(MAX_FRAME_BYTES)),
        })
    }

    /// Send one request and wait for its reply.
    pub async fn call(&mut self, request: Request) -> Result<Reply, ClientError> {
        self.framed.send(serde_json::to_string(&request)?).await?;
        let line = self.framed.next().await.ok_or(ClientError::Closed)??;
        let response: Response = serde_json::from_str(&line)?;
        let result: Result<Reply, RpcError> = response.into();
        Ok(result?)
    }

    pub async fn heartbeat(
        &mut self,
        address: &str,
        pending_extensions: Vec<ChunkHandle>,
    ) -> Result<String, ClientError> {
        let args = HeartbeatArgs {
            address: address.to_string(),
            pending_extensions,
        };
        match self.call(Request::Heartbeat(args)).await? {
            Reply::Heartbeat(ack) => Ok(ack),
            reply => Err(unexpected("Heartbeat", reply)),
        }
    }

    pub async fn new_client_id(&mut self) -> Result<u64, ClientError> {
        match self.call(Request::NewClientId).await? {
            Reply::ClientId(id) => Ok(id),
            reply => Err(unexpected("NewClientId", reply)),
        }
    }

    pub async fn create(&mut self, path: &str) -> Result<bool, ClientError> {
        match self.call(Request::Create(path_args(path))).await? {
            Reply::Success(ok) => Ok(ok),
            reply => Err(unexpected("Create", reply)),
        }
    }

    pub async fn mkdir(&mut self, path: &str) -> Result<bool, ClientError> {
        match self.call(Request::Mkdir(path_args(path))).await? {
            Reply::Success(ok) => Ok(ok),
            reply => Err(unexpected("Mkdir", reply)),
        }
    }

    pub async fn list(&mut self, path: &str) -> Result<Vec<String>, ClientError> {
        match self.call(Request::List(path_args(path))).await? {
            Reply::Paths(paths) => Ok(paths),
            reply => Err(unexpected("List", reply)),
        }
    }

    pub async fn delete(&mut self, path: &str) -> Result<bool, ClientError> {
        match self.call(Request::Delete(path_args(path))).await? {
            Reply::Success(ok) => Ok(ok),
            reply => Err(unexpected("Delete", reply)),
        }
    }

    pub async fn find_locations(
        &mut self,
        path: &str,
        chunk_index: u64,
    ) -> Result<ChunkLocationInfo, ClientError> {
        let args = ChunkArgs {
            path: path.to_string(),
            chunk_index,
        };
        match self.call(Request::FindLocations(args)).await? {
            Reply::Locations(r) => Ok(ChunkLocationInfo {
                handle: r.chunk_handle,
                locations: r.chunk_locations,
            }),
            reply => Err(unexpected("FindLocations", reply)),
        }
    }

    pub async fn find_lease_holder(
        &mut self,
        chunk_handle: ChunkHandle,
    ) -> Result<LeaseHolderReply, ClientError> {
        match self.call(Request::FindLeaseHolder(FindLeaseHolderArgs { chunk_handle })).await? {
            Reply::LeaseHolder(lease) => Ok(lease),
            reply => Err(unexpected("FindLeaseHolder", reply)),
        }
    }

    pub async fn add_chunk(
        &mut self,
        path: &str,
        chunk_index: u64,
    ) -> Result<ChunkLocationInfo, ClientError> {
        let args = ChunkArgs {
            path: path.to_string(),
            chunk_index,
        };
        match self.call(Request::AddChunk(args)).await? {
            Reply::Locations(r) => Ok(ChunkLocationInfo {
                handle: r.chunk_handle,
                locations: r.chunk_locations,
            }),
            reply => Err(unexpected("AddChunk", reply)),
        }
    }

    pub async fn report_chunk(
        &mut self,
        chunk_handle: ChunkHandle,
        server_address: &str,
        length: i64,
    ) -> Result<(), ClientError> {
        let args = ReportChunkArgs {
            chunk_handle,
            server_address: server_address.to_string(),
            length,
        };
        match self.call(Request::ReportChunk(args)).await? {
            Reply::Ack => Ok(()),
            reply => Err(unexpected("ReportChunk", reply)),
        }
    }

    pub async fn get_file_length(&mut self, path: &str) -> Result<i64, ClientError> {
        match self.call(Request::GetFileLength(path_args(path))).await? {
            Reply::FileLength(length) => Ok(length),
            reply => Err(unexpected("GetFileLength", reply)),
        }
    }

    pub async fn store_snapshot(&mut self) -> Result<(), ClientError> {
        match self.call(Request::StoreSnapshot).await? {
            Reply::Ack => Ok(()),
            reply => Err(unexpected("StoreSnapshot", reply)),
        }
    }
}

fn path_args(path: &str) -> PathArgs {
    PathArgs {
        path: path.to_string(),
    }
}

fn unexpected(method: &'static str, reply: Reply) -> ClientError {
    ClientError::UnexpectedReply { method, reply }
}
