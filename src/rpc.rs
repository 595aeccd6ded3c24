//! Request and reply messages exchanged with the master.
//!
//! Each message is one JSON document on its own line. A request names its
//! method and carries typed arguments; the reply is either `{"ok": ...}` or
//! `{"err": {"code": ..., "message": ...}}`.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::common::ChunkHandle;
use crate::error::MasterError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatArgs {
    pub address: String,
    /// Handles the chunkserver wants its leases extended on.
    #[serde(default)]
    pub pending_extensions: Vec<ChunkHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathArgs {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkArgs {
    pub path: String,
    pub chunk_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindLeaseHolderArgs {
    pub chunk_handle: ChunkHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportChunkArgs {
    pub chunk_handle: ChunkHandle,
    pub server_address: String,
    /// Number of defined bytes in the chunk.
    pub length: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum Request {
    Heartbeat(HeartbeatArgs),
    NewClientId,
    Create(PathArgs),
    Mkdir(PathArgs),
    List(PathArgs),
    Delete(PathArgs),
    FindLocations(ChunkArgs),
    FindLeaseHolder(FindLeaseHolderArgs),
    AddChunk(ChunkArgs),
    ReportChunk(ReportChunkArgs),
    GetFileLength(PathArgs),
    StoreSnapshot,
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Request::Heartbeat(_) => "Heartbeat",
            Request::NewClientId => "NewClientId",
            Request::Create(_) => "Create",
            Request::Mkdir(_) => "Mkdir",
            Request::List(_) => "List",
            Request::Delete(_) => "Delete",
            Request::FindLocations(_) => "FindLocations",
            Request::FindLeaseHolder(_) => "FindLeaseHolder",
            Request::AddChunk(_) => "AddChunk",
            Request::ReportChunk(_) => "ReportChunk",
            Request::GetFileLength(_) => "GetFileLength",
            Request::StoreSnapshot => "StoreSnapshot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLocationsReply {
    pub chunk_handle: ChunkHandle,
    pub chunk_locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseHolderReply {
    pub primary: String,
    pub lease_ends: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Heartbeat(String),
    ClientId(u64),
    Success(bool),
    Paths(Vec<String>),
    Locations(ChunkLocationsReply),
    LeaseHolder(LeaseHolderReply),
    FileLength(i64),
    Ack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    PathNotFound,
    ChunkIndexNotFound,
    LocationsUnavailable,
    ChunkAlreadyExists,
    HandleNotFound,
    HandlesExhausted,
    NotEnoughChunkservers,
    Namespace,
    Snapshot,
    ServerMeta,
    BadRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

impl RpcError {
    pub fn bad_request(message: impl Into<String>) -> RpcError {
        RpcError {
            code: ErrorCode::BadRequest,
            message: message.into(),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

impl From<&MasterError> for RpcError {
    fn from(err: &MasterError) -> RpcError {
        let code = match err {
            MasterError::PathNotFound(_) => ErrorCode::PathNotFound,
            MasterError::ChunkIndexNotFound { .. } => ErrorCode::ChunkIndexNotFound,
            MasterError::LocationsUnavailable(_) => ErrorCode::LocationsUnavailable,
            MasterError::ChunkAlreadyExists { .. } => ErrorCode::ChunkAlreadyExists,
            MasterError::HandleNotFound(_) => ErrorCode::HandleNotFound,
            MasterError::HandlesExhausted => ErrorCode::HandlesExhausted,
            MasterError::NotEnoughChunkservers { .. } => ErrorCode::NotEnoughChunkservers,
            MasterError::Namespace(_) => ErrorCode::Namespace,
            MasterError::Snapshot(_) => ErrorCode::Snapshot,
            MasterError::ServerMeta(_) => ErrorCode::ServerMeta,
        };
        RpcError {
            code,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    Ok(Reply),
    Err(RpcError),
}

impl From<Result<Reply, RpcError>> for Response {
    fn from(result: Result<Reply, RpcError>) -> Response {
        match result {
            Ok(reply) => Response::Ok(reply),
            Err(err) => Response::Err(err),
        }
    }
}

impl From<Response> for Result<Reply, RpcError> {
    fn from(response: Response) -> Result<Reply, RpcError> {
        match response {
            Response::Ok(reply) => Ok(reply),
            Response::Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let req = Request::AddChunk(ChunkArgs {
            path: "/f".into(),
            chunk_index: 2,
        });
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"method": "AddChunk", "args": {"path": "/f", "chunk_index": 2}})
        );
        let parsed: Request = serde_json::from_str(r#"{"method":"NewClientId"}"#).unwrap();
        assert_eq!(parsed, Request::NewClientId);
    }

    #[test]
    fn heartbeat_extensions_default_to_empty() {
        let parsed: Request =
            serde_json::from_str(r#"{"method":"Heartbeat","args":{"address":"a:1"}}"#).unwrap();
        assert_eq!(
            parsed,
            Request::Heartbeat(HeartbeatArgs {
                address: "a:1".into(),
                pending_extensions: vec![],
            })
        );
    }

    #[test]
    fn errors_carry_codes() {
        let err = MasterError::ChunkAlreadyExists {
            path: "/f".into(),
            index: 0,
        };
        let rpc = RpcError::from(&err);
        assert_eq!(rpc.code, ErrorCode::ChunkAlreadyExists);
        assert_eq!(
            serde_json::to_value(Response::Err(rpc)).unwrap(),
            json!({"err": {
                "code": "ChunkAlreadyExists",
                "message": "chunk index 0 already exists for /f",
            }})
        );
    }
}
