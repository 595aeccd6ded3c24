//! Metadata master for a chunk-based distributed file system.
//!
//! Files are split into fixed-size chunks. The master hands out globally
//! unique chunk handles, places three replicas of each chunk on chunkservers,
//! and grants a time-bounded lease to one replica (the primary) so that a
//! single replica orders the writes to a chunk.
//!
//! Write flow, as seen from the master:
//! - a client asks for a new chunk (`AddChunk`) or existing locations (`FindLocations`);
//! - the client asks who holds the lease (`FindLeaseHolder`), which grants one if needed;
//! - the primary keeps its lease alive through heartbeat extension requests;
//! - chunkservers report the chunks they hold (`ReportChunk`), which is how the
//!   master learns file lengths.

pub mod client;
pub mod common;
pub mod config;
pub mod error;
pub mod master;
pub mod rpc;
pub mod server;

pub use client::{ClientError, MasterClient};
pub use common::{ChunkHandle, ChunkLocationInfo, PathIndex};
pub use config::MasterConfig;
pub use error::{MasterError, MasterResult};
pub use master::MasterCoordinator;
pub use server::MasterServer;
