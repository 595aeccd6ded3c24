//! The metadata master.
//!
//! The master maintains:
//! - the chunk registry: (path, chunk index) -> handle, its inverse, and the
//!   replica locations of every handle;
//! - leases, granted to one replica at a time so that replica serialises writes;
//! - when each chunkserver last heartbeated;
//! - the client-id counter.
//!
//! Durable state (the handle counter, chunk map and inverse map) is written as a
//! whole-file snapshot. Locations and leases are rebuilt from chunkserver
//! reports after a restart.

pub mod chunk_registry;
pub mod coordinator;
pub mod lease;
pub mod liveness;
pub mod namespace;
pub mod server_meta;
pub mod snapshot;

pub use chunk_registry::ChunkRegistry;
pub use coordinator::MasterCoordinator;
pub use lease::LeaseInfo;
pub use liveness::{HeartbeatTable, LivenessTracker};
pub use namespace::{InMemoryNamespace, Namespace};
pub use server_meta::ServerMeta;
pub use snapshot::PersistentSnapshot;
