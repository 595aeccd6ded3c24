//! End-to-end tests over the master's TCP protocol.

mod common;

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use futures_util::{SinkExt, StreamExt};
use gfs::rpc::ErrorCode;
use gfs::ClientError;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use common::{start_master, test_config};

const SERVERS: [&str; 3] = ["A", "B", "C"];

fn rpc_code(err: ClientError) -> ErrorCode {
    match err {
        ClientError::Rpc(rpc) => rpc.code,
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn three_server_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let master = start_master(&test_config(dir.path(), &SERVERS)).await;
    let mut client = master.client().await;

    assert!(client.create("/f").await.unwrap());
    let info = client.add_chunk("/f", 0).await.unwrap();
    assert_eq!(info.handle, 0);
    let placed: HashSet<_> = info.locations.iter().cloned().collect();
    let expected: HashSet<_> = SERVERS.iter().map(|s| s.to_string()).collect();
    assert_eq!(placed, expected);

    let before = SystemTime::now();
    let lease = client.find_lease_holder(0).await.unwrap();
    assert!(placed.contains(&lease.primary));
    assert!(lease.lease_ends > before);

    // A non-primary's extension request is dropped silently.
    assert_eq!(client.heartbeat("X", vec![0]).await.unwrap(), "ack");
    let again = client.find_lease_holder(0).await.unwrap();
    assert_eq!(again, lease);

    client.report_chunk(0, "D", 1000).await.unwrap();
    assert_eq!(client.get_file_length("/f").await.unwrap(), 1000);
    let found = client.find_locations("/f", 0).await.unwrap();
    assert!(found.locations.iter().any(|l| l == "D"));
    for loc in &info.locations {
        assert!(found.locations.contains(loc));
    }

    master.stop().await.unwrap();
}

#[tokio::test]
async fn typed_errors_reach_the_client() {
    let dir = tempfile::tempdir().unwrap();
    let master = start_master(&test_config(dir.path(), &SERVERS)).await;
    let mut client = master.client().await;

    client.add_chunk("/f", 0).await.unwrap();
    assert_eq!(
        rpc_code(client.add_chunk("/f", 0).await.unwrap_err()),
        ErrorCode::ChunkAlreadyExists
    );
    assert_eq!(
        rpc_code(client.find_locations("/g", 0).await.unwrap_err()),
        ErrorCode::PathNotFound
    );
    assert_eq!(
        rpc_code(client.find_locations("/f", 4).await.unwrap_err()),
        ErrorCode::ChunkIndexNotFound
    );
    assert_eq!(
        rpc_code(client.find_lease_holder(77).await.unwrap_err()),
        ErrorCode::HandleNotFound
    );
    assert_eq!(
        rpc_code(client.report_chunk(77, "A", 1).await.unwrap_err()),
        ErrorCode::HandleNotFound
    );
    assert_eq!(rpc_code(client.get_file_length("/nope").await.unwrap_err()), ErrorCode::Namespace);

    // The connection is still usable after failures.
    assert_eq!(client.add_chunk("/f", 1).await.unwrap().handle, 1);
    master.stop().await.unwrap();
}

#[tokio::test]
async fn too_small_cluster_rejects_allocation() {
    let dir = tempfile::tempdir().unwrap();
    let master = start_master(&test_config(dir.path(), &["A", "B"])).await;
    let mut client = master.client().await;
    assert_eq!(
        rpc_code(client.add_chunk("/f", 0).await.unwrap_err()),
        ErrorCode::NotEnoughChunkservers
    );
    master.stop().await.unwrap();
}

#[tokio::test]
async fn namespace_calls_are_delegated() {
    let dir = tempfile::tempdir().unwrap();
    let master = start_master(&test_config(dir.path(), &SERVERS)).await;
    let mut client = master.client().await;

    assert!(client.mkdir("/dir").await.unwrap());
    assert!(client.create("/dir/a").await.unwrap());
    assert!(client.create("/dir/b").await.unwrap());
    assert_eq!(
        client.list("/dir").await.unwrap(),
        vec!["/dir/a".to_string(), "/dir/b".to_string()]
    );
    assert_eq!(rpc_code(client.delete("/dir").await.unwrap_err()), ErrorCode::Namespace);
    assert!(client.delete("/dir/a").await.unwrap());
    assert_eq!(client.list("/dir").await.unwrap(), vec!["/dir/b".to_string()]);
    assert_eq!(rpc_code(client.create("/dir/b").await.unwrap_err()), ErrorCode::Namespace);
    master.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_allocations_get_unique_handles() {
    let dir = tempfile::tempdir().unwrap();
    let master = start_master(&test_config(dir.path(), &["A", "B", "C", "D", "E"])).await;

    let mut tasks = Vec::new();
    for worker in 0..8u64 {
        let mut client = master.client().await;
        tasks.push(tokio::spawn(async move {
            let mut handles = Vec::new();
            for i in 0..10u64 {
                let info = client.add_chunk(&format!("/w{worker}"), i).await.unwrap();
                handles.push(info.handle);
            }
            handles
        }));
    }
    let mut all = HashSet::new();
    for task in tasks {
        let handles = task.await.unwrap();
        assert!(handles.windows(2).all(|w| w[0] < w[1]));
        all.extend(handles);
    }
    assert_eq!(all.len(), 80);
    assert_eq!(all.iter().max(), Some(&79));
    master.stop().await.unwrap();
}

#[tokio::test]
async fn client_ids_and_chunks_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &SERVERS);

    let master = start_master(&config).await;
    let mut client = master.client().await;
    assert_eq!(client.new_client_id().await.unwrap(), 1);
    assert_eq!(client.new_client_id().await.unwrap(), 2);
    client.add_chunk("/f", 0).await.unwrap();
    client.add_chunk("/f", 1).await.unwrap();
    client.store_snapshot().await.unwrap();
    client.add_chunk("/f", 2).await.unwrap();
    drop(client);
    // Shutdown writes a final snapshot that includes the last chunk.
    master.stop().await.unwrap();

    let master = start_master(&config).await;
    let mut client = master.client().await;
    assert_eq!(client.new_client_id().await.unwrap(), 3);
    assert_eq!(master.coordinator.registry().chunk_count(), 3);
    assert_eq!(client.add_chunk("/f", 3).await.unwrap().handle, 3);
    assert_eq!(
        rpc_code(client.add_chunk("/f", 1).await.unwrap_err()),
        ErrorCode::ChunkAlreadyExists
    );

    // Locations are volatile until chunkservers report in. The namespace is
    // in-memory only, so the file has to be created again first.
    assert!(client.create("/f").await.unwrap());
    assert_eq!(
        rpc_code(client.find_locations("/f", 0).await.unwrap_err()),
        ErrorCode::LocationsUnavailable
    );
    client.report_chunk(0, "B", 10).await.unwrap();
    assert_eq!(client.find_locations("/f", 0).await.unwrap().locations, vec!["B".to_string()]);
    assert_eq!(client.find_lease_holder(0).await.unwrap().primary, "B");
    master.stop().await.unwrap();
}

#[tokio::test]
async fn primary_heartbeat_extends_its_lease() {
    let dir = tempfile::tempdir().unwrap();
    let master = start_master(&test_config(dir.path(), &SERVERS)).await;
    let mut client = master.client().await;

    client.add_chunk("/f", 0).await.unwrap();
    let lease = client.find_lease_holder(0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    client.heartbeat(&lease.primary, vec![0]).await.unwrap();

    let extended = client.find_lease_holder(0).await.unwrap();
    assert_eq!(extended.primary, lease.primary);
    assert!(extended.lease_ends > lease.lease_ends);
    assert!(master.coordinator.liveness().last_seen(&lease.primary).is_some());
    master.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_request_gets_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let master = start_master(&test_config(dir.path(), &SERVERS)).await;

    let socket = TcpStream::connect(master.addr).await.unwrap();
    let mut framed = Framed::new(socket, LinesCodec::new());
    framed.send("{\"method\":\"Nope\"}").await.unwrap();
    let line = framed.next().await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["err"]["code"], "BadRequest");

    framed.send("{\"method\":\"NewClientId\"}").await.unwrap();
    let line = framed.next().await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["ok"]["ClientId"], 1);
    master.stop().await.unwrap();
}
