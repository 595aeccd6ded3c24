//! Shared helpers for integration tests.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gfs::{MasterClient, MasterConfig, MasterCoordinator, MasterServer};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A master running on an ephemeral port inside the test runtime.
pub struct TestMaster {
    pub addr: SocketAddr,
    pub coordinator: Arc<MasterCoordinator>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestMaster {
    pub async fn client(&self) -> MasterClient {
        MasterClient::connect(self.addr).await.expect("connect to master")
    }

    /// Shut the master down and wait for its final snapshot.
    pub async fn stop(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(());
        self.task.await?
    }
}

pub fn test_config(data_dir: &Path, chunkservers: &[&str]) -> MasterConfig {
    let mut config = MasterConfig::new(
        "127.0.0.1:0".parse().unwrap(),
        chunkservers.iter().map(|s| s.to_string()).collect(),
        data_dir.to_path_buf(),
    );
    config.tick_interval = Duration::from_millis(20);
    config
}

pub async fn start_master(config: &MasterConfig) -> TestMaster {
    let server = MasterServer::bind(config).await.expect("bind master");
    let addr = server.local_addr().expect("local addr");
    let coordinator = server.coordinator();
    let (shutdown, rx) = oneshot::channel();
    let task = tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));
    TestMaster {
        addr,
        coordinator,
        shutdown,
        task,
    }
}
