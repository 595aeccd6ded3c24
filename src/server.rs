//! TCP front end of the master: one task per connection, plus a background
//! task that runs the maintenance tick.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info};

use crate::config::MasterConfig;
use crate::master::MasterCoordinator;
use crate::rpc::{Request, Response, RpcError};

/// Upper bound on a single request line.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// Pause after a failed `accept` so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct MasterServer {
    coordinator: Arc<MasterCoordinator>,
    listener: TcpListener,
    tick_interval: Duration,
}

impl MasterServer {
    /// Validate `config`, load persisted metadata and bind the listener.
    pub async fn bind(config: &MasterConfig) -> anyhow::Result<MasterServer> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("create data dir {}", config.data_dir.display()))?;
        let coordinator = MasterCoordinator::open(config).context("load master metadata")?;
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .with_context(|| format!("bind {}", config.listen_addr))?;
        Ok(MasterServer {
            coordinator: Arc::new(coordinator),
            listener,
            tick_interval: config.tick_interval,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn coordinator(&self) -> Arc<MasterCoordinator> {
        self.coordinator.clone()
    }

    /// Serve until `shutdown` resolves, then stop the tick, close connections
    /// and write a final snapshot.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let addr = self.local_addr()?;
        info!(
            %addr,
            chunkservers = ?self.coordinator.registry().chunkservers(),
            "master listening"
        );

        let ticker = tokio::spawn(run_ticker(
            self.coordinator.clone(),
            self.tick_interval,
            stop_rx.clone(),
        ));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(err) => {
                            error!(error = %err, "accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    let coordinator = self.coordinator.clone();
                    let stop = stop_rx.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_conn(socket, coordinator, stop).await {
                            debug!(%peer, error = ?err, "connection closed");
                        }
                    });
                }
                _ = &mut shutdown => break,
            }
        }

        info!(%addr, "master shutting down");
        let _ = stop_tx.send(true);
        let _ = ticker.await;

        let coordinator = self.coordinator.clone();
        tokio::task::spawn_blocking(move || coordinator.store_snapshot())
            .await
            .context("snapshot task")?
            .context("store final snapshot")?;
        Ok(())
    }
}

async fn run_ticker(
    coordinator: Arc<MasterCoordinator>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => coordinator.tick(),
            _ = stop.changed() => break,
        }
    }
}

async fn handle_conn(
    socket: TcpStream,
    coordinator: Arc<MasterCoordinator>,
    mut stop: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
    loop {
        let line = tokio::select! {
            line = framed.next() => match line {
                Some(line) => line?,
                None => return Ok(()),
            },
            _ = stop.changed() => return Ok(()),
        };
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => serve(&coordinator, request).await?,
            Err(err) => Response::Err(RpcError::bad_request(err.to_string())),
        };
        framed.send(serde_json::to_string(&response)?).await?;
    }
}

async fn serve(
    coordinator: &Arc<MasterCoordinator>,
    request: Request,
) -> anyhow::Result<Response> {
    debug!(method = request.method(), "rpc");
    if does_file_io(&request) {
        let coordinator = coordinator.clone();
        return Ok(tokio::task::spawn_blocking(move || coordinator.handle(request)).await?);
    }
    Ok(coordinator.handle(request))
}

/// Requests that write to disk, and so must stay off the reactor threads.
///
/// The remaining requests only take in-memory locks. They can still wait
/// behind a snapshot holding the registry read lock, for at most one fsync.
fn does_file_io(request: &Request) -> bool {
    matches!(request, Request::StoreSnapshot | Request::NewClientId)
}
