use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use byte_unit::Byte;
use clap::Parser;
use tracing::info;

use gfs::config::{parse_chunk_size, parse_chunkserver_list};
use gfs::{MasterConfig, MasterServer};

/// CLI options for running a master.
#[derive(Parser, Debug)]
#[command(name = "gfs-master")]
struct Args {
    /// Address this master listens on.
    #[arg(long, env = "GFS_MASTER_LISTEN", default_value = "127.0.0.1:7070")]
    listen: SocketAddr,

    /// Comma-separated chunkserver addresses eligible for replica placement,
    /// e.g. `10.0.0.1:7001,10.0.0.2:7001,10.0.0.3:7001`.
    #[arg(long, env = "GFS_CHUNKSERVERS", default_value = "")]
    chunkservers: String,

    /// Directory for the chunk snapshot and server meta file.
    #[arg(long, env = "GFS_DATA_DIR", default_value = "./data/master")]
    data_dir: PathBuf,

    /// Chunk size, e.g. `64MiB`.
    #[arg(long, env = "GFS_CHUNK_SIZE", default_value = "64MiB")]
    chunk_size: String,

    #[arg(long, env = "GFS_LEASE_MS", default_value_t = 60_000)]
    lease_ms: u64,

    #[arg(long, env = "GFS_TICK_MS", default_value_t = 1_000)]
    tick_ms: u64,
}

impl Args {
    fn into_config(self) -> anyhow::Result<MasterConfig> {
        let mut config = MasterConfig::new(
            self.listen,
            parse_chunkserver_list(&self.chunkservers),
            self.data_dir,
        );
        config.chunk_size = parse_chunk_size(&self.chunk_size)?;
        config.lease_duration = Duration::from_millis(self.lease_ms);
        config.tick_interval = Duration::from_millis(self.tick_ms);
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Enable ANSI colors only when stdout is a terminal and NO_COLOR is unset.
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Args::parse().into_config()?;
    info!(
        listen = %config.listen_addr,
        chunk_size = %format!("{:#}", Byte::from_u64(config.chunk_size)),
        lease = ?config.lease_duration,
        data_dir = %config.data_dir.display(),
        "starting master"
    );

    let server = MasterServer::bind(&config).await.context("start master")?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
