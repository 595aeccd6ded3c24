use std::time::Duration;

use byte_unit::Byte;
use gfs::{MasterClient, MasterConfig, MasterServer};
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    // Fresh state every run; the namespace is not persisted, so reusing old
    // chunk metadata would collide with the chunks allocated below.
    let data_dir = tempfile::tempdir()?;
    let chunkservers: Vec<String> = (0..3).map(|i| format!("chunkserver-{i}:7001")).collect();

    // Setup master.
    println!("Creating master.\n");
    let mut config = MasterConfig::new(
        "127.0.0.1:0".parse()?,
        chunkservers.clone(),
        data_dir.path().to_path_buf(),
    );
    config.chunk_size = 1024;
    let server = MasterServer::bind(&config).await?;
    let addr = server.local_addr()?;
    let (stop, stopped) = oneshot::channel::<()>();
    let master = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));

    // Setup client.
    let mut client = MasterClient::connect(addr).await?;
    println!("client id: {}", client.new_client_id().await?);
    client.mkdir("/files").await?;
    client.create("/files/test").await?;
    println!("ls /files");
    client.list("/files").await?.iter().for_each(|x| println!("{}", x));

    // Chunkservers announce themselves.
    for cs in &chunkservers {
        let mut conn = MasterClient::connect(addr).await?;
        conn.heartbeat(cs, vec![]).await?;
    }

    // Allocate two chunks and write "hello world" into the second one.
    let data = "hello world".as_bytes();
    for index in 0..2 {
        let info = client.add_chunk("/files/test", index).await?;
        println!("chunk {index}: handle {} on {:?}", info.handle, info.locations);

        let lease = client.find_lease_holder(info.handle).await?;
        println!("  primary {}", lease.primary);

        // Every replica reports the bytes it holds; the primary keeps its lease alive.
        let defined = if index == 0 {
            config.chunk_size as i64
        } else {
            data.len() as i64
        };
        for replica in &info.locations {
            let mut conn = MasterClient::connect(addr).await?;
            conn.report_chunk(info.handle, replica, defined).await?;
        }
        let mut primary = MasterClient::connect(addr).await?;
        primary.heartbeat(&lease.primary, vec![info.handle]).await?;
    }

    let length = client.get_file_length("/files/test").await?;
    println!("file length: {:#}", Byte::from_u64(length as u64));

    client.store_snapshot().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let _ = stop.send(());
    master.await??;
    Ok(())
}
