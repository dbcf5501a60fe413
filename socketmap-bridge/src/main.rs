use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use socketmap_bridge::{cli::Cli, dispatch::Dispatcher, server::Server, snapshot::SnapshotBackend};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    info!(
        keyspace = %cli.keyspace,
        snapshot = %cli.snapshot.display(),
        listen = %cli.listen_addr(),
        max_connections = ?cli.max_connections,
        lookup_timeout = ?cli.lookup_timeout(),
        "starting socketmap bridge"
    );

    let backend = SnapshotBackend::load(&cli.snapshot, &cli.keyspace).await?;
    info!(
        keyspace = backend.keyspace(),
        tables = backend.table_count(),
        "snapshot loaded"
    );
    let dispatcher = Dispatcher::new(Arc::new(backend)).with_timeout(cli.lookup_timeout());

    let listener = TcpListener::bind(cli.listen_addr())
        .await
        .with_context(|| format!("failed to listen on {}", cli.listen_addr()))?;
    let mut server = Server::new(listener, dispatcher);
    if let Some(max) = cli.max_connections {
        server = server.with_max_connections(max.get());
    }

    let addr = server.local_addr()?;
    info!("socketmap bridge listening on {}", addr);
    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("socketmap bridge exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
