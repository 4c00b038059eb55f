//! `rstc-tracker`: the tracker HTTP service, a straight binary port of
//! `Tracker.py`'s `uvicorn.run` entry point.
use clap::Parser;
use rs_torrent_client::config::Config;
use rs_torrent_client::tracker_server::{router, TrackerStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rstc-tracker", about = "BitTorrent-style swarm tracker")]
struct Cli {
    /// Running host for the tracker.
    #[arg(long = "host", default_value = "127.0.0.1")]
    host: String,
    /// Running port for the tracker.
    #[arg(long = "port", default_value_t = 8000)]
    port: u16,
    /// Directory the tracker stores its JSON index files and blob store in.
    #[arg(long = "state-dir", default_value = "tracker_state")]
    state_dir: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config {
        tracker_host: cli.host,
        tracker_port: cli.port,
        tracker_state_dir: cli.state_dir,
        ..Config::default()
    };

    let store = Arc::new(TrackerStore::new(&config)?);
    let bind_addr: SocketAddr = config.tracker_bind_addr().parse()?;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, "tracker listening");

    axum::serve(
        listener,
        router(store).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
