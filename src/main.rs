//! `rstc`: a BitTorrent-style peer. `serve` runs the long-lived daemon (peer
//! wire listener plus control HTTP facade); every other subcommand is a
//! thin client against a running daemon's control facade, the way
//! `peer_cli.py` talks to `peer_server.py`.
use clap::{Parser, Subcommand};
use rs_torrent_client::config::Config;
use rs_torrent_client::peer::control::{self, AppState};
use rs_torrent_client::peer::engine::PeerEngine;
use rs_torrent_client::peer::PeerState;
use rs_torrent_client::torrent::metainfo::{Metainfo, Trackers};
use rs_torrent_client::tracker_client::{generate_peer_id, Client as TrackerClient};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rstc", about = "A peer in a BitTorrent-style swarm")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the peer daemon: TCP wire listener plus control HTTP facade.
    Serve {
        #[arg(long, default_value_t = 6881)]
        peer_port: u16,
        #[arg(long, default_value_t = 6880)]
        control_port: u16,
        #[arg(long, default_value = "127.0.0.1")]
        tracker_host: String,
        #[arg(long, default_value_t = 8000)]
        tracker_port: u16,
        #[arg(long, default_value = "downloads")]
        download_dir: PathBuf,
    },
    /// Starts seeding a file or directory through a running daemon.
    Seed {
        #[arg(long, default_value_t = 6880)]
        port: u16,
        #[arg(long = "input")]
        input_path: PathBuf,
        #[arg(long = "torrent")]
        torrent_filepath: Option<PathBuf>,
        #[arg(long = "tracker")]
        tracker_urls: Vec<String>,
        #[arg(long = "piecelen", default_value_t = rs_torrent_client::config::DEFAULT_PIECE_LENGTH)]
        piece_length: u32,
        #[arg(long = "cmt")]
        comment: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Creates a `.torrent` file locally without contacting a daemon.
    Create {
        #[arg(long = "input")]
        input_path: PathBuf,
        #[arg(long = "tracker")]
        tracker_urls: Vec<String>,
        #[arg(long = "output")]
        output_path: PathBuf,
        #[arg(long = "piecelen", default_value_t = rs_torrent_client::config::DEFAULT_PIECE_LENGTH)]
        piece_length: u32,
        #[arg(long = "cmt", default_value = "")]
        comment: String,
        #[arg(long = "cre", default_value = "")]
        created_by: String,
    },
    /// Starts leeching a `.torrent` file through a running daemon.
    Leech {
        #[arg(long, default_value_t = 6880)]
        port: u16,
        #[arg(long = "torrent")]
        torrent_filepath: PathBuf,
    },
    /// Prints the metadata inside a `.torrent` file.
    #[command(name = "show-info")]
    ShowInfo {
        #[arg(long = "torrent")]
        torrent_filepath: PathBuf,
    },
    /// Lists the torrents the daemon's tracker knows about.
    Torrents {
        #[arg(long, default_value_t = 6880)]
        port: u16,
    },
    /// Prints what a daemon is currently seeding and leeching.
    Status {
        #[arg(long, default_value_t = 6880)]
        port: u16,
    },
    /// Checks connectivity to a host:port.
    Hello {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            peer_port,
            control_port,
            tracker_host,
            tracker_port,
            download_dir,
        } => serve(peer_port, control_port, tracker_host, tracker_port, download_dir).await,
        Command::Seed {
            port,
            input_path,
            torrent_filepath,
            tracker_urls,
            piece_length,
            comment,
            name,
        } => seed(port, input_path, torrent_filepath, tracker_urls, piece_length, comment, name).await,
        Command::Create {
            input_path,
            tracker_urls,
            output_path,
            piece_length,
            comment,
            created_by,
        } => create(input_path, tracker_urls, output_path, piece_length, comment, created_by),
        Command::Leech { port, torrent_filepath } => leech(port, torrent_filepath).await,
        Command::ShowInfo { torrent_filepath } => show_info(torrent_filepath),
        Command::Torrents { port } => torrents(port).await,
        Command::Status { port } => status(port).await,
        Command::Hello { host, port } => hello(host, port).await,
    }
}

async fn serve(
    peer_port: u16,
    control_port: u16,
    tracker_host: String,
    tracker_port: u16,
    download_dir: PathBuf,
) -> anyhow::Result<()> {
    let config = Config {
        tracker_host,
        tracker_port,
        peer_port,
        control_port,
        download_dir,
        ..Config::default()
    };
    std::fs::create_dir_all(&config.download_dir)?;

    let peer_id = generate_peer_id();
    let state = PeerState::new(peer_id, config.peer_port);
    let engine = PeerEngine::new(state);
    let local_addr = engine.start_seeding().await?;
    tracing::info!(%local_addr, "peer wire listener up");

    let tracker = Arc::new(TrackerClient::new(config.peer_port)?);
    let app_state = AppState { engine, tracker, config: config.clone() };

    let bind_addr: SocketAddr = format!("0.0.0.0:{}", config.control_port).parse()?;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, "control facade listening");
    axum::serve(listener, control::router(app_state)).await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn seed(
    port: u16,
    input_path: PathBuf,
    torrent_filepath: Option<PathBuf>,
    tracker_urls: Vec<String>,
    piece_length: u32,
    comment: Option<String>,
    name: Option<String>,
) -> anyhow::Result<()> {
    let http = reqwest::Client::new();
    let payload = serde_json::json!({
        "input_path": input_path.to_string_lossy(),
        "torrent_filepath": torrent_filepath.map(|p| p.to_string_lossy().into_owned()),
        "trackers": if tracker_urls.is_empty() { None } else { Some(tracker_urls) },
        "piece_length": piece_length,
        "description": comment,
        "name": name,
    });
    let response = http
        .post(format!("http://127.0.0.1:{port}/seed"))
        .json(&payload)
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = response.json().await?;
    println!("{}", body["message"].as_str().unwrap_or(""));
    Ok(())
}

fn create(
    input_path: PathBuf,
    tracker_urls: Vec<String>,
    output_path: PathBuf,
    piece_length: u32,
    comment: String,
    created_by: String,
) -> anyhow::Result<()> {
    let trackers = if tracker_urls.is_empty() {
        Trackers::single("http://127.0.0.1:8000")
    } else {
        Trackers::Flat(tracker_urls)
    };
    let (_, path) = Metainfo::create(&input_path, trackers, piece_length, &comment, &created_by, &output_path)?;
    println!("Torrent file saved to: {}", path.display());
    Ok(())
}

async fn leech(port: u16, torrent_filepath: PathBuf) -> anyhow::Result<()> {
    let http = reqwest::Client::new();
    let payload = serde_json::json!({
        "torrent_filepath": torrent_filepath.to_string_lossy(),
    });
    let response = http
        .post(format!("http://127.0.0.1:{port}/leech"))
        .json(&payload)
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = response.json().await?;
    println!("{} ...", body["message"].as_str().unwrap_or(""));
    Ok(())
}

fn show_info(torrent_filepath: PathBuf) -> anyhow::Result<()> {
    let torrent = Metainfo::parse(&torrent_filepath)?;
    println!(
        "--- Torrent Info: {} ---",
        torrent_filepath.file_name().unwrap_or_default().to_string_lossy()
    );
    println!("Info Hash       {}", torrent.info_hash_hex());
    println!("Announce URL    {}", torrent.tracker_url());
    println!("Total Size      {:.2} MiB", torrent.total_size() as f64 / (1024.0 * 1024.0));
    println!("Piece Length    {} KiB", torrent.piece_length() / 1024);
    println!("Number of Pieces {}", torrent.number_of_pieces());

    if torrent.is_multifile() {
        println!("\nFiles:");
        for file in torrent.files() {
            println!("  {:<40} {:.2} KiB", file.path.join("/"), file.length as f64 / 1024.0);
        }
    } else {
        println!("\nFilename: {}", torrent.filename());
    }
    Ok(())
}

async fn torrents(port: u16) -> anyhow::Result<()> {
    let http = reqwest::Client::new();
    let response = http
        .get(format!("http://127.0.0.1:{port}/torrents"))
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = response.json().await?;
    if let Some(data) = body["data"].as_object() {
        println!("{:<42} {:<30} DESCRIPTION", "INFO_HASH", "NAME");
        for (info_hash, entry) in data {
            println!(
                "{:<42} {:<30} {}",
                info_hash,
                entry["name"].as_str().unwrap_or(""),
                entry["description"].as_str().unwrap_or("")
            );
        }
    }
    Ok(())
}

async fn status(port: u16) -> anyhow::Result<()> {
    let http = reqwest::Client::new();
    let response = http
        .get(format!("http://127.0.0.1:{port}/status"))
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = response.json().await?;

    println!("SEEDING FILES:");
    for entry in body["seeding"].as_array().cloned().unwrap_or_default() {
        println!("  {} {}", entry["info_hash"].as_str().unwrap_or(""), entry["filepath"].as_str().unwrap_or(""));
    }
    println!("LEECHING FILES:");
    for entry in body["leeching"].as_array().cloned().unwrap_or_default() {
        println!(
            "  {} {} {:.1}%",
            entry["info_hash"].as_str().unwrap_or(""),
            entry["output_name"].as_str().unwrap_or(""),
            entry["fraction_complete"].as_f64().unwrap_or(0.0) * 100.0
        );
    }
    Ok(())
}

async fn hello(host: String, port: u16) -> anyhow::Result<()> {
    let url = format!("http://{host}:{port}/");
    let http = reqwest::Client::new();
    match http.get(&url).send().await {
        Ok(response) => {
            let status = response.status();
            println!("Successfully connected to {url}. Status code: {status}");
        }
        Err(e) => println!("Failed to connect to {url}. Error: {e}"),
    }
    Ok(())
}
