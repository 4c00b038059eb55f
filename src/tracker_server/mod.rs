//! Tracker HTTP service: swarm membership and a `.torrent` blob store.
//!
//! A straight port of `Tracker.py`'s FastAPI handlers onto `axum`. State is
//! two JSON files re-read from disk on every request — `Tracker.py` does
//! the same thing, trading a bit of I/O for never having to reconcile an
//! in-memory cache with the files an operator might also be poking at
//! directly.
use axum::extract::{ConnectInfo, Multipart, Path as AxumPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::Config;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerRecord {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnounceReply {
    pub peers: Vec<PeerRecord>,
    pub interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentEntry {
    pub file_path: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TorrentEntryPublic {
    pub name: String,
    pub description: Option<String>,
}

pub struct TrackerStore {
    peers_file: PathBuf,
    torrents_file: PathBuf,
    torrents_dir: PathBuf,
    announce_interval: u64,
    peers_lock: Mutex<()>,
    torrents_lock: Mutex<()>,
}

impl TrackerStore {
    pub fn new(config: &Config) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.tracker_state_dir)?;
        std::fs::create_dir_all(config.tracker_torrents_dir())?;
        let peers_file = config.tracker_peers_file();
        let torrents_file = config.tracker_torrents_file();
        if !peers_file.exists() {
            std::fs::write(&peers_file, "{}")?;
        }
        if !torrents_file.exists() {
            std::fs::write(&torrents_file, "{}")?;
        }
        Ok(Self {
            peers_file,
            torrents_file,
            torrents_dir: config.tracker_torrents_dir(),
            announce_interval: config.announce_interval_secs,
            peers_lock: Mutex::new(()),
            torrents_lock: Mutex::new(()),
        })
    }

    async fn read_peers(&self) -> HashMap<String, Vec<PeerRecord>> {
        let data = tokio::fs::read(&self.peers_file).await.unwrap_or_default();
        serde_json::from_slice(&data).unwrap_or_default()
    }

    async fn write_peers(&self, peers: &HashMap<String, Vec<PeerRecord>>) -> std::io::Result<()> {
        let data = serde_json::to_vec_pretty(peers)?;
        tokio::fs::write(&self.peers_file, data).await
    }

    async fn read_torrents(&self) -> HashMap<String, TorrentEntry> {
        let data = tokio::fs::read(&self.torrents_file).await.unwrap_or_default();
        serde_json::from_slice(&data).unwrap_or_default()
    }

    async fn write_torrents(&self, torrents: &HashMap<String, TorrentEntry>) -> std::io::Result<()> {
        let data = serde_json::to_vec_pretty(torrents)?;
        tokio::fs::write(&self.torrents_file, data).await
    }

    /// Applies an announce event for `info_hash` and returns the current
    /// peer list, matching `announce_get`'s dedup-on-`(ip, port)` behavior.
    async fn apply_announce(
        &self,
        info_hash: &str,
        peer: PeerRecord,
        event: Option<&str>,
    ) -> std::io::Result<Vec<PeerRecord>> {
        let _guard = self.peers_lock.lock().await;
        let mut peers = self.read_peers().await;
        let entry = peers.entry(info_hash.to_string()).or_default();
        match event {
            Some("started") => {
                if !entry.contains(&peer) {
                    entry.push(peer);
                }
            }
            Some("stopped") => {
                entry.retain(|p| p != &peer);
            }
            _ => {}
        }
        let list = entry.clone();
        self.write_peers(&peers).await?;
        Ok(list)
    }
}

#[derive(Debug, Deserialize)]
pub struct AnnounceQuery {
    pub info_hash: String,
    pub port: u16,
    pub ip: Option<String>,
    pub event: Option<String>,
}

async fn get_status() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "Tracker is running."}))
}

async fn get_announce(
    State(store): State<Arc<TrackerStore>>,
    Query(params): Query<AnnounceQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<AnnounceReply>, AppError> {
    let ip = params.ip.unwrap_or_else(|| addr.ip().to_string());
    let peer = PeerRecord { ip, port: params.port };
    let peers = store
        .apply_announce(&params.info_hash, peer, params.event.as_deref())
        .await
        .map_err(AppError::from)?;
    Ok(Json(AnnounceReply {
        peers,
        interval: store.announce_interval,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AnnouncePostQuery {
    pub info_hash: String,
    pub port: u16,
    pub ip: Option<String>,
}

async fn post_announce(
    State(store): State<Arc<TrackerStore>>,
    Query(params): Query<AnnouncePostQuery>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut name: Option<String> = None;
    let mut comment: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                file_name = field.file_name().map(str::to_string);
                file_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?
                        .to_vec(),
                );
            }
            "name" => name = Some(field.text().await.unwrap_or_default()),
            "comment" => comment = Some(field.text().await.unwrap_or_default()),
            _ => {}
        }
    }

    let file_name = file_name.ok_or_else(|| AppError::BadRequest("missing file field".into()))?;
    if !file_name.ends_with(".torrent") {
        return Err(AppError::BadRequest(
            "the uploaded file is not a .torrent file".into(),
        ));
    }
    let file_bytes = file_bytes.ok_or_else(|| AppError::BadRequest("empty file field".into()))?;

    {
        let _guard = store.torrents_lock.lock().await;
        let mut torrents = store.read_torrents().await;
        let already_stored = torrents
            .get(&params.info_hash)
            .is_some_and(|e| std::path::Path::new(&e.file_path).exists());
        if !already_stored {
            let blob_path = store
                .torrents_dir
                .join(format!("{}.torrent", uuid::Uuid::new_v4()));
            tokio::fs::write(&blob_path, &file_bytes)
                .await
                .map_err(AppError::from)?;
            torrents.insert(
                params.info_hash.clone(),
                TorrentEntry {
                    file_path: blob_path.to_string_lossy().into_owned(),
                    name: name.unwrap_or(file_name),
                    description: comment,
                },
            );
            store.write_torrents(&torrents).await.map_err(AppError::from)?;
        }
    }

    let ip_part = params
        .ip
        .map(|ip| format!("&ip={ip}"))
        .unwrap_or_default();
    let location = format!(
        "/announce?info_hash={}&port={}{}&event=started",
        params.info_hash, params.port, ip_part
    );
    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, location)],
    )
        .into_response())
}

async fn get_torrents(
    State(store): State<Arc<TrackerStore>>,
) -> Json<HashMap<String, TorrentEntryPublic>> {
    let torrents = store.read_torrents().await;
    Json(
        torrents
            .into_iter()
            .map(|(hash, entry)| {
                (
                    hash,
                    TorrentEntryPublic {
                        name: entry.name,
                        description: entry.description,
                    },
                )
            })
            .collect(),
    )
}

async fn get_torrent_by_hash(
    State(store): State<Arc<TrackerStore>>,
    AxumPath(info_hash): AxumPath<String>,
) -> Result<Response, AppError> {
    let torrents = store.read_torrents().await;
    let entry = torrents
        .get(&info_hash)
        .ok_or(AppError::NotFound)?
        .clone();
    let bytes = tokio::fs::read(&entry.file_path).await.map_err(AppError::from)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", entry.name),
            ),
        ],
        bytes,
    )
        .into_response())
}

pub fn router(store: Arc<TrackerStore>) -> Router {
    Router::new()
        .route("/", get(get_status))
        .route("/announce", get(get_announce).post(post_announce))
        .route("/torrents", get(get_torrents))
        .route("/torrents/:info_hash", get(get_torrent_by_hash))
        .with_state(store)
}

enum AppError {
    BadRequest(String),
    NotFound,
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound => (StatusCode::NOT_FOUND, "info_hash does not exist".to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.tracker_state_dir = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn announce_started_then_stopped_round_trips() {
        let dir = tempdir().unwrap();
        let store = TrackerStore::new(&test_config(dir.path())).unwrap();

        let peer = PeerRecord { ip: "1.2.3.4".into(), port: 6881 };
        let list = store
            .apply_announce("deadbeef", peer.clone(), Some("started"))
            .await
            .unwrap();
        assert_eq!(list, vec![peer.clone()]);

        // duplicate "started" does not double-add
        let list = store
            .apply_announce("deadbeef", peer.clone(), Some("started"))
            .await
            .unwrap();
        assert_eq!(list.len(), 1);

        let list = store
            .apply_announce("deadbeef", peer, Some("stopped"))
            .await
            .unwrap();
        assert!(list.is_empty());
    }
}
