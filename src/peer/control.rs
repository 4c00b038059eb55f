//! Control HTTP facade a CLI drives to start seeding, kick off a download,
//! and browse the tracker's catalog, ported from `peer_server.py`'s Quart
//! app onto `axum`.
use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use super::engine::PeerEngine;
use super::SeedEntry;
use crate::config::Config;
use crate::piece::{unique_path, PieceManager};
use crate::torrent::metainfo::{Metainfo, Trackers};
use crate::tracker_client::Client as TrackerClient;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PeerEngine>,
    pub tracker: Arc<TrackerClient>,
    pub config: Config,
}

async fn get_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "OK"}))
}

#[derive(Debug, Serialize)]
struct SeedingStatus {
    info_hash: String,
    filepath: String,
}

#[derive(Debug, Serialize)]
struct LeechingStatus {
    info_hash: String,
    output_name: String,
    fraction_complete: f64,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    seeding: Vec<SeedingStatus>,
    leeching: Vec<LeechingStatus>,
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let seeding = state.engine.state.seeding.lock().await;
    let seeding = seeding
        .iter()
        .map(|(info_hash, entry)| SeedingStatus {
            info_hash: hex::encode(info_hash),
            filepath: entry.data_path.to_string_lossy().into_owned(),
        })
        .collect();

    let mut leeching = Vec::new();
    for (info_hash, manager) in state.engine.state.leeching.lock().await.iter() {
        leeching.push(LeechingStatus {
            info_hash: hex::encode(info_hash),
            output_name: manager.output_path().to_string_lossy().into_owned(),
            fraction_complete: manager.fraction_complete().await,
        });
    }

    Json(StatusResponse { seeding, leeching })
}

#[derive(Debug, Deserialize)]
struct SeedRequest {
    input_path: String,
    trackers: Option<Vec<String>>,
    piece_length: Option<u32>,
    torrent_filepath: Option<String>,
    name: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

/// Builds a `.torrent` for `input_path`, starts seeding it, and uploads the
/// blob to the tracker — the HTTP counterpart of `_sow_seed`.
async fn post_seed(
    State(state): State<AppState>,
    Json(req): Json<SeedRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    if req.input_path.is_empty() {
        return Err(AppError::BadRequest("input path not found".into()));
    }
    let input_path = PathBuf::from(&req.input_path);
    if !input_path.exists() {
        return Err(AppError::BadRequest(format!(
            "{} does not exist",
            req.input_path
        )));
    }

    let trackers = match req.trackers {
        Some(urls) if !urls.is_empty() => Trackers::Flat(urls),
        _ => Trackers::single(state.config.tracker_url()),
    };
    let piece_length = req.piece_length.unwrap_or(state.config.piece_length);
    let output_path = req
        .torrent_filepath
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let filename = input_path
                .file_name()
                .map(|n| format!("{}.torrent", n.to_string_lossy()))
                .unwrap_or_else(|| "output.torrent".to_string());
            state.config.download_dir.join(filename)
        });
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AppError::Internal(e.to_string()))?;
    }

    let (torrent_bytes, torrent_filepath) = Metainfo::create(
        &input_path,
        trackers,
        piece_length,
        req.description.as_deref().unwrap_or(""),
        "rstc",
        &output_path,
    )
    .map_err(|e| AppError::Internal(e.to_string()))?;

    let torrent = Metainfo::parse_bytes(&torrent_bytes).map_err(|e| AppError::Internal(e.to_string()))?;
    let info_hash = torrent.info_hash;

    state.engine.state.seeding.lock().await.insert(
        info_hash,
        SeedEntry {
            torrent: torrent.clone(),
            torrent_filepath: torrent_filepath.clone(),
            data_path: input_path.clone(),
        },
    );

    let name = req.name.unwrap_or_else(|| torrent.filename().to_string());
    let filename = torrent_filepath
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{name}.torrent"));
    state
        .tracker
        .upload_torrent(
            &state.config.tracker_url(),
            &torrent.info_hash_hex(),
            torrent_bytes,
            filename,
            Some(name),
            req.description,
        )
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(MessageResponse {
        message: format!("Start seeding {}", req.input_path),
    }))
}

async fn get_torrents(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let torrents = state
        .tracker
        .list_torrents(&state.config.tracker_url())
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(serde_json::json!({"data": torrents})))
}

#[derive(Debug, Deserialize)]
struct LeechRequest {
    torrent_filepath: String,
}

/// Spawns a background download task the way `asyncio.create_task` does in
/// the reference, returning immediately without waiting for completion.
async fn post_leech(
    State(state): State<AppState>,
    Json(req): Json<LeechRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let torrent_path = PathBuf::from(&req.torrent_filepath);
    if !torrent_path.exists() {
        return Err(AppError::BadRequest(format!(
            "file {} not found",
            req.torrent_filepath
        )));
    }
    let torrent = Metainfo::parse(&torrent_path).map_err(|e| AppError::Internal(e.to_string()))?;
    let manager = Arc::new(
        PieceManager::new(&torrent, &state.config.download_dir).map_err(|e| AppError::Internal(e.to_string()))?,
    );

    state
        .engine
        .state
        .leeching
        .lock()
        .await
        .insert(torrent.info_hash, Arc::clone(&manager));

    let engine = Arc::clone(&state.engine);
    let tracker = Arc::clone(&state.tracker);
    let poll_interval = std::time::Duration::from_secs(state.config.poll_interval_secs);
    let max_retries = state.config.max_empty_peer_retries;
    tokio::spawn(async move {
        engine
            .run_leech(manager, torrent, torrent_path, tracker, poll_interval, max_retries)
            .await;
    });

    Ok(Json(MessageResponse {
        message: "Download process initiated in background.".to_string(),
    }))
}

async fn get_torrent_by_hash(
    State(state): State<AppState>,
    AxumPath(info_hash): AxumPath<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bytes = state
        .tracker
        .fetch_torrent(&state.config.tracker_url(), &info_hash)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    std::fs::create_dir_all(&state.config.download_dir).map_err(|e| AppError::Internal(e.to_string()))?;
    let staged = state.config.download_dir.join(uuid::Uuid::new_v4().to_string());
    std::fs::write(&staged, &bytes).map_err(|e| AppError::Internal(e.to_string()))?;

    let torrent = Metainfo::parse(&staged).map_err(|e| AppError::Internal(e.to_string()))?;
    let final_path = unique_path(
        &state
            .config
            .download_dir
            .join(format!("{}.torrent", torrent.filename())),
    );
    std::fs::rename(&staged, &final_path).map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "data": final_path.to_string_lossy()
    })))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_root))
        .route("/status", get(get_status))
        .route("/seed", post(post_seed))
        .route("/torrents", get(get_torrents))
        .route("/leech", post(post_leech))
        .route("/torrents/:info_hash", get(get_torrent_by_hash))
        .with_state(state)
}

enum AppError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}
