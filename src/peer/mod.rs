//! Peer role: seeds torrents it already has, leeches torrents it doesn't,
//! and exposes a small control HTTP facade so a CLI can drive both.
pub mod control;
pub mod engine;
pub mod handshake;
pub mod message;

use crate::piece::PieceManager;
use crate::torrent::Metainfo;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A torrent this peer is serving to others, mirroring
/// `Peer.seeding_torrents[info_hash] = {"torrent_filepath", "filepath"}`.
#[derive(Debug, Clone)]
pub struct SeedEntry {
    pub torrent: Metainfo,
    pub torrent_filepath: PathBuf,
    pub data_path: PathBuf,
}

/// Shared state for a single running peer process: its identity and the
/// torrents it's currently seeding or leeching.
pub struct PeerState {
    pub peer_id: [u8; 20],
    pub port: u16,
    pub seeding: Mutex<HashMap<[u8; 20], SeedEntry>>,
    pub leeching: Mutex<HashMap<[u8; 20], Arc<PieceManager>>>,
}

impl PeerState {
    pub fn new(peer_id: [u8; 20], port: u16) -> Arc<Self> {
        Arc::new(Self {
            peer_id,
            port,
            seeding: Mutex::new(HashMap::new()),
            leeching: Mutex::new(HashMap::new()),
        })
    }
}
