//! Runtime configuration shared by the peer and tracker binaries.
//!
//! Defaults mirror the Python reference's module-level constants
//! (`peer_config.py`, `Tracker.py`); every field is overridable by the CLI
//! flags defined on the `rstc`/`rstc-tracker` binaries.
use std::path::PathBuf;

/// Piece size used by `torrent::metainfo::create` when the caller doesn't
/// pick one explicitly.
pub const DEFAULT_PIECE_LENGTH: u32 = 262_144;

/// Seconds a tracker asks peers to wait before the next announce.
/// Matches `Tracker.py`'s `ANNOUNCE_INTERVAL`.
pub const DEFAULT_ANNOUNCE_INTERVAL_SECS: u64 = 1800;

/// Seconds a leech sleeps between peer-list polls, and between retries when
/// the tracker returns no peers. Distinct from the announce interval above;
/// matches `peer_config.py`'s `INTERVAL`.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 12;

/// Retries before a leech gives up when the tracker returns no peers.
pub const DEFAULT_MAX_EMPTY_PEER_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct Config {
    /// Host the tracker HTTP service binds to.
    pub tracker_host: String,
    /// Port the tracker HTTP service binds to.
    pub tracker_port: u16,
    /// Port this peer's TCP wire listener accepts connections on.
    pub peer_port: u16,
    /// Port this peer's control HTTP facade binds to.
    pub control_port: u16,
    /// Directory completed/in-progress downloads are written under.
    pub download_dir: PathBuf,
    /// Directory the tracker stores its JSON index files and blob store in.
    pub tracker_state_dir: PathBuf,
    pub piece_length: u32,
    pub announce_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub max_empty_peer_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker_host: "127.0.0.1".to_string(),
            tracker_port: 8000,
            peer_port: 6881,
            control_port: 6880,
            download_dir: PathBuf::from("downloads"),
            tracker_state_dir: PathBuf::from("tracker_state"),
            piece_length: DEFAULT_PIECE_LENGTH,
            announce_interval_secs: DEFAULT_ANNOUNCE_INTERVAL_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_empty_peer_retries: DEFAULT_MAX_EMPTY_PEER_RETRIES,
        }
    }
}

impl Config {
    pub fn tracker_bind_addr(&self) -> String {
        format!("{}:{}", self.tracker_host, self.tracker_port)
    }

    /// Base URL this peer talks to the tracker's HTTP service on.
    pub fn tracker_url(&self) -> String {
        format!("http://{}:{}", self.tracker_host, self.tracker_port)
    }

    pub fn tracker_peers_file(&self) -> PathBuf {
        self.tracker_state_dir.join("tracker_peers.json")
    }

    pub fn tracker_torrents_file(&self) -> PathBuf {
        self.tracker_state_dir.join("tracker_torrents.json")
    }

    pub fn tracker_torrents_dir(&self) -> PathBuf {
        self.tracker_state_dir.join("tracker_torrents")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.piece_length, 262_144);
        assert_eq!(cfg.announce_interval_secs, 1800);
        assert_eq!(cfg.poll_interval_secs, 12);
    }
}
