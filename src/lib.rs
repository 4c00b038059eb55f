//! Library root for rs-torrent-client.
//!
//! Re-exports core modules: bencode encoding, torrent metainfo, the piece
//! manager, peer-wire and control logic, and the tracker's HTTP client and
//! server halves, for use by the `rstc` and `rstc-tracker` binaries.
pub mod bencode;
pub mod config;
pub mod error;
pub mod peer;
pub mod piece;
pub mod torrent;
pub mod tracker_client;
pub mod tracker_server;
