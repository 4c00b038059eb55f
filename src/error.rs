//! Crate-wide error taxonomy shared by the peer engine, piece manager, and
//! both HTTP services. Per-subsystem errors (`BencodeError`, `TorrentError`)
//! live next to the code that raises them and convert into these via
//! `#[from]`, the way `TorrentError` already wraps `BencodeError`.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required path: {0}")]
    MissingPath(String),

    #[error("invalid tracker url: {0}")]
    InvalidTracker(String),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("handshake protocol identifier is invalid")]
    InvalidHandshake,

    #[error("handshake info_hash mismatch: expected {expected}, got {got}")]
    InfoHashMismatch { expected: String, got: String },

    #[error("malformed message frame: {0}")]
    BadFrame(String),

    #[error("unexpected message id {0}")]
    UnexpectedMessageId(u8),
}

#[derive(Debug, Error)]
pub enum PieceError {
    #[error("piece index {0} out of range")]
    IndexOutOfRange(u32),

    #[error("piece {0} failed hash verification")]
    HashMismatch(u32),

    #[error("piece payload too short to contain a header")]
    PayloadTooShort,

    #[error("io error writing piece: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("operation timed out")]
    Timeout,

    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker returned non-2xx status: {0}")]
    BadStatus(u16),

    #[error("invalid tracker url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("json decode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown info_hash")]
    UnknownInfoHash,
}
