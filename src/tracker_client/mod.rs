//! Peer-side tracker client: announces this peer to a tracker and parses
//! the peer list it returns.
//!
//! Ported from the teacher's BEP3 `tracker::Client`, but rewritten to speak
//! this crate's JSON tracker contract (`tracker_server`, grounded on
//! `Tracker.py`) instead of a bencoded reply — see DESIGN.md for why
//! `serde_bencode` was dropped.
use crate::error::TrackerError;
use crate::torrent::Metainfo;
use rand::Rng;
use serde::Deserialize;
use std::net::IpAddr;

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    Started,
    Stopped,
}

impl AnnounceEvent {
    fn as_str(self) -> &'static str {
        match self {
            AnnounceEvent::Started => "started",
            AnnounceEvent::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Peer {
    pub ip: IpAddr,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct AnnounceResponse {
    pub interval: u64,
    pub peers: Vec<Peer>,
}

/// A client communicating with this crate's tracker on behalf of a peer.
#[derive(Debug)]
pub struct Client {
    peer_id: [u8; 20],
    port: u16,
    http: reqwest::Client,
}

impl Client {
    pub fn new(port: u16) -> TrackerResult<Self> {
        Ok(Self {
            peer_id: generate_peer_id(),
            port,
            http: reqwest::Client::new(),
        })
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Sends `GET /announce` to the torrent's tracker.
    #[tracing::instrument(skip(self, torrent), level = "debug")]
    pub async fn announce(
        &self,
        torrent: &Metainfo,
        event: Option<AnnounceEvent>,
    ) -> TrackerResult<AnnounceResponse> {
        let mut target = url::Url::parse(torrent.tracker_url())?;
        target.set_path(&format!("{}/announce", target.path().trim_end_matches('/')));
        {
            let mut query = target.query_pairs_mut();
            query.append_pair("info_hash", &torrent.info_hash_hex());
            query.append_pair("port", &self.port.to_string());
            if let Some(event) = event {
                query.append_pair("event", event.as_str());
            }
        }

        tracing::debug!(%target, "announcing to tracker");
        let response = self.http.get(target).send().await?;
        if !response.status().is_success() {
            return Err(TrackerError::BadStatus(response.status().as_u16()));
        }
        Ok(response.json::<AnnounceResponse>().await?)
    }

    /// Uploads a `.torrent` file via `POST /announce` (multipart), the way
    /// `_upload_torrent_to_tracker` does against `Tracker.py`'s endpoint.
    #[tracing::instrument(skip(self, torrent_bytes), level = "debug")]
    pub async fn upload_torrent(
        &self,
        tracker_url: &str,
        info_hash_hex: &str,
        torrent_bytes: Vec<u8>,
        filename: String,
        name: Option<String>,
        comment: Option<String>,
    ) -> TrackerResult<AnnounceResponse> {
        let mut url = url::Url::parse(tracker_url)?;
        url.set_path(&format!("{}/announce", url.path().trim_end_matches('/')));
        url.query_pairs_mut()
            .append_pair("info_hash", info_hash_hex)
            .append_pair("port", &self.port.to_string());

        let part = reqwest::multipart::Part::bytes(torrent_bytes).file_name(filename);
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(name) = name {
            form = form.text("name", name);
        }
        if let Some(comment) = comment {
            form = form.text("comment", comment);
        }

        let response = self.http.post(url).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(TrackerError::BadStatus(response.status().as_u16()));
        }
        Ok(response.json::<AnnounceResponse>().await?)
    }

    /// Proxies `GET /torrents`, the catalog a control facade's own
    /// `/torrents` endpoint forwards verbatim.
    pub async fn list_torrents(&self, tracker_url: &str) -> TrackerResult<serde_json::Value> {
        let mut url = url::Url::parse(tracker_url)?;
        url.set_path(&format!("{}/torrents", url.path().trim_end_matches('/')));
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(TrackerError::BadStatus(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    /// Fetches a `.torrent` blob by info_hash, as `_get_torrent_by_info_hash` does.
    pub async fn fetch_torrent(
        &self,
        tracker_url: &str,
        info_hash_hex: &str,
    ) -> TrackerResult<Vec<u8>> {
        let mut url = url::Url::parse(tracker_url)?;
        url.set_path(&format!(
            "{}/torrents/{}",
            url.path().trim_end_matches('/'),
            info_hash_hex
        ));
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(TrackerError::BadStatus(response.status().as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// 20-byte peer id: an 8-byte client prefix (`-RT0001-`) followed by 11
/// random bytes, matching `generate_peer_id` in the teacher's BEP3 client.
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    let prefix = b"-RT0001-";
    peer_id[..prefix.len()].copy_from_slice(prefix);
    let mut rng = rand::rng();
    rng.fill(&mut peer_id[prefix.len()..]);
    peer_id
}

/// RFC 3986 percent-encoding, kept from the teacher's BEP3 client for the
/// multipart upload path and any future query parameter that needs it.
pub fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_peer_id_has_client_prefix() {
        let id = generate_peer_id();
        assert_eq!(&id[..8], b"-RT0001-");
        assert_eq!(id.len(), 20);
    }

    #[test]
    fn url_encode_escapes_reserved_bytes() {
        assert_eq!(url_encode(b"Hello World!"), "Hello%20World%21");
        assert_eq!(url_encode(b"abc-._~"), "abc-._~");
    }
}
