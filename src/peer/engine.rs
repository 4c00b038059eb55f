//! Seed server loop, leech client loop, and swarm re-announce, ported from
//! `peer.py`'s `_handle_uploader`, `_download_from_peer`, `_download`, and
//! `start_seeding`.
use super::handshake::Handshake;
use super::message::{Piece, Request};
use super::{PeerState, SeedEntry};
use crate::piece::PieceManager;
use crate::torrent::Metainfo;
use crate::tracker_client::{AnnounceEvent, Client as TrackerClient};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const MAX_REQUESTS_PER_CONNECTION: u32 = 300;
const SEED_READ_TIMEOUT: Duration = Duration::from_secs(12);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(12);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(12);
const LENGTH_PREFIX_TIMEOUT: Duration = Duration::from_secs(20);
const PIECE_BODY_TIMEOUT: Duration = Duration::from_secs(24);

/// Owns the seed listener task and every outbound leech connection task, so
/// a shutdown can cancel all of them instead of leaving detached
/// fire-and-forget tasks running.
pub struct PeerEngine {
    pub state: Arc<PeerState>,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
    connection_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerEngine {
    pub fn new(state: Arc<PeerState>) -> Arc<Self> {
        Arc::new(Self {
            state,
            listener_handle: Mutex::new(None),
            connection_handles: Mutex::new(Vec::new()),
        })
    }

    /// Binds the peer-wire TCP listener and spawns the accept loop. Returns
    /// once bound; the loop itself runs in the background.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn start_seeding(self: &Arc<Self>) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", self.state.port)).await?;
        let local_addr = listener.local_addr()?;
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let (stream, addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "seed listener accept failed");
                        continue;
                    }
                };
                let engine = Arc::clone(&engine);
                let conn_handle = tokio::spawn(async move {
                    if let Err(e) = engine.handle_uploader(stream, addr).await {
                        tracing::debug!(%addr, error = %e, "seed connection ended");
                    }
                });
                engine.connection_handles.lock().await.push(conn_handle);
            }
        });
        *self.listener_handle.lock().await = Some(handle);
        tracing::info!(%local_addr, "peer listening for incoming connections");
        Ok(local_addr)
    }

    async fn handle_uploader(&self, mut stream: TcpStream, addr: SocketAddr) -> anyhow::Result<()> {
        let known_hashes: Vec<[u8; 20]> = {
            let seeding = self.state.seeding.lock().await;
            seeding.keys().copied().collect()
        };
        let their_handshake = Handshake::accept(&mut stream, self.state.peer_id, &known_hashes).await?;
        let entry = {
            let seeding = self.state.seeding.lock().await;
            seeding
                .get(&their_handshake.info_hash)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("torrent no longer seeded"))?
        };

        for _ in 0..MAX_REQUESTS_PER_CONNECTION {
            let mut len_buf = [0u8; 4];
            match timeout(SEED_READ_TIMEOUT, stream.read_exact(&mut len_buf)).await {
                Ok(Ok(_)) => {}
                _ => break,
            }
            let message_length = u32::from_be_bytes(len_buf);
            if message_length == 0 {
                break;
            }
            let request = Request::read_body(&mut stream, message_length).await?;
            let block = read_seed_block(&entry, request.index, request.begin, request.length).await?;
            let piece = Piece {
                index: request.index,
                begin: request.begin,
                block,
            };
            piece.write(&mut stream).await?;
            tracing::trace!(%addr, index = request.index, "sent piece");
        }
        Ok(())
    }

    /// Connects to every tracker-supplied peer not already active for this
    /// download and spawns a task per connection to pull pieces. Re-polls
    /// the tracker every `poll_interval` while the piece manager remains
    /// incomplete, giving up after `max_empty_retries` tracker responses
    /// with zero peers. `torrent_filepath` is the on-disk `.torrent` this
    /// download was started from; on completion it's carried into the new
    /// `SeedEntry` so the finished download can be re-announced as seeded.
    #[tracing::instrument(level = "debug", skip(self, manager, tracker))]
    pub async fn run_leech(
        self: &Arc<Self>,
        manager: Arc<PieceManager>,
        torrent: Metainfo,
        torrent_filepath: std::path::PathBuf,
        tracker: Arc<TrackerClient>,
        poll_interval: Duration,
        max_empty_retries: u32,
    ) {
        let mut active: std::collections::HashSet<SocketAddr> = std::collections::HashSet::new();
        let mut empty_retries = 0u32;

        if let Err(e) = tracker.announce(&torrent, Some(AnnounceEvent::Started)).await {
            tracing::warn!(error = %e, "initial announce failed");
        }

        while !manager.completed().await && empty_retries < max_empty_retries {
            let response = match tracker.announce(&torrent, None).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "announce failed while leeching");
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
            };
            if response.peers.is_empty() {
                empty_retries += 1;
                tokio::time::sleep(poll_interval).await;
                continue;
            }
            empty_retries = 0;

            for peer in response.peers {
                let addr = SocketAddr::new(peer.ip, peer.port);
                if active.contains(&addr) {
                    continue;
                }
                active.insert(addr);
                let manager = Arc::clone(&manager);
                let info_hash = torrent.info_hash;
                let our_peer_id = self.state.peer_id;
                let handle = tokio::spawn(async move {
                    if let Err(e) = download_from_peer(manager, addr, info_hash, our_peer_id).await {
                        tracing::debug!(%addr, error = %e, "leech connection ended");
                    }
                });
                self.connection_handles.lock().await.push(handle);
            }
            tokio::time::sleep(poll_interval).await;
        }

        if manager.completed().await {
            tracing::info!(info_hash = %torrent.info_hash_hex(), "download complete");
            self.seed_after_downloading(manager, torrent, torrent_filepath, &tracker)
                .await;
        } else {
            tracing::warn!(info_hash = %torrent.info_hash_hex(), "giving up: no peers after retries exhausted");
        }
    }

    /// Moves a finished download from `leeching` into `seeding` and
    /// re-announces `started` as a seeder, matching `_seed_after_downloading`.
    async fn seed_after_downloading(
        &self,
        manager: Arc<PieceManager>,
        torrent: Metainfo,
        torrent_filepath: std::path::PathBuf,
        tracker: &TrackerClient,
    ) {
        let info_hash = torrent.info_hash;
        self.state.leeching.lock().await.remove(&info_hash);
        self.state.seeding.lock().await.insert(
            info_hash,
            SeedEntry {
                torrent: torrent.clone(),
                torrent_filepath,
                data_path: manager.output_path().to_path_buf(),
            },
        );
        if let Err(e) = tracker.announce(&torrent, Some(AnnounceEvent::Started)).await {
            tracing::warn!(error = %e, info_hash = %torrent.info_hash_hex(), "failed to announce as seeder after download");
        }
    }

    /// Sends `stopped` for every torrent this peer is seeding, then aborts
    /// the listener and every outstanding connection task. Fixes the
    /// original's `for stat in self.seeding_torrents.values` bug (a missing
    /// method call that iterated a bound method object instead of the
    /// dict's values) by actually calling `.values()`.
    #[tracing::instrument(level = "debug", skip(self, tracker))]
    pub async fn shutdown(&self, tracker: &TrackerClient) {
        let seeding = self.state.seeding.lock().await;
        for entry in seeding.values() {
            if let Err(e) = tracker
                .announce(&entry.torrent, Some(AnnounceEvent::Stopped))
                .await
            {
                tracing::warn!(error = %e, info_hash = %entry.torrent.info_hash_hex(), "failed to send stopped event");
            }
        }
        drop(seeding);

        if let Some(handle) = self.listener_handle.lock().await.take() {
            handle.abort();
        }
        for handle in self.connection_handles.lock().await.drain(..) {
            handle.abort();
        }
    }
}

/// Reads the requested block from whatever file(s) back a seeded torrent,
/// walking file boundaries for multi-file torrents exactly as
/// `_get_piece_for_seeding` does.
async fn read_seed_block(
    entry: &SeedEntry,
    index: u32,
    begin: u32,
    length: u32,
) -> anyhow::Result<Vec<u8>> {
    let entry = entry.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
        let piece_length = entry.torrent.piece_length() as u64;
        let offset = index as u64 * piece_length + begin as u64;

        if !entry.torrent.is_multifile() {
            let mut file = OpenOptions::new().read(true).open(&entry.data_path)?;
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; length as usize];
            file.read_exact(&mut buf)?;
            return Ok(buf);
        }

        let mut block = Vec::with_capacity(length as usize);
        let mut remaining_offset = offset;
        let mut remaining_len = length as usize;
        let mut cursor = 0u64;
        for file_entry in entry.torrent.files() {
            let file_start = cursor;
            let file_end = cursor + file_entry.length;
            cursor = file_end;
            if remaining_offset >= file_end {
                continue;
            }
            let mut path = entry.data_path.clone();
            for component in &file_entry.path {
                path = path.join(component);
            }
            let read_start = remaining_offset - file_start;
            let available = file_end - remaining_offset;
            let to_read = (available as usize).min(remaining_len);

            let mut file = OpenOptions::new().read(true).open(&path)?;
            file.seek(SeekFrom::Start(read_start))?;
            let mut chunk = vec![0u8; to_read];
            file.read_exact(&mut chunk)?;
            block.extend_from_slice(&chunk);

            remaining_len -= to_read;
            remaining_offset += to_read as u64;
            if remaining_len == 0 {
                break;
            }
        }
        Ok(block)
    })
    .await?
}

/// Connects to one peer, performs the client side of the handshake, then
/// loops requesting pieces until the manager is complete or the peer
/// closes the connection — ported from `_download_from_peer`.
async fn download_from_peer(
    manager: Arc<PieceManager>,
    addr: SocketAddr,
    info_hash: [u8; 20],
    our_peer_id: [u8; 20],
) -> anyhow::Result<()> {
    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await??;

    let ours = Handshake::new(info_hash, our_peer_id);
    use tokio::io::AsyncWriteExt;
    stream.write_all(&ours.serialize()).await?;

    let theirs = timeout(HANDSHAKE_TIMEOUT, Handshake::read(&mut stream)).await??;
    theirs.validate(info_hash)?;

    while !manager.completed().await {
        let Some(request) = manager.next_request().await else {
            break;
        };
        let wire_request = Request {
            index: request.index,
            begin: request.begin,
            length: request.length,
        };
        wire_request.write(&mut stream).await?;

        let mut len_buf = [0u8; 4];
        timeout(LENGTH_PREFIX_TIMEOUT, stream.read_exact(&mut len_buf)).await??;
        let message_length = u32::from_be_bytes(len_buf);
        let piece = timeout(
            PIECE_BODY_TIMEOUT,
            Piece::read_body(&mut stream, message_length),
        )
        .await??;
        manager.on_piece(piece.index, piece.block).await?;
    }
    Ok(())
}
