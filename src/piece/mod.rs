//! Piece tracking, request selection, hash verification, and disk
//! write-back for an in-progress download.
//!
//! Ported from `peer_download.py`'s `PieceManage`: a mutex-guarded status
//! vector drives `next_request`/`on_piece`, and completed pieces are
//! written straight through to the output file(s) on disk.
use crate::error::PieceError;
use crate::torrent::Metainfo;
use sha1::Digest;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceStatus {
    Missing,
    Pending,
    Completed,
}

/// A single outstanding block request: piece index, offset within the
/// piece, and requested length. This crate only ever requests whole
/// pieces in one block (no partial/range requests, per the Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceRequest {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

struct FileSpan {
    /// Absolute path on disk.
    path: PathBuf,
    /// Byte offset range `[start, end)` within the logical concatenation of
    /// all files, matching the declared order in the metainfo.
    start: u64,
    end: u64,
}

pub struct PieceManager {
    info_hash: [u8; 20],
    piece_length: u32,
    total_size: u64,
    number_of_pieces: usize,
    piece_hashes: Vec<[u8; 20]>,
    status: Arc<Mutex<Vec<PieceStatus>>>,
    files: Vec<FileSpan>,
    output_path: PathBuf,
}

impl PieceManager {
    /// Pre-creates (truncating) the output file, or the full directory tree
    /// for a multi-file torrent, under `output_dir`. Disambiguates an
    /// existing path the same way the Python reference's
    /// `get_unique_filename` does: `name(1).ext`, `name(2).ext`, ...
    /// inserted before the extension, never `name_1.ext`.
    #[tracing::instrument(level = "debug", skip(torrent))]
    pub fn new(torrent: &Metainfo, output_dir: &Path) -> Result<Self, PieceError> {
        let output_path = unique_path(&output_dir.join(torrent.filename()));

        let mut files = Vec::new();
        if torrent.is_multifile() {
            std::fs::create_dir_all(&output_path)?;
            let mut cursor = 0u64;
            for file in torrent.files() {
                let mut path = output_path.clone();
                for component in &file.path {
                    path = path.join(component);
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let f = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)?;
                f.set_len(file.length)?;
                files.push(FileSpan {
                    path,
                    start: cursor,
                    end: cursor + file.length,
                });
                cursor += file.length;
            }
        } else {
            let f = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&output_path)?;
            f.set_len(torrent.total_size())?;
            files.push(FileSpan {
                path: output_path.clone(),
                start: 0,
                end: torrent.total_size(),
            });
        }

        Ok(Self {
            info_hash: torrent.info_hash,
            piece_length: torrent.piece_length(),
            total_size: torrent.total_size(),
            number_of_pieces: torrent.number_of_pieces(),
            piece_hashes: torrent.piece_hashes.clone(),
            status: Arc::new(Mutex::new(vec![
                PieceStatus::Missing;
                torrent.number_of_pieces()
            ])),
            files,
            output_path,
        })
    }

    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn piece_size(&self, index: u32) -> u32 {
        let index = index as usize;
        if index < self.number_of_pieces - 1 {
            self.piece_length
        } else {
            let full = (self.number_of_pieces - 1) as u64 * self.piece_length as u64;
            (self.total_size - full) as u32
        }
    }

    /// Picks the next piece to request: first any `Missing` piece, then
    /// falls back to a `Pending` one (matching `get_request_message`'s
    /// two-pass scan), marking it `Pending` as a side effect. Returns
    /// `None` once every piece is `Completed`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn next_request(&self) -> Option<PieceRequest> {
        let mut status = self.status.lock().await;
        for want in [PieceStatus::Missing, PieceStatus::Pending] {
            if let Some(index) = status.iter().position(|s| *s == want) {
                status[index] = PieceStatus::Pending;
                return Some(PieceRequest {
                    index: index as u32,
                    begin: 0,
                    length: self.piece_size(index as u32),
                });
            }
        }
        None
    }

    /// Whether every piece has been written and hash-verified.
    pub async fn completed(&self) -> bool {
        self.status
            .lock()
            .await
            .iter()
            .all(|s| *s == PieceStatus::Completed)
    }

    pub async fn fraction_complete(&self) -> f64 {
        let status = self.status.lock().await;
        if status.is_empty() {
            return 1.0;
        }
        let done = status.iter().filter(|s| **s == PieceStatus::Completed).count();
        done as f64 / status.len() as f64
    }

    /// Verifies `data`'s SHA-1 against the expected piece hash, writes it to
    /// disk (walking file boundaries for multi-file torrents), and marks
    /// the piece `Completed`. A piece already `Completed` is silently
    /// ignored, matching the reference's idempotent re-receive handling.
    #[tracing::instrument(level = "debug", skip(self, data))]
    pub async fn on_piece(&self, index: u32, data: Vec<u8>) -> Result<(), PieceError> {
        if index as usize >= self.number_of_pieces {
            return Err(PieceError::IndexOutOfRange(index));
        }
        {
            let status = self.status.lock().await;
            if status[index as usize] == PieceStatus::Completed {
                return Ok(());
            }
        }

        let expected = self.piece_hashes[index as usize];
        let mut hasher = sha1::Sha1::new();
        hasher.update(&data);
        let actual: [u8; 20] = hasher.finalize().into();
        if actual != expected {
            self.status.lock().await[index as usize] = PieceStatus::Missing;
            return Err(PieceError::HashMismatch(index));
        }

        let piece_length = self.piece_length as u64;
        let piece_start = index as u64 * piece_length;
        let piece_end = piece_start + data.len() as u64;
        let spans: Vec<(PathBuf, u64, u64, u64)> = self
            .files
            .iter()
            .filter(|f| f.end > piece_start && f.start < piece_end)
            .map(|f| (f.path.clone(), f.start, f.end, 0))
            .collect();

        let write_result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            for (path, file_start, file_end, _) in spans {
                let overlap_start = piece_start.max(file_start);
                let overlap_end = piece_end.min(file_end);
                let src_offset = (overlap_start - piece_start) as usize;
                let src_len = (overlap_end - overlap_start) as usize;
                let mut file = OpenOptions::new().write(true).open(&path)?;
                file.seek(SeekFrom::Start(overlap_start - file_start))?;
                file.write_all(&data[src_offset..src_offset + src_len])?;
            }
            Ok(())
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        write_result?;

        let mut status = self.status.lock().await;
        status[index as usize] = PieceStatus::Completed;
        Ok(())
    }
}

/// Inserts `(N)` before the file extension on collision, matching
/// `peer_config.get_unique_filename`.
pub(crate) fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|s| s.to_str());
    let mut counter = 1u32;
    loop {
        let candidate_name = match ext {
            Some(ext) => format!("{stem}({counter}).{ext}"),
            None => format!("{stem}({counter})"),
        };
        let candidate = parent.join(candidate_name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::metainfo::{Metainfo as M, Trackers};
    use std::fs;
    use tempfile::tempdir;

    fn build_single_file_torrent(dir: &Path, content: &[u8], piece_length: u32) -> M {
        let input = dir.join("payload.bin");
        fs::write(&input, content).unwrap();
        let out = dir.join("payload.bin.torrent");
        let (bytes, _) = M::create(
            &input,
            Trackers::single("http://t"),
            piece_length,
            "",
            "x",
            &out,
        )
        .unwrap();
        M::parse_bytes(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unique_path_disambiguates_with_parenthesized_counter() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("movie.mp4");
        fs::write(&base, b"x").unwrap();
        let next = unique_path(&base);
        assert_eq!(next, dir.path().join("movie(1).mp4"));
        fs::write(&next, b"x").unwrap();
        let next2 = unique_path(&base);
        assert_eq!(next2, dir.path().join("movie(2).mp4"));
    }

    #[tokio::test]
    async fn completes_a_single_file_download_piece_by_piece() {
        let src_dir = tempdir().unwrap();
        let content: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        let torrent = build_single_file_torrent(src_dir.path(), &content, 65_536);

        let out_dir = tempdir().unwrap();
        let manager = PieceManager::new(&torrent, out_dir.path()).unwrap();

        while let Some(req) = manager.next_request().await {
            let start = (req.index * 65_536) as usize;
            let end = start + req.length as usize;
            manager.on_piece(req.index, content[start..end].to_vec()).await.unwrap();
        }

        assert!(manager.completed().await);
        let written = fs::read(manager.output_path()).unwrap();
        assert_eq!(written, content);
    }

    #[tokio::test]
    async fn rejects_a_piece_that_fails_hash_verification() {
        let src_dir = tempdir().unwrap();
        let content = vec![1u8; 50_000];
        let torrent = build_single_file_torrent(src_dir.path(), &content, 16_384);
        let out_dir = tempdir().unwrap();
        let manager = PieceManager::new(&torrent, out_dir.path()).unwrap();

        let req = manager.next_request().await.unwrap();
        let bad_data = vec![0u8; req.length as usize];
        let err = manager.on_piece(req.index, bad_data).await.unwrap_err();
        assert!(matches!(err, PieceError::HashMismatch(_)));

        let status = manager.status.lock().await;
        assert_eq!(status[req.index as usize], PieceStatus::Missing);
    }
}
