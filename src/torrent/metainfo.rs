//! Torrent metainfo: parsing existing `.torrent` files and creating new ones.
//!
//! A `Metainfo` is the in-memory form of a `.torrent` file: the tracker
//! URL(s), piece layout, file layout, and the derived `info_hash` that
//! identifies the swarm.
use crate::bencode::BencodeValue;
use crate::torrent::info_hash;

use super::TorrentError;
use super::TorrentResult;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default piece size used by `create()` when the caller doesn't specify one.
pub const DEFAULT_PIECE_LENGTH: u32 = 262_144;

/// Read buffer used while streaming file contents into the rolling piece
/// buffer during `create()`. Independent of `piece_length`.
const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, PartialEq, Clone)]
pub struct Metainfo {
    pub announce: String,
    pub announce_list: Vec<Vec<String>>,
    pub creation_date: Option<i64>,
    pub comment: String,
    pub created_by: String,
    pub info: InfoDict,
    pub info_hash: [u8; 20],
    pub piece_hashes: Vec<[u8; 20]>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct InfoDict {
    pub piece_length: u32,
    pub pieces: Vec<u8>,
    pub name: String,
    pub length: Option<u64>,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FileEntry {
    pub path: Vec<String>,
    pub length: u64,
}

/// Tracker URL(s) supplied to `create()`. The common path is a single
/// announce URL with zero or more fallbacks; real BEP-12 tiering is
/// available for callers that want it.
#[derive(Debug, Clone)]
pub enum Trackers {
    Flat(Vec<String>),
    Tiered(Vec<Vec<String>>),
}

impl Trackers {
    pub fn single(url: impl Into<String>) -> Self {
        Trackers::Flat(vec![url.into()])
    }

    fn primary(&self) -> &str {
        match self {
            Trackers::Flat(urls) => urls.first().map(String::as_str).unwrap_or(""),
            Trackers::Tiered(tiers) => tiers
                .iter()
                .flatten()
                .next()
                .map(String::as_str)
                .unwrap_or(""),
        }
    }

    /// The `announce-list` this crate emits. The common flat-list path is
    /// preserved as a single tier rather than expanded into multi-tier form;
    /// callers that want real tiering pass `Trackers::Tiered` explicitly.
    fn announce_list(&self) -> Vec<Vec<String>> {
        match self {
            Trackers::Flat(urls) if urls.len() > 1 => vec![urls.clone()],
            Trackers::Flat(_) => Vec::new(),
            Trackers::Tiered(tiers) => tiers.clone(),
        }
    }
}

fn parse_pieces(pieces_bytes: &[u8]) -> TorrentResult<Vec<[u8; 20]>> {
    if pieces_bytes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesHashLength);
    }
    Ok(pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

fn parse_announce_list(value: BencodeValue) -> TorrentResult<Vec<Vec<String>>> {
    let tiers = match value {
        BencodeValue::List(tiers) => tiers,
        _ => return Err(TorrentError::InvalidFormat("announce-list not a list".into())),
    };
    tiers
        .into_iter()
        .map(|tier| match tier {
            BencodeValue::List(trackers) => trackers
                .into_iter()
                .map(|t| match t {
                    BencodeValue::String(s) => String::from_utf8(s).map_err(|e| {
                        TorrentError::InvalidFormat(format!("tracker url not utf-8: {e}"))
                    }),
                    _ => Err(TorrentError::InvalidFormat("tracker url not a string".into())),
                })
                .collect(),
            _ => Err(TorrentError::InvalidFormat("announce tier not a list".into())),
        })
        .collect()
}

fn parse_info_dict(value: &BencodeValue) -> TorrentResult<InfoDict> {
    let dict = value
        .as_dict()
        .ok_or_else(|| TorrentError::InvalidFormat("info is not a dictionary".into()))?;

    let piece_length = dict
        .get(b"piece length".as_slice())
        .and_then(BencodeValue::as_integer)
        .ok_or_else(|| TorrentError::MissingField("piece length".into()))?;
    let piece_length: u32 = piece_length
        .try_into()
        .map_err(|_| TorrentError::InvalidFormat("piece length out of range".into()))?;

    let pieces = dict
        .get(b"pieces".as_slice())
        .and_then(BencodeValue::as_bytes)
        .ok_or_else(|| TorrentError::MissingField("pieces".into()))?
        .to_vec();

    let name = dict
        .get(b"name".as_slice())
        .and_then(BencodeValue::as_bytes)
        .ok_or_else(|| TorrentError::MissingField("name".into()))
        .and_then(|s| {
            String::from_utf8(s.to_vec())
                .map_err(|e| TorrentError::InvalidFormat(format!("name not utf-8: {e}")))
        })?;

    let length = dict
        .get(b"length".as_slice())
        .and_then(BencodeValue::as_integer)
        .map(|i| i as u64);

    let files = match dict.get(b"files".as_slice()) {
        Some(BencodeValue::List(list)) => list
            .iter()
            .map(|entry| {
                let file_dict = entry
                    .as_dict()
                    .ok_or_else(|| TorrentError::InvalidFormat("file entry not a dict".into()))?;
                let length = file_dict
                    .get(b"length".as_slice())
                    .and_then(BencodeValue::as_integer)
                    .ok_or_else(|| TorrentError::MissingField("file length".into()))?
                    as u64;
                let path_list = file_dict
                    .get(b"path".as_slice())
                    .and_then(BencodeValue::as_list)
                    .ok_or_else(|| TorrentError::MissingField("file path".into()))?;
                let path = path_list
                    .iter()
                    .map(|p| {
                        p.as_bytes()
                            .ok_or_else(|| {
                                TorrentError::InvalidFormat("path component not a string".into())
                            })
                            .and_then(|s| {
                                String::from_utf8(s.to_vec()).map_err(|e| {
                                    TorrentError::InvalidFormat(format!("path not utf-8: {e}"))
                                })
                            })
                    })
                    .collect::<TorrentResult<Vec<String>>>()?;
                Ok(FileEntry { path, length })
            })
            .collect::<TorrentResult<Vec<FileEntry>>>()?,
        _ => Vec::new(),
    };

    if length.is_none() && files.is_empty() {
        return Err(TorrentError::MissingField("length or files".into()));
    }

    Ok(InfoDict {
        piece_length,
        pieces,
        name,
        length,
        files,
    })
}

impl Metainfo {
    /// Parses a `.torrent` file already read into memory.
    #[tracing::instrument(level = "debug", skip(data))]
    pub fn parse_bytes(data: &[u8]) -> TorrentResult<Metainfo> {
        let value = BencodeValue::from_bytes(data)?;
        let mut dict = value
            .as_dict()
            .cloned()
            .ok_or_else(|| TorrentError::InvalidFormat("root is not a dictionary".into()))?;

        let announce = dict
            .remove(b"announce".as_slice())
            .and_then(|v| v.as_bytes().map(|b| b.to_vec()))
            .ok_or_else(|| TorrentError::MissingField("announce".into()))
            .and_then(|s| {
                String::from_utf8(s)
                    .map_err(|e| TorrentError::InvalidFormat(format!("announce not utf-8: {e}")))
            })?;

        let info_value = dict
            .remove(b"info".as_slice())
            .ok_or_else(|| TorrentError::MissingField("info".into()))?;
        let info_dict_map = info_value
            .as_dict()
            .cloned()
            .ok_or_else(|| TorrentError::InvalidFormat("info is not a dict".into()))?;
        let info = parse_info_dict(&info_value)?;

        let announce_list = match dict.remove(b"announce-list".as_slice()) {
            Some(v) => parse_announce_list(v)?,
            None => Vec::new(),
        };

        let creation_date = match dict.remove(b"creation date".as_slice()) {
            Some(BencodeValue::Integer(ts)) => Some(ts),
            Some(_) => return Err(TorrentError::DateParseError),
            None => None,
        };

        let comment = dict
            .remove(b"comment".as_slice())
            .and_then(|v| v.as_bytes().map(|b| String::from_utf8_lossy(b).into_owned()))
            .unwrap_or_default();
        let created_by = dict
            .remove(b"created by".as_slice())
            .and_then(|v| v.as_bytes().map(|b| String::from_utf8_lossy(b).into_owned()))
            .unwrap_or_default();

        let info_hash = info_hash::calculate_info_hash(&info_dict_map)?;
        let piece_hashes = parse_pieces(&info.pieces)?;

        Ok(Metainfo {
            announce,
            announce_list,
            creation_date,
            comment,
            created_by,
            info,
            info_hash,
            piece_hashes,
        })
    }

    /// Parses a `.torrent` file from disk.
    #[tracing::instrument(level = "debug")]
    pub fn parse(path: &Path) -> TorrentResult<Metainfo> {
        let data = fs::read(path)?;
        Self::parse_bytes(&data)
    }

    pub fn piece_length(&self) -> u32 {
        self.info.piece_length
    }

    pub fn total_size(&self) -> u64 {
        if self.is_multifile() {
            self.info.files.iter().map(|f| f.length).sum()
        } else {
            self.info.length.unwrap_or(0)
        }
    }

    pub fn number_of_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    pub fn is_multifile(&self) -> bool {
        !self.info.files.is_empty()
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.info.files
    }

    pub fn filename(&self) -> &str {
        &self.info.name
    }

    pub fn tracker_url(&self) -> &str {
        &self.announce
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// The byte length of piece `index`: `piece_length` for every piece but
    /// the last, whose length is whatever remains of `total_size`.
    pub fn piece_size(&self, index: usize) -> u64 {
        if index >= self.number_of_pieces() {
            return 0;
        }
        if index < self.number_of_pieces() - 1 {
            self.piece_length() as u64
        } else {
            let total = self.total_size();
            let full = (self.number_of_pieces() - 1) as u64 * self.piece_length() as u64;
            let remainder = total - full;
            if remainder == 0 {
                self.piece_length() as u64
            } else {
                remainder
            }
        }
    }

    /// Relative file paths (under the torrent's `name` directory/file) that
    /// contain bytes of piece `index`, in declared order.
    pub fn file_paths_for_piece(&self, index: usize) -> Vec<PathBuf> {
        if index >= self.number_of_pieces() {
            return Vec::new();
        }
        let piece_start = index as u64 * self.piece_length() as u64;
        let piece_end = piece_start + self.piece_size(index);

        if !self.is_multifile() {
            return vec![PathBuf::from(&self.info.name)];
        }

        let mut cursor = 0u64;
        let mut out = Vec::new();
        for file in &self.info.files {
            let file_start = cursor;
            let file_end = file_start + file.length;
            if file_end > piece_start && file_start < piece_end {
                let mut path = PathBuf::from(&self.info.name);
                for component in &file.path {
                    path = path.join(component);
                }
                out.push(path);
            }
            cursor = file_end;
        }
        out
    }

    /// Creates a new `.torrent` metainfo for `input_path` (a file or a
    /// directory) and writes the bencoded result to `output_path`.
    #[tracing::instrument(level = "debug", skip(trackers))]
    pub fn create(
        input_path: &Path,
        trackers: Trackers,
        piece_length: u32,
        comment: &str,
        created_by: &str,
        output_path: &Path,
    ) -> TorrentResult<(Vec<u8>, PathBuf)> {
        if !piece_length.is_power_of_two() {
            return Err(TorrentError::InvalidPieceLength);
        }
        if !input_path.exists() {
            return Err(TorrentError::MissingField(format!(
                "input path does not exist: {}",
                input_path.display()
            )));
        }

        let name = input_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TorrentError::PathConversion("input path has no file name".into()))?
            .to_string();

        let (files, pieces) = if input_path.is_dir() {
            let entries = walk_directory(input_path)?;
            let sources: Vec<&Path> = entries.iter().map(|(_, abs, _)| abs.as_path()).collect();
            let pieces = hash_pieces(&sources, piece_length)?;
            let files = entries
                .into_iter()
                .map(|(rel, _, length)| FileEntry {
                    path: rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect(),
                    length,
                })
                .collect();
            (files, pieces)
        } else {
            let pieces = hash_pieces(&[input_path], piece_length)?;
            (Vec::new(), pieces)
        };

        let length = if files.is_empty() {
            Some(fs::metadata(input_path)?.len())
        } else {
            None
        };

        let info = InfoDict {
            piece_length,
            pieces: pieces.concat(),
            name,
            length,
            files,
        };

        let info_bencode = info_dict_to_bencode(&info);
        let info_dict_map = info_bencode
            .as_dict()
            .expect("info_dict_to_bencode always returns a Dict")
            .clone();
        let info_hash = info_hash::calculate_info_hash(&info_dict_map)?;

        let creation_date = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let mut root = HashMap::new();
        root.insert(
            b"announce".to_vec(),
            BencodeValue::String(trackers.primary().as_bytes().to_vec()),
        );
        let announce_list = trackers.announce_list();
        if !announce_list.is_empty() {
            root.insert(
                b"announce-list".to_vec(),
                BencodeValue::List(
                    announce_list
                        .into_iter()
                        .map(|tier| {
                            BencodeValue::List(
                                tier.into_iter()
                                    .map(|url| BencodeValue::String(url.into_bytes()))
                                    .collect(),
                            )
                        })
                        .collect(),
                ),
            );
        }
        root.insert(b"creation date".to_vec(), BencodeValue::Integer(creation_date));
        root.insert(
            b"created by".to_vec(),
            BencodeValue::String(created_by.as_bytes().to_vec()),
        );
        root.insert(
            b"comment".to_vec(),
            BencodeValue::String(comment.as_bytes().to_vec()),
        );
        root.insert(b"info".to_vec(), info_bencode);

        let bytes = BencodeValue::Dict(root).to_bytes()?;
        fs::write(output_path, &bytes)?;

        tracing::debug!(info_hash = %hex::encode(info_hash), path = %output_path.display(), "created torrent");
        Ok((bytes, output_path.to_path_buf()))
    }
}

fn info_dict_to_bencode(info: &InfoDict) -> BencodeValue {
    let mut dict = HashMap::new();
    dict.insert(
        b"piece length".to_vec(),
        BencodeValue::Integer(info.piece_length as i64),
    );
    dict.insert(b"pieces".to_vec(), BencodeValue::String(info.pieces.clone()));
    dict.insert(
        b"name".to_vec(),
        BencodeValue::String(info.name.clone().into_bytes()),
    );
    if let Some(length) = info.length {
        dict.insert(b"length".to_vec(), BencodeValue::Integer(length as i64));
    }
    if !info.files.is_empty() {
        let files = info
            .files
            .iter()
            .map(|f| {
                let mut file_dict = HashMap::new();
                file_dict.insert(b"length".to_vec(), BencodeValue::Integer(f.length as i64));
                file_dict.insert(
                    b"path".to_vec(),
                    BencodeValue::List(
                        f.path
                            .iter()
                            .map(|p| BencodeValue::String(p.clone().into_bytes()))
                            .collect(),
                    ),
                );
                BencodeValue::Dict(file_dict)
            })
            .collect();
        dict.insert(b"files".to_vec(), BencodeValue::List(files));
    }
    BencodeValue::Dict(dict)
}

/// Depth-first, sorted-by-relative-path traversal of a directory, returning
/// `(relative_path, absolute_path, length)` for every regular file. The sort
/// makes piece layout deterministic across runs and platforms.
fn walk_directory(root: &Path) -> TorrentResult<Vec<(PathBuf, PathBuf, u64)>> {
    fn recurse(base: &Path, dir: &Path, out: &mut Vec<(PathBuf, PathBuf, u64)>) -> TorrentResult<()> {
        let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if path.is_dir() {
                recurse(base, &path, out)?;
            } else {
                let relative = path.strip_prefix(base).unwrap().to_path_buf();
                let length = entry.metadata()?.len();
                out.push((relative, path, length));
            }
        }
        Ok(())
    }
    let mut out = Vec::new();
    recurse(root, root, &mut out)?;
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Streams through `files` in declared order, accumulating bytes into a
/// rolling buffer and emitting one SHA-1 digest every time `piece_length`
/// bytes are available, so piece boundaries cross file boundaries
/// transparently for multi-file torrents.
fn hash_pieces(files: &[&Path], piece_length: u32) -> TorrentResult<Vec<[u8; 20]>> {
    use sha1::Digest;

    let piece_length = piece_length as usize;
    let mut hashes = Vec::new();
    let mut buffer: Vec<u8> = Vec::with_capacity(piece_length);
    let mut chunk = vec![0u8; READ_CHUNK];

    for path in files {
        let mut file = fs::File::open(path)?;
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
            while buffer.len() >= piece_length {
                let piece: Vec<u8> = buffer.drain(..piece_length).collect();
                let mut hasher = sha1::Sha1::new();
                hasher.update(&piece);
                let digest = hasher.finalize();
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&digest);
                hashes.push(hash);
            }
        }
    }

    if !buffer.is_empty() {
        let mut hasher = sha1::Sha1::new();
        hasher.update(&buffer);
        let digest = hasher.finalize();
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest);
        hashes.push(hash);
    }

    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_and_parses_single_file_torrent() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("movie.bin");
        fs::write(&input, vec![7u8; 300_000]).unwrap();
        let output = dir.path().join("movie.bin.torrent");

        let (bytes, path) = Metainfo::create(
            &input,
            Trackers::single("http://tracker.example:6969/announce"),
            DEFAULT_PIECE_LENGTH,
            "",
            "rs-torrent-client",
            &output,
        )
        .unwrap();
        assert_eq!(path, output);

        let parsed = Metainfo::parse_bytes(&bytes).unwrap();
        assert_eq!(parsed.total_size(), 300_000);
        assert_eq!(parsed.filename(), "movie.bin");
        assert!(!parsed.is_multifile());
        assert_eq!(parsed.number_of_pieces(), 2);
        assert_eq!(parsed.piece_size(0), DEFAULT_PIECE_LENGTH as u64);
        assert_eq!(parsed.piece_size(1), 300_000 - DEFAULT_PIECE_LENGTH as u64);
    }

    #[test]
    fn creates_multifile_torrent_with_deterministic_order() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("pack");
        fs::create_dir_all(root.join("b")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("b").join("2.bin"), vec![1u8; 100]).unwrap();
        fs::write(root.join("a").join("1.bin"), vec![2u8; 50]).unwrap();
        let output = dir.path().join("pack.torrent");

        let (bytes, _) = Metainfo::create(
            &root,
            Trackers::single("http://tracker.example:6969/announce"),
            16_384,
            "",
            "rs-torrent-client",
            &output,
        )
        .unwrap();

        let parsed = Metainfo::parse_bytes(&bytes).unwrap();
        assert!(parsed.is_multifile());
        assert_eq!(parsed.total_size(), 150);
        let paths: Vec<String> = parsed
            .files()
            .iter()
            .map(|f| f.path.join("/"))
            .collect();
        assert_eq!(paths, vec!["a/1.bin", "b/2.bin"]);
    }

    #[test]
    fn rejects_non_power_of_two_piece_length() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("f.bin");
        fs::write(&input, vec![0u8; 10]).unwrap();
        let err = Metainfo::create(
            &input,
            Trackers::single("http://t"),
            300_000,
            "",
            "x",
            &dir.path().join("f.torrent"),
        )
        .unwrap_err();
        assert!(matches!(err, TorrentError::InvalidPieceLength));
    }
}
