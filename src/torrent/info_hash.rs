use crate::bencode::BencodeValue;
use crate::torrent::TorrentResult;
use sha1::Digest;
use sha1::Sha1;
use std::collections::HashMap;

/// Calculates the SHA-1 hash of a bencode-encoded info dictionary.
///
/// This is the swarm identity key: it must be bit-exactly reproducible from
/// the same `info` dictionary bytes on any implementation, which is why the
/// encoder always emits dictionary keys in sorted order.
pub fn calculate_info_hash(info_dict: &HashMap<Vec<u8>, BencodeValue>) -> TorrentResult<[u8; 20]> {
    let buffer = BencodeValue::Dict(info_dict.clone()).to_bytes()?;

    let mut hasher = Sha1::new();
    hasher.update(&buffer);
    let result = hasher.finalize();

    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&result[..]);
    Ok(info_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_across_calls() {
        let mut dict = HashMap::new();
        dict.insert(b"name".to_vec(), BencodeValue::String(b"a.bin".to_vec()));
        dict.insert(b"piece length".to_vec(), BencodeValue::Integer(262144));
        dict.insert(b"length".to_vec(), BencodeValue::Integer(600000));
        dict.insert(b"pieces".to_vec(), BencodeValue::String(vec![0u8; 60]));

        let a = calculate_info_hash(&dict).unwrap();
        let b = calculate_info_hash(&dict).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }
}
