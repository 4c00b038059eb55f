use super::BencodeError;
use super::BencodeResult;
use super::BencodeValue;
use std::collections::HashMap;
use std::io::Write;
use tracing::instrument;

#[instrument(skip(writer, s), level = "trace")]
fn encode_string<W: Write>(writer: &mut W, s: &[u8]) -> BencodeResult<()> {
    write!(writer, "{}:", s.len())?;
    writer.write_all(s)?;
    Ok(())
}

#[instrument(skip(writer), level = "trace")]
fn encode_integer<W: Write>(writer: &mut W, i: i64) -> BencodeResult<()> {
    write!(writer, "i{}e", i)?;
    Ok(())
}

#[instrument(skip(writer, list), level = "trace")]
fn encode_list<W: Write>(writer: &mut W, list: &[BencodeValue]) -> BencodeResult<()> {
    writer.write_all(b"l")?;
    for item in list {
        encode_value(writer, item)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

/// Encodes a dictionary, always emitting keys in byte-lexicographic order so
/// the output is deterministic across runs (required for stable info-hashes).
#[instrument(skip(writer, dict), level = "trace")]
fn encode_dict<W: Write>(writer: &mut W, dict: &HashMap<Vec<u8>, BencodeValue>) -> BencodeResult<()> {
    writer.write_all(b"d")?;
    let mut keys: Vec<&Vec<u8>> = dict.keys().collect();
    keys.sort_unstable();
    for key in keys {
        encode_string(writer, key)?;
        let value = dict
            .get(key)
            .ok_or_else(|| BencodeError::InvalidFormat("Missing dict value for key".to_string()))?;
        encode_value(writer, value)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

#[instrument(skip(writer), level = "trace")]
fn encode_value<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    match value {
        BencodeValue::String(s) => encode_string(writer, s),
        BencodeValue::Integer(i) => encode_integer(writer, *i),
        BencodeValue::List(list) => encode_list(writer, list),
        BencodeValue::Dict(dict) => encode_dict(writer, dict),
    }
}

#[instrument(skip(writer), level = "debug")]
pub fn encode<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    encode_value(writer, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decoder;

    fn dict(pairs: &[(&[u8], BencodeValue)]) -> BencodeValue {
        let mut map = HashMap::new();
        for (k, v) in pairs {
            map.insert(k.to_vec(), v.clone());
        }
        BencodeValue::Dict(map)
    }

    #[test]
    fn encodes_string() {
        let mut buf = Vec::new();
        encode(&mut buf, &BencodeValue::String(b"hello".to_vec())).unwrap();
        assert_eq!(buf, b"5:hello");
    }

    #[test]
    fn encodes_integer() {
        let mut buf = Vec::new();
        encode(&mut buf, &BencodeValue::Integer(42)).unwrap();
        assert_eq!(buf, b"i42e");

        let mut buf = Vec::new();
        encode(&mut buf, &BencodeValue::Integer(-7)).unwrap();
        assert_eq!(buf, b"i-7e");
    }

    #[test]
    fn encodes_list() {
        let mut buf = Vec::new();
        let list = BencodeValue::List(vec![
            BencodeValue::Integer(42),
            BencodeValue::Integer(-1),
        ]);
        encode(&mut buf, &list).unwrap();
        assert_eq!(buf, b"li42ei-1ee");
    }

    #[test]
    fn encodes_dict_with_sorted_keys() {
        let value = dict(&[
            (b"zebra", BencodeValue::Integer(1)),
            (b"apple", BencodeValue::Integer(2)),
        ]);
        let mut buf = Vec::new();
        encode(&mut buf, &value).unwrap();
        assert_eq!(buf, b"d5:applei2e5:zebrai1ee");
    }

    #[test]
    fn round_trips_through_decoder() {
        let value = dict(&[
            (b"name", BencodeValue::String(b"a.txt".to_vec())),
            (
                b"files",
                BencodeValue::List(vec![BencodeValue::Integer(1), BencodeValue::Integer(2)]),
            ),
        ]);
        let bytes = value.to_bytes().unwrap();
        let decoded = decoder::decode(&bytes).unwrap();
        assert_eq!(decoded, value);
        // a conforming encoder's output re-encodes byte-for-byte
        assert_eq!(decoded.to_bytes().unwrap(), bytes);
    }
}
