//! Peer-wire `Request`/`Piece` message framing, sitting alongside the
//! handshake in the same manual big-endian style (`peer_message.py`'s
//! `Request`/`Piece` classes, ported from Python `struct.pack`/`unpack`).
use crate::error::ProtocolError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const REQUEST_ID: u8 = 6;
const PIECE_ID: u8 = 7;

/// `<len=0013><id=6><index><begin><length>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

impl Request {
    pub fn serialize(&self) -> [u8; 17] {
        let mut buf = [0u8; 17];
        buf[0..4].copy_from_slice(&13u32.to_be_bytes());
        buf[4] = REQUEST_ID;
        buf[5..9].copy_from_slice(&self.index.to_be_bytes());
        buf[9..13].copy_from_slice(&self.begin.to_be_bytes());
        buf[13..17].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    pub async fn write(&self, stream: &mut TcpStream) -> std::io::Result<()> {
        stream.write_all(&self.serialize()).await
    }

    /// Reads a `Request` off the wire. The 4-byte length prefix has already
    /// been read by the caller (the seed loop needs it to decide whether
    /// the connection closed) and is passed in as `message_length`.
    pub async fn read_body(
        stream: &mut TcpStream,
        message_length: u32,
    ) -> Result<Request, ProtocolError> {
        if message_length != 13 {
            return Err(ProtocolError::BadFrame(format!(
                "request message length must be 13, got {message_length}"
            )));
        }
        let mut body = [0u8; 13];
        stream
            .read_exact(&mut body)
            .await
            .map_err(|e| ProtocolError::BadFrame(e.to_string()))?;
        let id = body[0];
        if id != REQUEST_ID {
            return Err(ProtocolError::UnexpectedMessageId(id));
        }
        let index = u32::from_be_bytes(body[1..5].try_into().unwrap());
        let begin = u32::from_be_bytes(body[5..9].try_into().unwrap());
        let length = u32::from_be_bytes(body[9..13].try_into().unwrap());
        Ok(Request { index, begin, length })
    }
}

/// `<len=9+block.len()><id=7><index><begin><block>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub index: u32,
    pub begin: u32,
    pub block: Vec<u8>,
}

impl Piece {
    pub fn serialize(&self) -> Vec<u8> {
        let message_length = 9 + self.block.len() as u32;
        let mut buf = Vec::with_capacity(4 + message_length as usize);
        buf.extend_from_slice(&message_length.to_be_bytes());
        buf.push(PIECE_ID);
        buf.extend_from_slice(&self.index.to_be_bytes());
        buf.extend_from_slice(&self.begin.to_be_bytes());
        buf.extend_from_slice(&self.block);
        buf
    }

    pub async fn write(&self, stream: &mut TcpStream) -> std::io::Result<()> {
        stream.write_all(&self.serialize()).await
    }

    /// Reads a `Piece` body off the wire, given the 4-byte length prefix
    /// already read by the caller.
    pub async fn read_body(
        stream: &mut TcpStream,
        message_length: u32,
    ) -> Result<Piece, ProtocolError> {
        if message_length < 9 {
            return Err(ProtocolError::BadFrame(
                "piece message shorter than its fixed header".to_string(),
            ));
        }
        let mut header = [0u8; 9];
        stream
            .read_exact(&mut header)
            .await
            .map_err(|e| ProtocolError::BadFrame(e.to_string()))?;
        let id = header[0];
        if id != PIECE_ID {
            return Err(ProtocolError::UnexpectedMessageId(id));
        }
        let index = u32::from_be_bytes(header[1..5].try_into().unwrap());
        let begin = u32::from_be_bytes(header[5..9].try_into().unwrap());
        let block_len = (message_length - 9) as usize;
        let mut block = vec![0u8; block_len];
        stream
            .read_exact(&mut block)
            .await
            .map_err(|e| ProtocolError::BadFrame(e.to_string()))?;
        Ok(Piece { index, begin, block })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_17_bytes() {
        let req = Request { index: 3, begin: 0, length: 16_384 };
        let buf = req.serialize();
        assert_eq!(buf.len(), 17);
        assert_eq!(u32::from_be_bytes(buf[0..4].try_into().unwrap()), 13);
        assert_eq!(buf[4], REQUEST_ID);
    }

    #[test]
    fn piece_serializes_with_length_prefix_including_block() {
        let piece = Piece { index: 1, begin: 0, block: vec![9u8; 100] };
        let buf = piece.serialize();
        let len = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        assert_eq!(len, 9 + 100);
        assert_eq!(buf.len(), 4 + len as usize);
        assert_eq!(buf[4], PIECE_ID);
    }
}
