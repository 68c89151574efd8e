//! Recursive-length-prefix encoding and decoding.
//!
//! The trie hashes RLP structures and persists RLP node records, so both
//! directions are needed: an append-only encoder for building payloads and a
//! splitting decoder that carves items off the front of a buffer.

use thiserror::Error;

/// RLP decode errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RlpError {
    #[error("rlp: input truncated")]
    Truncated,
    #[error("rlp: expected a string item")]
    ExpectedString,
    #[error("rlp: expected a list item")]
    ExpectedList,
    #[error("rlp: length of length exceeds 8 bytes")]
    OversizedLength,
}

/// RLP encoder building into an internal buffer.
#[derive(Clone, Debug, Default)]
pub struct RlpEncoder {
    buffer: Vec<u8>,
}

impl RlpEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the encoder, yielding the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Clears the buffer for reuse.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Encodes a byte slice as an RLP string.
    pub fn encode_bytes(&mut self, bytes: &[u8]) {
        if bytes.len() == 1 && bytes[0] < 0x80 {
            self.buffer.push(bytes[0]);
        } else if bytes.len() < 56 {
            self.buffer.push(0x80 + bytes.len() as u8);
            self.buffer.extend_from_slice(bytes);
        } else {
            let len = be_bytes(bytes.len() as u64);
            self.buffer.push(0xb7 + len.len() as u8);
            self.buffer.extend_from_slice(&len);
            self.buffer.extend_from_slice(bytes);
        }
    }

    /// Encodes the empty string.
    pub fn encode_empty(&mut self) {
        self.buffer.push(0x80);
    }

    /// Encodes an unsigned integer as its minimal big-endian string.
    pub fn encode_uint(&mut self, value: u64) {
        if value == 0 {
            self.buffer.push(0x80);
        } else if value < 0x80 {
            self.buffer.push(value as u8);
        } else {
            let bytes = be_bytes(value);
            self.encode_bytes(&bytes);
        }
    }

    /// Appends pre-encoded RLP verbatim.
    pub fn encode_raw(&mut self, rlp: &[u8]) {
        self.buffer.extend_from_slice(rlp);
    }

    /// Encodes a list whose items are produced by the closure.
    pub fn encode_list<F>(&mut self, items: F)
    where
        F: FnOnce(&mut Self),
    {
        let mark = self.buffer.len();
        self.buffer.push(0);
        items(self);
        self.seal_list(mark);
    }

    fn seal_list(&mut self, mark: usize) {
        let payload_len = self.buffer.len() - mark - 1;
        if payload_len < 56 {
            self.buffer[mark] = 0xc0 + payload_len as u8;
            return;
        }
        let len = be_bytes(payload_len as u64);
        let shift = len.len();
        let end = self.buffer.len();
        self.buffer.resize(end + shift, 0);
        self.buffer.copy_within(mark + 1..end, mark + 1 + shift);
        self.buffer[mark] = 0xf7 + shift as u8;
        self.buffer[mark + 1..mark + 1 + shift].copy_from_slice(&len);
    }
}

fn be_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip.min(7)..].to_vec()
}

/// The kind of an RLP item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    String,
    List,
}

/// Splits the first RLP item off `buf`, returning its kind, its payload, and
/// the unconsumed remainder.
pub fn split(buf: &[u8]) -> Result<(Kind, &[u8], &[u8]), RlpError> {
    let first = *buf.first().ok_or(RlpError::Truncated)?;
    let (kind, header_len, payload_len) = match first {
        0x00..=0x7f => return Ok((Kind::String, &buf[..1], &buf[1..])),
        0x80..=0xb7 => (Kind::String, 1, (first - 0x80) as usize),
        0xb8..=0xbf => {
            let len_len = (first - 0xb7) as usize;
            (Kind::String, 1 + len_len, read_length(buf, len_len)?)
        }
        0xc0..=0xf7 => (Kind::List, 1, (first - 0xc0) as usize),
        0xf8..=0xff => {
            let len_len = (first - 0xf7) as usize;
            (Kind::List, 1 + len_len, read_length(buf, len_len)?)
        }
    };
    let total = header_len + payload_len;
    if buf.len() < total {
        return Err(RlpError::Truncated);
    }
    Ok((kind, &buf[header_len..total], &buf[total..]))
}

fn read_length(buf: &[u8], len_len: usize) -> Result<usize, RlpError> {
    if len_len > 8 {
        return Err(RlpError::OversizedLength);
    }
    if buf.len() < 1 + len_len {
        return Err(RlpError::Truncated);
    }
    let mut value = 0usize;
    for byte in &buf[1..1 + len_len] {
        value = (value << 8) | *byte as usize;
    }
    Ok(value)
}

/// Splits the first item, requiring it to be a string.
pub fn split_string(buf: &[u8]) -> Result<(&[u8], &[u8]), RlpError> {
    match split(buf)? {
        (Kind::String, payload, rest) => Ok((payload, rest)),
        _ => Err(RlpError::ExpectedString),
    }
}

/// Splits the first item, requiring it to be a list.
pub fn split_list(buf: &[u8]) -> Result<(&[u8], &[u8]), RlpError> {
    match split(buf)? {
        (Kind::List, payload, rest) => Ok((payload, rest)),
        _ => Err(RlpError::ExpectedList),
    }
}

/// Counts the items in a list payload.
pub fn count_items(mut payload: &[u8]) -> Result<usize, RlpError> {
    let mut count = 0;
    while !payload.is_empty() {
        let (_, _, rest) = split(payload)?;
        payload = rest;
        count += 1;
    }
    Ok(count)
}

/// Interprets a string payload as a big-endian unsigned integer.
pub fn decode_uint(payload: &[u8]) -> Result<u64, RlpError> {
    if payload.len() > 8 {
        return Err(RlpError::OversizedLength);
    }
    let mut value = 0u64;
    for byte in payload {
        value = (value << 8) | *byte as u64;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_empty() {
        let mut enc = RlpEncoder::new();
        enc.encode_empty();
        assert_eq!(enc.as_bytes(), &[0x80]);
    }

    #[test]
    fn test_encode_short_string() {
        let mut enc = RlpEncoder::new();
        enc.encode_bytes(b"dog");
        assert_eq!(enc.as_bytes(), &[0x83, b'd', b'o', b'g']);
    }

    #[test]
    fn test_encode_single_byte() {
        let mut enc = RlpEncoder::new();
        enc.encode_bytes(&[0x7f]);
        assert_eq!(enc.as_bytes(), &[0x7f]);

        enc.clear();
        enc.encode_bytes(&[0x80]);
        assert_eq!(enc.as_bytes(), &[0x81, 0x80]);
    }

    #[test]
    fn test_encode_long_string() {
        let mut enc = RlpEncoder::new();
        let payload = [0xaa; 60];
        enc.encode_bytes(&payload);
        assert_eq!(enc.as_bytes()[0], 0xb8);
        assert_eq!(enc.as_bytes()[1], 60);
        assert_eq!(&enc.as_bytes()[2..], &payload);
    }

    #[test]
    fn test_encode_short_list() {
        let mut enc = RlpEncoder::new();
        enc.encode_list(|e| {
            e.encode_bytes(b"cat");
            e.encode_bytes(b"dog");
        });
        assert_eq!(
            enc.as_bytes(),
            &[0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );
    }

    #[test]
    fn test_encode_long_list() {
        let mut enc = RlpEncoder::new();
        enc.encode_list(|e| {
            for _ in 0..20 {
                e.encode_bytes(b"ab");
            }
        });
        assert_eq!(enc.as_bytes()[0], 0xf8);
        assert_eq!(enc.as_bytes()[1], 60);
    }

    #[test]
    fn test_encode_uint() {
        let mut enc = RlpEncoder::new();
        enc.encode_uint(0);
        assert_eq!(enc.as_bytes(), &[0x80]);

        enc.clear();
        enc.encode_uint(127);
        assert_eq!(enc.as_bytes(), &[127]);

        enc.clear();
        enc.encode_uint(256);
        assert_eq!(enc.as_bytes(), &[0x82, 0x01, 0x00]);
    }

    #[test]
    fn test_split_string() {
        let (payload, rest) = split_string(&[0x83, b'd', b'o', b'g', 0x01]).unwrap();
        assert_eq!(payload, b"dog");
        assert_eq!(rest, &[0x01]);
    }

    #[test]
    fn test_split_single_byte() {
        let (kind, payload, rest) = split(&[0x05, 0xff]).unwrap();
        assert_eq!(kind, Kind::String);
        assert_eq!(payload, &[0x05]);
        assert_eq!(rest, &[0xff]);
    }

    #[test]
    fn test_split_list_and_count() {
        let mut enc = RlpEncoder::new();
        enc.encode_list(|e| {
            e.encode_bytes(b"cat");
            e.encode_bytes(b"dog");
            e.encode_uint(7);
        });
        let (payload, rest) = split_list(enc.as_bytes()).unwrap();
        assert!(rest.is_empty());
        assert_eq!(count_items(payload).unwrap(), 3);
    }

    #[test]
    fn test_split_truncated() {
        assert_eq!(split(&[0x83, b'd']), Err(RlpError::Truncated));
        assert_eq!(split(&[]), Err(RlpError::Truncated));
    }

    #[test]
    fn test_decode_uint_round_trip() {
        for value in [0u64, 1, 127, 128, 255, 256, 0xdead_beef, u64::MAX] {
            let mut enc = RlpEncoder::new();
            enc.encode_uint(value);
            let (payload, _) = split_string(enc.as_bytes()).unwrap();
            assert_eq!(decode_uint(payload).unwrap(), value);
        }
    }
}
