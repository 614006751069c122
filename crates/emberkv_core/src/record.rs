//! Log record codec.
//!
//! Every entry in a segment is one record with the wire layout
//! (little-endian numerics):
//!
//! ```text
//! | crc32 (4) | kind (1) | key_len (varint) | value_len (varint) | key | value |
//! ```
//!
//! The CRC covers every encoded byte after the CRC field itself. The
//! two length fields are unsigned LEB128 varints of at most 5 bytes
//! each, so a header never exceeds [`MAX_HEADER_SIZE`] bytes; callers
//! read at most that many bytes speculatively to discover the true
//! header length.
//!
//! Keys written to disk carry a varint transaction sequence number
//! prefix; sequence 0 ([`NON_TXN_SEQ_NO`]) marks a record outside any
//! batch. The prefix is stripped before keys reach callers or the
//! index.

use crate::error::{EngineError, EngineResult};

/// Sequence number marking a record that is not part of a batch.
pub const NON_TXN_SEQ_NO: u64 = 0;

/// Fixed header bytes: crc (4) + kind (1).
const FIXED_HEADER_SIZE: usize = 5;

/// Maximum encoded header size: fixed bytes plus two 32-bit varints.
pub const MAX_HEADER_SIZE: usize = FIXED_HEADER_SIZE + 2 * MAX_VARINT32_SIZE;

/// Maximum bytes an LEB128-encoded u32 occupies.
const MAX_VARINT32_SIZE: usize = 5;

/// What a record means to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// A live key-value pair.
    Normal = 1,
    /// The key is logically deleted.
    Tombstone = 2,
    /// Commit marker sealing a write batch's sequence number.
    TxnCommit = 3,
}

impl RecordKind {
    /// Converts a byte to a record kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Normal),
            2 => Some(Self::Tombstone),
            3 => Some(Self::TxnCommit),
            _ => None,
        }
    }

    /// Converts the record kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A single log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record key as written to disk (sequence prefix included).
    pub key: Vec<u8>,
    /// Record value.
    pub value: Vec<u8>,
    /// Record kind.
    pub kind: RecordKind,
}

impl Record {
    /// Creates a live record.
    #[must_use]
    pub fn normal(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            kind: RecordKind::Normal,
        }
    }

    /// Creates a tombstone record.
    #[must_use]
    pub fn tombstone(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            kind: RecordKind::Tombstone,
        }
    }

    /// Encodes the record, returning the bytes and their length.
    #[must_use]
    pub fn encode(&self) -> (Vec<u8>, usize) {
        let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + self.key.len() + self.value.len());

        // CRC placeholder, patched after the covered bytes exist.
        buf.extend_from_slice(&[0u8; 4]);
        buf.push(self.kind.as_byte());
        encode_varint(self.key.len() as u64, &mut buf);
        encode_varint(self.value.len() as u64, &mut buf);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[4..]);
        buf[..4].copy_from_slice(&crc.to_le_bytes());

        let len = buf.len();
        (buf, len)
    }

    /// Returns the encoded size without materializing the bytes.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        FIXED_HEADER_SIZE
            + varint_size(self.key.len() as u64)
            + varint_size(self.value.len() as u64)
            + self.key.len()
            + self.value.len()
    }
}

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// CRC32 over kind, lengths, key, and value.
    pub crc: u32,
    /// Record kind.
    pub kind: RecordKind,
    /// Key length in bytes.
    pub key_len: u32,
    /// Value length in bytes.
    pub value_len: u32,
}

impl RecordHeader {
    /// Decodes a header from the front of `buf`.
    ///
    /// Returns the header and its true encoded length, or `None` when
    /// the bytes are the all-zero end-of-segment signal (zero CRC,
    /// zero kind byte, zero lengths - distinguishable from any real
    /// record because the nonzero kind byte is always covered by the
    /// checksum).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidDataDir`] for a kind byte that is
    /// not a known record kind, or a truncated header.
    pub fn decode(buf: &[u8]) -> EngineResult<Option<(Self, usize)>> {
        if buf.len() < FIXED_HEADER_SIZE {
            return Ok(None);
        }

        let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let kind_byte = buf[4];

        if crc == 0 && kind_byte == 0 {
            return Ok(None);
        }

        let kind = RecordKind::from_byte(kind_byte).ok_or_else(|| {
            EngineError::invalid_data_dir(format!("unknown record kind byte {kind_byte:#04x}"))
        })?;

        let mut pos = FIXED_HEADER_SIZE;
        let (key_len, n) = decode_varint(&buf[pos..])
            .ok_or_else(|| EngineError::invalid_data_dir("truncated key length varint"))?;
        pos += n;
        let (value_len, n) = decode_varint(&buf[pos..])
            .ok_or_else(|| EngineError::invalid_data_dir("truncated value length varint"))?;
        pos += n;

        let key_len = u32::try_from(key_len)
            .map_err(|_| EngineError::invalid_data_dir("key length exceeds u32"))?;
        let value_len = u32::try_from(value_len)
            .map_err(|_| EngineError::invalid_data_dir("value length exceeds u32"))?;

        Ok(Some((
            Self {
                crc,
                kind,
                key_len,
                value_len,
            },
            pos,
        )))
    }
}

/// Verifies a record body against its header CRC.
///
/// `header_bytes` are the encoded header bytes after the CRC field
/// (kind byte and both length varints); `key` and `value` are the body.
///
/// # Errors
///
/// Returns [`EngineError::ChecksumMismatch`] when the computed CRC does
/// not equal `expected`.
pub fn verify_crc(expected: u32, header_bytes: &[u8], key: &[u8], value: &[u8]) -> EngineResult<()> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_bytes);
    hasher.update(key);
    hasher.update(value);
    let actual = hasher.finalize();

    if actual != expected {
        return Err(EngineError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// Disk address of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    /// Segment id.
    pub file_id: u32,
    /// Byte offset of the record inside the segment.
    pub offset: i64,
}

impl Position {
    /// Encoded size: file_id (4) + offset (8).
    pub const ENCODED_SIZE: usize = 12;

    /// Creates a position.
    #[must_use]
    pub const fn new(file_id: u32, offset: i64) -> Self {
        Self { file_id, offset }
    }

    /// Encodes the position as fixed little-endian bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_SIZE);
        buf.extend_from_slice(&self.file_id.to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf
    }

    /// Decodes a position from its fixed encoding.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidDataDir`] if `buf` is not exactly
    /// [`Self::ENCODED_SIZE`] bytes.
    pub fn decode(buf: &[u8]) -> EngineResult<Self> {
        if buf.len() != Self::ENCODED_SIZE {
            return Err(EngineError::invalid_data_dir(format!(
                "position must be {} bytes, got {}",
                Self::ENCODED_SIZE,
                buf.len()
            )));
        }
        let file_id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let offset = i64::from_le_bytes([
            buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
        ]);
        Ok(Self { file_id, offset })
    }
}

/// Prefixes `key` with a varint-encoded transaction sequence number.
#[must_use]
pub fn encode_record_key(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(varint_size(seq_no) + key.len());
    encode_varint(seq_no, &mut buf);
    buf.extend_from_slice(key);
    buf
}

/// Splits a stored key into its logical key and sequence number.
///
/// # Errors
///
/// Returns [`EngineError::InvalidDataDir`] if the varint prefix is
/// truncated.
pub fn decode_record_key(stored: &[u8]) -> EngineResult<(Vec<u8>, u64)> {
    let (seq_no, n) = decode_varint(stored)
        .ok_or_else(|| EngineError::invalid_data_dir("truncated sequence number prefix"))?;
    Ok((stored[n..].to_vec(), seq_no))
}

/// Appends `value` to `buf` as an unsigned LEB128 varint.
fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Decodes an unsigned LEB128 varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed, or `None` if
/// the varint is truncated or longer than 10 bytes.
fn decode_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;

    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

/// Returns the encoded size of `value` as a varint.
fn varint_size(value: u64) -> usize {
    let mut buf = Vec::with_capacity(10);
    encode_varint(value, &mut buf);
    buf.len()
}
