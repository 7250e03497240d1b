//! WAL physical record (chunk) format.
//!
//! Each chunk consists of:
//! - Checksum (4 bytes): masked CRC32C of the type byte followed by the payload
//! - Length (2 bytes): Length of the payload
//! - Type (1 byte): Chunk type (Full, First, Middle, Last)
//! - Payload (variable)

use crate::coding::{crc32c, mask_crc};
use bytes::BufMut;

/// Size of the chunk header (checksum + length + type)
pub const HEADER_SIZE: usize = 4 + 2 + 1;

/// Chunk types for records that span multiple blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Reserved for preallocated, zero-filled space
    Zero = 0,
    /// Complete record contained in a single chunk
    Full = 1,
    /// First fragment of a multi-chunk record
    First = 2,
    /// Middle fragment of a multi-chunk record
    Middle = 3,
    /// Last fragment of a multi-chunk record
    Last = 4,
}

impl RecordType {
    /// Convert from u8 to RecordType
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }

    /// Chunk type for a fragment given whether it starts and ends the record.
    pub fn for_fragment(begin: bool, end: bool) -> Self {
        match (begin, end) {
            (true, true) => RecordType::Full,
            (true, false) => RecordType::First,
            (false, true) => RecordType::Last,
            (false, false) => RecordType::Middle,
        }
    }
}

/// Masked checksum stored in a chunk header.
pub fn chunk_checksum(type_byte: u8, payload: &[u8]) -> u32 {
    mask_crc(crc32c(&[&[type_byte], payload]))
}

/// Appends the header for a chunk carrying `payload`.
pub fn encode_header<B: BufMut>(dst: &mut B, record_type: RecordType, payload: &[u8]) {
    debug_assert!(payload.len() <= u16::MAX as usize);
    dst.put_u32_le(chunk_checksum(record_type as u8, payload));
    dst.put_u16_le(payload.len() as u16);
    dst.put_u8(record_type as u8);
}

/// A decoded chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Stored masked checksum
    pub checksum: u32,
    /// Payload length
    pub length: usize,
    /// Raw type byte; may not be a known [`RecordType`]
    pub type_byte: u8,
}

impl ChunkHeader {
    /// Parses the first [`HEADER_SIZE`] bytes of `data`.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let header = data.get(..HEADER_SIZE)?;
        Some(Self {
            checksum: u32::from_le_bytes([header[0], header[1], header[2], header[3]]),
            length: u16::from_le_bytes([header[4], header[5]]) as usize,
            type_byte: header[6],
        })
    }
}
