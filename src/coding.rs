//! Byte-level encoding helpers.
//!
//! Fixed-width integers are little-endian and go through [`bytes::BufMut`] /
//! [`bytes::Buf`]. This module adds the LevelDB varint encoding, length-prefixed
//! slices and the masked CRC32C used by block trailers and WAL chunks.
//!
//! Decoders take a `&mut &[u8]` cursor and advance it past what they consumed,
//! returning [`Error::Corruption`] instead of panicking on truncated input.

use crate::error::{Error, Result};
use bytes::BufMut;
use crc::{Crc, CRC_32_ISCSI};

/// Longest possible varint32 encoding.
pub const MAX_VARINT32_LENGTH: usize = 5;

/// Longest possible varint64 encoding.
pub const MAX_VARINT64_LENGTH: usize = 10;

const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const MASK_DELTA: u32 = 0xa282_ead8;

/// Appends `value` as a varint32.
pub fn put_varint32<B: BufMut>(dst: &mut B, value: u32) {
    put_varint64(dst, value as u64);
}

/// Appends `value` as a varint64.
pub fn put_varint64<B: BufMut>(dst: &mut B, mut value: u64) {
    while value >= 0x80 {
        dst.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Number of bytes `value` occupies as a varint.
pub fn varint_length(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Decodes a varint32 and advances `src`.
pub fn get_varint32(src: &mut &[u8]) -> Result<u32> {
    let value = decode_varint(src, MAX_VARINT32_LENGTH)?;
    u32::try_from(value).map_err(|_| Error::corruption("varint32 overflow"))
}

/// Decodes a varint64 and advances `src`.
pub fn get_varint64(src: &mut &[u8]) -> Result<u64> {
    decode_varint(src, MAX_VARINT64_LENGTH)
}

fn decode_varint(src: &mut &[u8], max_len: usize) -> Result<u64> {
    let mut result = 0u64;
    for (i, &byte) in src.iter().enumerate().take(max_len) {
        result |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            *src = &src[i + 1..];
            return Ok(result);
        }
    }
    Err(Error::corruption("truncated or malformed varint"))
}

/// Appends a varint32 length followed by `value`.
pub fn put_length_prefixed_slice<B: BufMut>(dst: &mut B, value: &[u8]) {
    put_varint32(dst, value.len() as u32);
    dst.put_slice(value);
}

/// Decodes a length-prefixed slice and advances `src`.
pub fn get_length_prefixed_slice<'a>(src: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = get_varint32(src)? as usize;
    if src.len() < len {
        return Err(Error::corruption(format!(
            "length-prefixed slice wants {} bytes, {} available",
            len,
            src.len()
        )));
    }
    let (value, rest) = src.split_at(len);
    *src = rest;
    Ok(value)
}

/// Reads a little-endian u32 at `offset`.
pub fn decode_fixed32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| Error::corruption("truncated fixed32"))
}

/// Reads a little-endian u64 at `offset`.
pub fn decode_fixed64(data: &[u8], offset: usize) -> Result<u64> {
    data.get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| Error::corruption("truncated fixed64"))
}

/// CRC32C (Castagnoli) over the concatenation of `parts`.
pub fn crc32c(parts: &[&[u8]]) -> u32 {
    let mut digest = CRC32C.digest();
    for part in parts {
        digest.update(part);
    }
    digest.finalize()
}

/// Masks a CRC so that a CRC stored next to the data it covers is not
/// itself a likely CRC input.
pub fn mask_crc(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Inverse of [`mask_crc`].
pub fn unmask_crc(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}
