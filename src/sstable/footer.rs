//! SSTable footer, block handles and block trailers.
//!
//! The footer is a fixed-size (48 bytes) structure at the end of an SSTable file
//! that contains pointers to the index block and meta index block. Every block
//! on disk is followed by a 5-byte trailer: the compression type and a masked
//! CRC32C over the stored bytes and that type byte.

use crate::coding::{
    crc32c, decode_fixed32, decode_fixed64, get_varint64, mask_crc, put_varint64, unmask_crc,
};
use crate::config::CompressionType;
use crate::error::{Error, Result};
use crate::sstable::{BLOCK_TRAILER_SIZE, FOOTER_SIZE, MAGIC_NUMBER};
use bytes::{BufMut, Bytes};

/// Longest possible encoding of a BlockHandle (two varint64).
pub const MAX_ENCODED_HANDLE_LENGTH: usize = 20;

/// BlockHandle points at a block in the SSTable file.
///
/// `size` covers the block contents only, not the trailer that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    /// Offset of the block in the file
    pub offset: u64,
    /// Size of the block contents in bytes
    pub size: u64,
}

impl BlockHandle {
    /// Create a new BlockHandle
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Appends the varint encoding of this handle.
    pub fn encode_to<B: BufMut>(&self, dst: &mut B) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    /// Encodes this handle into a new buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_ENCODED_HANDLE_LENGTH);
        self.encode_to(&mut buf);
        buf
    }

    /// Decodes a handle and advances `src` past it.
    pub fn decode_from(src: &mut &[u8]) -> Result<Self> {
        let offset = get_varint64(src)?;
        let size = get_varint64(src)?;
        Ok(Self { offset, size })
    }

    /// Offset just past the block and its trailer.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.size + BLOCK_TRAILER_SIZE as u64
    }
}

/// Footer is the last 48 bytes of an SSTable file.
///
/// Format:
/// ```text
/// [meta_index_handle: varint64 x2]
/// [index_handle: varint64 x2]
/// [padding up to 40 bytes]
/// [magic: 8 bytes little-endian]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    /// Handle to the meta index block
    pub meta_index_handle: BlockHandle,
    /// Handle to the index block
    pub index_handle: BlockHandle,
}

impl Footer {
    /// Create a new Footer
    pub fn new(meta_index_handle: BlockHandle, index_handle: BlockHandle) -> Self {
        Self { meta_index_handle, index_handle }
    }

    /// Encode the footer to bytes (48 bytes)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        self.meta_index_handle.encode_to(&mut buf);
        self.index_handle.encode_to(&mut buf);
        buf.resize(2 * MAX_ENCODED_HANDLE_LENGTH, 0);
        buf.put_u64_le(MAGIC_NUMBER);
        debug_assert_eq!(buf.len(), FOOTER_SIZE);
        buf
    }

    /// Decode a footer from its 48 bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != FOOTER_SIZE {
            return Err(Error::corruption(format!(
                "Footer size mismatch: expected {}, got {}",
                FOOTER_SIZE,
                data.len()
            )));
        }

        let magic = decode_fixed64(data, 40)?;
        if magic != MAGIC_NUMBER {
            return Err(Error::corruption(format!(
                "not an sstable (bad magic number {:#x})",
                magic
            )));
        }

        let mut cursor = &data[..2 * MAX_ENCODED_HANDLE_LENGTH];
        let meta_index_handle = BlockHandle::decode_from(&mut cursor)?;
        let index_handle = BlockHandle::decode_from(&mut cursor)?;
        Ok(Self { meta_index_handle, index_handle })
    }
}

/// The compression type and checksum stored after each block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTrailer {
    /// How the block contents were compressed
    pub compression: CompressionType,
    /// Masked CRC32C of contents followed by the type byte
    pub crc32c: u32,
}

impl BlockTrailer {
    /// Computes the trailer for stored block contents.
    pub fn for_contents(contents: &[u8], compression: CompressionType) -> Self {
        let crc = crc32c(&[contents, &[compression.as_u8()]]);
        Self { compression, crc32c: mask_crc(crc) }
    }

    /// Encodes the 5 trailer bytes.
    pub fn encode(&self) -> [u8; BLOCK_TRAILER_SIZE] {
        let mut buf = [0u8; BLOCK_TRAILER_SIZE];
        buf[0] = self.compression.as_u8();
        buf[1..].copy_from_slice(&self.crc32c.to_le_bytes());
        buf
    }

    /// Decodes a trailer.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != BLOCK_TRAILER_SIZE {
            return Err(Error::corruption("block trailer has wrong size"));
        }
        let compression = CompressionType::from_u8(data[0]).ok_or_else(|| {
            Error::corruption(format!("unknown block compression type {}", data[0]))
        })?;
        Ok(Self { compression, crc32c: decode_fixed32(data, 1)? })
    }
}

/// Compresses raw block contents if doing so saves more than 12.5%.
///
/// Returns the stored bytes and the compression actually applied.
pub fn compress_block(
    raw: &[u8],
    compression: CompressionType,
) -> Result<(Vec<u8>, CompressionType)> {
    let compressed: Option<Vec<u8>> = match compression {
        CompressionType::None => None,
        #[cfg(feature = "snappy")]
        CompressionType::Snappy => Some(
            snap::raw::Encoder::new()
                .compress_vec(raw)
                .map_err(|e| Error::internal(format!("Snappy compression failed: {}", e)))?,
        ),
        #[cfg(feature = "lz4-compression")]
        CompressionType::Lz4 => Some(
            lz4::block::compress(raw, None, true)
                .map_err(|e| Error::internal(format!("LZ4 compression failed: {}", e)))?,
        ),
    };

    match compressed {
        Some(data) if data.len() < raw.len() - raw.len() / 8 => Ok((data, compression)),
        _ => Ok((raw.to_vec(), CompressionType::None)),
    }
}

/// Checks the trailer of a block read from disk and returns its uncompressed contents.
///
/// `raw` must hold exactly the block contents followed by the trailer.
pub fn decode_block(raw: Bytes, verify_checksum: bool) -> Result<Bytes> {
    if raw.len() < BLOCK_TRAILER_SIZE {
        return Err(Error::corruption("truncated block read"));
    }
    let contents_len = raw.len() - BLOCK_TRAILER_SIZE;
    let trailer = BlockTrailer::decode(&raw[contents_len..])?;
    let contents = raw.slice(..contents_len);

    if verify_checksum {
        let expected = unmask_crc(trailer.crc32c);
        let actual = crc32c(&[contents.as_ref(), &[raw[contents_len]]]);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
    }

    match trailer.compression {
        CompressionType::None => Ok(contents),
        #[cfg(feature = "snappy")]
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(&contents)
            .map(Bytes::from)
            .map_err(|e| Error::corruption(format!("corrupted snappy block: {}", e))),
        #[cfg(feature = "lz4-compression")]
        CompressionType::Lz4 => lz4::block::decompress(&contents, None)
            .map(Bytes::from)
            .map_err(|e| Error::corruption(format!("corrupted lz4 block: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_handle_varint() {
        let handle = BlockHandle::new(1234, 5678);
        let encoded = handle.encode();
        assert_eq!(encoded.len(), 4);

        let mut cursor = encoded.as_slice();
        assert_eq!(BlockHandle::decode_from(&mut cursor).unwrap(), handle);
        assert!(cursor.is_empty());

        let big = BlockHandle::new(u64::MAX, u64::MAX);
        assert_eq!(big.encode().len(), MAX_ENCODED_HANDLE_LENGTH);
    }

    #[test]
    fn test_footer_layout() {
        let footer = Footer::new(BlockHandle::new(1000, 100), BlockHandle::new(2000, 200));
        let encoded = footer.encode();
        assert_eq!(encoded.len(), FOOTER_SIZE);
        assert_eq!(&encoded[40..], &0xdb4775248b80fb57u64.to_le_bytes());
        assert_eq!(Footer::decode(&encoded).unwrap(), footer);
    }

    #[test]
    fn test_footer_invalid_magic() {
        let mut data = Footer::new(BlockHandle::default(), BlockHandle::default()).encode();
        data[47] ^= 0xff;
        assert!(matches!(Footer::decode(&data), Err(Error::Corruption(_))));
        assert!(Footer::decode(&data[..40]).is_err());
    }

    #[test]
    fn test_trailer_detects_corruption() {
        let contents = b"some block contents".to_vec();
        let trailer = BlockTrailer::for_contents(&contents, CompressionType::None);

        let mut raw = contents.clone();
        raw.extend_from_slice(&trailer.encode());
        assert_eq!(decode_block(Bytes::from(raw.clone()), true).unwrap(), Bytes::from(contents));

        raw[3] ^= 0x01;
        let err = decode_block(Bytes::from(raw.clone()), true).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));

        // Unverified reads pass the damaged bytes through
        assert!(decode_block(Bytes::from(raw), false).is_ok());
    }

    #[test]
    fn test_incompressible_block_stored_raw() {
        let raw: Vec<u8> = (0..64u32).map(|i| (i.wrapping_mul(2654435761) >> 24) as u8).collect();
        let (stored, applied) = compress_block(&raw, CompressionType::default()).unwrap();
        assert_eq!(applied, CompressionType::None);
        assert_eq!(stored, raw);
    }

    #[cfg(feature = "snappy")]
    #[test]
    fn test_snappy_block() {
        let raw = vec![b'a'; 4096];
        let (stored, applied) = compress_block(&raw, CompressionType::Snappy).unwrap();
        assert_eq!(applied, CompressionType::Snappy);
        assert!(stored.len() < raw.len() / 2);

        let mut block = stored.clone();
        block.extend_from_slice(&BlockTrailer::for_contents(&stored, applied).encode());
        assert_eq!(decode_block(Bytes::from(block), true).unwrap().as_ref(), raw.as_slice());
    }

    #[cfg(feature = "lz4-compression")]
    #[test]
    fn test_lz4_block() {
        let raw = vec![b'z'; 4096];
        let (stored, applied) = compress_block(&raw, CompressionType::Lz4).unwrap();
        assert_eq!(applied, CompressionType::Lz4);

        let mut block = stored.clone();
        block.extend_from_slice(&BlockTrailer::for_contents(&stored, applied).encode());
        assert_eq!(decode_block(Bytes::from(block), true).unwrap().as_ref(), raw.as_slice());
    }
}
