//! Block format implementation for SSTable.
//!
//! A block contains multiple key-value entries and uses restart points
//! for efficient binary search and prefix compression.

use crate::coding::{decode_fixed32, get_varint32, put_varint32};
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::iterator::InternalIterator;
use bytes::{BufMut, Bytes, BytesMut};
use std::cmp::Ordering;
use std::sync::Arc;

/// Block stores key-value pairs with prefix compression.
///
/// Format:
/// ```text
/// [Entry 1]
/// [Entry 2]
/// ...
/// [Entry N]
/// [Restart Point 1: u32]
/// [Restart Point 2: u32]
/// ...
/// [Restart Point M: u32]
/// [Num Restarts: u32]
/// ```
///
/// Each entry format:
/// ```text
/// [shared_key_len: varint32]    // Length of shared prefix with previous key
/// [unshared_key_len: varint32]  // Length of unshared key suffix
/// [value_len: varint32]         // Length of value
/// [unshared_key: bytes]         // Key suffix
/// [value: bytes]                // Value data
/// ```
///
/// Entries at restart points always have `shared_key_len == 0`.
#[derive(Debug, Clone)]
pub struct Block {
    data: Bytes,
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    /// Create a new Block from its uncompressed contents.
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("Block too small"));
        }

        let num_restarts = decode_fixed32(&data, data.len() - 4)?;
        let max_restarts = (data.len() - 4) / 4;
        if num_restarts as usize > max_restarts {
            return Err(Error::corruption(format!(
                "Block restart count {} does not fit in {} bytes",
                num_restarts,
                data.len()
            )));
        }
        let restart_offset = data.len() - 4 - num_restarts as usize * 4;

        Ok(Self { data, restart_offset, num_restarts })
    }

    /// Get the number of restart points
    pub fn num_restarts(&self) -> u32 {
        self.num_restarts
    }

    fn restart_point(&self, index: u32) -> Result<usize> {
        let offset = decode_fixed32(&self.data, self.restart_offset + index as usize * 4)? as usize;
        if offset > self.restart_offset {
            return Err(Error::corruption("Block restart point past entries"));
        }
        Ok(offset)
    }

    /// Size of the block contents in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Create an iterator over the block ordered by `comparator`.
    pub fn iter(&self, comparator: Arc<dyn Comparator>) -> BlockIterator {
        BlockIterator::new(self.clone(), comparator)
    }
}

/// BlockBuilder builds a block with prefix compression.
pub struct BlockBuilder {
    buffer: BytesMut,
    restarts: Vec<u32>,
    counter: usize,
    last_key: Vec<u8>,
    block_restart_interval: usize,
    entries: usize,
}

impl BlockBuilder {
    /// Create a new BlockBuilder
    pub fn new(block_restart_interval: usize) -> Self {
        assert!(block_restart_interval >= 1, "restart interval must be positive");
        Self {
            buffer: BytesMut::new(),
            restarts: vec![0],
            counter: 0,
            last_key: Vec::new(),
            block_restart_interval,
            entries: 0,
        }
    }

    /// Add a key-value pair to the block.
    ///
    /// Keys must arrive in strictly increasing order; the caller
    /// (`TableBuilder`) checks this against the table comparator.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let mut shared = 0;

        if self.counter >= self.block_restart_interval {
            // Restart compression
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        } else {
            shared = shared_prefix_len(&self.last_key, key);
        }

        let unshared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, unshared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.put_slice(&key[shared..]);
        self.buffer.put_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        self.counter += 1;
        self.entries += 1;
    }

    /// Appends the restart array and returns the block contents.
    ///
    /// The builder is reset and can be reused for the next block.
    pub fn finish(&mut self) -> Bytes {
        for restart in &self.restarts {
            self.buffer.put_u32_le(*restart);
        }
        self.buffer.put_u32_le(self.restarts.len() as u32);

        let contents = std::mem::take(&mut self.buffer).freeze();
        self.reset();
        contents
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        self.entries = 0;
    }

    /// Estimated size of the block once finished.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// Number of entries added since the last `finish`.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Check if the block is empty
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Iterator over entries in a block
pub struct BlockIterator {
    block: Block,
    comparator: Arc<dyn Comparator>,
    /// Offset of the current entry; `restart_offset` when exhausted.
    current: usize,
    /// Offset just past the current entry.
    next_offset: usize,
    key: Vec<u8>,
    value_range: (usize, usize),
}

impl BlockIterator {
    fn new(block: Block, comparator: Arc<dyn Comparator>) -> Self {
        let end = block.restart_offset;
        Self {
            block,
            comparator,
            current: end,
            next_offset: end,
            key: Vec::new(),
            value_range: (0, 0),
        }
    }

    fn invalidate(&mut self) {
        self.current = self.block.restart_offset;
        self.next_offset = self.block.restart_offset;
        self.key.clear();
        self.value_range = (0, 0);
    }

    /// Decodes the entry at `next_offset` into the current position.
    /// Returns false at the end of the entries.
    fn parse_next_entry(&mut self) -> Result<bool> {
        let offset = self.next_offset;
        let limit = self.block.restart_offset;
        if offset >= limit {
            self.invalidate();
            return Ok(false);
        }

        let mut cursor = &self.block.data[offset..limit];
        let before = cursor.len();
        let shared = get_varint32(&mut cursor)? as usize;
        let unshared = get_varint32(&mut cursor)? as usize;
        let value_len = get_varint32(&mut cursor)? as usize;
        if shared > self.key.len() || cursor.len() < unshared + value_len {
            self.invalidate();
            return Err(Error::corruption("bad entry in block"));
        }

        let header_len = before - cursor.len();
        let key_start = offset + header_len;
        let value_start = key_start + unshared;

        self.key.truncate(shared);
        self.key.extend_from_slice(&self.block.data[key_start..value_start]);
        self.current = offset;
        self.value_range = (value_start, value_start + value_len);
        self.next_offset = value_start + value_len;
        Ok(true)
    }

    fn seek_to_restart_point(&mut self, index: u32) -> Result<()> {
        self.key.clear();
        self.next_offset = self.block.restart_point(index)?;
        Ok(())
    }

    /// Key stored at a restart point (always a full key).
    fn restart_key(&self, index: u32) -> Result<&[u8]> {
        let offset = self.block.restart_point(index)?;
        let mut cursor = &self.block.data[offset..self.block.restart_offset];
        let before = cursor.len();
        let shared = get_varint32(&mut cursor)?;
        let unshared = get_varint32(&mut cursor)? as usize;
        let _value_len = get_varint32(&mut cursor)?;
        if shared != 0 || cursor.len() < unshared {
            return Err(Error::corruption("bad restart entry in block"));
        }
        let key_start = offset + (before - cursor.len());
        Ok(&self.block.data[key_start..key_start + unshared])
    }
}

impl InternalIterator for BlockIterator {
    fn valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    fn seek_to_first(&mut self) -> Result<()> {
        if self.block.num_restarts == 0 {
            self.invalidate();
            return Ok(());
        }
        self.seek_to_restart_point(0)?;
        self.parse_next_entry()?;
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        if self.block.num_restarts == 0 {
            self.invalidate();
            return Ok(());
        }

        // Binary search for the last restart point with key < target.
        let mut left = 0u32;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right).div_ceil(2);
            if self.comparator.compare(self.restart_key(mid)?, target) == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        // Linear scan for the first key >= target.
        self.seek_to_restart_point(left)?;
        while self.parse_next_entry()? {
            if self.comparator.compare(&self.key, target) != Ordering::Less {
                return Ok(());
            }
        }
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        if self.valid() {
            self.parse_next_entry()?;
        }
        Ok(())
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.block.data[self.value_range.0..self.value_range.1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use proptest::prelude::*;

    fn build(entries: &[(Vec<u8>, Vec<u8>)], interval: usize) -> Block {
        let mut builder = BlockBuilder::new(interval);
        for (k, v) in entries {
            builder.add(k, v);
        }
        Block::new(builder.finish()).unwrap()
    }

    fn collect(block: &Block) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut iter = block.iter(Arc::new(BytewiseComparator));
        iter.seek_to_first().unwrap();
        let mut out = Vec::new();
        while iter.valid() {
            out.push((iter.key().to_vec(), iter.value().to_vec()));
            iter.next().unwrap();
        }
        out
    }

    #[test]
    fn test_empty_block() {
        let mut builder = BlockBuilder::new(16);
        assert!(builder.is_empty());
        let block = Block::new(builder.finish()).unwrap();
        assert_eq!(block.num_restarts(), 1);
        assert!(collect(&block).is_empty());
    }

    #[test]
    fn test_prefix_compression_and_restarts() {
        let entries: Vec<_> = (0..100)
            .map(|i| (format!("prefix_key_{:04}", i).into_bytes(), format!("v{}", i).into_bytes()))
            .collect();
        let block = build(&entries, 16);

        assert_eq!(block.num_restarts(), 7);
        assert_eq!(collect(&block), entries);

        let uncompressed: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
        assert!(block.size() < uncompressed);
    }

    #[test]
    fn test_seek() {
        let entries: Vec<_> = ["apple", "banana", "cherry", "date", "elderberry"]
            .iter()
            .map(|k| (k.as_bytes().to_vec(), b"x".to_vec()))
            .collect();
        let block = build(&entries, 2);
        let mut iter = block.iter(Arc::new(BytewiseComparator));

        iter.seek(b"cherry").unwrap();
        assert_eq!(iter.key(), b"cherry");

        iter.seek(b"c").unwrap();
        assert_eq!(iter.key(), b"cherry");

        iter.seek(b"a").unwrap();
        assert_eq!(iter.key(), b"apple");

        iter.seek(b"dz").unwrap();
        assert_eq!(iter.key(), b"elderberry");

        iter.seek(b"zzz").unwrap();
        assert!(!iter.valid());
    }

    #[test]
    fn test_builder_reuse() {
        let mut builder = BlockBuilder::new(4);
        builder.add(b"a", b"1");
        let first = Block::new(builder.finish()).unwrap();
        builder.add(b"b", b"2");
        let second = Block::new(builder.finish()).unwrap();

        assert_eq!(collect(&first), vec![(b"a".to_vec(), b"1".to_vec())]);
        assert_eq!(collect(&second), vec![(b"b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn test_corrupt_block() {
        assert!(Block::new(Bytes::from_static(&[1, 2])).is_err());
        // Claims 1000 restarts in an 8 byte block
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&1000u32.to_le_bytes());
        assert!(Block::new(Bytes::from(data)).is_err());
    }

    proptest! {
        #[test]
        fn prop_block_yields_entries_in_order(
            map in proptest::collection::btree_map(
                proptest::collection::vec(any::<u8>(), 1..24),
                proptest::collection::vec(any::<u8>(), 0..32),
                0..64,
            ),
            interval in 1usize..20,
            target in proptest::collection::vec(any::<u8>(), 0..24),
        ) {
            let entries: Vec<_> = map.clone().into_iter().collect();
            let block = build(&entries, interval);
            prop_assert_eq!(collect(&block), entries);

            let mut iter = block.iter(Arc::new(BytewiseComparator));
            iter.seek(&target).unwrap();
            let expected = map.range(target.clone()..).next();
            match expected {
                Some((k, v)) => {
                    prop_assert!(iter.valid());
                    prop_assert_eq!(iter.key(), k.as_slice());
                    prop_assert_eq!(iter.value(), v.as_slice());
                }
                None => prop_assert!(!iter.valid()),
            }
        }
    }
}
