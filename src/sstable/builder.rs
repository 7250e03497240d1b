//! SSTable builder implementation.
//!
//! Builds an SSTable file from a sequence of sorted key-value pairs.

use crate::comparator::Comparator;
use crate::config::{CompressionType, Options};
use crate::error::{Error, Result};
use crate::sstable::block::BlockBuilder;
use crate::sstable::footer::{compress_block, BlockHandle, BlockTrailer, Footer};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;

/// TableBuilder writes an SSTable file.
///
/// Keys must be added in strictly increasing order according to the
/// builder's comparator. The index entry for a data block is only written
/// once the first key of the next block is known, so that it can be the
/// shortest separator between the two blocks.
///
/// Usage:
/// ```no_run
/// use lsmdb::comparator::BytewiseComparator;
/// use lsmdb::sstable::TableBuilder;
/// use lsmdb::Options;
/// use std::sync::Arc;
///
/// let file = std::fs::File::create("table.sst").unwrap();
/// let mut builder = TableBuilder::new(file, &Options::default(), Arc::new(BytewiseComparator));
/// builder.add(b"key1", b"value1").unwrap();
/// builder.add(b"key2", b"value2").unwrap();
/// let file_size = builder.finish().unwrap();
/// ```
pub struct TableBuilder {
    writer: BufWriter<File>,
    comparator: Arc<dyn Comparator>,
    block_size: usize,
    compression: CompressionType,

    data_block: BlockBuilder,
    index_block: BlockBuilder,
    last_key: Vec<u8>,
    offset: u64,
    num_entries: u64,
    closed: bool,

    /// Handle of the last flushed data block, waiting for its index entry.
    pending_handle: Option<BlockHandle>,
}

impl TableBuilder {
    /// Creates a builder writing to `file`.
    pub fn new(file: File, options: &Options, comparator: Arc<dyn Comparator>) -> Self {
        Self {
            writer: BufWriter::new(file),
            comparator,
            block_size: options.block_size,
            compression: options.compression,
            data_block: BlockBuilder::new(options.block_restart_interval),
            // Index entries are looked up by binary search only.
            index_block: BlockBuilder::new(1),
            last_key: Vec::new(),
            offset: 0,
            num_entries: 0,
            closed: false,
            pending_handle: None,
        }
    }

    /// Add a key-value pair to the table.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `key` does not sort after the
    /// previously added key, and `Error::InvalidState` after `finish`/`abandon`.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::invalid_state("table builder already closed"));
        }
        if self.num_entries > 0
            && self.comparator.compare(key, &self.last_key) != Ordering::Greater
        {
            return Err(Error::invalid_argument("Keys must be added in sorted order"));
        }

        if let Some(handle) = self.pending_handle.take() {
            debug_assert!(self.data_block.is_empty());
            self.comparator.find_shortest_separator(&mut self.last_key, key);
            self.index_block.add(&self.last_key, &handle.encode());
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes the current data block, if any.
    pub fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::invalid_state("table builder already closed"));
        }
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(self.pending_handle.is_none());

        let contents = self.data_block.finish();
        let handle = self.write_block(&contents, self.compression)?;
        self.pending_handle = Some(handle);
        self.writer.flush()?;
        Ok(())
    }

    fn write_block(&mut self, raw: &[u8], compression: CompressionType) -> Result<BlockHandle> {
        let (stored, applied) = compress_block(raw, compression)?;
        let handle = BlockHandle::new(self.offset, stored.len() as u64);

        self.writer.write_all(&stored)?;
        self.writer.write_all(&BlockTrailer::for_contents(&stored, applied).encode())?;
        self.offset = handle.end_offset();
        Ok(handle)
    }

    /// Finish building the table.
    ///
    /// Writes the last data block, the meta index block, the index block and
    /// the footer, then syncs the file. Returns the final file size.
    pub fn finish(&mut self) -> Result<u64> {
        self.flush()?;
        self.closed = true;

        // No meta blocks are written; the meta index is an empty block.
        let meta_index = BlockBuilder::new(1).finish();
        let meta_index_handle = self.write_block(&meta_index, self.compression)?;

        if let Some(handle) = self.pending_handle.take() {
            self.comparator.find_short_successor(&mut self.last_key);
            self.index_block.add(&self.last_key, &handle.encode());
        }
        let index = self.index_block.finish();
        let index_handle = self.write_block(&index, self.compression)?;

        let footer = Footer::new(meta_index_handle, index_handle).encode();
        self.writer.write_all(&footer)?;
        self.offset += footer.len() as u64;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.offset)
    }

    /// Stops building; the partially written file must be deleted by the caller.
    pub fn abandon(&mut self) {
        self.closed = true;
    }

    /// Get the number of entries added
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written so far (after `finish`, the file size).
    pub fn file_size(&self) -> u64 {
        self.offset
    }
}
