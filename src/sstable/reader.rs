//! SSTable reader implementation.
//!
//! A [`Table`] is opened once: the footer is validated and the index block is
//! parsed eagerly. Data blocks are read on demand, either with positional
//! reads through the file or by copying out of a memory map.

use crate::comparator::Comparator;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::iterator::InternalIterator;
use crate::sstable::block::{Block, BlockIterator};
use crate::sstable::footer::{decode_block, BlockHandle, Footer};
use crate::sstable::{BLOCK_TRAILER_SIZE, FOOTER_SIZE};
use bytes::Bytes;
use memmap2::Mmap;
use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

/// Where table bytes come from.
enum TableSource {
    File(Mutex<File>),
    Mmap(Mmap),
}

impl TableSource {
    fn read(&self, offset: u64, len: usize, file_size: u64) -> Result<Bytes> {
        if offset.checked_add(len as u64).map_or(true, |end| end > file_size) {
            return Err(Error::corruption(format!(
                "read of {} bytes at offset {} past end of table ({} bytes)",
                len, offset, file_size
            )));
        }
        match self {
            TableSource::File(file) => {
                let mut buffer = vec![0u8; len];
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut buffer)?;
                Ok(Bytes::from(buffer))
            }
            TableSource::Mmap(map) => {
                let start = offset as usize;
                Ok(Bytes::copy_from_slice(&map[start..start + len]))
            }
        }
    }
}

/// An open, immutable SSTable.
pub struct Table {
    source: TableSource,
    file_size: u64,
    comparator: Arc<dyn Comparator>,
    verify_checksums: bool,
    footer: Footer,
    index_block: Block,
}

impl Table {
    /// Opens a table of `file_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corruption` if the file is too short, the footer magic
    /// is wrong or the index block cannot be read.
    pub fn open(
        file: File,
        file_size: u64,
        options: &Options,
        comparator: Arc<dyn Comparator>,
    ) -> Result<Self> {
        if file_size < FOOTER_SIZE as u64 {
            return Err(Error::corruption("file is too short to be an sstable"));
        }

        let source = if options.use_mmap {
            // SAFETY: table files are immutable once written and are only
            // deleted after every handle to them is gone.
            let map = unsafe { Mmap::map(&file)? };
            TableSource::Mmap(map)
        } else {
            TableSource::File(Mutex::new(file))
        };

        let footer_bytes = source.read(file_size - FOOTER_SIZE as u64, FOOTER_SIZE, file_size)?;
        let footer = Footer::decode(&footer_bytes)?;

        let index_handle = footer.index_handle;
        let index_len = index_handle.size as usize + BLOCK_TRAILER_SIZE;
        let index_raw = source.read(index_handle.offset, index_len, file_size)?;
        let index_block = Block::new(decode_block(index_raw, true)?)?;

        Ok(Self {
            source,
            file_size,
            comparator,
            verify_checksums: options.verify_checksums,
            footer,
            index_block,
        })
    }

    /// Reads and decodes the block at `handle`.
    pub fn read_block(&self, handle: &BlockHandle, verify_checksum: bool) -> Result<Block> {
        let len = handle.size as usize + BLOCK_TRAILER_SIZE;
        let raw = self.source.read(handle.offset, len, self.file_size)?;
        let contents = decode_block(raw, verify_checksum || self.verify_checksums)?;
        Block::new(contents)
    }

    /// Returns an iterator over every entry of the table.
    pub fn iter(self: &Arc<Self>, verify_checksums: bool) -> TableIterator {
        TableIterator {
            index_iter: self.index_block.iter(self.comparator.clone()),
            table: self.clone(),
            data_iter: None,
            verify_checksums,
        }
    }

    /// Finds the first entry with key `>= key`.
    ///
    /// Returns the entry's key and value; the caller decides whether it is a match.
    pub fn internal_get(
        &self,
        key: &[u8],
        verify_checksums: bool,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut index_iter = self.index_block.iter(self.comparator.clone());
        index_iter.seek(key)?;
        while index_iter.valid() {
            let handle = BlockHandle::decode_from(&mut index_iter.value())?;
            let block = self.read_block(&handle, verify_checksums)?;
            let mut block_iter = block.iter(self.comparator.clone());
            block_iter.seek(key)?;
            if block_iter.valid() {
                return Ok(Some((block_iter.key().to_vec(), block_iter.value().to_vec())));
            }
            // The separator admitted the key but the block ends below it.
            index_iter.next()?;
        }
        Ok(None)
    }

    /// Approximate file offset where the data for `key` begins.
    ///
    /// Keys past the last data block map to the offset of the meta index
    /// block, which is close to the file size.
    pub fn approximate_offset_of(&self, key: &[u8]) -> u64 {
        let mut index_iter = self.index_block.iter(self.comparator.clone());
        if index_iter.seek(key).is_ok() && index_iter.valid() {
            if let Ok(handle) = BlockHandle::decode_from(&mut index_iter.value()) {
                return handle.offset;
            }
        }
        self.footer.meta_index_handle.offset
    }

    /// Size of the table file.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Returns true if the table is read through a memory map.
    pub fn is_mmapped(&self) -> bool {
        matches!(self.source, TableSource::Mmap(_))
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("file_size", &self.file_size)
            .field("mmap", &self.is_mmapped())
            .field("footer", &self.footer)
            .finish()
    }
}

/// Two-level iterator: walks the index block and opens each data block in turn.
pub struct TableIterator {
    table: Arc<Table>,
    index_iter: BlockIterator,
    data_iter: Option<BlockIterator>,
    verify_checksums: bool,
}

impl TableIterator {
    fn init_data_block(&mut self) -> Result<()> {
        if !self.index_iter.valid() {
            self.data_iter = None;
            return Ok(());
        }
        let handle = BlockHandle::decode_from(&mut self.index_iter.value())?;
        let block = self.table.read_block(&handle, self.verify_checksums)?;
        self.data_iter = Some(block.iter(self.table.comparator.clone()));
        Ok(())
    }

    fn skip_empty_blocks_forward(&mut self) -> Result<()> {
        while !self.data_iter.as_ref().is_some_and(|it| it.valid()) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return Ok(());
            }
            self.index_iter.next()?;
            self.init_data_block()?;
            if let Some(data_iter) = self.data_iter.as_mut() {
                data_iter.seek_to_first()?;
            }
        }
        Ok(())
    }
}

impl InternalIterator for TableIterator {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|it| it.valid())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.index_iter.seek_to_first()?;
        self.init_data_block()?;
        if let Some(data_iter) = self.data_iter.as_mut() {
            data_iter.seek_to_first()?;
        }
        self.skip_empty_blocks_forward()
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.index_iter.seek(target)?;
        self.init_data_block()?;
        if let Some(data_iter) = self.data_iter.as_mut() {
            data_iter.seek(target)?;
        }
        self.skip_empty_blocks_forward()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(data_iter) = self.data_iter.as_mut() {
            data_iter.next()?;
        }
        self.skip_empty_blocks_forward()
    }

    fn key(&self) -> &[u8] {
        self.data_iter.as_ref().map(|it| it.key()).unwrap_or_default()
    }

    fn value(&self) -> &[u8] {
        self.data_iter.as_ref().map(|it| it.value()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::config::CompressionType;
    use crate::sstable::TableBuilder;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn write_table(
        dir: &TempDir,
        options: &Options,
        entries: &BTreeMap<Vec<u8>, Vec<u8>>,
    ) -> (std::path::PathBuf, u64) {
        let path = dir.path().join("000001.sst");
        let file = File::create(&path).unwrap();
        let mut builder = TableBuilder::new(file, options, Arc::new(BytewiseComparator));
        for (k, v) in entries {
            builder.add(k, v).unwrap();
        }
        let size = builder.finish().unwrap();
        (path, size)
    }

    fn open(path: &std::path::Path, size: u64, options: &Options) -> Arc<Table> {
        let file = File::open(path).unwrap();
        Arc::new(Table::open(file, size, options, Arc::new(BytewiseComparator)).unwrap())
    }

    fn sample_entries(n: usize) -> BTreeMap<Vec<u8>, Vec<u8>> {
        (0..n)
            .map(|i| {
                let value = format!("value-{}-{}", i, "x".repeat(i % 37));
                (format!("key{:06}", i).into_bytes(), value.into_bytes())
            })
            .collect()
    }

    fn scan(table: &Arc<Table>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut iter = table.iter(true);
        iter.seek_to_first().unwrap();
        let mut out = Vec::new();
        while iter.valid() {
            out.push((iter.key().to_vec(), iter.value().to_vec()));
            iter.next().unwrap();
        }
        out
    }

    #[test]
    fn test_scan_matches_input() {
        let dir = TempDir::new().unwrap();
        for use_mmap in [false, true] {
            let options = Options::default().block_size(512).use_mmap(use_mmap);
            let entries = sample_entries(2000);
            let (path, size) = write_table(&dir, &options, &entries);
            let table = open(&path, size, &options);

            assert_eq!(table.is_mmapped(), use_mmap);
            assert_eq!(scan(&table), entries.into_iter().collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_seek_and_internal_get() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().block_size(256).compression(CompressionType::None);
        let entries = sample_entries(500);
        let (path, size) = write_table(&dir, &options, &entries);
        let table = open(&path, size, &options);

        let (k, v) = table.internal_get(b"key000123", false).unwrap().unwrap();
        assert_eq!(k, b"key000123");
        assert_eq!(&v, &entries[&b"key000123".to_vec()]);

        // Between keys: first entry after
        let (k, _) = table.internal_get(b"key000123a", false).unwrap().unwrap();
        assert_eq!(k, b"key000124");

        assert!(table.internal_get(b"zzz", false).unwrap().is_none());

        let mut iter = table.iter(false);
        iter.seek(b"key000400").unwrap();
        assert_eq!(iter.key(), b"key000400");
        iter.seek(b"a").unwrap();
        assert_eq!(iter.key(), b"key000000");
    }

    #[test]
    fn test_empty_table() {
        let dir = TempDir::new().unwrap();
        let options = Options::default();
        let (path, size) = write_table(&dir, &options, &BTreeMap::new());
        let table = open(&path, size, &options);
        assert!(scan(&table).is_empty());
        assert!(table.internal_get(b"a", true).unwrap().is_none());
    }

    #[test]
    fn test_approximate_offsets_increase() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().block_size(1024).compression(CompressionType::None);
        let entries = sample_entries(5000);
        let (path, size) = write_table(&dir, &options, &entries);
        let table = open(&path, size, &options);

        let start = table.approximate_offset_of(b"key000000");
        let middle = table.approximate_offset_of(b"key002500");
        let end = table.approximate_offset_of(b"zzz");
        assert_eq!(start, 0);
        assert!(middle > start);
        assert!(end > middle);
        assert!(end <= size);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.sst");
        std::fs::write(&path, vec![0u8; 100]).unwrap();
        let options = Options::default();
        let err =
            Table::open(File::open(&path).unwrap(), 100, &options, Arc::new(BytewiseComparator))
                .unwrap_err();
        assert!(err.is_corruption());

        let short =
            Table::open(File::open(&path).unwrap(), 10, &options, Arc::new(BytewiseComparator));
        assert!(short.is_err());
    }

    #[test]
    fn test_corrupted_data_block_detected() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().compression(CompressionType::None);
        let entries = sample_entries(50);
        let (path, size) = write_table(&dir, &options, &entries);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[10] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let table = open(&path, size, &options);
        let mut iter = table.iter(true);
        let err = iter.seek_to_first().unwrap_err();
        assert!(err.is_corruption());
    }
}
