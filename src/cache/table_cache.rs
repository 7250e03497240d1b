//! Cache of open table handles keyed by file number.

use super::lru::{CacheStats, LruCache};
use crate::comparator::Comparator;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::filename::{db_path, table_file_name};
use crate::sstable::{Table, TableIterator};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

/// Keeps up to `entries` tables open.
///
/// A cache miss opens the file, validates the footer and parses the index
/// block. Iterators hold their own `Arc<Table>`, so an evicted table is
/// closed (and unmapped) only once its last iterator is dropped.
pub struct TableCache {
    db_dir: PathBuf,
    options: Options,
    comparator: Arc<dyn Comparator>,
    cache: LruCache<u64, Arc<Table>>,
}

impl TableCache {
    /// Creates a cache for the tables in `db_dir`.
    ///
    /// `comparator` orders the internal keys stored in the tables.
    pub fn new(
        db_dir: impl Into<PathBuf>,
        options: &Options,
        comparator: Arc<dyn Comparator>,
        entries: usize,
    ) -> Self {
        Self {
            db_dir: db_dir.into(),
            options: options.clone(),
            comparator,
            cache: LruCache::new(entries),
        }
    }

    /// Returns the open table for `file_number`, opening it on a miss.
    ///
    /// With `fill_cache == false` a table opened on a miss is not inserted.
    pub fn find_table(
        &self,
        file_number: u64,
        file_size: u64,
        fill_cache: bool,
    ) -> Result<Arc<Table>> {
        if let Some(table) = self.cache.get(&file_number) {
            return Ok(table);
        }

        let path = db_path(&self.db_dir, &table_file_name(file_number));
        let file = File::open(&path).map_err(|e| {
            Error::not_found(format!("could not open table {}: {}", path.display(), e))
        })?;
        let table = Table::open(file, file_size, &self.options, self.comparator.clone())
            .map_err(|e| match e {
                Error::Corruption(msg) => {
                    Error::corruption(format!("table #{}: {}", file_number, msg))
                }
                other => other,
            })?;
        let table = Arc::new(table);
        log::debug!("Opened table #{} ({} bytes)", file_number, file_size);

        if fill_cache {
            // Evicted handles drop here, outside the cache lock.
            drop(self.cache.insert(file_number, table.clone(), 1));
        }
        Ok(table)
    }

    /// Returns an iterator over the table.
    pub fn iter(
        &self,
        file_number: u64,
        file_size: u64,
        verify_checksums: bool,
    ) -> Result<TableIterator> {
        let table = self.find_table(file_number, file_size, true)?;
        Ok(table.iter(verify_checksums))
    }

    /// Finds the first entry `>= internal_key` in the table.
    pub fn get(
        &self,
        file_number: u64,
        file_size: u64,
        internal_key: &[u8],
        verify_checksums: bool,
        fill_cache: bool,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let table = self.find_table(file_number, file_size, fill_cache)?;
        table.internal_get(internal_key, verify_checksums)
    }

    /// Approximate offset of `internal_key` within the table.
    pub fn approximate_offset_of(
        &self,
        file_number: u64,
        file_size: u64,
        internal_key: &[u8],
    ) -> Result<u64> {
        let table = self.find_table(file_number, file_size, true)?;
        Ok(table.approximate_offset_of(internal_key))
    }

    /// Drops the cached handle for a deleted file.
    pub fn evict(&self, file_number: u64) {
        if self.cache.erase(&file_number).is_some() {
            log::debug!("Evicted table #{} from table cache", file_number);
        }
    }

    /// Closes every cached table not currently in use.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Number of cached tables.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns true if no tables are cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Hit / miss counters.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
