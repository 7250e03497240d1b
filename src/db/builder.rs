//! Writes a sorted stream of internal entries into a new table file.

use crate::cache::TableCache;
use crate::comparator::Comparator;
use crate::compaction::FileMetaData;
use crate::config::Options;
use crate::error::Result;
use crate::filename::{db_path, table_file_name};
use crate::iterator::InternalIterator;
use crate::memtable::InternalKey;
use crate::sstable::TableBuilder;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

/// Builds table `number` from every entry of `iter`.
///
/// Returns `None` (and leaves no file behind) if the iterator is empty. The
/// finished table is opened through the table cache once to make sure it is
/// readable before it is referenced by a version.
pub(crate) fn build_table(
    db_dir: &Path,
    options: &Options,
    table_cache: &TableCache,
    comparator: Arc<dyn Comparator>,
    iter: &mut dyn InternalIterator,
    number: u64,
) -> Result<Option<FileMetaData>> {
    let path = db_path(db_dir, &table_file_name(number));
    iter.seek_to_first()?;
    if !iter.valid() {
        return Ok(None);
    }

    let result = (|| -> Result<FileMetaData> {
        let mut builder = TableBuilder::new(File::create(&path)?, options, comparator);
        let smallest = InternalKey::decode(iter.key())?;
        let mut largest = iter.key().to_vec();
        while iter.valid() {
            builder.add(iter.key(), iter.value())?;
            largest.clear();
            largest.extend_from_slice(iter.key());
            iter.next()?;
        }
        let file_size = builder.finish()?;

        let mut check = table_cache.iter(number, file_size, true)?;
        check.seek_to_first()?;
        Ok(FileMetaData::new(number, file_size, smallest, InternalKey::decode(&largest)?))
    })();

    match result {
        Ok(meta) => Ok(Some(meta)),
        Err(e) => {
            log::warn!("Building table #{} failed: {}", number, e);
            table_cache.evict(number);
            let _ = fs::remove_file(&path);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::memtable::{InternalKeyComparator, MemTable, ValueType};
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (Options, TableCache, Arc<dyn Comparator>) {
        let options = Options::default();
        let icmp: Arc<dyn Comparator> =
            Arc::new(InternalKeyComparator::new(Arc::new(BytewiseComparator)));
        let cache = TableCache::new(dir.path(), &options, icmp.clone(), 10);
        (options, cache, icmp)
    }

    #[test]
    fn test_build_from_memtable() {
        let dir = TempDir::new().unwrap();
        let (options, cache, icmp) = setup(&dir);
        let mem = Arc::new(MemTable::new(Arc::new(BytewiseComparator)));
        mem.add(1, ValueType::Value, b"b", b"2");
        mem.add(2, ValueType::Value, b"a", b"1");
        mem.add(3, ValueType::Deletion, b"c", b"");

        let mut iter = mem.iter();
        let meta = build_table(dir.path(), &options, &cache, icmp, &mut iter, 9).unwrap().unwrap();
        assert_eq!(meta.number, 9);
        assert_eq!(meta.smallest.user_key(), b"a");
        assert_eq!(meta.largest.user_key(), b"c");
        assert_eq!(meta.largest.value_type(), ValueType::Deletion);
        let on_disk = fs::metadata(dir.path().join(table_file_name(9))).unwrap().len();
        assert_eq!(meta.file_size, on_disk);
    }

    #[test]
    fn test_empty_input_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let (options, cache, icmp) = setup(&dir);
        let mem = Arc::new(MemTable::new(Arc::new(BytewiseComparator)));

        let mut iter = mem.iter();
        assert!(build_table(dir.path(), &options, &cache, icmp, &mut iter, 4).unwrap().is_none());
        assert!(!dir.path().join(table_file_name(4)).exists());
    }
}
