//! Multi-way merge and level concatenation iterators.
//!
//! [`MergingIterator`] merges several sorted internal iterators into a single
//! sorted stream. [`LevelIterator`] walks the non-overlapping files of one
//! level, opening each table only when the scan reaches it.

use super::FileMetaData;
use crate::cache::TableCache;
use crate::comparator::Comparator;
use crate::error::Result;
use crate::iterator::{BoxedIterator, InternalIterator};
use crate::sstable::TableIterator;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Entry in the merge heap
struct HeapEntry {
    key: Vec<u8>,
    child: usize,
    cmp: Arc<dyn Comparator>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap; equal keys prefer the lower child index.
        self.cmp
            .compare(&other.key, &self.key)
            .then_with(|| other.child.cmp(&self.child))
    }
}

/// Merges sorted children into one sorted stream.
///
/// Children are ordered by priority: when two children hold equal keys, the
/// one added first is yielded first. Duplicates are not removed.
pub struct MergingIterator {
    children: Vec<BoxedIterator>,
    heap: BinaryHeap<HeapEntry>,
    current: Option<usize>,
    cmp: Arc<dyn Comparator>,
}

impl MergingIterator {
    /// Create a new merge iterator over `children`.
    pub fn new(cmp: Arc<dyn Comparator>, children: Vec<BoxedIterator>) -> Self {
        Self { heap: BinaryHeap::with_capacity(children.len()), children, current: None, cmp }
    }

    fn push_child(&mut self, child: usize) {
        let iter = &self.children[child];
        if iter.valid() {
            self.heap.push(HeapEntry { key: iter.key().to_vec(), child, cmp: self.cmp.clone() });
        }
    }

    fn rebuild(&mut self) {
        self.heap.clear();
        for child in 0..self.children.len() {
            self.push_child(child);
        }
        self.current = self.heap.pop().map(|entry| entry.child);
    }
}

impl InternalIterator for MergingIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        for child in self.children.iter_mut() {
            child.seek_to_first()?;
        }
        self.rebuild();
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        for child in self.children.iter_mut() {
            child.seek(target)?;
        }
        self.rebuild();
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        let Some(current) = self.current else {
            return Ok(());
        };
        self.children[current].next()?;
        self.push_child(current);
        self.current = self.heap.pop().map(|entry| entry.child);
        Ok(())
    }

    fn key(&self) -> &[u8] {
        self.current.map(|c| self.children[c].key()).unwrap_or_default()
    }

    fn value(&self) -> &[u8] {
        self.current.map(|c| self.children[c].value()).unwrap_or_default()
    }
}

/// Concatenates the tables of one sorted, non-overlapping level.
pub struct LevelIterator {
    table_cache: Arc<TableCache>,
    files: Vec<Arc<FileMetaData>>,
    cmp: Arc<dyn Comparator>,
    verify_checksums: bool,
    /// Index of the file `current` belongs to
    index: usize,
    current: Option<TableIterator>,
}

impl LevelIterator {
    /// Creates an iterator over `files`, which must be sorted by smallest key.
    pub fn new(
        table_cache: Arc<TableCache>,
        files: Vec<Arc<FileMetaData>>,
        cmp: Arc<dyn Comparator>,
        verify_checksums: bool,
    ) -> Self {
        let index = files.len();
        Self { table_cache, files, cmp, verify_checksums, index, current: None }
    }

    fn open(&mut self, index: usize) -> Result<()> {
        self.index = index;
        self.current = match self.files.get(index) {
            Some(file) => {
                Some(self.table_cache.iter(file.number, file.file_size, self.verify_checksums)?)
            }
            None => None,
        };
        Ok(())
    }

    fn skip_exhausted_files(&mut self) -> Result<()> {
        while self.current.as_ref().is_some_and(|it| !it.valid()) {
            self.open(self.index + 1)?;
            if let Some(iter) = self.current.as_mut() {
                iter.seek_to_first()?;
            }
        }
        Ok(())
    }
}

impl InternalIterator for LevelIterator {
    fn valid(&self) -> bool {
        self.current.as_ref().is_some_and(|it| it.valid())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.open(0)?;
        if let Some(iter) = self.current.as_mut() {
            iter.seek_to_first()?;
        }
        self.skip_exhausted_files()
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        let index = find_file(self.cmp.as_ref(), &self.files, target);
        self.open(index)?;
        if let Some(iter) = self.current.as_mut() {
            iter.seek(target)?;
        }
        self.skip_exhausted_files()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(iter) = self.current.as_mut() {
            iter.next()?;
        }
        self.skip_exhausted_files()
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|it| it.key()).unwrap_or_default()
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map(|it| it.value()).unwrap_or_default()
    }
}

/// Index of the first file whose largest key is `>= key`, or `files.len()`.
pub fn find_file(icmp: &dyn Comparator, files: &[Arc<FileMetaData>], key: &[u8]) -> usize {
    files.partition_point(|f| icmp.compare(f.largest.encode(), key) == Ordering::Less)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::config::Options;
    use crate::filename::table_file_name;
    use crate::memtable::{InternalKey, InternalKeyComparator, MemTable, ValueType};
    use crate::sstable::TableBuilder;
    use std::fs::File;
    use tempfile::TempDir;

    fn icmp() -> Arc<dyn Comparator> {
        Arc::new(InternalKeyComparator::new(Arc::new(BytewiseComparator)))
    }

    fn memtable(entries: &[(&str, u64, &str)]) -> BoxedIterator {
        let mem = Arc::new(MemTable::new(Arc::new(BytewiseComparator)));
        for (key, seq, value) in entries {
            mem.add(*seq, ValueType::Value, key.as_bytes(), value.as_bytes());
        }
        Box::new(mem.iter())
    }

    fn collect(iter: &mut dyn InternalIterator) -> Vec<(String, u64, String)> {
        let mut out = Vec::new();
        while iter.valid() {
            let key = InternalKey::decode(iter.key()).unwrap();
            out.push((
                String::from_utf8(key.user_key().to_vec()).unwrap(),
                key.sequence(),
                String::from_utf8(iter.value().to_vec()).unwrap(),
            ));
            iter.next().unwrap();
        }
        out
    }

    #[test]
    fn test_merge_interleaved_children() {
        let mut merged = MergingIterator::new(
            icmp(),
            vec![
                memtable(&[("a", 1, "1"), ("c", 3, "3"), ("e", 5, "5")]),
                memtable(&[("b", 2, "2"), ("d", 4, "4")]),
                memtable(&[]),
            ],
        );
        merged.seek_to_first().unwrap();
        let keys: Vec<String> = collect(&mut merged).into_iter().map(|(k, _, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_merge_orders_versions_newest_first() {
        let mut merged = MergingIterator::new(
            icmp(),
            vec![memtable(&[("k", 9, "new")]), memtable(&[("k", 2, "old"), ("z", 1, "z")])],
        );
        merged.seek_to_first().unwrap();
        let out = collect(&mut merged);
        assert_eq!(out[0], ("k".to_string(), 9, "new".to_string()));
        assert_eq!(out[1], ("k".to_string(), 2, "old".to_string()));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_merge_seek() {
        let mut merged = MergingIterator::new(
            icmp(),
            vec![
                memtable(&[("a", 1, "1"), ("m", 3, "3")]),
                memtable(&[("f", 2, "2"), ("x", 4, "4")]),
            ],
        );
        let target = InternalKey::new(b"g", u64::MAX >> 8, ValueType::Value);
        merged.seek(target.encode()).unwrap();
        let keys: Vec<String> = collect(&mut merged).into_iter().map(|(k, _, _)| k).collect();
        assert_eq!(keys, vec!["m", "x"]);
    }

    fn build_level(dir: &TempDir, groups: &[&[&str]]) -> (Arc<TableCache>, Vec<Arc<FileMetaData>>) {
        let options = Options::default();
        let mut files = Vec::new();
        for (i, keys) in groups.iter().enumerate() {
            let number = i as u64 + 1;
            let file = File::create(dir.path().join(table_file_name(number))).unwrap();
            let mut builder = TableBuilder::new(file, &options, icmp());
            for key in keys.iter() {
                let ikey = InternalKey::new(key.as_bytes(), 1, ValueType::Value);
                builder.add(ikey.encode(), key.as_bytes()).unwrap();
            }
            let size = builder.finish().unwrap();
            files.push(Arc::new(FileMetaData::new(
                number,
                size,
                InternalKey::new(keys[0].as_bytes(), 1, ValueType::Value),
                InternalKey::new(keys[keys.len() - 1].as_bytes(), 1, ValueType::Value),
            )));
        }
        let cache = Arc::new(TableCache::new(dir.path(), &options, icmp(), 16));
        (cache, files)
    }

    #[test]
    fn test_level_iterator_concatenates_files() {
        let dir = TempDir::new().unwrap();
        let (cache, files) = build_level(&dir, &[&["a", "b"], &["c"], &["d", "e", "f"]]);
        let mut iter = LevelIterator::new(cache, files, icmp(), true);

        iter.seek_to_first().unwrap();
        let keys: Vec<String> = collect(&mut iter).into_iter().map(|(k, _, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn test_level_iterator_seek_across_boundary() {
        let dir = TempDir::new().unwrap();
        let (cache, files) = build_level(&dir, &[&["a", "b"], &["m", "n"]]);
        let mut iter = LevelIterator::new(cache, files, icmp(), false);

        let target = InternalKey::new(b"c", u64::MAX >> 8, ValueType::Value);
        iter.seek(target.encode()).unwrap();
        assert!(iter.valid());
        assert_eq!(InternalKey::decode(iter.key()).unwrap().user_key(), b"m");

        let past_end = InternalKey::new(b"zz", u64::MAX >> 8, ValueType::Value);
        iter.seek(past_end.encode()).unwrap();
        assert!(!iter.valid());
    }

    #[test]
    fn test_find_file() {
        let dir = TempDir::new().unwrap();
        let (_, files) = build_level(&dir, &[&["b", "d"], &["f", "h"]]);
        let cmp = icmp();
        let position = |k: &str| {
            let target = InternalKey::new(k.as_bytes(), 100, ValueType::Value);
            find_file(cmp.as_ref(), &files, target.encode())
        };
        assert_eq!(position("a"), 0);
        assert_eq!(position("d"), 0);
        assert_eq!(position("e"), 1);
        assert_eq!(position("z"), 2);
    }
}
