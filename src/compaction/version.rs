//! Immutable snapshots of the file catalog.
//!
//! A [`Version`] lists the table files of every level. Versions are built by
//! the [`VersionSet`](super::VersionSet) and shared through `Arc`; readers
//! and iterators hold one for as long as they need its files.

use super::merge::{find_file, LevelIterator};
use super::{
    total_file_size, FileMetaData, MAX_GRAND_PARENT_OVERLAP_BYTES, MAX_MEM_COMPACT_LEVEL,
    NUM_LEVELS,
};
use crate::cache::TableCache;
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::iterator::BoxedIterator;
use crate::memtable::{
    InternalKey, InternalKeyComparator, LookupKey, LookupResult, ParsedInternalKey, ValueType,
    MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK,
};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// The file charged for a lookup that had to read more than one table.
#[derive(Debug, Clone)]
pub struct SeekStats {
    /// Level of the charged file
    pub level: usize,
    /// The charged file
    pub file: Arc<FileMetaData>,
}

/// A set of table files per level, plus compaction hints.
pub struct Version {
    icmp: InternalKeyComparator,
    pub(crate) files: Vec<Vec<Arc<FileMetaData>>>,

    /// Level with the highest size score and that score, set when the
    /// version is installed
    pub(crate) compaction_level: usize,
    pub(crate) compaction_score: f64,

    /// File whose seek budget ran out first
    file_to_compact: Mutex<Option<(usize, Arc<FileMetaData>)>>,
}

impl Version {
    /// Creates an empty version.
    pub fn new(icmp: InternalKeyComparator) -> Self {
        Self {
            icmp,
            files: vec![Vec::new(); NUM_LEVELS],
            compaction_level: 0,
            compaction_score: -1.0,
            file_to_compact: Mutex::new(None),
        }
    }

    /// The internal key comparator.
    pub fn comparator(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    /// Files at `level`; level 0 in insertion order, others by smallest key.
    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.files[level]
    }

    /// Number of files at `level`.
    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    /// Total bytes at `level`.
    pub fn num_level_bytes(&self, level: usize) -> u64 {
        total_file_size(&self.files[level])
    }

    /// Highest size score computed for this version.
    pub fn compaction_score(&self) -> f64 {
        self.compaction_score
    }

    /// Level the compaction score belongs to.
    pub fn compaction_level(&self) -> usize {
        self.compaction_level
    }

    /// File selected by exhausted seek budget, if any.
    pub fn file_to_compact(&self) -> Option<(usize, Arc<FileMetaData>)> {
        self.file_to_compact.lock().clone()
    }

    /// Returns true if a size- or seek-triggered compaction is due.
    pub fn needs_compaction(&self) -> bool {
        self.compaction_score >= 1.0 || self.file_to_compact.lock().is_some()
    }

    /// Looks up `key` in the tables of this version.
    ///
    /// Level 0 files covering the key are searched newest first; every other
    /// level has at most one candidate file. The search stops at the first
    /// entry for the user key. The returned stats name the file to charge
    /// when more than one table was read.
    pub fn get(
        &self,
        key: &LookupKey,
        table_cache: &TableCache,
        verify_checksums: bool,
        fill_cache: bool,
    ) -> Result<(LookupResult, Option<SeekStats>)> {
        let ucmp = self.icmp.user_comparator().clone();
        let user_key = key.user_key();
        let ikey = key.internal_key();

        let mut stats: Option<SeekStats> = None;
        let mut last_read: Option<(usize, Arc<FileMetaData>)> = None;

        for level in 0..NUM_LEVELS {
            let files = &self.files[level];
            if files.is_empty() {
                continue;
            }

            let candidates: Vec<Arc<FileMetaData>> = if level == 0 {
                let mut covering: Vec<Arc<FileMetaData>> = files
                    .iter()
                    .filter(|f| {
                        ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less
                            && ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater
                    })
                    .cloned()
                    .collect();
                covering.sort_by(|a, b| b.number.cmp(&a.number));
                covering
            } else {
                let index = find_file(&self.icmp, files, ikey);
                match files.get(index) {
                    Some(f) if ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less => {
                        vec![f.clone()]
                    }
                    _ => Vec::new(),
                }
            };

            for file in candidates {
                if stats.is_none() {
                    if let Some((last_level, last_file)) = last_read.take() {
                        stats = Some(SeekStats { level: last_level, file: last_file });
                    }
                }
                last_read = Some((level, file.clone()));

                let found = table_cache.get(
                    file.number,
                    file.file_size,
                    ikey,
                    verify_checksums,
                    fill_cache,
                )?;
                if let Some((found_key, value)) = found {
                    let parsed = ParsedInternalKey::parse(&found_key).map_err(|_| {
                        Error::corruption(format!(
                            "corrupted key for {:?} in table #{}",
                            user_key, file.number
                        ))
                    })?;
                    if ucmp.compare(parsed.user_key, user_key) == Ordering::Equal {
                        let result = match parsed.value_type {
                            ValueType::Value => LookupResult::Found(value),
                            ValueType::Deletion => LookupResult::Deleted,
                        };
                        return Ok((result, stats));
                    }
                }
            }
        }

        Ok((LookupResult::NotFound, stats))
    }

    /// Charges one seek to the file in `stats`.
    ///
    /// Returns true when the file's budget is exhausted and it became the
    /// seek compaction candidate.
    pub fn update_stats(&self, stats: SeekStats) -> bool {
        if stats.level + 1 >= NUM_LEVELS {
            return false;
        }
        if stats.file.charge_seek() <= 0 {
            let mut file_to_compact = self.file_to_compact.lock();
            if file_to_compact.is_none() {
                *file_to_compact = Some((stats.level, stats.file));
                return true;
            }
        }
        false
    }

    /// Returns true if some file at `level` overlaps the user key range.
    ///
    /// `None` bounds are open: before all keys / after all keys.
    pub fn overlap_in_level(
        &self,
        level: usize,
        smallest: Option<&[u8]>,
        largest: Option<&[u8]>,
    ) -> bool {
        let ucmp = self.icmp.user_comparator();
        let files = &self.files[level];

        let after_file = |f: &FileMetaData| {
            smallest.is_some_and(|s| ucmp.compare(s, f.largest.user_key()) == Ordering::Greater)
        };
        let before_file = |f: &FileMetaData| {
            largest.is_some_and(|l| ucmp.compare(l, f.smallest.user_key()) == Ordering::Less)
        };

        if level == 0 {
            return files.iter().any(|f| !after_file(f) && !before_file(f));
        }

        let index = match smallest {
            Some(s) => {
                let seek_key = InternalKey::new(s, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
                find_file(&self.icmp, files, seek_key.encode())
            }
            None => 0,
        };
        files.get(index).is_some_and(|f| !before_file(f))
    }

    /// Level a fresh memtable flush covering `[smallest, largest]` should go to.
    ///
    /// The output is pushed past level 0 while the next level has no overlap
    /// and the level after that overlaps by no more than
    /// `MAX_GRAND_PARENT_OVERLAP_BYTES`.
    pub fn pick_level_for_memtable_output(&self, smallest: &[u8], largest: &[u8]) -> usize {
        let mut level = 0;
        if self.overlap_in_level(0, Some(smallest), Some(largest)) {
            return level;
        }

        let start = InternalKey::new(smallest, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
        let limit = InternalKey::new(largest, 0, ValueType::Deletion);
        while level < MAX_MEM_COMPACT_LEVEL {
            if self.overlap_in_level(level + 1, Some(smallest), Some(largest)) {
                break;
            }
            if level + 2 < NUM_LEVELS {
                let overlaps = self.overlapping_inputs(level + 2, Some(&start), Some(&limit));
                if total_file_size(&overlaps) > MAX_GRAND_PARENT_OVERLAP_BYTES {
                    break;
                }
            }
            level += 1;
        }
        level
    }

    /// Files at `level` whose user key range intersects `[begin, end]`.
    ///
    /// At level 0 the range grows to cover every file it pulls in, since
    /// level 0 files may overlap one another.
    pub fn overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Vec<Arc<FileMetaData>> {
        let ucmp = self.icmp.user_comparator();
        let mut user_begin = begin.map(|k| k.user_key().to_vec());
        let mut user_end = end.map(|k| k.user_key().to_vec());

        let mut inputs = Vec::new();
        let mut i = 0;
        while i < self.files[level].len() {
            let file = &self.files[level][i];
            i += 1;
            let file_start = file.smallest.user_key();
            let file_limit = file.largest.user_key();

            let before = user_begin
                .as_deref()
                .is_some_and(|b| ucmp.compare(file_limit, b) == Ordering::Less);
            let after = user_end
                .as_deref()
                .is_some_and(|e| ucmp.compare(file_start, e) == Ordering::Greater);
            if before || after {
                continue;
            }

            inputs.push(file.clone());
            if level == 0 {
                // Restart the search if this file widens the range.
                let widens_start = user_begin
                    .as_deref()
                    .is_some_and(|b| ucmp.compare(file_start, b) == Ordering::Less);
                let widens_end = user_end
                    .as_deref()
                    .is_some_and(|e| ucmp.compare(file_limit, e) == Ordering::Greater);
                if widens_start {
                    user_begin = Some(file_start.to_vec());
                    inputs.clear();
                    i = 0;
                } else if widens_end {
                    user_end = Some(file_limit.to_vec());
                    inputs.clear();
                    i = 0;
                }
            }
        }
        inputs
    }

    /// Approximate byte offset of `key` across the whole database.
    pub fn approximate_offset_of(
        &self,
        key: &InternalKey,
        table_cache: &TableCache,
    ) -> Result<u64> {
        let mut result = 0;
        for (level, files) in self.files.iter().enumerate() {
            for file in files {
                if self.icmp.compare(file.largest.encode(), key.encode()) != Ordering::Greater {
                    // Entirely before the key
                    result += file.file_size;
                } else if self.icmp.compare(file.smallest.encode(), key.encode())
                    == Ordering::Greater
                {
                    // Entirely after the key; later files in sorted levels are too.
                    if level > 0 {
                        break;
                    }
                } else {
                    result += table_cache.approximate_offset_of(
                        file.number,
                        file.file_size,
                        key.encode(),
                    )?;
                }
            }
        }
        Ok(result)
    }

    /// Appends iterators covering every file of this version.
    ///
    /// Each level 0 file gets its own iterator; every other non-empty level
    /// is walked by a single concatenating iterator.
    pub fn add_iterators(
        &self,
        table_cache: &Arc<TableCache>,
        verify_checksums: bool,
        out: &mut Vec<BoxedIterator>,
    ) -> Result<()> {
        for file in &self.files[0] {
            out.push(Box::new(table_cache.iter(file.number, file.file_size, verify_checksums)?));
        }
        let icmp: Arc<dyn Comparator> = Arc::new(self.icmp.clone());
        for files in self.files.iter().skip(1) {
            if !files.is_empty() {
                out.push(Box::new(LevelIterator::new(
                    table_cache.clone(),
                    files.clone(),
                    icmp.clone(),
                    verify_checksums,
                )));
            }
        }
        Ok(())
    }

    /// Checks that files of every level above 0 are sorted and disjoint.
    pub fn check_no_overlap(&self) -> Result<()> {
        for (level, files) in self.files.iter().enumerate().skip(1) {
            for pair in files.windows(2) {
                if self.icmp.compare(pair[0].largest.encode(), pair[1].smallest.encode())
                    != Ordering::Less
                {
                    return Err(Error::corruption(format!(
                        "overlapping files #{} and #{} in level {}",
                        pair[0].number, pair[1].number, level
                    )));
                }
            }
        }
        Ok(())
    }

    /// One-line file count summary, e.g. `files[ 2 1 0 0 0 0 0 ]`.
    pub fn level_summary(&self) -> String {
        let counts: Vec<String> = self.files.iter().map(|f| f.len().to_string()).collect();
        format!("files[ {} ]", counts.join(" "))
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_map();
        for (level, files) in self.files.iter().enumerate() {
            if !files.is_empty() {
                list.entry(&level, files);
            }
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::config::Options;
    use crate::filename::table_file_name;
    use crate::memtable::SequenceNumber;
    use crate::sstable::TableBuilder;
    use std::fs::File;
    use tempfile::TempDir;

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn meta(number: u64, smallest: &str, largest: &str, size: u64) -> Arc<FileMetaData> {
        Arc::new(FileMetaData::new(
            number,
            size,
            InternalKey::new(smallest.as_bytes(), 100, ValueType::Value),
            InternalKey::new(largest.as_bytes(), 100, ValueType::Value),
        ))
    }

    /// Writes a real table so lookups go through the table cache.
    fn table(
        dir: &TempDir,
        number: u64,
        entries: &[(&str, SequenceNumber, ValueType, &str)],
    ) -> Arc<FileMetaData> {
        let cmp: Arc<dyn Comparator> = Arc::new(icmp());
        let file = File::create(dir.path().join(table_file_name(number))).unwrap();
        let mut builder = TableBuilder::new(file, &Options::default(), cmp);
        let mut keys = Vec::new();
        for (key, seq, kind, value) in entries {
            let ikey = InternalKey::new(key.as_bytes(), *seq, *kind);
            builder.add(ikey.encode(), value.as_bytes()).unwrap();
            keys.push(ikey);
        }
        let size = builder.finish().unwrap();
        Arc::new(FileMetaData::new(number, size, keys[0].clone(), keys[keys.len() - 1].clone()))
    }

    fn cache(dir: &TempDir) -> TableCache {
        TableCache::new(dir.path(), &Options::default(), Arc::new(icmp()), 100)
    }

    #[test]
    fn test_level0_newest_file_wins() {
        let dir = TempDir::new().unwrap();
        let mut version = Version::new(icmp());
        version.files[0].push(table(&dir, 1, &[("k", 1, ValueType::Value, "old")]));
        version.files[0].push(table(&dir, 2, &[("k", 5, ValueType::Value, "new")]));
        let cache = cache(&dir);

        let (result, _) = version.get(&LookupKey::new(b"k", 10), &cache, true, true).unwrap();
        assert_eq!(result, LookupResult::Found(b"new".to_vec()));
    }

    #[test]
    fn test_tombstone_in_upper_level_hides_lower() {
        let dir = TempDir::new().unwrap();
        let mut version = Version::new(icmp());
        version.files[0].push(table(&dir, 3, &[("k", 9, ValueType::Deletion, "")]));
        version.files[1].push(table(
            &dir,
            2,
            &[("a", 1, ValueType::Value, "a"), ("k", 2, ValueType::Value, "v")],
        ));
        let cache = cache(&dir);

        let (result, _) = version.get(&LookupKey::new(b"k", 10), &cache, true, true).unwrap();
        assert_eq!(result, LookupResult::Deleted);

        // Reading below the tombstone's sequence falls through to level 1.
        let (result, stats) = version.get(&LookupKey::new(b"k", 5), &cache, true, true).unwrap();
        assert_eq!(result, LookupResult::Found(b"v".to_vec()));
        let stats = stats.unwrap();
        assert_eq!((stats.level, stats.file.number), (0, 3));
    }

    #[test]
    fn test_single_file_read_charges_nothing() {
        let dir = TempDir::new().unwrap();
        let mut version = Version::new(icmp());
        version.files[1].push(table(
            &dir,
            4,
            &[("a", 1, ValueType::Value, "1"), ("c", 1, ValueType::Value, "3")],
        ));
        let cache = cache(&dir);

        let (result, stats) = version.get(&LookupKey::new(b"b", 10), &cache, true, true).unwrap();
        assert_eq!(result, LookupResult::NotFound);
        assert!(stats.is_none());
    }

    #[test]
    fn test_seek_budget_triggers_compaction() {
        let version = Version::new(icmp());
        let file = meta(7, "a", "z", 1000);
        file.set_allowed_seeks(2);

        assert!(!version.update_stats(SeekStats { level: 1, file: file.clone() }));
        assert!(version.update_stats(SeekStats { level: 1, file: file.clone() }));
        assert!(version.needs_compaction());
        assert_eq!(version.file_to_compact().unwrap().1.number, 7);
    }

    #[test]
    fn test_overlap_in_level() {
        let mut version = Version::new(icmp());
        version.files[0].push(meta(1, "m", "p", 10));
        version.files[1].push(meta(2, "c", "e", 10));
        version.files[1].push(meta(3, "h", "j", 10));

        assert!(version.overlap_in_level(0, Some(b"a"), Some(b"m")));
        assert!(!version.overlap_in_level(0, Some(b"q"), Some(b"z")));
        assert!(version.overlap_in_level(1, Some(b"d"), Some(b"d")));
        assert!(!version.overlap_in_level(1, Some(b"f"), Some(b"g")));
        assert!(version.overlap_in_level(1, Some(b"f"), Some(b"h")));
        assert!(!version.overlap_in_level(1, Some(b"k"), None));
        assert!(version.overlap_in_level(1, None, Some(b"c")));
        assert!(!version.overlap_in_level(2, None, None));
    }

    #[test]
    fn test_pick_level_for_memtable_output() {
        let mut version = Version::new(icmp());
        assert_eq!(version.pick_level_for_memtable_output(b"a", b"b"), MAX_MEM_COMPACT_LEVEL);

        version.files[1].push(meta(1, "a", "c", 10));
        assert_eq!(version.pick_level_for_memtable_output(b"b", b"d"), 0);
        assert_eq!(version.pick_level_for_memtable_output(b"x", b"z"), MAX_MEM_COMPACT_LEVEL);

        // Heavy grandparent overlap stops the push at level 0.
        version.files[2].push(meta(2, "x", "z", MAX_GRAND_PARENT_OVERLAP_BYTES + 1));
        assert_eq!(version.pick_level_for_memtable_output(b"x", b"z"), 0);
    }

    #[test]
    fn test_overlapping_inputs_expands_level0() {
        let mut version = Version::new(icmp());
        version.files[0].push(meta(1, "a", "c", 10));
        version.files[0].push(meta(2, "b", "f", 10));
        version.files[0].push(meta(3, "e", "g", 10));
        version.files[0].push(meta(4, "x", "z", 10));

        let begin = InternalKey::new(b"a", MAX_SEQUENCE_NUMBER, ValueType::Value);
        let end = InternalKey::new(b"b", 0, ValueType::Value);
        let mut numbers: Vec<u64> = version
            .overlapping_inputs(0, Some(&begin), Some(&end))
            .iter()
            .map(|f| f.number)
            .collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2, 3]);

        assert_eq!(version.overlapping_inputs(0, None, None).len(), 4);
    }

    #[test]
    fn test_check_no_overlap() {
        let mut version = Version::new(icmp());
        version.files[2].push(meta(1, "a", "c", 10));
        version.files[2].push(meta(2, "d", "f", 10));
        assert!(version.check_no_overlap().is_ok());

        version.files[2].push(meta(3, "f", "h", 10));
        assert!(version.check_no_overlap().unwrap_err().is_corruption());
    }

    #[test]
    fn test_approximate_offset_of() {
        let dir = TempDir::new().unwrap();
        let mut version = Version::new(icmp());
        let first =
            table(&dir, 1, &[("a", 1, ValueType::Value, "x"), ("b", 1, ValueType::Value, "y")]);
        let second =
            table(&dir, 2, &[("m", 1, ValueType::Value, "x"), ("n", 1, ValueType::Value, "y")]);
        let first_size = first.file_size;
        version.files[1].push(first);
        version.files[1].push(second);
        let cache = cache(&dir);

        let start = InternalKey::new(b"", MAX_SEQUENCE_NUMBER, ValueType::Value);
        assert_eq!(version.approximate_offset_of(&start, &cache).unwrap(), 0);

        let middle = InternalKey::new(b"c", MAX_SEQUENCE_NUMBER, ValueType::Value);
        assert_eq!(version.approximate_offset_of(&middle, &cache).unwrap(), first_size);

        let end = InternalKey::new(b"zz", MAX_SEQUENCE_NUMBER, ValueType::Value);
        assert_eq!(
            version.approximate_offset_of(&end, &cache).unwrap(),
            version.num_level_bytes(1)
        );
    }

    #[test]
    fn test_level_summary() {
        let mut version = Version::new(icmp());
        version.files[0].push(meta(1, "a", "b", 1));
        version.files[3].push(meta(2, "a", "b", 1));
        assert_eq!(version.level_summary(), "files[ 1 0 0 1 0 0 0 ]");
    }
}
