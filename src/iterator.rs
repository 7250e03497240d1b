//! Iterators over internal entries and the user-facing database iterator.
//!
//! Every source of entries (MemTable, table block, whole table, a level's
//! file list, the merge of all of them) implements [`InternalIterator`] and
//! yields encoded internal keys in internal key order. [`DbIterator`] sits on
//! top and turns that stream into the user view: one entry per user key,
//! newest version visible at the read sequence, tombstoned keys hidden.

use crate::comparator::Comparator;
use crate::compaction::Version;
use crate::error::Result;
use crate::memtable::{LookupKey, ParsedInternalKey, SequenceNumber, ValueType};
use std::cmp::Ordering;
use std::sync::Arc;

/// A positioned cursor over `(internal key, value)` entries.
///
/// Iterators start unpositioned; call [`seek_to_first`](Self::seek_to_first)
/// or [`seek`](Self::seek) before reading. `key` and `value` may only be
/// called while [`valid`](Self::valid) returns true.
pub trait InternalIterator {
    /// Returns true if the iterator is positioned at an entry.
    fn valid(&self) -> bool;

    /// Positions at the first entry.
    fn seek_to_first(&mut self) -> Result<()>;

    /// Positions at the first entry with key `>= target`.
    fn seek(&mut self, target: &[u8]) -> Result<()>;

    /// Advances to the next entry.
    fn next(&mut self) -> Result<()>;

    /// The current key.
    fn key(&self) -> &[u8];

    /// The current value.
    fn value(&self) -> &[u8];
}

/// An owned, dynamically dispatched internal iterator.
pub type BoxedIterator = Box<dyn InternalIterator>;

/// An iterator that never yields anything.
#[derive(Debug, Default)]
pub struct EmptyIterator;

impl InternalIterator for EmptyIterator {
    fn valid(&self) -> bool {
        false
    }

    fn seek_to_first(&mut self) -> Result<()> {
        Ok(())
    }

    fn seek(&mut self, _target: &[u8]) -> Result<()> {
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        Ok(())
    }

    fn key(&self) -> &[u8] {
        &[]
    }

    fn value(&self) -> &[u8] {
        &[]
    }
}

/// An iterator over user keys and values in the database.
///
/// The iterator reads a consistent view: it holds the Version it was created
/// from (so none of its table files can be deleted underneath it) and filters
/// out every entry newer than its sequence number.
///
/// # Example
///
/// ```rust,no_run
/// use lsmdb::{Options, ReadOptions, DB};
///
/// # fn main() -> Result<(), lsmdb::Error> {
/// let db = DB::open("./data", Options::default())?;
/// db.put(b"key1", b"value1")?;
/// db.put(b"key2", b"value2")?;
///
/// let mut iter = db.iter(&ReadOptions::default())?;
/// iter.seek_to_first()?;
/// while iter.valid() {
///     println!("{:?} => {:?}", iter.key(), iter.value());
///     iter.next()?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct DbIterator {
    inner: BoxedIterator,
    user_comparator: Arc<dyn Comparator>,
    sequence: SequenceNumber,

    saved_key: Vec<u8>,
    saved_value: Vec<u8>,
    valid: bool,

    // Keeps every table referenced by `inner` registered as live.
    _version: Arc<Version>,
}

impl DbIterator {
    pub(crate) fn new(
        inner: BoxedIterator,
        user_comparator: Arc<dyn Comparator>,
        sequence: SequenceNumber,
        version: Arc<Version>,
    ) -> Self {
        Self {
            inner,
            user_comparator,
            sequence,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            valid: false,
            _version: version,
        }
    }

    /// Returns true if the iterator is positioned at a live key.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Positions at the first live key.
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.inner.seek_to_first()?;
        self.find_next_user_entry(None)
    }

    /// Positions at the first live key `>= key`.
    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        let target = LookupKey::new(key, self.sequence);
        self.inner.seek(target.internal_key())?;
        self.find_next_user_entry(None)
    }

    /// Advances to the next live key.
    pub fn next(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        let skip = std::mem::take(&mut self.saved_key);
        self.inner.next()?;
        self.find_next_user_entry(Some(skip))
    }

    /// The current user key.
    pub fn key(&self) -> &[u8] {
        &self.saved_key
    }

    /// The current value.
    pub fn value(&self) -> &[u8] {
        &self.saved_value
    }

    /// The sequence number this iterator reads at.
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Drains the remaining entries into a vector.
    pub fn collect_remaining(&mut self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        while self.valid {
            entries.push((self.saved_key.clone(), self.saved_value.clone()));
            self.next()?;
        }
        Ok(entries)
    }

    /// Moves `inner` forward to the newest visible value of a user key that
    /// sorts after `skip` (when given) and is not shadowed by a tombstone.
    fn find_next_user_entry(&mut self, mut skip: Option<Vec<u8>>) -> Result<()> {
        while self.inner.valid() {
            let parsed = ParsedInternalKey::parse(self.inner.key())?;
            if parsed.sequence <= self.sequence {
                let hidden = skip.as_deref().is_some_and(|s| {
                    self.user_comparator.compare(parsed.user_key, s) != Ordering::Greater
                });
                if !hidden {
                    match parsed.value_type {
                        ValueType::Deletion => {
                            // Everything older for this user key is shadowed.
                            skip = Some(parsed.user_key.to_vec());
                        }
                        ValueType::Value => {
                            self.saved_key = parsed.user_key.to_vec();
                            self.saved_value = self.inner.value().to_vec();
                            self.valid = true;
                            return Ok(());
                        }
                    }
                }
            }
            self.inner.next()?;
        }

        self.valid = false;
        self.saved_key.clear();
        self.saved_value.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::memtable::{InternalKeyComparator, MemTable};

    fn iterator_over(entries: &[(&str, u64, ValueType, &str)], sequence: u64) -> DbIterator {
        let memtable = Arc::new(MemTable::new(Arc::new(BytewiseComparator)));
        for (key, seq, value_type, value) in entries {
            memtable.add(*seq, *value_type, key.as_bytes(), value.as_bytes());
        }
        DbIterator::new(
            Box::new(memtable.iter()),
            Arc::new(BytewiseComparator),
            sequence,
            Arc::new(Version::new(InternalKeyComparator::new(Arc::new(BytewiseComparator)))),
        )
    }

    #[test]
    fn test_empty_iterator() {
        let mut iter = EmptyIterator;
        iter.seek_to_first().unwrap();
        assert!(!iter.valid());
    }

    #[test]
    fn test_newest_visible_version_only() {
        let mut iter = iterator_over(
            &[
                ("a", 1, ValueType::Value, "a1"),
                ("a", 2, ValueType::Value, "a2"),
                ("b", 3, ValueType::Value, "b3"),
            ],
            10,
        );
        iter.seek_to_first().unwrap();
        assert_eq!(
            iter.collect_remaining().unwrap(),
            vec![(b"a".to_vec(), b"a2".to_vec()), (b"b".to_vec(), b"b3".to_vec())]
        );
    }

    #[test]
    fn test_tombstones_hide_older_values() {
        let entries = &[
            ("a", 1, ValueType::Value, "1"),
            ("a", 2, ValueType::Value, "2"),
            ("a", 3, ValueType::Deletion, ""),
            ("b", 4, ValueType::Value, "b"),
        ];

        let mut latest = iterator_over(entries, 10);
        latest.seek_to_first().unwrap();
        assert_eq!(latest.collect_remaining().unwrap(), vec![(b"b".to_vec(), b"b".to_vec())]);

        let mut at_two = iterator_over(entries, 2);
        at_two.seek_to_first().unwrap();
        assert_eq!(at_two.collect_remaining().unwrap(), vec![(b"a".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn test_seek() {
        let mut iter = iterator_over(
            &[
                ("apple", 1, ValueType::Value, "1"),
                ("banana", 2, ValueType::Value, "2"),
                ("cherry", 3, ValueType::Value, "3"),
            ],
            10,
        );

        iter.seek(b"b").unwrap();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"banana");

        iter.next().unwrap();
        assert_eq!(iter.key(), b"cherry");

        iter.next().unwrap();
        assert!(!iter.valid());

        iter.seek(b"zzz").unwrap();
        assert!(!iter.valid());
    }
}
