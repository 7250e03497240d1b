//! # MemTable - In-Memory Sorted Table
//!
//! The MemTable is the in-memory write buffer. Every put or delete is inserted
//! as a new entry keyed by its internal key; nothing is ever overwritten, so
//! several versions of one user key coexist with the newest sorting first.
//!
//! ## Design
//!
//! - Based on crossbeam-skiplist for lock-free concurrent reads
//! - Ordered by the internal key comparator built over the user comparator
//! - Tracks an approximate memory footprint to decide when to swap it out
//! - Iterators own an `Arc` to the table, so a flushed table stays readable
//!   until the last iterator is dropped

mod internal_key;

pub use internal_key::{
    extract_user_key, pack_sequence_and_type, InternalKey, InternalKeyComparator, LookupKey,
    ParsedInternalKey, SequenceNumber, ValueType, INTERNAL_KEY_TRAILER_LEN, MAX_SEQUENCE_NUMBER,
    VALUE_TYPE_FOR_SEEK,
};

use crate::comparator::Comparator;
use crate::error::Result;
use crate::iterator::InternalIterator;
use crossbeam_skiplist::map::Entry;
use crossbeam_skiplist::SkipMap;
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Per-entry bookkeeping overhead charged to the memory estimate.
const ENTRY_OVERHEAD: usize = 16;

/// Skip list key: an encoded internal key plus the comparator that orders it.
struct MemKey {
    rep: Vec<u8>,
    cmp: Arc<InternalKeyComparator>,
}

impl PartialEq for MemKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MemKey {}

impl PartialOrd for MemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp.compare(&self.rep, &other.rep)
    }
}

/// Result of a point lookup in a MemTable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// The newest visible entry is a value.
    Found(Vec<u8>),
    /// The newest visible entry is a tombstone.
    Deleted,
    /// No entry for the key; the lookup must continue in the tables.
    NotFound,
}

/// MemTable stores recent writes in memory using a SkipList.
///
/// # Example
///
/// ```rust
/// use lsmdb::comparator::BytewiseComparator;
/// use lsmdb::memtable::{LookupKey, LookupResult, MemTable, ValueType};
/// use std::sync::Arc;
///
/// let memtable = MemTable::new(Arc::new(BytewiseComparator));
/// memtable.add(1, ValueType::Value, b"key1", b"value1");
/// assert_eq!(
///     memtable.get(&LookupKey::new(b"key1", 2)),
///     LookupResult::Found(b"value1".to_vec())
/// );
/// ```
pub struct MemTable {
    /// The underlying SkipList storing encoded InternalKey -> Value
    data: SkipMap<MemKey, Vec<u8>>,

    /// Approximate size in bytes (keys + values + overhead)
    size: AtomicUsize,

    cmp: Arc<InternalKeyComparator>,
}

impl MemTable {
    /// Creates a new empty MemTable ordered by `user_comparator`.
    pub fn new(user_comparator: Arc<dyn Comparator>) -> Self {
        Self {
            data: SkipMap::new(),
            size: AtomicUsize::new(0),
            cmp: Arc::new(InternalKeyComparator::new(user_comparator)),
        }
    }

    /// Inserts an entry. Existing entries are never replaced.
    ///
    /// # Arguments
    ///
    /// * `sequence` - The sequence number for this operation
    /// * `value_type` - Value or Deletion; deletions carry an empty value
    /// * `key` - The user key
    /// * `value` - The value to store
    pub fn add(&self, sequence: SequenceNumber, value_type: ValueType, key: &[u8], value: &[u8]) {
        let internal_key = InternalKey::new(key, sequence, value_type);
        let entry_size = internal_key.encoded_size() + value.len() + ENTRY_OVERHEAD;

        let key = MemKey { rep: internal_key.into_bytes(), cmp: self.cmp.clone() };
        self.data.insert(key, value.to_vec());
        self.size.fetch_add(entry_size, AtomicOrdering::Relaxed);
    }

    /// Looks up the newest entry for the user key visible at the lookup's sequence.
    ///
    /// Seeks to the first entry `>= (user_key, sequence, VALUE)`; if its user
    /// key matches, the entry decides the answer.
    pub fn get(&self, key: &LookupKey) -> LookupResult {
        let seek_key = MemKey { rep: key.internal_key().to_vec(), cmp: self.cmp.clone() };
        let Some(entry) = self.data.lower_bound(Bound::Included(&seek_key)) else {
            return LookupResult::NotFound;
        };

        let Ok(parsed) = ParsedInternalKey::parse(&entry.key().rep) else {
            return LookupResult::NotFound;
        };
        if self.cmp.user_comparator().compare(parsed.user_key, key.user_key()) != Ordering::Equal {
            return LookupResult::NotFound;
        }

        match parsed.value_type {
            ValueType::Value => LookupResult::Found(entry.value().clone()),
            ValueType::Deletion => LookupResult::Deleted,
        }
    }

    /// Returns the approximate memory used by the MemTable in bytes.
    pub fn approximate_memory_usage(&self) -> usize {
        self.size.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of entries in the MemTable.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the MemTable contains no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The internal key comparator ordering this table.
    pub fn comparator(&self) -> &Arc<InternalKeyComparator> {
        &self.cmp
    }

    /// Returns an iterator over all entries in internal key order.
    ///
    /// The iterator keeps the MemTable alive; it starts unpositioned.
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator { current: None, table: self.clone() }
    }
}

/// Iterator over MemTable entries in sorted order.
pub struct MemTableIterator {
    // Declared before `table` so the entry is released first.
    current: Option<Entry<'static, MemKey, Vec<u8>>>,
    table: Arc<MemTable>,
}

impl MemTableIterator {
    fn extend(
        entry: Option<Entry<'_, MemKey, Vec<u8>>>,
    ) -> Option<Entry<'static, MemKey, Vec<u8>>> {
        // SAFETY: `table` keeps the SkipMap alive for as long as the entry is held,
        // and `current` is dropped before `table`.
        entry.map(|e| unsafe {
            std::mem::transmute::<Entry<'_, MemKey, Vec<u8>>, Entry<'static, MemKey, Vec<u8>>>(e)
        })
    }
}

impl InternalIterator for MemTableIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.current = Self::extend(self.table.data.front());
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        let seek_key = MemKey { rep: target.to_vec(), cmp: self.table.cmp.clone() };
        self.current = Self::extend(self.table.data.lower_bound(Bound::Included(&seek_key)));
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        self.current = self.current.as_ref().and_then(|entry| entry.next());
        Ok(())
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|e| e.key().rep.as_slice()).unwrap_or_default()
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map(|e| e.value().as_slice()).unwrap_or_default()
    }
}
