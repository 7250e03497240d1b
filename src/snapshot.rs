//! Snapshot implementation for point-in-time consistent reads.
//!
//! Snapshots allow reading data as it existed at a specific point in time,
//! providing isolation from concurrent writes. Every live snapshot is
//! registered in the database's [`SnapshotList`]; compaction keeps any entry
//! the oldest registered snapshot can still see.

use crate::compaction::Version;
use crate::memtable::SequenceNumber;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A snapshot represents a point-in-time view of the database.
///
/// All read operations through a snapshot will see data as it existed
/// at the time the snapshot was created, even if the data is modified
/// or deleted afterwards. Clones share one registration, which is released
/// when the last clone is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use lsmdb::{Options, ReadOptions, DB};
///
/// # fn main() -> Result<(), lsmdb::Error> {
/// let db = DB::open("./data", Options::default())?;
///
/// db.put(b"key1", b"value1")?;
///
/// // Create a snapshot
/// let snapshot = db.snapshot();
///
/// // Modify the database
/// db.put(b"key1", b"value2")?;
///
/// // Snapshot still sees the old value
/// let read = ReadOptions::new().snapshot(snapshot);
/// assert_eq!(db.get_with(&read, b"key1")?, Some(b"value1".to_vec()));
///
/// // Current DB sees the new value
/// assert_eq!(db.get(b"key1")?, Some(b"value2".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<Registration>,
}

struct Registration {
    sequence: SequenceNumber,
    /// Keeps the tables of the snapshot's version alive
    _version: Arc<Version>,
    list: Arc<SnapshotList>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.list.release(self.sequence);
    }
}

impl Snapshot {
    /// Returns the sequence number of this snapshot.
    pub fn sequence(&self) -> SequenceNumber {
        self.inner.sequence
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot").field("sequence", &self.inner.sequence).finish()
    }
}

/// Sequence numbers of every live snapshot, with multiplicity.
#[derive(Debug, Default)]
pub struct SnapshotList {
    live: Mutex<BTreeMap<SequenceNumber, usize>>,
}

impl SnapshotList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a snapshot at `sequence` over `version`.
    pub fn acquire(self: &Arc<Self>, sequence: SequenceNumber, version: Arc<Version>) -> Snapshot {
        *self.live.lock().entry(sequence).or_insert(0) += 1;
        let registration = Registration { sequence, _version: version, list: self.clone() };
        Snapshot { inner: Arc::new(registration) }
    }

    fn release(&self, sequence: SequenceNumber) {
        let mut live = self.live.lock();
        if let Some(count) = live.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                live.remove(&sequence);
            }
        }
    }

    /// Sequence of the oldest live snapshot.
    pub fn oldest(&self) -> Option<SequenceNumber> {
        self.live.lock().keys().next().copied()
    }

    /// Number of live snapshots.
    pub fn len(&self) -> usize {
        self.live.lock().values().sum()
    }

    /// Returns true if no snapshot is live.
    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }
}
