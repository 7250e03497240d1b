//! Catalog deltas recorded in the manifest.
//!
//! A [`VersionEdit`] is encoded as a sequence of `(varint32 tag, payload)`
//! pairs. Replaying every edit of a manifest in order rebuilds the current
//! file catalog and the engine counters.

use crate::coding::{
    get_length_prefixed_slice, get_varint32, get_varint64, put_length_prefixed_slice, put_varint32,
    put_varint64,
};
use crate::error::{Error, Result};
use crate::memtable::InternalKey;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use super::NUM_LEVELS;

/// Metadata of one table file.
///
/// Shared by every [`Version`](super::Version) that contains the file. Only
/// the seek budget changes after construction.
pub struct FileMetaData {
    /// File number; the table lives in `NNNNNN.sst`
    pub number: u64,
    /// File size in bytes
    pub file_size: u64,
    /// Smallest internal key stored in the table
    pub smallest: InternalKey,
    /// Largest internal key stored in the table
    pub largest: InternalKey,
    allowed_seeks: AtomicI64,
}

impl FileMetaData {
    /// Creates metadata with the default seek budget.
    pub fn new(number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        Self { number, file_size, smallest, largest, allowed_seeks: AtomicI64::new(1 << 30) }
    }

    /// Remaining seeks before the file becomes a compaction candidate.
    pub fn allowed_seeks(&self) -> i64 {
        self.allowed_seeks.load(Ordering::Relaxed)
    }

    /// Resets the seek budget.
    pub fn set_allowed_seeks(&self, seeks: i64) {
        self.allowed_seeks.store(seeks, Ordering::Relaxed);
    }

    /// Charges one seek; returns the remaining budget.
    pub fn charge_seek(&self) -> i64 {
        self.allowed_seeks.fetch_sub(1, Ordering::Relaxed) - 1
    }
}

impl Clone for FileMetaData {
    fn clone(&self) -> Self {
        Self {
            number: self.number,
            file_size: self.file_size,
            smallest: self.smallest.clone(),
            largest: self.largest.clone(),
            allowed_seeks: AtomicI64::new(self.allowed_seeks()),
        }
    }
}

impl PartialEq for FileMetaData {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
            && self.file_size == other.file_size
            && self.smallest == other.smallest
            && self.largest == other.largest
    }
}

impl fmt::Debug for FileMetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} ({} bytes) [{:?} .. {:?}]",
            self.number, self.file_size, self.smallest, self.largest
        )
    }
}

/// Field tags of the manifest record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum Tag {
    Comparator = 1,
    LogNumber = 2,
    NextFileNumber = 3,
    LastSequence = 4,
    CompactPointer = 5,
    DeletedFile = 6,
    NewFile = 7,
    // 8 was used for large value refs
    PrevLogNumber = 9,
}

impl Tag {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Tag::Comparator),
            2 => Some(Tag::LogNumber),
            3 => Some(Tag::NextFileNumber),
            4 => Some(Tag::LastSequence),
            5 => Some(Tag::CompactPointer),
            6 => Some(Tag::DeletedFile),
            7 => Some(Tag::NewFile),
            9 => Some(Tag::PrevLogNumber),
            _ => None,
        }
    }
}

/// A delta between two catalog states.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionEdit {
    /// Name of the user comparator
    pub comparator_name: Option<String>,
    /// Oldest log still needed for recovery
    pub log_number: Option<u64>,
    /// Log being compacted when the edit was written
    pub prev_log_number: Option<u64>,
    /// Next unused file number
    pub next_file_number: Option<u64>,
    /// Last sequence number in use
    pub last_sequence: Option<u64>,
    /// Per-level compaction cursors
    pub compact_pointers: Vec<(usize, InternalKey)>,
    /// `(level, file number)` pairs removed by this edit
    pub deleted_files: BTreeSet<(usize, u64)>,
    /// Files added by this edit
    pub new_files: Vec<(usize, FileMetaData)>,
}

impl VersionEdit {
    /// Creates an empty edit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the comparator name.
    pub fn set_comparator_name(&mut self, name: impl Into<String>) {
        self.comparator_name = Some(name.into());
    }

    /// Sets the log number.
    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    /// Sets the previous log number.
    pub fn set_prev_log_number(&mut self, number: u64) {
        self.prev_log_number = Some(number);
    }

    /// Sets the next file number.
    pub fn set_next_file_number(&mut self, number: u64) {
        self.next_file_number = Some(number);
    }

    /// Sets the last sequence number.
    pub fn set_last_sequence(&mut self, sequence: u64) {
        self.last_sequence = Some(sequence);
    }

    /// Records the compaction cursor of `level`.
    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.push((level, key));
    }

    /// Adds a table file at `level`.
    pub fn add_file(
        &mut self,
        level: usize,
        number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) {
        self.new_files.push((level, FileMetaData::new(number, file_size, smallest, largest)));
    }

    /// Removes table `number` from `level`.
    pub fn delete_file(&mut self, level: usize, number: u64) {
        self.deleted_files.insert((level, number));
    }

    /// Serializes the edit.
    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(64);

        if let Some(name) = &self.comparator_name {
            put_varint32(&mut dst, Tag::Comparator as u32);
            put_length_prefixed_slice(&mut dst, name.as_bytes());
        }
        if let Some(number) = self.log_number {
            put_varint32(&mut dst, Tag::LogNumber as u32);
            put_varint64(&mut dst, number);
        }
        if let Some(number) = self.prev_log_number {
            put_varint32(&mut dst, Tag::PrevLogNumber as u32);
            put_varint64(&mut dst, number);
        }
        if let Some(number) = self.next_file_number {
            put_varint32(&mut dst, Tag::NextFileNumber as u32);
            put_varint64(&mut dst, number);
        }
        if let Some(sequence) = self.last_sequence {
            put_varint32(&mut dst, Tag::LastSequence as u32);
            put_varint64(&mut dst, sequence);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(&mut dst, Tag::CompactPointer as u32);
            put_varint32(&mut dst, *level as u32);
            put_length_prefixed_slice(&mut dst, key.encode());
        }
        for (level, number) in &self.deleted_files {
            put_varint32(&mut dst, Tag::DeletedFile as u32);
            put_varint32(&mut dst, *level as u32);
            put_varint64(&mut dst, *number);
        }
        for (level, file) in &self.new_files {
            put_varint32(&mut dst, Tag::NewFile as u32);
            put_varint32(&mut dst, *level as u32);
            put_varint64(&mut dst, file.number);
            put_varint64(&mut dst, file.file_size);
            put_length_prefixed_slice(&mut dst, file.smallest.encode());
            put_length_prefixed_slice(&mut dst, file.largest.encode());
        }
        dst
    }

    /// Parses an encoded edit.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corruption` for unknown tags, bad levels or truncated
    /// fields.
    pub fn decode(src: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        let mut input = src;

        while !input.is_empty() {
            let raw_tag = get_varint32(&mut input)?;
            let tag = Tag::from_u32(raw_tag)
                .ok_or_else(|| Error::corruption(format!("VersionEdit: unknown tag {}", raw_tag)))?;

            match tag {
                Tag::Comparator => {
                    let name = get_length_prefixed_slice(&mut input)?;
                    let name = std::str::from_utf8(name).map_err(|_| {
                        Error::corruption("VersionEdit: comparator name is not UTF-8")
                    })?;
                    edit.comparator_name = Some(name.to_string());
                }
                Tag::LogNumber => edit.log_number = Some(get_varint64(&mut input)?),
                Tag::PrevLogNumber => edit.prev_log_number = Some(get_varint64(&mut input)?),
                Tag::NextFileNumber => edit.next_file_number = Some(get_varint64(&mut input)?),
                Tag::LastSequence => edit.last_sequence = Some(get_varint64(&mut input)?),
                Tag::CompactPointer => {
                    let level = get_level(&mut input)?;
                    let key = get_internal_key(&mut input)?;
                    edit.compact_pointers.push((level, key));
                }
                Tag::DeletedFile => {
                    let level = get_level(&mut input)?;
                    let number = get_varint64(&mut input)?;
                    edit.deleted_files.insert((level, number));
                }
                Tag::NewFile => {
                    let level = get_level(&mut input)?;
                    let number = get_varint64(&mut input)?;
                    let file_size = get_varint64(&mut input)?;
                    let smallest = get_internal_key(&mut input)?;
                    let largest = get_internal_key(&mut input)?;
                    edit.new_files
                        .push((level, FileMetaData::new(number, file_size, smallest, largest)));
                }
            }
        }

        Ok(edit)
    }
}

fn get_level(input: &mut &[u8]) -> Result<usize> {
    let level = get_varint32(input)? as usize;
    if level >= NUM_LEVELS {
        return Err(Error::corruption(format!("VersionEdit: level {} out of range", level)));
    }
    Ok(level)
}

fn get_internal_key(input: &mut &[u8]) -> Result<InternalKey> {
    let encoded = get_length_prefixed_slice(input)?;
    InternalKey::decode(encoded).map_err(|_| Error::corruption("VersionEdit: bad internal key"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memtable::ValueType;
    use proptest::prelude::*;

    fn ikey(user_key: &str, seq: u64) -> InternalKey {
        InternalKey::new(user_key.as_bytes(), seq, ValueType::Value)
    }

    #[test]
    fn test_full_edit_round_trip() {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name("leveldb.BytewiseComparator");
        edit.set_log_number(12);
        edit.set_prev_log_number(11);
        edit.set_next_file_number(40);
        edit.set_last_sequence(9000);
        edit.set_compact_pointer(2, ikey("m", 7));
        edit.delete_file(1, 33);
        edit.delete_file(0, 5);
        edit.add_file(3, 39, 2048, ikey("a", 1), ikey("z", 2));

        let decoded = VersionEdit::decode(&edit.encode()).unwrap();
        assert_eq!(decoded, edit);
    }

    #[test]
    fn test_empty_edit() {
        let edit = VersionEdit::new();
        assert!(edit.encode().is_empty());
        assert_eq!(VersionEdit::decode(&[]).unwrap(), edit);
    }

    #[test]
    fn test_unknown_tag_is_corruption() {
        let mut data = Vec::new();
        put_varint32(&mut data, 8);
        put_varint64(&mut data, 1);
        assert!(VersionEdit::decode(&data).unwrap_err().is_corruption());
    }

    #[test]
    fn test_bad_level_is_corruption() {
        let mut data = Vec::new();
        put_varint32(&mut data, Tag::DeletedFile as u32);
        put_varint32(&mut data, NUM_LEVELS as u32);
        put_varint64(&mut data, 1);
        assert!(VersionEdit::decode(&data).is_err());
    }

    #[test]
    fn test_truncated_edit() {
        let mut edit = VersionEdit::new();
        edit.add_file(1, 2, 3, ikey("a", 1), ikey("b", 1));
        let encoded = edit.encode();
        assert!(VersionEdit::decode(&encoded[..encoded.len() - 3]).is_err());
    }

    #[test]
    fn test_seek_budget() {
        let file = FileMetaData::new(1, 100, ikey("a", 1), ikey("b", 1));
        file.set_allowed_seeks(2);
        assert_eq!(file.charge_seek(), 1);
        assert_eq!(file.charge_seek(), 0);
        assert_eq!(file.clone().allowed_seeks(), 0);
    }

    proptest! {
        #[test]
        fn prop_edit_round_trip(
            log in proptest::option::of(any::<u64>()),
            seq in proptest::option::of(0u64..(1 << 56)),
            deleted in proptest::collection::btree_set((0usize..NUM_LEVELS, any::<u64>()), 0..8),
            files in proptest::collection::vec(
                (0usize..NUM_LEVELS, any::<u64>(), any::<u64>(), "[a-z]{1,8}", "[a-z]{1,8}"),
                0..8,
            ),
        ) {
            let mut edit = VersionEdit::new();
            edit.log_number = log;
            edit.last_sequence = seq;
            edit.deleted_files = deleted;
            for (level, number, size, a, b) in files {
                edit.add_file(level, number, size, ikey(&a, 1), ikey(&b, 2));
            }
            prop_assert_eq!(VersionEdit::decode(&edit.encode()).unwrap(), edit);
        }
    }
}
