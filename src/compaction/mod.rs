//! Leveled compaction and the file catalog.
//!
//! ## Layout
//!
//! - Level 0: tables freshly flushed from memtables; ranges may overlap
//! - Level 1+: sorted, non-overlapping tables, each level ten times larger
//!   than the one above
//!
//! ## Triggers
//!
//! - Level 0: file count reaches [`L0_COMPACTION_TRIGGER`]
//! - Level N: total bytes exceed [`max_bytes_for_level`]
//! - Any level: a table exhausted its seek budget
//!
//! ## Process
//!
//! 1. Pick the inputs (picker.rs)
//! 2. Merge them in internal key order (merge.rs)
//! 3. Write new tables into level + 1, cutting files on size and
//!    grandparent overlap
//! 4. Record the change as a [`VersionEdit`] and install the next
//!    [`Version`] (version_set.rs)
//! 5. Delete the now obsolete tables

pub mod merge;
pub mod picker;
pub mod version;
pub mod version_edit;
pub mod version_set;

pub use merge::{find_file, LevelIterator, MergingIterator};
pub use picker::CompactionPicker;
pub use version::{SeekStats, Version};
pub use version_edit::{FileMetaData, VersionEdit};
pub use version_set::VersionSet;

use crate::comparator::Comparator;
use crate::memtable::{InternalKey, InternalKeyComparator};
use std::cmp::Ordering;
use std::sync::Arc;

/// Number of levels in the tree
pub const NUM_LEVELS: usize = 7;

/// Level 0 file count that triggers a compaction
pub const L0_COMPACTION_TRIGGER: usize = 4;

/// Level 0 file count at which writes are delayed by 1ms each
pub const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

/// Level 0 file count at which writes stop until compaction catches up
pub const L0_STOP_WRITES_TRIGGER: usize = 12;

/// Highest level a memtable flush may be pushed to
pub const MAX_MEM_COMPACT_LEVEL: usize = 2;

/// Target size of a single compaction output table
pub const TARGET_FILE_SIZE: u64 = 2 * 1024 * 1024;

/// Grandparent bytes a single output table may overlap before it is cut
pub const MAX_GRAND_PARENT_OVERLAP_BYTES: u64 = 10 * TARGET_FILE_SIZE;

/// Maximum total bytes for a level before it becomes a compaction candidate.
///
/// Level 0 is governed by file count; levels 1 and up get 10MB, 100MB, ...
pub fn max_bytes_for_level(level: usize) -> f64 {
    let mut result = 10.0 * 1024.0 * 1024.0;
    let mut level = level;
    while level > 1 {
        result *= 10.0;
        level -= 1;
    }
    result
}

/// Maximum size of a table produced by compacting into `level`.
pub fn max_file_size_for_level(_level: usize) -> u64 {
    TARGET_FILE_SIZE
}

/// Sum of the file sizes.
pub fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().map(|f| f.file_size).sum()
}

/// Smallest and largest internal key across `files`.
pub(crate) fn key_range(
    icmp: &InternalKeyComparator,
    files: &[Arc<FileMetaData>],
) -> Option<(InternalKey, InternalKey)> {
    let first = files.first()?;
    let mut smallest = &first.smallest;
    let mut largest = &first.largest;
    for f in &files[1..] {
        if icmp.compare(f.smallest.encode(), smallest.encode()) == Ordering::Less {
            smallest = &f.smallest;
        }
        if icmp.compare(f.largest.encode(), largest.encode()) == Ordering::Greater {
            largest = &f.largest;
        }
    }
    Some((smallest.clone(), largest.clone()))
}

/// A compaction selected by the picker.
///
/// Holds the inputs from `level` and `level + 1`, the grandparent files
/// used to cut outputs, and the edit that will record the result.
pub struct Compaction {
    level: usize,
    input_version: Arc<Version>,
    max_output_file_size: u64,
    pub(crate) inputs: [Vec<Arc<FileMetaData>>; 2],
    pub(crate) grandparents: Vec<Arc<FileMetaData>>,
    pub(crate) edit: VersionEdit,
    manual: bool,

    // State of should_stop_before
    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,

    // Per-level cursors of is_base_level_for_key; keys arrive in order.
    level_ptrs: [usize; NUM_LEVELS],
}

impl Compaction {
    pub(crate) fn new(input_version: Arc<Version>, level: usize) -> Self {
        Self {
            level,
            input_version,
            max_output_file_size: max_file_size_for_level(level),
            inputs: [Vec::new(), Vec::new()],
            grandparents: Vec::new(),
            edit: VersionEdit::new(),
            manual: false,
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: [0; NUM_LEVELS],
        }
    }

    /// Level being compacted; outputs go to `level() + 1`.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Version the inputs were picked from.
    pub fn input_version(&self) -> &Arc<Version> {
        &self.input_version
    }

    /// Input files; `which` is 0 for `level`, 1 for `level + 1`.
    pub fn inputs(&self, which: usize) -> &[Arc<FileMetaData>] {
        &self.inputs[which]
    }

    /// Number of input files at `level + which`.
    pub fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    /// Size at which an output table is closed.
    pub fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    /// Edit that will describe the outcome.
    pub fn edit(&self) -> &VersionEdit {
        &self.edit
    }

    /// Mutable access to the result edit.
    pub fn edit_mut(&mut self) -> &mut VersionEdit {
        &mut self.edit
    }

    /// Returns true if this compaction was requested through `compact_range`.
    pub fn is_manual(&self) -> bool {
        self.manual
    }

    pub(crate) fn set_manual(&mut self, manual: bool) {
        self.manual = manual;
    }

    /// Returns true if the single input can be moved to the next level
    /// without rewriting it.
    ///
    /// Moving is refused when it would leave the file overlapping too many
    /// grandparent bytes, since that would make a later compaction
    /// expensive.
    pub fn is_trivial_move(&self) -> bool {
        !self.manual
            && self.num_input_files(0) == 1
            && self.num_input_files(1) == 0
            && total_file_size(&self.grandparents) <= MAX_GRAND_PARENT_OVERLAP_BYTES
    }

    /// Records the deletion of every input file in the edit.
    pub fn add_input_deletions(&mut self) {
        for which in 0..2 {
            let level = self.level + which;
            for file in &self.inputs[which] {
                self.edit.delete_file(level, file.number);
            }
        }
    }

    /// Returns true if no level beyond the output level can hold `user_key`.
    ///
    /// Only then may a deletion marker for the key be dropped.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let ucmp = self.input_version.comparator().user_comparator().clone();
        for level in self.level + 2..NUM_LEVELS {
            let files = self.input_version.files(level);
            while let Some(f) = files.get(self.level_ptrs[level]) {
                if ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater {
                    if ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less {
                        return false;
                    }
                    break;
                }
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// Returns true if the current output should be closed before adding
    /// `internal_key`, because it already overlaps too many grandparent bytes.
    pub fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        let icmp = self.input_version.comparator().clone();
        while let Some(gp) = self.grandparents.get(self.grandparent_index) {
            if icmp.compare(internal_key, gp.largest.encode()) != Ordering::Greater {
                break;
            }
            if self.seen_key {
                self.overlapped_bytes += gp.file_size;
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > MAX_GRAND_PARENT_OVERLAP_BYTES {
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for Compaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let numbers =
            |files: &[Arc<FileMetaData>]| files.iter().map(|f| f.number).collect::<Vec<_>>();
        f.debug_struct("Compaction")
            .field("level", &self.level)
            .field("inputs", &numbers(&self.inputs[0]))
            .field("next_level_inputs", &numbers(&self.inputs[1]))
            .field("grandparents", &self.grandparents.len())
            .field("manual", &self.manual)
            .finish()
    }
}
