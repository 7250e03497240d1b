//! Compaction input selection.
//!
//! Chooses the files for the next compaction from a [`Version`]. Size
//! triggered compactions take precedence over seek triggered ones, and each
//! level is compacted round-robin starting after its compaction pointer.

use super::{key_range, total_file_size, Compaction, FileMetaData, Version, NUM_LEVELS};
use crate::comparator::Comparator;
use crate::memtable::{InternalKey, InternalKeyComparator};
use std::cmp::Ordering;
use std::sync::Arc;

/// Picks compaction inputs.
pub struct CompactionPicker {
    icmp: InternalKeyComparator,
}

impl CompactionPicker {
    /// Create a new compaction picker
    pub fn new(icmp: InternalKeyComparator) -> Self {
        Self { icmp }
    }

    /// Pick the next compaction for `version`.
    ///
    /// `compact_pointers[level]` is the largest key of the last compaction
    /// at that level. Returns None if no compaction is needed.
    pub fn pick_compaction(
        &self,
        version: &Arc<Version>,
        compact_pointers: &[Option<InternalKey>],
    ) -> Option<Compaction> {
        let mut c = if version.compaction_score() >= 1.0 {
            let level = version.compaction_level();
            debug_assert!(level + 1 < NUM_LEVELS);
            let files = version.files(level);

            // First file past the compaction pointer, wrapping around.
            let pointer = compact_pointers.get(level).and_then(|p| p.as_ref());
            let picked = files
                .iter()
                .find(|f| match pointer {
                    Some(p) => {
                        self.icmp.compare(f.largest.encode(), p.encode()) == Ordering::Greater
                    }
                    None => true,
                })
                .or_else(|| files.first())?
                .clone();

            log::debug!(
                "Size compaction at level {} (score {:.2}) starting with #{}",
                level,
                version.compaction_score(),
                picked.number
            );
            let mut c = Compaction::new(version.clone(), level);
            c.inputs[0].push(picked);
            c
        } else if let Some((level, file)) = version.file_to_compact() {
            log::debug!("Seek compaction at level {} for #{}", level, file.number);
            let mut c = Compaction::new(version.clone(), level);
            c.inputs[0].push(file);
            c
        } else {
            return None;
        };

        if c.level == 0 {
            // Level 0 files may overlap each other; take every file that
            // overlaps the chosen one.
            let (smallest, largest) = key_range(&self.icmp, &c.inputs[0])?;
            c.inputs[0] = version.overlapping_inputs(0, Some(&smallest), Some(&largest));
            debug_assert!(!c.inputs[0].is_empty());
        }

        self.setup_other_inputs(&mut c);
        Some(c)
    }

    /// Builds a manual compaction of the files at `level` overlapping
    /// `[begin, end]`.
    ///
    /// For levels above 0 the input is capped at roughly one output file
    /// worth of data; the caller repeats until the range is covered.
    pub fn compact_range(
        &self,
        version: &Arc<Version>,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Option<Compaction> {
        let mut inputs = version.overlapping_inputs(level, begin, end);
        if inputs.is_empty() {
            return None;
        }

        // Level 0 files overlap, so every one of them has to go together.
        if level > 0 {
            let limit = super::max_file_size_for_level(level);
            let mut total = 0;
            for i in 0..inputs.len() {
                total += inputs[i].file_size;
                if total >= limit {
                    inputs.truncate(i + 1);
                    break;
                }
            }
        }

        let mut c = Compaction::new(version.clone(), level);
        c.set_manual(true);
        c.inputs[0] = inputs;
        self.setup_other_inputs(&mut c);
        Some(c)
    }

    /// Adds the level + 1 inputs and grandparents, and records the new
    /// compaction pointer in the edit.
    fn setup_other_inputs(&self, c: &mut Compaction) {
        let level = c.level;
        let version = c.input_version().clone();
        let Some((smallest, largest)) = key_range(&self.icmp, &c.inputs[0]) else {
            return;
        };

        c.inputs[1] = version.overlapping_inputs(level + 1, Some(&smallest), Some(&largest));
        let (mut all_start, mut all_limit) = self.range_of_both(&c.inputs[0], &c.inputs[1]);

        // Grow the level input set if that does not change the level + 1 set.
        if !c.inputs[1].is_empty() {
            let expanded0 = version.overlapping_inputs(level, Some(&all_start), Some(&all_limit));
            let inputs1_size = total_file_size(&c.inputs[1]);
            let expanded0_size = total_file_size(&expanded0);
            if expanded0.len() > c.inputs[0].len()
                && inputs1_size + expanded0_size < 25 * super::TARGET_FILE_SIZE
            {
                if let Some((new_start, new_limit)) = key_range(&self.icmp, &expanded0) {
                    let expanded1 =
                        version.overlapping_inputs(level + 1, Some(&new_start), Some(&new_limit));
                    if expanded1.len() == c.inputs[1].len() {
                        log::info!(
                            "Expanding level {} inputs from {}+{} to {}+{} files",
                            level,
                            c.inputs[0].len(),
                            c.inputs[1].len(),
                            expanded0.len(),
                            expanded1.len()
                        );
                        c.inputs[0] = expanded0;
                        c.inputs[1] = expanded1;
                        let range = self.range_of_both(&c.inputs[0], &c.inputs[1]);
                        all_start = range.0;
                        all_limit = range.1;
                    }
                }
            }
        }

        if level + 2 < NUM_LEVELS {
            c.grandparents =
                version.overlapping_inputs(level + 2, Some(&all_start), Some(&all_limit));
        }

        let largest = key_range(&self.icmp, &c.inputs[0]).map(|(_, l)| l).unwrap_or(largest);
        c.edit.set_compact_pointer(level, largest);
    }

    fn range_of_both(
        &self,
        a: &[Arc<FileMetaData>],
        b: &[Arc<FileMetaData>],
    ) -> (InternalKey, InternalKey) {
        let all: Vec<Arc<FileMetaData>> = a.iter().chain(b.iter()).cloned().collect();
        key_range(&self.icmp, &all).unwrap_or_default()
    }
}
