//! The authority over the file catalog.
//!
//! [`VersionSet`] owns the current [`Version`], the manifest log and the
//! engine counters (next file number, last sequence, log numbers). Every
//! change to the catalog goes through [`VersionSet::log_and_apply`], which
//! persists the edit before the new version becomes visible.

use super::merge::{LevelIterator, MergingIterator};
use super::picker::CompactionPicker;
use super::{
    max_bytes_for_level, Compaction, FileMetaData, Version, VersionEdit, L0_COMPACTION_TRIGGER,
    NUM_LEVELS,
};
use crate::cache::TableCache;
use crate::comparator::Comparator;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::filename::{db_path, descriptor_file_name, read_current_file, set_current_file};
use crate::iterator::BoxedIterator;
use crate::memtable::{InternalKey, InternalKeyComparator, SequenceNumber};
use crate::wal::{FailFastMonitor, LogReader, LogWriter};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// Tracks the current version and persists catalog changes.
pub struct VersionSet {
    db_dir: PathBuf,
    options: Options,
    icmp: InternalKeyComparator,
    table_cache: Arc<TableCache>,
    picker: CompactionPicker,

    next_file_number: u64,
    manifest_file_number: u64,
    last_sequence: SequenceNumber,
    log_number: u64,
    prev_log_number: u64,

    current: Arc<Version>,
    /// Every installed version; dead entries are pruned lazily.
    live_versions: Vec<Weak<Version>>,
    compact_pointers: Vec<Option<InternalKey>>,
    descriptor_log: Option<LogWriter>,
}

impl VersionSet {
    /// Creates an empty version set for `db_dir`. Call
    /// [`recover`](Self::recover) to load the persisted state.
    pub fn new(
        db_dir: impl Into<PathBuf>,
        options: &Options,
        table_cache: Arc<TableCache>,
    ) -> Self {
        let icmp = InternalKeyComparator::new(options.comparator.clone());
        let current = Arc::new(Version::new(icmp.clone()));
        Self {
            db_dir: db_dir.into(),
            options: options.clone(),
            picker: CompactionPicker::new(icmp.clone()),
            icmp,
            table_cache,
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            log_number: 0,
            prev_log_number: 0,
            live_versions: vec![Arc::downgrade(&current)],
            current,
            compact_pointers: vec![None; NUM_LEVELS],
            descriptor_log: None,
        }
    }

    /// Writes the manifest of a brand new, empty database and points
    /// CURRENT at it.
    pub fn create_new_db(db_dir: &Path, options: &Options) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(options.comparator.name());
        edit.set_log_number(0);
        edit.set_next_file_number(2);
        edit.set_last_sequence(0);

        let path = db_path(db_dir, &descriptor_file_name(1));
        let write = || -> Result<()> {
            let mut log = LogWriter::new(File::create(&path)?, 1);
            log.add_record(&edit.encode(), true)?;
            log.close()?;
            set_current_file(db_dir, 1)
        };
        let result = write();
        if result.is_err() {
            let _ = fs::remove_file(&path);
        } else {
            log::info!("Created new database manifest {}", path.display());
        }
        result
    }

    /// The current version.
    pub fn current(&self) -> Arc<Version> {
        self.current.clone()
    }

    /// The internal key comparator.
    pub fn icmp(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    /// The shared table cache.
    pub fn table_cache(&self) -> &Arc<TableCache> {
        &self.table_cache
    }

    /// Allocates a new file number.
    pub fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    /// Returns `number` to the pool if it was the last one allocated.
    pub fn reuse_file_number(&mut self, number: u64) {
        if self.next_file_number == number + 1 {
            self.next_file_number = number;
        }
    }

    /// Makes sure `number` is never handed out again.
    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    /// Next file number that would be allocated.
    pub fn next_file_number(&self) -> u64 {
        self.next_file_number
    }

    /// Number of the manifest currently written to.
    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    /// Oldest log file still needed for recovery.
    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    /// Log file of a memtable still being flushed, or 0.
    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number
    }

    /// Last sequence number handed out.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    /// Advances the last sequence number; it may never move backwards.
    pub fn set_last_sequence(&mut self, sequence: SequenceNumber) -> Result<()> {
        if sequence < self.last_sequence {
            return Err(Error::invalid_state(format!(
                "sequence number moved backwards from {} to {}",
                self.last_sequence, sequence
            )));
        }
        self.last_sequence = sequence;
        Ok(())
    }

    /// Number of files at `level` in the current version.
    pub fn num_level_files(&self, level: usize) -> usize {
        self.current.num_files(level)
    }

    /// Total bytes at `level` in the current version.
    pub fn num_level_bytes(&self, level: usize) -> u64 {
        self.current.num_level_bytes(level)
    }

    /// Compaction cursor of `level`.
    pub fn compact_pointer(&self, level: usize) -> Option<&InternalKey> {
        self.compact_pointers.get(level).and_then(|p| p.as_ref())
    }

    /// Applies `edit` to the current version, persists it to the manifest
    /// and installs the result as the new current version.
    ///
    /// The first call after [`recover`](Self::recover) starts a new manifest
    /// with a full snapshot of the catalog and republishes CURRENT.
    pub fn log_and_apply(&mut self, edit: &mut VersionEdit) -> Result<()> {
        match edit.log_number {
            Some(number) if number < self.log_number || number >= self.next_file_number => {
                return Err(Error::invalid_state(format!(
                    "log number {} outside [{}, {})",
                    number, self.log_number, self.next_file_number
                )));
            }
            Some(_) => {}
            None => edit.set_log_number(self.log_number),
        }
        if edit.prev_log_number.is_none() {
            edit.set_prev_log_number(self.prev_log_number);
        }
        edit.set_next_file_number(self.next_file_number);
        edit.set_last_sequence(self.last_sequence);

        let mut builder = Builder::new(self.icmp.clone(), self.current.clone());
        builder.apply(edit, &mut self.compact_pointers);
        let mut version = builder.save_to()?;
        self.finalize(&mut version);

        let mut new_manifest = None;
        if self.descriptor_log.is_none() {
            let path = db_path(&self.db_dir, &descriptor_file_name(self.manifest_file_number));
            let mut log = LogWriter::new(File::create(&path)?, self.manifest_file_number);
            if let Err(e) = self.write_snapshot(&mut log) {
                drop(log);
                let _ = fs::remove_file(&path);
                return Err(e);
            }
            log::info!("Created manifest {}", path.display());
            self.descriptor_log = Some(log);
            new_manifest = Some(path);
        }

        let mut result = match self.descriptor_log.as_mut() {
            Some(log) => log.add_record(&edit.encode(), true),
            None => Err(Error::internal("manifest log missing")),
        };
        if result.is_ok() && new_manifest.is_some() {
            result = set_current_file(&self.db_dir, self.manifest_file_number);
        }

        if let Err(e) = result {
            log::error!("Manifest write failed: {}", e);
            if let Some(path) = new_manifest {
                self.descriptor_log = None;
                let _ = fs::remove_file(&path);
            }
            return Err(e);
        }

        self.install(version);
        self.log_number = edit.log_number.unwrap_or(self.log_number);
        self.prev_log_number = edit.prev_log_number.unwrap_or(self.prev_log_number);
        Ok(())
    }

    /// Loads the catalog from the manifest named by CURRENT.
    ///
    /// Edits are replayed in order; for the counters the last value written
    /// wins. The next manifest gets a fresh file number, so the old one is
    /// never appended to.
    pub fn recover(&mut self) -> Result<()> {
        let name = read_current_file(&self.db_dir)?;
        let path = db_path(&self.db_dir, &name);
        let file = File::open(&path).map_err(|e| {
            Error::corruption(format!("CURRENT points to missing {}: {}", name, e))
        })?;
        let monitor = Box::new(FailFastMonitor::new(name.clone()));
        let mut reader = LogReader::new(BufReader::new(file), monitor, true, 0);

        let mut builder = Builder::new(self.icmp.clone(), self.current.clone());
        let mut log_number = None;
        let mut prev_log_number = None;
        let mut next_file_number = None;
        let mut last_sequence = None;
        let mut edits = 0;

        while let Some(record) = reader.read_record()? {
            let edit = VersionEdit::decode(&record)?;
            if let Some(stored) = &edit.comparator_name {
                let ours = self.icmp.user_comparator().name();
                if stored != ours {
                    return Err(Error::invalid_argument(format!(
                        "{} does not match existing comparator {}",
                        ours, stored
                    )));
                }
            }
            builder.apply(&edit, &mut self.compact_pointers);

            log_number = edit.log_number.or(log_number);
            prev_log_number = edit.prev_log_number.or(prev_log_number);
            next_file_number = edit.next_file_number.or(next_file_number);
            last_sequence = edit.last_sequence.or(last_sequence);
            edits += 1;
        }

        let next_file_number = next_file_number
            .ok_or_else(|| Error::corruption("no meta-nextfile entry in descriptor"))?;
        let log_number = log_number
            .ok_or_else(|| Error::corruption("no meta-lognumber entry in descriptor"))?;
        let last_sequence = last_sequence
            .ok_or_else(|| Error::corruption("no last-sequence-number entry in descriptor"))?;
        let prev_log_number = prev_log_number.unwrap_or(0);

        let mut version = builder.save_to()?;
        self.finalize(&mut version);
        self.install(version);

        self.next_file_number = next_file_number;
        self.mark_file_number_used(log_number);
        self.mark_file_number_used(prev_log_number);
        self.manifest_file_number = self.new_file_number();
        self.log_number = log_number;
        self.prev_log_number = prev_log_number;
        self.last_sequence = last_sequence;

        log::info!(
            "Recovered {} edits from {}: log #{}, next file #{}, last sequence {}, {}",
            edits,
            name,
            log_number,
            next_file_number,
            last_sequence,
            self.current.level_summary()
        );
        Ok(())
    }

    /// Numbers of every table referenced by a live version.
    pub fn live_files(&mut self) -> HashSet<u64> {
        self.live_versions.retain(|v| v.strong_count() > 0);
        let mut live = HashSet::new();
        for version in self.live_versions.iter().filter_map(Weak::upgrade) {
            for level in 0..NUM_LEVELS {
                live.extend(version.files(level).iter().map(|f| f.number));
            }
        }
        live
    }

    /// Returns true if the current version wants a compaction.
    pub fn needs_compaction(&self) -> bool {
        self.current.needs_compaction()
    }

    /// Picks the next automatic compaction and advances the level's
    /// compaction pointer.
    pub fn pick_compaction(&mut self) -> Option<Compaction> {
        let c = self.picker.pick_compaction(&self.current, &self.compact_pointers)?;
        self.remember_compact_pointer(&c);
        Some(c)
    }

    /// Picks a manual compaction of `[begin, end]` at `level`.
    pub fn compact_range(
        &mut self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Option<Compaction> {
        let c = self.picker.compact_range(&self.current, level, begin, end)?;
        self.remember_compact_pointer(&c);
        Some(c)
    }

    fn remember_compact_pointer(&mut self, c: &Compaction) {
        for (level, key) in &c.edit().compact_pointers {
            self.compact_pointers[*level] = Some(key.clone());
        }
    }

    /// Iterator over every input entry of `c` in internal key order.
    pub fn make_input_iterator(&self, c: &Compaction) -> Result<BoxedIterator> {
        let verify = self.options.paranoid_checks;
        let cmp: Arc<dyn Comparator> = Arc::new(self.icmp.clone());
        let mut children: Vec<BoxedIterator> = Vec::new();
        for which in 0..2 {
            let files = c.inputs(which);
            if files.is_empty() {
                continue;
            }
            if c.level() + which == 0 {
                for file in files {
                    let iter = self.table_cache.iter(file.number, file.file_size, verify)?;
                    children.push(Box::new(iter));
                }
            } else {
                children.push(Box::new(LevelIterator::new(
                    self.table_cache.clone(),
                    files.to_vec(),
                    cmp.clone(),
                    verify,
                )));
            }
        }
        Ok(Box::new(MergingIterator::new(cmp, children)))
    }

    /// Approximate byte offset of `key` in the current version.
    pub fn approximate_offset_of(&self, key: &InternalKey) -> Result<u64> {
        self.current.approximate_offset_of(key, &self.table_cache)
    }

    /// Closes the manifest log.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut log) = self.descriptor_log.take() {
            log.close()?;
        }
        Ok(())
    }

    fn install(&mut self, version: Version) {
        let version = Arc::new(version);
        self.live_versions.push(Arc::downgrade(&version));
        self.current = version;
    }

    /// Computes the level most in need of compaction.
    fn finalize(&self, version: &mut Version) {
        let mut best_level = 0;
        let mut best_score = -1.0;
        for level in 0..NUM_LEVELS - 1 {
            let score = if level == 0 {
                version.num_files(0) as f64 / L0_COMPACTION_TRIGGER as f64
            } else {
                version.num_level_bytes(level) as f64 / max_bytes_for_level(level)
            };
            if score > best_score {
                best_level = level;
                best_score = score;
            }
        }
        version.compaction_level = best_level;
        version.compaction_score = best_score;
    }

    /// Writes the full catalog state as the first record of a new manifest.
    fn write_snapshot(&self, log: &mut LogWriter) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator().name());
        for (level, pointer) in self.compact_pointers.iter().enumerate() {
            if let Some(key) = pointer {
                edit.set_compact_pointer(level, key.clone());
            }
        }
        for level in 0..NUM_LEVELS {
            for f in self.current.files(level) {
                edit.add_file(level, f.number, f.file_size, f.smallest.clone(), f.largest.clone());
            }
        }
        log.add_record(&edit.encode(), false)
    }
}

/// Folds edits onto a base version.
struct Builder {
    icmp: InternalKeyComparator,
    base: Arc<Version>,
    deleted: Vec<HashSet<u64>>,
    added: Vec<Vec<Arc<FileMetaData>>>,
}

impl Builder {
    fn new(icmp: InternalKeyComparator, base: Arc<Version>) -> Self {
        Self {
            icmp,
            base,
            deleted: vec![HashSet::new(); NUM_LEVELS],
            added: vec![Vec::new(); NUM_LEVELS],
        }
    }

    fn apply(&mut self, edit: &VersionEdit, compact_pointers: &mut [Option<InternalKey>]) {
        for (level, key) in &edit.compact_pointers {
            compact_pointers[*level] = Some(key.clone());
        }

        for &(level, number) in &edit.deleted_files {
            self.deleted[level].insert(number);
            self.added[level].retain(|f| f.number != number);
        }

        for (level, file) in &edit.new_files {
            // One seek costs about as much as compacting 16KB of data, so a
            // file earns one free seek per 16KB before it gets compacted.
            let file = file.clone();
            file.set_allowed_seeks(((file.file_size / 16384) as i64).max(100));
            self.deleted[*level].remove(&file.number);
            self.added[*level].push(Arc::new(file));
        }
    }

    fn save_to(self) -> Result<Version> {
        let mut version = Version::new(self.icmp.clone());
        for level in 0..NUM_LEVELS {
            let mut files: Vec<Arc<FileMetaData>> = self
                .base
                .files(level)
                .iter()
                .chain(self.added[level].iter())
                .filter(|f| !self.deleted[level].contains(&f.number))
                .cloned()
                .collect();
            files.sort_by(|a, b| match self.icmp.compare(a.smallest.encode(), b.smallest.encode()) {
                Ordering::Equal => a.number.cmp(&b.number),
                other => other,
            });
            files.dedup_by_key(|f| f.number);
            version.files[level] = files;
        }
        version.check_no_overlap()?;
        Ok(version)
    }
}
