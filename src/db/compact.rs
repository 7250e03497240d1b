//! Background work: memtable flushes, level compactions and file cleanup.
//!
//! The worker thread holds the database mutex while it decides what to do
//! and while it installs results; table I/O always runs unlocked.

use super::builder::build_table;
use super::{DbInner, DbState, LevelStats};
use crate::comparator::Comparator;
use crate::compaction::{Compaction, FileMetaData, VersionEdit};
use crate::error::{Error, Result};
use crate::filename::{db_path, list_files, parse_file_name, table_file_name, FileType};
use crate::iterator::InternalIterator;
use crate::memtable::{InternalKey, ParsedInternalKey, ValueType, MAX_SEQUENCE_NUMBER};
use crate::sstable::TableBuilder;
use parking_lot::MutexGuard;
use std::cmp::Ordering as CmpOrdering;
use std::fs::{self, File};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// An output table of a running compaction.
struct OutputTable {
    number: u64,
    builder: TableBuilder,
    smallest: Vec<u8>,
    largest: Vec<u8>,
}

/// Progress of one compaction.
#[derive(Default)]
struct CompactionOutputs {
    /// Every file number allocated, finished or not
    numbers: Vec<u64>,
    finished: Vec<FileMetaData>,
    current: Option<OutputTable>,
}

impl CompactionOutputs {
    fn total_bytes(&self) -> u64 {
        self.finished.iter().map(|f| f.file_size).sum()
    }
}

impl DbInner {
    /// Body of the compaction thread.
    pub(crate) fn background_loop(&self) {
        let mut state = self.state.lock();
        loop {
            if self.shutting_down.load(Ordering::Acquire) {
                break;
            }
            if state.suspensions > 0 {
                if !state.suspend_acked {
                    log::info!("Compactions suspended");
                    state.suspend_acked = true;
                    self.done_signal.notify_all();
                }
                self.work_signal.wait(&mut state);
                continue;
            }
            if state.background_error.is_some() || !self.has_background_work(&state) {
                self.work_signal.wait(&mut state);
                continue;
            }

            match self.background_compaction(&mut state) {
                Ok(true) => {}
                Ok(false) => {
                    self.done_signal.notify_all();
                    self.work_signal.wait(&mut state);
                    continue;
                }
                Err(Error::ShuttingDown) => {
                    log::debug!("Compaction abandoned: shutting down");
                }
                Err(e) => self.record_background_error(&mut state, &e),
            }
            self.done_signal.notify_all();
        }
        state.worker_running = false;
        self.done_signal.notify_all();
        log::debug!("Compaction thread exiting");
    }

    fn has_background_work(&self, state: &DbState) -> bool {
        state.imm.is_some()
            || state.manual.as_ref().is_some_and(|m| !m.done)
            || state.versions.needs_compaction()
    }

    /// Latches the first background failure; every later operation fails
    /// with it.
    pub(crate) fn record_background_error(&self, state: &mut DbState, error: &Error) {
        if state.background_error.is_none() {
            log::error!("Background error: {}", error);
            state.background_error = Some(error.to_string());
            self.done_signal.notify_all();
        }
    }

    /// Runs one unit of background work. Returns false if there was nothing
    /// to do.
    fn background_compaction(&self, state: &mut MutexGuard<'_, DbState>) -> Result<bool> {
        if state.imm.is_some() {
            self.compact_memtable(state)?;
            return Ok(true);
        }

        let manual = state
            .manual
            .as_ref()
            .filter(|m| !m.done)
            .map(|m| (m.level, m.begin.clone(), m.end.clone()));
        let mut c = match &manual {
            Some((level, begin, end)) => {
                match state.versions.compact_range(*level, begin.as_ref(), end.as_ref()) {
                    Some(c) => c,
                    None => {
                        log::info!("Manual compaction at level {}: nothing left to do", level);
                        if let Some(m) = state.manual.as_mut() {
                            m.done = true;
                        }
                        return Ok(true);
                    }
                }
            }
            None => match state.versions.pick_compaction() {
                Some(c) => c,
                None => return Ok(false),
            },
        };
        let manual_end = c.inputs(0).last().map(|f| f.largest.clone());

        if c.is_trivial_move() {
            let file = c.inputs(0)[0].clone();
            let level = c.level();
            let edit = c.edit_mut();
            edit.delete_file(level, file.number);
            edit.add_file(
                level + 1,
                file.number,
                file.file_size,
                file.smallest.clone(),
                file.largest.clone(),
            );
            state.versions.log_and_apply(c.edit_mut())?;
            log::info!(
                "Moved #{} to level-{} {} bytes: {}",
                file.number,
                level + 1,
                file.file_size,
                state.versions.current().level_summary()
            );
        } else {
            let result = self.do_compaction_work(state, &mut c);
            drop(c);
            result?;
            self.delete_obsolete_files(state);
        }

        if manual.is_some() {
            if let Some(m) = state.manual.as_mut() {
                match manual_end {
                    Some(end) => m.begin = Some(end),
                    None => m.done = true,
                }
            }
        }
        Ok(true)
    }

    /// Writes the immutable memtable to a table and drops the log it came
    /// from.
    pub(crate) fn compact_memtable(&self, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        let Some(imm) = state.imm.clone() else {
            return Ok(());
        };
        let start = Instant::now();
        let base = state.versions.current();
        let number = state.versions.new_file_number();
        state.pending_outputs.insert(number);
        log::info!("Level-0 table #{}: started", number);

        let comparator: Arc<dyn Comparator> = Arc::new(self.icmp.clone());
        let built = MutexGuard::unlocked(state, || {
            let mut iter = imm.iter();
            build_table(
                &self.db_dir,
                &self.options,
                &self.table_cache,
                comparator,
                &mut iter,
                number,
            )
        });
        let meta = match built {
            Ok(meta) => meta,
            Err(e) => {
                state.pending_outputs.remove(&number);
                return Err(e);
            }
        };
        if self.shutting_down.load(Ordering::Acquire) {
            state.pending_outputs.remove(&number);
            return Err(Error::ShuttingDown);
        }

        let mut edit = VersionEdit::new();
        let mut output_level = 0;
        let mut bytes_written = 0;
        if let Some(meta) = meta {
            output_level = base
                .pick_level_for_memtable_output(meta.smallest.user_key(), meta.largest.user_key());
            bytes_written = meta.file_size;
            log::info!(
                "Level-0 table #{}: {} bytes, placed at level {}",
                number,
                meta.file_size,
                output_level
            );
            edit.add_file(output_level, meta.number, meta.file_size, meta.smallest, meta.largest);
        } else {
            log::info!("Level-0 table #{}: memtable was empty", number);
        }
        edit.set_prev_log_number(0);
        edit.set_log_number(state.log_number);

        let result = state.versions.log_and_apply(&mut edit);
        state.pending_outputs.remove(&number);
        result?;

        state.imm = None;
        self.has_imm.store(false, Ordering::Release);
        state.stats[output_level].add(LevelStats {
            micros: start.elapsed().as_micros() as u64,
            bytes_read: 0,
            bytes_written,
        });
        self.delete_obsolete_files(state);
        Ok(())
    }

    /// Merges the inputs of `c` into new tables at `c.level() + 1` and
    /// installs them.
    fn do_compaction_work(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        c: &mut Compaction,
    ) -> Result<()> {
        let start = Instant::now();
        log::info!(
            "Compacting {}@{} + {}@{} files",
            c.num_input_files(0),
            c.level(),
            c.num_input_files(1),
            c.level() + 1
        );

        // Entries hidden from every live snapshot may be dropped.
        let smallest_snapshot =
            self.snapshots.oldest().unwrap_or_else(|| state.versions.last_sequence());
        let mut input = state.versions.make_input_iterator(c)?;
        let mut outputs = CompactionOutputs::default();

        let result = MutexGuard::unlocked(state, || {
            self.merge_inputs(c, input.as_mut(), smallest_snapshot, &mut outputs)
        });

        let result = result.and_then(|()| {
            let bytes_read: u64 =
                (0..2).flat_map(|which| c.inputs(which)).map(|f| f.file_size).sum();
            let bytes_written = outputs.total_bytes();
            state.stats[c.level() + 1].add(LevelStats {
                micros: start.elapsed().as_micros() as u64,
                bytes_read,
                bytes_written,
            });
            self.install_compaction_results(state, c, &mut outputs)
        });

        for number in &outputs.numbers {
            state.pending_outputs.remove(number);
        }
        if let Err(e) = &result {
            log::warn!("Compaction at level {} failed: {}", c.level(), e);
        }
        result
    }

    fn merge_inputs(
        &self,
        c: &mut Compaction,
        input: &mut dyn InternalIterator,
        smallest_snapshot: u64,
        outputs: &mut CompactionOutputs,
    ) -> Result<()> {
        let ucmp = self.icmp.user_comparator().clone();
        let mut current_user_key: Option<Vec<u8>> = None;
        let mut last_sequence_for_key = MAX_SEQUENCE_NUMBER;

        input.seek_to_first()?;
        while input.valid() {
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(Error::ShuttingDown);
            }
            if self.has_imm.load(Ordering::Acquire) {
                let mut state = self.state.lock();
                self.compact_memtable(&mut state)?;
                self.done_signal.notify_all();
            }

            let key = input.key();
            if outputs.current.is_some() && c.should_stop_before(key) {
                self.finish_output(outputs)?;
            }

            let mut drop_entry = false;
            match ParsedInternalKey::parse(key) {
                Err(_) => {
                    // Keep corrupted keys; hide nothing behind them.
                    current_user_key = None;
                    last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                }
                Ok(ikey) => {
                    let first_occurrence = current_user_key
                        .as_deref()
                        .is_none_or(|k| ucmp.compare(ikey.user_key, k) != CmpOrdering::Equal);
                    if first_occurrence {
                        current_user_key = Some(ikey.user_key.to_vec());
                        last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                    }

                    if last_sequence_for_key <= smallest_snapshot {
                        // Shadowed by a newer entry for the same key
                        drop_entry = true;
                    } else if ikey.value_type == ValueType::Deletion
                        && ikey.sequence <= smallest_snapshot
                        && c.is_base_level_for_key(ikey.user_key)
                    {
                        drop_entry = true;
                    }
                    last_sequence_for_key = ikey.sequence;
                }
            }

            if !drop_entry {
                if outputs.current.is_none() {
                    self.open_output(outputs)?;
                }
                if let Some(out) = outputs.current.as_mut() {
                    if out.builder.num_entries() == 0 {
                        out.smallest = key.to_vec();
                    }
                    out.largest.clear();
                    out.largest.extend_from_slice(key);
                    out.builder.add(key, input.value())?;
                    if out.builder.file_size() >= c.max_output_file_size() {
                        self.finish_output(outputs)?;
                    }
                }
            }
            input.next()?;
        }

        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }
        if outputs.current.is_some() {
            self.finish_output(outputs)?;
        }
        Ok(())
    }

    fn open_output(&self, outputs: &mut CompactionOutputs) -> Result<()> {
        let number = {
            let mut state = self.state.lock();
            let number = state.versions.new_file_number();
            state.pending_outputs.insert(number);
            number
        };
        outputs.numbers.push(number);

        let file = File::create(db_path(&self.db_dir, &table_file_name(number)))?;
        let builder = TableBuilder::new(file, &self.options, Arc::new(self.icmp.clone()));
        outputs.current =
            Some(OutputTable { number, builder, smallest: Vec::new(), largest: Vec::new() });
        Ok(())
    }

    fn finish_output(&self, outputs: &mut CompactionOutputs) -> Result<()> {
        let Some(mut out) = outputs.current.take() else {
            return Ok(());
        };
        let entries = out.builder.num_entries();
        let file_size = out.builder.finish()?;

        // Make sure the table is usable before it is installed.
        let mut check = self.table_cache.iter(out.number, file_size, true)?;
        check.seek_to_first()?;
        log::info!("Generated table #{}: {} keys, {} bytes", out.number, entries, file_size);

        outputs.finished.push(FileMetaData::new(
            out.number,
            file_size,
            InternalKey::decode(&out.smallest)?,
            InternalKey::decode(&out.largest)?,
        ));
        Ok(())
    }

    fn install_compaction_results(
        &self,
        state: &mut DbState,
        c: &mut Compaction,
        outputs: &mut CompactionOutputs,
    ) -> Result<()> {
        let output_level = c.level() + 1;
        c.add_input_deletions();
        for file in outputs.finished.drain(..) {
            c.edit_mut().add_file(
                output_level,
                file.number,
                file.file_size,
                file.smallest,
                file.largest,
            );
        }
        state.versions.log_and_apply(c.edit_mut())?;
        log::info!("Compacted to: {}", state.versions.current().level_summary());
        Ok(())
    }

    /// Deletes every file no live version, pending output or current log
    /// needs.
    ///
    /// Skipped after a background error, since the catalog may then be out
    /// of sync with the directory.
    pub(crate) fn delete_obsolete_files(&self, state: &mut DbState) {
        if state.background_error.is_some() {
            return;
        }
        let mut live = state.versions.live_files();
        live.extend(state.pending_outputs.iter().copied());
        let log_number = state.versions.log_number();
        let prev_log_number = state.versions.prev_log_number();
        let manifest_number = state.versions.manifest_file_number();

        let names = match list_files(&self.db_dir) {
            Ok(names) => names,
            Err(e) => {
                log::warn!("Listing {} failed: {}", self.db_dir.display(), e);
                return;
            }
        };

        for name in names {
            let Some((file_type, number)) = parse_file_name(&name) else {
                continue;
            };
            let keep = match file_type {
                FileType::Log => number >= log_number || number == prev_log_number,
                FileType::Descriptor => number >= manifest_number,
                FileType::Table | FileType::Temp => live.contains(&number),
                FileType::Current | FileType::DbLock | FileType::InfoLog => true,
            };
            if keep {
                continue;
            }
            if file_type == FileType::Table {
                self.table_cache.evict(number);
            }
            log::info!("Delete type={:?} #{}", file_type, number);
            if let Err(e) = fs::remove_file(db_path(&self.db_dir, &name)) {
                log::warn!("Deleting {} failed: {}", name, e);
            }
        }
    }
}
