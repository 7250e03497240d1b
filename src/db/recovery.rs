//! Replays write-ahead logs left behind by the previous process.

use super::builder::build_table;
use super::DbState;
use crate::cache::TableCache;
use crate::comparator::Comparator;
use crate::compaction::VersionEdit;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::filename::{db_path, list_files, log_file_name, parse_file_name, FileType};
use crate::memtable::{MemTable, SequenceNumber};
use crate::wal::{FailFastMonitor, LogMonitor, LogReader, LogWriter, LoggingMonitor};
use crate::write_batch::{WriteBatch, HEADER_SIZE};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Replays every log newer than the manifest into level 0 tables, then
/// starts a fresh log and records it in the manifest.
///
/// Returns the writer of the new log.
pub(crate) fn recover_logs(
    db_dir: &Path,
    options: &Options,
    table_cache: &TableCache,
    state: &mut DbState,
) -> Result<LogWriter> {
    let min_log = state.versions.log_number();
    let prev_log = state.versions.prev_log_number();

    let mut logs: Vec<u64> = list_files(db_dir)?
        .iter()
        .filter_map(|name| match parse_file_name(name) {
            Some((FileType::Log, number))
                if number >= min_log || (prev_log != 0 && number == prev_log) =>
            {
                Some(number)
            }
            _ => None,
        })
        .collect();
    logs.sort_unstable();

    let mut edit = VersionEdit::new();
    let mut max_sequence = state.versions.last_sequence();
    for &number in &logs {
        state.versions.mark_file_number_used(number);
        replay_log(db_dir, options, table_cache, state, number, &mut edit, &mut max_sequence)?;
    }
    if max_sequence > state.versions.last_sequence() {
        state.versions.set_last_sequence(max_sequence)?;
    }

    let number = state.versions.new_file_number();
    let file = File::create(db_path(db_dir, &log_file_name(number)))?;
    edit.set_log_number(number);
    edit.set_prev_log_number(0);
    state.versions.log_and_apply(&mut edit)?;
    state.log_number = number;

    if !logs.is_empty() {
        log::info!("Recovered {} log file(s); last sequence {}", logs.len(), max_sequence);
    }
    Ok(LogWriter::new(file, number))
}

fn replay_log(
    db_dir: &Path,
    options: &Options,
    table_cache: &TableCache,
    state: &mut DbState,
    number: u64,
    edit: &mut VersionEdit,
    max_sequence: &mut SequenceNumber,
) -> Result<()> {
    let name = log_file_name(number);
    log::info!("Recovering log #{}", number);

    let file = File::open(db_path(db_dir, &name))?;
    let monitor: Box<dyn LogMonitor> = if options.paranoid_checks {
        Box::new(FailFastMonitor::new(name.clone()))
    } else {
        Box::new(LoggingMonitor::new(number))
    };
    let mut reader = LogReader::new(BufReader::new(file), monitor, true, 0);

    let mut mem = Arc::new(MemTable::new(options.comparator.clone()));
    let mut records = 0usize;
    while let Some(record) = reader.read_record()? {
        if record.len() < HEADER_SIZE {
            let err = Error::corruption(format!(
                "{}: log record too small ({} bytes)",
                name,
                record.len()
            ));
            if options.paranoid_checks {
                return Err(err);
            }
            log::warn!("{}", err);
            continue;
        }
        let (sequence, batch) = match WriteBatch::decode(&record) {
            Ok(decoded) => decoded,
            Err(e) if !options.paranoid_checks => {
                log::warn!("{}: skipping bad batch; {}", name, e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let last = batch.insert_into(&mem, sequence);
        *max_sequence = (*max_sequence).max(last);
        records += 1;

        if mem.approximate_memory_usage() > options.write_buffer_size {
            write_level0_table(db_dir, options, table_cache, state, &mem, edit)?;
            mem = Arc::new(MemTable::new(options.comparator.clone()));
        }
    }

    if !mem.is_empty() {
        write_level0_table(db_dir, options, table_cache, state, &mem, edit)?;
    }
    log::debug!("Log #{}: {} batches replayed", number, records);
    Ok(())
}

fn write_level0_table(
    db_dir: &Path,
    options: &Options,
    table_cache: &TableCache,
    state: &mut DbState,
    mem: &Arc<MemTable>,
    edit: &mut VersionEdit,
) -> Result<()> {
    let start = Instant::now();
    let number = state.versions.new_file_number();
    let comparator: Arc<dyn Comparator> = Arc::new(state.versions.icmp().clone());

    let mut iter = mem.iter();
    if let Some(meta) = build_table(db_dir, options, table_cache, comparator, &mut iter, number)? {
        log::info!("Level-0 table #{}: {} bytes (recovery)", meta.number, meta.file_size);
        state.stats[0].add(super::LevelStats {
            micros: start.elapsed().as_micros() as u64,
            bytes_read: 0,
            bytes_written: meta.file_size,
        });
        edit.add_file(0, meta.number, meta.file_size, meta.smallest, meta.largest);
    }
    Ok(())
}
