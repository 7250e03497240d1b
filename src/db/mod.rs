//! The database engine.
//!
//! [`DB`] ties the pieces together: writes go to the log and the active
//! memtable, full memtables are flushed to level 0 tables, and a dedicated
//! background thread compacts levels. All catalog state (memtables, version
//! set, pending outputs, background status) lives in one [`DbState`] behind
//! a single mutex; table I/O always runs with that mutex released.

mod builder;
mod compact;
mod recovery;
mod stats;

pub use stats::{DbStats, LevelStats, LevelSummary};

use crate::cache::TableCache;
use crate::comparator::Comparator;
use crate::compaction::{
    MergingIterator, VersionSet, L0_SLOWDOWN_WRITES_TRIGGER, L0_STOP_WRITES_TRIGGER, NUM_LEVELS,
};
use crate::config::{Options, ReadOptions, WriteOptions};
use crate::error::{Error, Result};
use crate::filename::{
    current_file_name, db_path, list_files, lock_file_name, log_file_name, parse_file_name,
    FileType,
};
use crate::iterator::{BoxedIterator, DbIterator};
use crate::lock::FileLock;
use crate::memtable::{
    InternalKey, InternalKeyComparator, LookupKey, LookupResult, MemTable, SequenceNumber,
    ValueType, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK,
};
use crate::snapshot::{Snapshot, SnapshotList};
use crate::wal::LogWriter;
use crate::write_batch::WriteBatch;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A user key range `[start, limit)` for [`DB::get_approximate_sizes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    /// Inclusive start
    pub start: Vec<u8>,
    /// Exclusive limit
    pub limit: Vec<u8>,
}

impl Range {
    /// Creates a range from `start` to `limit`.
    pub fn new(start: impl Into<Vec<u8>>, limit: impl Into<Vec<u8>>) -> Self {
        Self { start: start.into(), limit: limit.into() }
    }
}

/// A pending `compact_range` request for one level.
#[derive(Debug)]
pub(crate) struct ManualCompaction {
    pub(crate) level: usize,
    pub(crate) begin: Option<InternalKey>,
    pub(crate) end: Option<InternalKey>,
    pub(crate) done: bool,
}

/// Engine state guarded by the database mutex.
pub(crate) struct DbState {
    pub(crate) mem: Arc<MemTable>,
    /// Memtable being flushed
    pub(crate) imm: Option<Arc<MemTable>>,
    /// Number of the log backing `mem`
    pub(crate) log_number: u64,
    pub(crate) versions: VersionSet,
    /// Tables being written that no version references yet
    pub(crate) pending_outputs: HashSet<u64>,
    /// First failure of the background worker; sticky
    pub(crate) background_error: Option<String>,
    pub(crate) manual: Option<ManualCompaction>,
    pub(crate) suspensions: usize,
    pub(crate) suspend_acked: bool,
    pub(crate) worker_running: bool,
    pub(crate) stats: [LevelStats; NUM_LEVELS],
}

pub(crate) struct DbInner {
    pub(crate) db_dir: PathBuf,
    pub(crate) options: Options,
    pub(crate) icmp: InternalKeyComparator,
    pub(crate) table_cache: Arc<TableCache>,

    /// Writer for the current log; also serializes writers.
    pub(crate) log: Mutex<Option<LogWriter>>,
    pub(crate) state: Mutex<DbState>,
    /// Wakes the background worker
    pub(crate) work_signal: Condvar,
    /// Signalled whenever background work finished a step
    pub(crate) done_signal: Condvar,

    pub(crate) shutting_down: AtomicBool,
    /// Mirrors `state.imm.is_some()` for lock-free polling during compaction
    pub(crate) has_imm: AtomicBool,
    pub(crate) snapshots: Arc<SnapshotList>,
    _lock: FileLock,
}

/// The main database handle.
///
/// This is the primary interface for interacting with the storage engine.
///
/// # Thread Safety
///
/// `DB` is thread-safe and can be shared across threads using `Arc<DB>`.
/// Writers are serialized; readers never wait for table I/O of other
/// threads.
pub struct DB {
    inner: Arc<DbInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DB {
    /// Opens a database at the specified path with the given options.
    ///
    /// If the database does not exist and `create_if_missing` is set, it will
    /// be created. Otherwise the manifest is loaded and every log file newer
    /// than the manifest's log number is replayed into level 0 tables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory is locked by another open database
    /// - The database is missing (or exists, with `error_if_exists`)
    /// - Recovery finds corrupted data it cannot skip
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use lsmdb::{Options, DB};
    ///
    /// # fn main() -> Result<(), lsmdb::Error> {
    /// let options = Options::default();
    /// let db = DB::open("./my_database", options)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let db_dir = path.as_ref().to_path_buf();
        options.validate()?;

        if !db_dir.exists() {
            if options.create_if_missing {
                fs::create_dir_all(&db_dir)?;
            } else {
                return Err(Error::not_found(format!(
                    "{}: does not exist (create_if_missing is false)",
                    db_dir.display()
                )));
            }
        }
        let lock = FileLock::lock(db_path(&db_dir, lock_file_name()))?;

        if db_path(&db_dir, current_file_name()).exists() {
            if options.error_if_exists {
                return Err(Error::AlreadyExists(format!(
                    "{}: exists (error_if_exists is true)",
                    db_dir.display()
                )));
            }
        } else if options.create_if_missing {
            log::info!("Creating new database in {}", db_dir.display());
            VersionSet::create_new_db(&db_dir, &options)?;
        } else {
            return Err(Error::not_found(format!(
                "{}: does not exist (create_if_missing is false)",
                db_dir.display()
            )));
        }

        let icmp = InternalKeyComparator::new(options.comparator.clone());
        let table_cache = Arc::new(TableCache::new(
            &db_dir,
            &options,
            Arc::new(icmp.clone()),
            options.table_cache_size(),
        ));
        let mut versions = VersionSet::new(&db_dir, &options, table_cache.clone());
        versions.recover()?;

        let mut state = DbState {
            mem: Arc::new(MemTable::new(options.comparator.clone())),
            imm: None,
            log_number: 0,
            versions,
            pending_outputs: HashSet::new(),
            background_error: None,
            manual: None,
            suspensions: 0,
            suspend_acked: false,
            worker_running: true,
            stats: [LevelStats::default(); NUM_LEVELS],
        };

        let log = recovery::recover_logs(&db_dir, &options, &table_cache, &mut state)?;

        let inner = Arc::new(DbInner {
            db_dir,
            options,
            icmp,
            table_cache,
            log: Mutex::new(Some(log)),
            state: Mutex::new(state),
            work_signal: Condvar::new(),
            done_signal: Condvar::new(),
            shutting_down: AtomicBool::new(false),
            has_imm: AtomicBool::new(false),
            snapshots: Arc::new(SnapshotList::new()),
            _lock: lock,
        });

        {
            let mut state = inner.state.lock();
            inner.delete_obsolete_files(&mut state);
        }

        let worker_inner = inner.clone();
        let worker = thread::Builder::new()
            .name("lsmdb-compaction".to_string())
            .spawn(move || worker_inner.background_loop())?;

        log::info!("Opened database {}", inner.db_dir.display());
        Ok(Self { inner, worker: Mutex::new(Some(worker)) })
    }

    /// Removes every database file in `path`, then the directory if empty.
    ///
    /// Fails if the database is currently open.
    pub fn destroy<P: AsRef<Path>>(path: P) -> Result<()> {
        let db_dir = path.as_ref();
        let names = match list_files(db_dir) {
            Ok(names) => names,
            // Nothing to destroy
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let lock_path = db_path(db_dir, lock_file_name());
        let lock = FileLock::lock(&lock_path)?;
        let mut result = Ok(());
        for name in names {
            match parse_file_name(&name) {
                Some((FileType::DbLock, _)) | None => {}
                Some((file_type, number)) => {
                    log::debug!("Destroy: removing {:?} #{} ({})", file_type, number, name);
                    if let Err(e) = fs::remove_file(db_path(db_dir, &name)) {
                        if result.is_ok() {
                            result = Err(Error::Io(e));
                        }
                    }
                }
            }
        }
        drop(lock);
        let _ = fs::remove_file(&lock_path);
        let _ = fs::remove_dir(db_dir);
        result
    }

    /// Inserts or overwrites `key`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use lsmdb::{Options, DB};
    /// # fn main() -> Result<(), lsmdb::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// db.put(b"key", b"value")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_with(&WriteOptions::default(), key, value).map(|_| ())
    }

    /// Inserts `key` with explicit write options.
    pub fn put_with(
        &self,
        options: &WriteOptions,
        key: &[u8],
        value: &[u8],
    ) -> Result<Option<Snapshot>> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(options, &batch)
    }

    /// Deletes `key`. Deleting a missing key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.delete_with(&WriteOptions::default(), key).map(|_| ())
    }

    /// Deletes `key` with explicit write options.
    pub fn delete_with(&self, options: &WriteOptions, key: &[u8]) -> Result<Option<Snapshot>> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(options, &batch)
    }

    /// Applies every operation of `batch` atomically.
    ///
    /// With `options.snapshot` set, returns a snapshot that sees exactly the
    /// state right after this batch.
    pub fn write(&self, options: &WriteOptions, batch: &WriteBatch) -> Result<Option<Snapshot>> {
        self.inner.write(options, batch)
    }

    /// Returns the value of `key`, or `None` if it is missing or deleted.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use lsmdb::{Options, DB};
    /// # fn main() -> Result<(), lsmdb::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// if let Some(value) = db.get(b"key")? {
    ///     println!("Found: {:?}", value);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_with(&ReadOptions::default(), key)
    }

    /// Reads `key` with explicit read options, e.g. through a snapshot.
    pub fn get_with(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(options, key)
    }

    /// Returns an iterator over the database as of `options.snapshot`, or the
    /// latest state.
    pub fn iter(&self, options: &ReadOptions) -> Result<DbIterator> {
        self.inner.iter(options)
    }

    /// Captures the current state for later reads.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.inner.state.lock();
        self.inner.snapshots.acquire(state.versions.last_sequence(), state.versions.current())
    }

    /// Writes the active memtable to a table and waits until it is done.
    pub fn flush_memtable(&self) -> Result<()> {
        self.inner.flush_memtable()
    }

    /// Compacts every level overlapping the user key range `[begin, end]`.
    ///
    /// `None` bounds are open. The memtable is flushed first, so afterwards
    /// all data in the range sits in the deepest level holding it.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let max_level_with_files = {
            let state = self.inner.state.lock();
            self.inner.check_background_error(&state)?;
            let version = state.versions.current();
            (1..NUM_LEVELS)
                .filter(|&level| version.overlap_in_level(level, begin, end))
                .max()
                .unwrap_or(1)
        };

        self.flush_memtable()?;
        for level in 0..max_level_with_files {
            self.compact_range_level(level, begin, end)?;
        }
        Ok(())
    }

    /// Compacts the files of `level` overlapping `[begin, end]` into
    /// `level + 1`.
    pub fn compact_range_level(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        if level + 1 >= NUM_LEVELS {
            return Err(Error::invalid_argument(format!("cannot compact level {}", level)));
        }
        self.inner.run_manual_compaction(ManualCompaction {
            level,
            begin: begin.map(|k| InternalKey::new(k, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK)),
            end: end.map(|k| InternalKey::new(k, 0, ValueType::Deletion)),
            done: false,
        })
    }

    /// Pauses background compactions.
    ///
    /// Returns once the worker has finished its current job and parked.
    /// Calls nest; each must be matched by [`resume_compactions`](Self::resume_compactions).
    pub fn suspend_compactions(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        state.suspensions += 1;
        inner.work_signal.notify_all();
        while !state.suspend_acked
            && state.worker_running
            && !inner.shutting_down.load(Ordering::Acquire)
        {
            inner.done_signal.wait(&mut state);
        }
    }

    /// Undoes one [`suspend_compactions`](Self::suspend_compactions).
    pub fn resume_compactions(&self) {
        let mut state = self.inner.state.lock();
        state.suspensions = state.suspensions.saturating_sub(1);
        if state.suspensions == 0 {
            state.suspend_acked = false;
        }
        self.inner.work_signal.notify_all();
    }

    /// Returns the approximate on-disk size of each user key range.
    ///
    /// Data still in memtables is not counted.
    pub fn get_approximate_sizes(&self, ranges: &[Range]) -> Result<Vec<u64>> {
        let version = {
            let state = self.inner.state.lock();
            self.inner.check_background_error(&state)?;
            state.versions.current()
        };

        let mut sizes = Vec::with_capacity(ranges.len());
        for range in ranges {
            let start = InternalKey::new(&range.start, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
            let limit = InternalKey::new(&range.limit, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
            let start_offset = version.approximate_offset_of(&start, &self.inner.table_cache)?;
            let limit_offset = version.approximate_offset_of(&limit, &self.inner.table_cache)?;
            sizes.push(limit_offset.saturating_sub(start_offset));
        }
        Ok(sizes)
    }

    /// Returns the value of a named engine property.
    ///
    /// Known properties:
    /// - `lsmdb.num-files-at-level<N>`
    /// - `lsmdb.stats` and `lsmdb.stats.json`
    /// - `lsmdb.sstables`
    /// - `lsmdb.approximate-memory-usage`
    pub fn get_property(&self, name: &str) -> Result<Option<String>> {
        let inner = &self.inner;
        let state = inner.state.lock();
        inner.check_background_error(&state)?;

        let Some(property) = name.strip_prefix("lsmdb.") else {
            return Ok(None);
        };
        let version = state.versions.current();
        let memtable_bytes = state.mem.approximate_memory_usage()
            + state.imm.as_ref().map_or(0, |imm| imm.approximate_memory_usage());

        let value = if let Some(level) = property.strip_prefix("num-files-at-level") {
            match level.parse::<usize>() {
                Ok(level) if level < NUM_LEVELS => Some(version.num_files(level).to_string()),
                _ => None,
            }
        } else {
            match property {
                "stats" | "stats.json" => {
                    let stats = DbStats::collect(
                        &version,
                        &state.stats,
                        memtable_bytes,
                        inner.table_cache.stats(),
                    );
                    if property == "stats" {
                        Some(stats.to_table())
                    } else {
                        Some(serde_json::to_string(&stats)?)
                    }
                }
                "sstables" => Some(stats::describe_tables(&version)),
                "approximate-memory-usage" => Some(memtable_bytes.to_string()),
                _ => None,
            }
        };
        Ok(value)
    }

    /// Stops background work, waits for the worker and syncs the log.
    ///
    /// Calling `close` more than once is harmless; dropping the handle
    /// closes it as well.
    pub fn close(&self) -> Result<()> {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        {
            let _state = self.inner.state.lock();
            self.inner.work_signal.notify_all();
            self.inner.done_signal.notify_all();
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                log::error!("Compaction thread panicked");
            }
        }

        let mut result = Ok(());
        if let Some(mut log) = self.inner.log.lock().take() {
            result = log.close();
        }
        let mut state = self.inner.state.lock();
        if let Err(e) = state.versions.close() {
            result = result.and(Err(e));
        }
        log::info!("Closed database {}", self.inner.db_dir.display());
        result
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Error closing database: {}", e);
        }
    }
}

impl DbInner {
    pub(crate) fn check_background_error(&self, state: &DbState) -> Result<()> {
        match &state.background_error {
            Some(msg) => Err(Error::Background(msg.clone())),
            None => Ok(()),
        }
    }

    fn write(&self, options: &WriteOptions, batch: &WriteBatch) -> Result<Option<Snapshot>> {
        let mut log = self.log.lock();
        let mut state = self.state.lock();
        self.make_room_for_write(&mut log, &mut state, batch.approximate_size(), false)?;

        let mut last_sequence = state.versions.last_sequence();
        if !batch.is_empty() {
            let first = last_sequence + 1;
            let mem = state.mem.clone();
            let record = batch.encode(first);

            let result = MutexGuard::unlocked(&mut state, || -> Result<SequenceNumber> {
                let writer = log.as_mut().ok_or(Error::ShuttingDown)?;
                writer.add_record(&record, options.sync)?;
                Ok(batch.insert_into(&mem, first))
            });
            match result {
                Ok(last) => last_sequence = last,
                Err(e) => {
                    // The log may hold a partial record; refuse further writes.
                    if !matches!(e, Error::ShuttingDown) {
                        self.record_background_error(&mut state, &e);
                    }
                    return Err(e);
                }
            }
            state.versions.set_last_sequence(last_sequence)?;
        }

        if options.snapshot {
            return Ok(Some(self.snapshots.acquire(last_sequence, state.versions.current())));
        }
        Ok(None)
    }

    /// Makes sure the active memtable has room for a write.
    ///
    /// May sleep briefly when level 0 is filling up, wait for the background
    /// worker, or switch to a fresh memtable and log. The switch happens when
    /// `incoming` more bytes would push a non-empty memtable past the write
    /// buffer size, so the write lands in the new log. With `force` the
    /// memtable is switched even if it has room.
    pub(crate) fn make_room_for_write(
        &self,
        log: &mut Option<LogWriter>,
        state: &mut MutexGuard<'_, DbState>,
        incoming: usize,
        mut force: bool,
    ) -> Result<()> {
        let mut allow_delay = !force;
        loop {
            self.check_background_error(state)?;
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(Error::ShuttingDown);
            }

            let level0_files = state.versions.num_level_files(0);
            if allow_delay && level0_files >= L0_SLOWDOWN_WRITES_TRIGGER {
                // Delay each write by 1ms instead of stalling one write for
                // seconds once the hard limit is reached.
                MutexGuard::unlocked(state, || thread::sleep(Duration::from_millis(1)));
                allow_delay = false;
            } else if !force
                && (state.mem.is_empty()
                    || state.mem.approximate_memory_usage() + incoming
                        <= self.options.write_buffer_size)
            {
                return Ok(());
            } else if state.imm.is_some() {
                log::info!("Current memtable full; waiting for the previous flush");
                self.done_signal.wait(state);
            } else if level0_files >= L0_STOP_WRITES_TRIGGER {
                log::info!("Too many level 0 files ({}); waiting for compaction", level0_files);
                self.done_signal.wait(state);
            } else {
                let number = state.versions.new_file_number();
                let file = match File::create(db_path(&self.db_dir, &log_file_name(number))) {
                    Ok(file) => file,
                    Err(e) => {
                        state.versions.reuse_file_number(number);
                        return Err(e.into());
                    }
                };
                if let Some(mut old) = log.take() {
                    old.close()?;
                }
                *log = Some(LogWriter::new(file, number));
                state.log_number = number;

                let fresh = Arc::new(MemTable::new(self.options.comparator.clone()));
                let full = std::mem::replace(&mut state.mem, fresh);
                log::debug!(
                    "Switched to log #{}; flushing {} byte memtable",
                    number,
                    full.approximate_memory_usage()
                );
                state.imm = Some(full);
                self.has_imm.store(true, Ordering::Release);
                force = false;
                self.work_signal.notify_all();
            }
        }
    }

    fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (mem, imm, version, sequence) = {
            let state = self.state.lock();
            self.check_background_error(&state)?;
            let sequence = match &options.snapshot {
                Some(snapshot) => snapshot.sequence(),
                None => state.versions.last_sequence(),
            };
            (state.mem.clone(), state.imm.clone(), state.versions.current(), sequence)
        };

        let lookup = LookupKey::new(key, sequence);
        for table in std::iter::once(&mem).chain(imm.as_ref()) {
            match table.get(&lookup) {
                LookupResult::Found(value) => return Ok(Some(value)),
                LookupResult::Deleted => return Ok(None),
                LookupResult::NotFound => {}
            }
        }

        let verify = options.verify_checksums || self.options.verify_checksums;
        let (result, seek_stats) =
            version.get(&lookup, &self.table_cache, verify, options.fill_cache)?;
        if let Some(seek_stats) = seek_stats {
            if version.update_stats(seek_stats) {
                let _state = self.state.lock();
                self.work_signal.notify_all();
            }
        }

        Ok(match result {
            LookupResult::Found(value) => Some(value),
            LookupResult::Deleted | LookupResult::NotFound => None,
        })
    }

    fn iter(&self, options: &ReadOptions) -> Result<DbIterator> {
        let (mem, imm, version, sequence) = {
            let state = self.state.lock();
            self.check_background_error(&state)?;
            let sequence = match &options.snapshot {
                Some(snapshot) => snapshot.sequence(),
                None => state.versions.last_sequence(),
            };
            (state.mem.clone(), state.imm.clone(), state.versions.current(), sequence)
        };

        let mut children: Vec<BoxedIterator> = vec![Box::new(mem.iter())];
        if let Some(imm) = &imm {
            children.push(Box::new(imm.iter()));
        }
        let verify = options.verify_checksums || self.options.verify_checksums;
        version.add_iterators(&self.table_cache, verify, &mut children)?;

        let icmp: Arc<dyn Comparator> = Arc::new(self.icmp.clone());
        let merged = MergingIterator::new(icmp, children);
        let ucmp = self.icmp.user_comparator().clone();
        Ok(DbIterator::new(Box::new(merged), ucmp, sequence, version))
    }

    fn flush_memtable(&self) -> Result<()> {
        {
            let mut log = self.log.lock();
            let mut state = self.state.lock();
            self.check_background_error(&state)?;
            if !state.mem.is_empty() {
                self.make_room_for_write(&mut log, &mut state, 0, true)?;
            }
        }

        let mut state = self.state.lock();
        while state.imm.is_some() {
            self.check_background_error(&state)?;
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(Error::ShuttingDown);
            }
            self.done_signal.wait(&mut state);
        }
        self.check_background_error(&state)
    }

    fn run_manual_compaction(&self, manual: ManualCompaction) -> Result<()> {
        let mut state = self.state.lock();
        while state.manual.is_some() {
            self.check_background_error(&state)?;
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(Error::ShuttingDown);
            }
            self.done_signal.wait(&mut state);
        }

        log::info!("Manual compaction at level {} requested", manual.level);
        state.manual = Some(manual);
        self.work_signal.notify_all();

        let result = loop {
            if let Err(e) = self.check_background_error(&state) {
                break Err(e);
            }
            if self.shutting_down.load(Ordering::Acquire) {
                break Err(Error::ShuttingDown);
            }
            if state.manual.as_ref().is_some_and(|m| m.done) {
                break Ok(());
            }
            self.done_signal.wait(&mut state);
        };
        state.manual = None;
        self.done_signal.notify_all();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_options() -> Options {
        Options::default().write_buffer_size(64 * 1024)
    }

    #[test]
    fn test_db_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let db = DB::open(dir.path(), Options::default()).unwrap();

        db.put(b"key1", b"value1").unwrap();
        db.put(b"key2", b"value2").unwrap();
        db.delete(b"key1").unwrap();

        assert_eq!(db.get(b"key1").unwrap(), None);
        assert_eq!(db.get(b"key2").unwrap(), Some(b"value2".to_vec()));
        assert_eq!(db.get(b"missing").unwrap(), None);
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent");
        let err = DB::open(&path, Options::default().create_if_missing(false)).err().unwrap();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_error_if_exists() {
        let dir = TempDir::new().unwrap();
        drop(DB::open(dir.path(), Options::default()).unwrap());
        let err = DB::open(dir.path(), Options::default().error_if_exists(true)).err().unwrap();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let _db = DB::open(dir.path(), Options::default()).unwrap();
        let err = DB::open(dir.path(), Options::default()).err().unwrap();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_write_returns_snapshot() {
        let dir = TempDir::new().unwrap();
        let db = DB::open(dir.path(), Options::default()).unwrap();

        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.put(b"b", b"2");
        let snapshot = db.write(&WriteOptions::new().snapshot(true), &batch).unwrap().unwrap();
        assert_eq!(snapshot.sequence(), 2);

        db.put(b"a", b"changed").unwrap();
        let read = ReadOptions::new().snapshot(snapshot);
        assert_eq!(db.get_with(&read, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get(b"a").unwrap(), Some(b"changed".to_vec()));
    }

    #[test]
    fn test_flush_memtable_moves_data_to_tables() {
        let dir = TempDir::new().unwrap();
        let db = DB::open(dir.path(), Options::default()).unwrap();
        for i in 0..100 {
            db.put(format!("key{:03}", i).as_bytes(), b"v").unwrap();
        }
        db.flush_memtable().unwrap();

        let files: usize = (0..NUM_LEVELS)
            .map(|l| {
                db.get_property(&format!("lsmdb.num-files-at-level{}", l))
                    .unwrap()
                    .unwrap()
                    .parse::<usize>()
                    .unwrap()
            })
            .sum();
        assert_eq!(files, 1);
        assert_eq!(db.get(b"key042").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_properties() {
        let dir = TempDir::new().unwrap();
        let db = DB::open(dir.path(), small_options()).unwrap();
        db.put(b"k", b"v").unwrap();

        assert!(db.get_property("lsmdb.stats").unwrap().unwrap().contains("Level"));
        let json = db.get_property("lsmdb.stats.json").unwrap().unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&json).is_ok());
        assert!(db.get_property("lsmdb.sstables").unwrap().unwrap().contains("--- level 0 ---"));
        let usage: usize =
            db.get_property("lsmdb.approximate-memory-usage").unwrap().unwrap().parse().unwrap();
        assert!(usage > 0);

        assert_eq!(db.get_property("lsmdb.num-files-at-level7").unwrap(), None);
        assert_eq!(db.get_property("lsmdb.unknown").unwrap(), None);
        assert_eq!(db.get_property("other.stats").unwrap(), None);
    }

    #[test]
    fn test_suspend_and_resume() {
        let dir = TempDir::new().unwrap();
        let db = DB::open(dir.path(), Options::default()).unwrap();
        db.suspend_compactions();
        db.suspend_compactions();
        db.put(b"k", b"v").unwrap();
        db.resume_compactions();
        db.resume_compactions();
        db.flush_memtable().unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_compact_range_level_bounds() {
        let dir = TempDir::new().unwrap();
        let db = DB::open(dir.path(), Options::default()).unwrap();
        assert!(matches!(
            db.compact_range_level(NUM_LEVELS - 1, None, None),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_close_twice_and_use_after_close() {
        let dir = TempDir::new().unwrap();
        let db = DB::open(dir.path(), Options::default()).unwrap();
        db.put(b"k", b"v").unwrap();
        db.close().unwrap();
        db.close().unwrap();
        assert!(matches!(db.put(b"k", b"v2"), Err(Error::ShuttingDown)));
    }

    #[test]
    fn test_destroy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let db = DB::open(&path, Options::default()).unwrap();
            db.put(b"k", b"v").unwrap();
            assert!(DB::destroy(&path).is_err());
        }
        DB::destroy(&path).unwrap();
        assert!(!path.exists());
        DB::destroy(&path).unwrap();
    }
}
