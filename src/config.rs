//! Configuration options for the lsmdb storage engine.

use crate::comparator::{BytewiseComparator, Comparator};
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration options for opening a database.
///
/// Options can be built with the setter methods or loaded from JSON with
/// [`Options::from_json`]. The comparator is never serialized; JSON-loaded
/// options always use the bytewise ordering unless replaced afterwards.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Create the database if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Error if the database already exists.
    /// Default: false
    pub error_if_exists: bool,

    /// Fail fast on any detected corruption instead of dropping the damaged
    /// record and continuing.
    /// Default: false
    pub paranoid_checks: bool,

    /// Size of the active MemTable before it is swapped out and flushed (in bytes).
    /// Default: 4MB
    pub write_buffer_size: usize,

    /// Number of open files the engine may use; the table cache gets
    /// `max_open_files - 10` slots.
    /// Default: 1000
    pub max_open_files: usize,

    /// Approximate uncompressed size of a table data block (in bytes).
    /// Default: 4KB
    pub block_size: usize,

    /// Number of entries between restart points inside a block.
    /// Default: 16
    pub block_restart_interval: usize,

    /// Compression applied to table blocks.
    /// Default: CompressionType::Snappy when the `snappy` feature is enabled
    pub compression: CompressionType,

    /// Verify block checksums on every table read.
    /// Default: true
    pub verify_checksums: bool,

    /// Read table files through a memory map.
    /// Default: false
    pub use_mmap: bool,

    /// Ordering of user keys.
    #[serde(skip, default = "default_comparator")]
    pub comparator: Arc<dyn Comparator>,
}

fn default_comparator() -> Arc<dyn Comparator> {
    Arc::new(BytewiseComparator)
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
            max_open_files: 1000,
            block_size: 4 * 1024, // 4KB
            block_restart_interval: 16,
            compression: CompressionType::default(),
            verify_checksums: true,
            use_mmap: false,
            comparator: default_comparator(),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_open_files", &self.max_open_files)
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("compression", &self.compression)
            .field("verify_checksums", &self.verify_checksums)
            .field("use_mmap", &self.use_mmap)
            .field("comparator", &self.comparator.name())
            .finish()
    }
}

/// Compression algorithms supported for table blocks.
///
/// The discriminant is the byte stored in each block trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    None = 0,

    /// Snappy compression (fast, moderate compression ratio).
    #[cfg(feature = "snappy")]
    Snappy = 1,

    /// LZ4 compression (very fast, lower compression ratio).
    #[cfg(feature = "lz4-compression")]
    Lz4 = 2,
}

impl CompressionType {
    /// Convert from the persisted trailer byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionType::None),
            #[cfg(feature = "snappy")]
            1 => Some(CompressionType::Snappy),
            #[cfg(feature = "lz4-compression")]
            2 => Some(CompressionType::Lz4),
            _ => None,
        }
    }

    /// The persisted trailer byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl Default for CompressionType {
    fn default() -> Self {
        #[cfg(feature = "snappy")]
        return CompressionType::Snappy;

        #[cfg(not(feature = "snappy"))]
        CompressionType::None
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from a JSON document. Missing fields keep their defaults.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lsmdb::Options;
    ///
    /// let opts = Options::from_json(r#"{ "write_buffer_size": 1048576 }"#).unwrap();
    /// assert_eq!(opts.write_buffer_size, 1 << 20);
    /// assert!(opts.create_if_missing);
    /// ```
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let options: Options = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Renders the serializable part of the options as JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Sets whether to create the database if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether opening an existing database is an error.
    pub fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Enables or disables paranoid corruption handling.
    pub fn paranoid_checks(mut self, value: bool) -> Self {
        self.paranoid_checks = value;
        self
    }

    /// Sets the MemTable size threshold.
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Sets the open file budget.
    pub fn max_open_files(mut self, value: usize) -> Self {
        self.max_open_files = value;
        self
    }

    /// Sets the block size for tables.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the restart interval for blocks.
    pub fn block_restart_interval(mut self, interval: usize) -> Self {
        self.block_restart_interval = interval;
        self
    }

    /// Sets the compression algorithm.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Enables or disables checksum verification on table reads.
    pub fn verify_checksums(mut self, value: bool) -> Self {
        self.verify_checksums = value;
        self
    }

    /// Enables or disables memory-mapped table reads.
    pub fn use_mmap(mut self, value: bool) -> Self {
        self.use_mmap = value;
        self
    }

    /// Sets the user key comparator.
    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Number of table handles the table cache may keep open.
    pub fn table_cache_size(&self) -> usize {
        self.max_open_files.saturating_sub(10).max(1)
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.write_buffer_size == 0 {
            return Err(crate::Error::invalid_argument("write_buffer_size must be > 0"));
        }
        if self.block_size == 0 {
            return Err(crate::Error::invalid_argument("block_size must be > 0"));
        }
        if self.block_restart_interval == 0 {
            return Err(crate::Error::invalid_argument("block_restart_interval must be > 0"));
        }
        if self.max_open_files < 20 {
            return Err(crate::Error::invalid_argument("max_open_files must be >= 20"));
        }
        Ok(())
    }
}

/// Options that control a single read.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Verify checksums of every block read for this operation.
    /// Default: false (the database-wide setting still applies)
    pub verify_checksums: bool,

    /// Keep opened tables in the table cache.
    /// Default: true
    pub fill_cache: bool,

    /// Read as of this snapshot instead of the latest state.
    pub snapshot: Option<Snapshot>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { verify_checksums: false, fill_cache: true, snapshot: None }
    }
}

impl ReadOptions {
    /// Creates read options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads through the given snapshot.
    pub fn snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Enables checksum verification for this read.
    pub fn verify_checksums(mut self, value: bool) -> Self {
        self.verify_checksums = value;
        self
    }

    /// Controls whether tables opened by this read are cached.
    pub fn fill_cache(mut self, value: bool) -> Self {
        self.fill_cache = value;
        self
    }
}

/// Options that control a single write.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// fsync the log before acknowledging the write.
    /// Default: false
    pub sync: bool,

    /// Return a snapshot positioned right after this write.
    /// Default: false
    pub snapshot: bool,
}

impl WriteOptions {
    /// Creates write options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the write is synced to disk.
    pub fn sync(mut self, value: bool) -> Self {
        self.sync = value;
        self
    }

    /// Sets whether the write returns a snapshot.
    pub fn snapshot(mut self, value: bool) -> Self {
        self.snapshot = value;
        self
    }
}
