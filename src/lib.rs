//! # lsmdb - An Embedded LSM-Tree Storage Engine
//!
//! lsmdb is a persistent, ordered key-value store in the style of LevelDB.
//! Keys and values are arbitrary byte strings; keys are kept sorted by a
//! pluggable [`Comparator`].
//!
//! ## Architecture
//!
//! The storage engine consists of several key components:
//!
//! - **WAL (Write-Ahead Log)**: Every write batch is logged before it is applied
//! - **MemTable**: In-memory sorted structure for recent writes
//! - **SSTable**: Immutable sorted table files on disk, organized in levels
//! - **Manifest**: A log of version edits describing which tables are live
//! - **Compaction**: A background thread that merges tables into deeper levels
//! - **Table Cache**: Keeps recently used tables open
//! - **Snapshots**: Consistent point-in-time reads
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use lsmdb::{Options, ReadOptions, DB};
//!
//! # fn main() -> Result<(), lsmdb::Error> {
//! // Open or create a database
//! let options = Options::default();
//! let db = DB::open("./data", options)?;
//!
//! // Write operations
//! db.put(b"key1", b"value1")?;
//! db.put(b"key2", b"value2")?;
//!
//! // Read operations
//! if let Some(value) = db.get(b"key1")? {
//!     println!("Found: {:?}", value);
//! }
//!
//! // Ordered scan
//! let mut iter = db.iter(&ReadOptions::default())?;
//! iter.seek_to_first()?;
//! while iter.valid() {
//!     println!("{:?} => {:?}", iter.key(), iter.value());
//!     iter.next()?;
//! }
//!
//! // Delete operations
//! db.delete(b"key1")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod cache;
pub mod coding;
pub mod comparator;
pub mod compaction;
pub mod config;
mod db;
pub mod error;
pub mod filename;
pub mod iterator;
pub mod lock;
pub mod memtable;
pub mod snapshot;
pub mod sstable;
pub mod wal;
pub mod write_batch;

// Re-exports
pub use comparator::{BytewiseComparator, Comparator};
pub use config::{CompressionType, Options, ReadOptions, WriteOptions};
pub use db::{DbStats, LevelStats, LevelSummary, Range, DB};
pub use error::{Error, Result};
pub use iterator::DbIterator;
pub use snapshot::Snapshot;
pub use write_batch::WriteBatch;
