//! Write-Ahead Log (WAL) implementation.
//!
//! The WAL ensures durability by persisting every write batch before it is
//! applied to the MemTable. The same framing is used for the manifest, which
//! is a log of version edits.
//!
//! ## Architecture
//!
//! - **Blocks**: The file is a sequence of 32KB blocks
//! - **Chunks**: Each logical record is split into chunks that never cross a
//!   block boundary; each chunk carries a masked CRC32C
//! - **Recovery**: The reader reassembles records and reports damaged chunks
//!   to a [`LogMonitor`], which decides whether to keep going
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lsmdb::wal::{LogReader, LogWriter, LoggingMonitor};
//! use std::fs::File;
//!
//! # fn main() -> Result<(), lsmdb::Error> {
//! let mut writer = LogWriter::new(File::create("000003.log")?, 3);
//! writer.add_record(b"key1:value1", false)?;
//! writer.add_record(b"key2:value2", true)?;
//!
//! let monitor = Box::new(LoggingMonitor::new(3));
//! let mut reader = LogReader::new(File::open("000003.log")?, monitor, true, 0);
//! while let Some(record) = reader.read_record()? {
//!     println!("Recovered: {:?}", record);
//! }
//! # Ok(())
//! # }
//! ```

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::LogReader;
pub use record::{RecordType, HEADER_SIZE};
pub use writer::LogWriter;

use crate::error::{Error, Result};

/// Size of a log block
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Receives reports of damaged log data.
///
/// Returning an error from [`corruption`](Self::corruption) stops the reader,
/// which then returns that error to its caller.
pub trait LogMonitor: Send {
    /// `bytes` of log data were dropped for `reason`.
    fn corruption(&mut self, bytes: u64, reason: &str) -> Result<()>;
}

/// Logs every dropped range and lets the reader continue.
#[derive(Debug, Default)]
pub struct LoggingMonitor {
    file_number: u64,
    dropped_bytes: u64,
}

impl LoggingMonitor {
    /// Creates a monitor for log file `file_number`.
    pub fn new(file_number: u64) -> Self {
        Self { file_number, dropped_bytes: 0 }
    }

    /// Total bytes reported as dropped.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }
}

impl LogMonitor for LoggingMonitor {
    fn corruption(&mut self, bytes: u64, reason: &str) -> Result<()> {
        self.dropped_bytes += bytes;
        log::warn!("Log #{}: dropping {} bytes; {}", self.file_number, bytes, reason);
        Ok(())
    }
}

/// Turns the first reported corruption into an error.
#[derive(Debug, Default)]
pub struct FailFastMonitor {
    context: String,
}

impl FailFastMonitor {
    /// Creates a monitor whose errors mention `context` (usually a file name).
    pub fn new(context: impl Into<String>) -> Self {
        Self { context: context.into() }
    }
}

impl LogMonitor for FailFastMonitor {
    fn corruption(&mut self, bytes: u64, reason: &str) -> Result<()> {
        log::error!("{}: {} bytes corrupted; {}", self.context, bytes, reason);
        Err(Error::corruption(format!("{}: {} bytes corrupted; {}", self.context, bytes, reason)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_monitor_accumulates() {
        let mut monitor = LoggingMonitor::new(7);
        monitor.corruption(10, "bad").unwrap();
        monitor.corruption(5, "worse").unwrap();
        assert_eq!(monitor.dropped_bytes(), 15);
    }

    #[test]
    fn test_fail_fast_monitor() {
        let mut monitor = FailFastMonitor::new("MANIFEST-000001");
        let err = monitor.corruption(3, "checksum mismatch").unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("MANIFEST-000001"));
    }
}
