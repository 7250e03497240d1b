//! WAL writer implementation.

use super::record::{encode_header, RecordType, HEADER_SIZE};
use super::BLOCK_SIZE;
use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};

/// Appends records to a log file.
///
/// Records are split into chunks so that no chunk crosses a block boundary.
/// When fewer than [`HEADER_SIZE`] bytes remain in a block, the tail is
/// padded with zeros and the next chunk starts a fresh block.
pub struct LogWriter {
    writer: BufWriter<File>,
    file_number: u64,
    /// Offset within the current block
    block_offset: usize,
    closed: bool,
}

impl LogWriter {
    /// Creates a writer for a new, empty log file.
    pub fn new(file: File, file_number: u64) -> Self {
        Self { writer: BufWriter::new(file), file_number, block_offset: 0, closed: false }
    }

    /// Number of the log file being written.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Appends a logical record.
    ///
    /// The data is handed to the operating system before returning; with
    /// `force` it is also synced to stable storage.
    pub fn add_record(&mut self, data: &[u8], force: bool) -> Result<()> {
        debug_assert!(!self.closed, "write to closed log");

        let mut left = data;
        let mut begin = true;

        // Emits at least one chunk, even for an empty record.
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Switch to a new block
                if leftover > 0 {
                    const ZEROS: [u8; HEADER_SIZE] = [0; HEADER_SIZE];
                    self.writer.write_all(&ZEROS[..leftover])?;
                }
                self.block_offset = 0;
            }

            let available = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_len = left.len().min(available);
            let end = fragment_len == left.len();

            self.emit_physical_record(RecordType::for_fragment(begin, end), &left[..fragment_len])?;
            left = &left[fragment_len..];
            begin = false;

            if end {
                break;
            }
        }

        self.writer.flush()?;
        if force {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    fn emit_physical_record(&mut self, record_type: RecordType, payload: &[u8]) -> Result<()> {
        debug_assert!(self.block_offset + HEADER_SIZE + payload.len() <= BLOCK_SIZE);

        let mut header = [0u8; HEADER_SIZE];
        encode_header(&mut &mut header[..], record_type, payload);
        self.writer.write_all(&header)?;
        self.writer.write_all(payload)?;

        self.block_offset += HEADER_SIZE + payload.len();
        Ok(())
    }

    /// Flushes and fsyncs everything written so far.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Syncs and closes the log.
    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.sync()?;
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.writer.flush() {
                log::warn!("Failed to flush log #{} on drop: {}", self.file_number, e);
            }
        }
    }
}
