//! WAL reader implementation for recovery.

use super::record::{chunk_checksum, ChunkHeader, RecordType, HEADER_SIZE};
use super::{LogMonitor, BLOCK_SIZE};
use crate::error::Result;
use std::io::{self, Read};

/// Outcome of reading one physical chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    Record(RecordType),
    Eof,
    /// A damaged or skipped chunk; already reported where appropriate.
    Bad,
}

/// Reads logical records back out of a log file.
///
/// Damaged chunks are reported to the [`LogMonitor`] and skipped. A checksum
/// failure discards the remainder of its block, since the length field can
/// no longer be trusted.
pub struct LogReader<R: Read> {
    source: R,
    monitor: Box<dyn LogMonitor>,
    verify_checksums: bool,
    /// Records starting before this file offset are skipped.
    initial_offset: u64,

    /// Current block contents and read position within it
    buffer: Vec<u8>,
    buffer_pos: usize,
    eof: bool,

    /// File offset just past the end of `buffer`
    end_of_buffer_offset: u64,
    /// Offset of the last record returned by `read_record`
    last_record_offset: u64,
    /// Payload range within `buffer` of the chunk most recently read
    fragment: (usize, usize),
    /// File offset of that chunk's header
    fragment_offset: u64,
    skipped_to_initial: bool,
}

impl<R: Read> LogReader<R> {
    /// Creates a reader.
    ///
    /// # Arguments
    ///
    /// * `source` - Log data positioned at offset zero
    /// * `monitor` - Receives corruption reports
    /// * `verify_checksums` - Whether to check each chunk's CRC
    /// * `initial_offset` - Records that start before this offset are skipped
    pub fn new(
        source: R,
        monitor: Box<dyn LogMonitor>,
        verify_checksums: bool,
        initial_offset: u64,
    ) -> Self {
        Self {
            source,
            monitor,
            verify_checksums,
            initial_offset,
            buffer: Vec::with_capacity(BLOCK_SIZE),
            buffer_pos: 0,
            eof: false,
            end_of_buffer_offset: 0,
            last_record_offset: 0,
            fragment: (0, 0),
            fragment_offset: 0,
            skipped_to_initial: initial_offset == 0,
        }
    }

    /// Offset of the last record returned by [`read_record`](Self::read_record).
    pub fn last_record_offset(&self) -> u64 {
        self.last_record_offset
    }

    /// Reads the next complete record.
    ///
    /// Returns `Ok(None)` at end of input.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying read fails or when the monitor
    /// rejects a corruption report.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.skipped_to_initial {
            self.skip_to_initial_block()?;
            self.skipped_to_initial = true;
        }

        let mut scratch: Vec<u8> = Vec::new();
        let mut in_fragmented_record = false;
        let mut prospective_record_offset = 0u64;

        loop {
            let chunk = self.read_physical_record()?;
            let (start, len) = self.fragment;
            let physical_record_offset = self.fragment_offset;

            match chunk {
                Chunk::Record(RecordType::Full) => {
                    if in_fragmented_record && !scratch.is_empty() {
                        self.report(scratch.len() as u64, "Partial record without end")?;
                    }
                    self.last_record_offset = physical_record_offset;
                    return Ok(Some(self.buffer[start..start + len].to_vec()));
                }
                Chunk::Record(RecordType::First) => {
                    if in_fragmented_record && !scratch.is_empty() {
                        self.report(scratch.len() as u64, "Partial record without end")?;
                    }
                    prospective_record_offset = physical_record_offset;
                    scratch.clear();
                    scratch.extend_from_slice(&self.buffer[start..start + len]);
                    in_fragmented_record = true;
                }
                Chunk::Record(RecordType::Middle) => {
                    if in_fragmented_record {
                        scratch.extend_from_slice(&self.buffer[start..start + len]);
                    } else {
                        self.report(len as u64, "Missing start of fragmented record")?;
                    }
                }
                Chunk::Record(RecordType::Last) => {
                    if in_fragmented_record {
                        scratch.extend_from_slice(&self.buffer[start..start + len]);
                        self.last_record_offset = prospective_record_offset;
                        return Ok(Some(scratch));
                    }
                    self.report(len as u64, "Missing start of fragmented record")?;
                }
                Chunk::Record(RecordType::Zero) => {
                    let mut dropped = len as u64;
                    if in_fragmented_record {
                        dropped += scratch.len() as u64;
                    }
                    self.report(dropped, "Unexpected zero chunk type")?;
                    in_fragmented_record = false;
                    scratch.clear();
                }
                Chunk::Eof => {
                    if in_fragmented_record {
                        self.report(scratch.len() as u64, "Partial record without end")?;
                    }
                    return Ok(None);
                }
                Chunk::Bad => {
                    if in_fragmented_record {
                        self.report(scratch.len() as u64, "Error in middle of record")?;
                        in_fragmented_record = false;
                        scratch.clear();
                    }
                }
            }
        }
    }

    /// Positions the reader at the start of the block holding `initial_offset`.
    fn skip_to_initial_block(&mut self) -> Result<()> {
        let offset_in_block = self.initial_offset % BLOCK_SIZE as u64;
        let mut block_start = self.initial_offset - offset_in_block;

        // A record cannot start in the trailing bytes of a block.
        if offset_in_block > (BLOCK_SIZE - (HEADER_SIZE - 1)) as u64 {
            block_start += BLOCK_SIZE as u64;
        }

        if block_start > 0 {
            let skipped = io::copy(&mut (&mut self.source).take(block_start), &mut io::sink())?;
            self.end_of_buffer_offset = skipped;
            if skipped < block_start {
                self.eof = true;
            }
        }
        Ok(())
    }

    /// Reads the next chunk, leaving its payload range in `self.fragment`.
    fn read_physical_record(&mut self) -> Result<Chunk> {
        self.fragment = (self.buffer_pos, 0);
        loop {
            let available = self.buffer.len() - self.buffer_pos;
            if available < HEADER_SIZE {
                if self.eof {
                    // Truncated header at the end of the file; the writer
                    // died while emitting it.
                    self.buffer_pos = self.buffer.len();
                    return Ok(Chunk::Eof);
                }
                // Any bytes left over are block padding.
                self.read_block()?;
                continue;
            }

            let header = match ChunkHeader::decode(&self.buffer[self.buffer_pos..]) {
                Some(h) => h,
                None => return Ok(Chunk::Eof),
            };

            if HEADER_SIZE + header.length > available {
                let dropped = available as u64;
                self.buffer_pos = self.buffer.len();
                if self.eof {
                    // The writer died mid-chunk; treat as end of input.
                    return Ok(Chunk::Eof);
                }
                self.report(dropped, "Invalid chunk length")?;
                return Ok(Chunk::Bad);
            }

            if header.type_byte == RecordType::Zero as u8 && header.length == 0 {
                // Preallocated space; skip the rest of the block without
                // reporting.
                self.buffer_pos = self.buffer.len();
                return Ok(Chunk::Bad);
            }

            let payload_start = self.buffer_pos + HEADER_SIZE;
            let payload_end = payload_start + header.length;

            if self.verify_checksums {
                let actual =
                    chunk_checksum(header.type_byte, &self.buffer[payload_start..payload_end]);
                if actual != header.checksum {
                    let dropped = available as u64;
                    self.buffer_pos = self.buffer.len();
                    self.report(dropped, "Invalid chunk checksum")?;
                    return Ok(Chunk::Bad);
                }
            }

            self.buffer_pos = payload_end;

            let chunk_start = self.end_of_buffer_offset - (self.buffer.len() - payload_end) as u64
                - header.length as u64
                - HEADER_SIZE as u64;
            if chunk_start < self.initial_offset {
                return Ok(Chunk::Bad);
            }

            return match RecordType::from_u8(header.type_byte) {
                Some(record_type) => {
                    self.fragment = (payload_start, header.length);
                    self.fragment_offset = chunk_start;
                    Ok(Chunk::Record(record_type))
                }
                None => {
                    self.report(
                        (HEADER_SIZE + header.length) as u64,
                        &format!("Unknown chunk type {}", header.type_byte),
                    )?;
                    Ok(Chunk::Bad)
                }
            };
        }
    }

    /// Fills `buffer` with the next block, setting `eof` on a short read.
    fn read_block(&mut self) -> Result<()> {
        self.buffer.clear();
        self.buffer.resize(BLOCK_SIZE, 0);
        self.buffer_pos = 0;

        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.source.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buffer.clear();
                    self.eof = true;
                    self.report(BLOCK_SIZE as u64, &format!("read failed: {}", e))?;
                    return Ok(());
                }
            }
        }

        self.buffer.truncate(filled);
        self.end_of_buffer_offset += filled as u64;
        if filled < BLOCK_SIZE {
            self.eof = true;
        }
        Ok(())
    }

    fn report(&mut self, bytes: u64, reason: &str) -> Result<()> {
        self.monitor.corruption(bytes, reason)
    }
}
