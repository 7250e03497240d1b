//! WriteBatch provides atomic batch write operations.
//!
//! WriteBatch allows multiple write operations (put, delete) to be grouped together
//! and applied atomically to the database. The whole batch is written to the
//! log as one record and consumes one sequence number per operation, assigned
//! in batch order.
//!
//! # Example
//!
//! ```rust,no_run
//! use lsmdb::{Options, WriteBatch, WriteOptions, DB};
//!
//! # fn main() -> Result<(), lsmdb::Error> {
//! let db = DB::open("./data", Options::default())?;
//! let mut batch = WriteBatch::new();
//!
//! // Add multiple operations to the batch
//! batch.put(b"key1", b"value1");
//! batch.put(b"key2", b"value2");
//! batch.delete(b"key3");
//!
//! // Apply all operations atomically
//! db.write(&WriteOptions::default(), &batch)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Log record format
//!
//! ```text
//! sequence: fixed64 | count: fixed32 | op*
//! op := 0x01 varint32 key_len key varint32 value_len value   (put)
//!     | 0x00 varint32 key_len key                            (delete)
//! ```

use crate::coding::{
    decode_fixed32, decode_fixed64, get_length_prefixed_slice, put_length_prefixed_slice,
};
use crate::error::{Error, Result};
use crate::memtable::{MemTable, SequenceNumber, ValueType};
use bytes::BufMut;

/// Size of the record header: sequence (8 bytes) and count (4 bytes)
pub const HEADER_SIZE: usize = 12;

/// Type of write operation in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Put operation with key and value
    Put {
        /// Key to insert
        key: Vec<u8>,
        /// Value to associate with the key
        value: Vec<u8>,
    },
    /// Delete operation with key
    Delete {
        /// Key to delete
        key: Vec<u8>,
    },
}

impl WriteOp {
    /// The key this operation targets.
    pub fn key(&self) -> &[u8] {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

/// WriteBatch accumulates a sequence of write operations to be applied atomically.
///
/// Operations are buffered in memory and applied to the database together when
/// `DB::write()` is called. Later operations on the same key win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    operations: Vec<WriteOp>,
    approximate_size: usize,
}

impl WriteBatch {
    /// Creates a new empty WriteBatch.
    ///
    /// # Example
    ///
    /// ```
    /// use lsmdb::WriteBatch;
    ///
    /// let batch = WriteBatch::new();
    /// assert!(batch.is_empty());
    /// ```
    pub fn new() -> Self {
        Self { operations: Vec::new(), approximate_size: HEADER_SIZE }
    }

    /// Adds a Put operation to the batch.
    ///
    /// # Example
    ///
    /// ```
    /// use lsmdb::WriteBatch;
    ///
    /// let mut batch = WriteBatch::new();
    /// batch.put(b"key", b"value");
    /// assert_eq!(batch.len(), 1);
    /// ```
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.approximate_size += 1 + 5 + key.len() + 5 + value.len();
        self.operations.push(WriteOp::Put { key: key.to_vec(), value: value.to_vec() });
    }

    /// Adds a Delete operation to the batch.
    pub fn delete(&mut self, key: &[u8]) {
        self.approximate_size += 1 + 5 + key.len();
        self.operations.push(WriteOp::Delete { key: key.to_vec() });
    }

    /// Appends every operation of `other` to this batch.
    pub fn append(&mut self, other: &WriteBatch) {
        self.approximate_size += other.approximate_size.saturating_sub(HEADER_SIZE);
        self.operations.extend(other.operations.iter().cloned());
    }

    /// Clears all operations from the batch.
    pub fn clear(&mut self) {
        self.operations.clear();
        self.approximate_size = HEADER_SIZE;
    }

    /// Returns the number of operations in the batch.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the batch contains no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the approximate size of the encoded batch in bytes.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size
    }

    /// Returns an iterator over the operations in the batch.
    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.operations.iter()
    }

    /// Encodes the batch as a log record starting at `sequence`.
    pub fn encode(&self, sequence: SequenceNumber) -> Vec<u8> {
        let mut dst = Vec::with_capacity(self.approximate_size);
        dst.put_u64_le(sequence);
        dst.put_u32_le(self.operations.len() as u32);
        for op in &self.operations {
            match op {
                WriteOp::Put { key, value } => {
                    dst.put_u8(ValueType::Value.as_u8());
                    put_length_prefixed_slice(&mut dst, key);
                    put_length_prefixed_slice(&mut dst, value);
                }
                WriteOp::Delete { key } => {
                    dst.put_u8(ValueType::Deletion.as_u8());
                    put_length_prefixed_slice(&mut dst, key);
                }
            }
        }
        dst
    }

    /// Decodes a log record into its starting sequence and batch.
    pub fn decode(record: &[u8]) -> Result<(SequenceNumber, WriteBatch)> {
        if record.len() < HEADER_SIZE {
            return Err(Error::corruption("malformed WriteBatch (too small)"));
        }
        let sequence = decode_fixed64(record, 0)?;
        let count = decode_fixed32(record, 8)? as usize;

        let mut batch = WriteBatch::new();
        let mut input = &record[HEADER_SIZE..];
        while let Some((&tag, rest)) = input.split_first() {
            input = rest;
            match ValueType::from_u8(tag) {
                Some(ValueType::Value) => {
                    let key = get_length_prefixed_slice(&mut input)
                        .map_err(|_| Error::corruption("bad WriteBatch put"))?;
                    let value = get_length_prefixed_slice(&mut input)
                        .map_err(|_| Error::corruption("bad WriteBatch put"))?;
                    batch.put(key, value);
                }
                Some(ValueType::Deletion) => {
                    let key = get_length_prefixed_slice(&mut input)
                        .map_err(|_| Error::corruption("bad WriteBatch delete"))?;
                    batch.delete(key);
                }
                None => return Err(Error::corruption(format!("unknown WriteBatch tag {}", tag))),
            }
        }

        if batch.len() != count {
            return Err(Error::corruption(format!(
                "WriteBatch has wrong count: header says {}, found {}",
                count,
                batch.len()
            )));
        }
        Ok((sequence, batch))
    }

    /// Inserts every operation into `mem`, numbering them from `sequence`.
    ///
    /// Returns the sequence number of the last operation.
    pub fn insert_into(&self, mem: &MemTable, sequence: SequenceNumber) -> SequenceNumber {
        let mut seq = sequence;
        for op in &self.operations {
            match op {
                WriteOp::Put { key, value } => mem.add(seq, ValueType::Value, key, value),
                WriteOp::Delete { key } => mem.add(seq, ValueType::Deletion, key, &[]),
            }
            seq += 1;
        }
        seq.saturating_sub(1).max(sequence)
    }
}
