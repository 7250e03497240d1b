//! # Internal Key Format
//!
//! Every entry stored by the engine, in memory or on disk, is addressed by an
//! internal key.
//!
//! ## Format
//!
//! ```text
//! InternalKey:
//!   [user_key: bytes] [(sequence << 8) | type: u64 little-endian]
//! ```
//!
//! ## Ordering
//!
//! InternalKeys are ordered by:
//! 1. user_key (ascending, through the user comparator)
//! 2. sequence (descending - newer first)
//! 3. type (descending - Value before Deletion)

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Sequence numbers are 56 bits wide; the low byte of the trailer holds the type.
pub type SequenceNumber = u64;

/// Largest sequence number that fits in an internal key trailer.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

/// Length of the packed sequence/type trailer.
pub const INTERNAL_KEY_TRAILER_LEN: usize = 8;

/// The type of a value in the database.
///
/// - `Value`: A normal key-value pair
/// - `Deletion`: A tombstone marking that a key has been deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueType {
    /// A tombstone indicating the key has been deleted
    Deletion = 0,

    /// A normal value
    Value = 1,
}

/// The type used when building seek targets. It is the highest tag, so a seek
/// for `(key, seq)` lands on the first entry with sequence `<= seq`.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

impl ValueType {
    /// Converts a u8 to a ValueType.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ValueType::Deletion),
            1 => Some(ValueType::Value),
            _ => None,
        }
    }

    /// Converts the ValueType to a u8.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Packs a sequence number and a value type into the 8-byte trailer value.
pub fn pack_sequence_and_type(sequence: SequenceNumber, value_type: ValueType) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE_NUMBER);
    (sequence << 8) | value_type.as_u8() as u64
}

/// Returns the user key portion of an encoded internal key.
///
/// The caller must pass a well-formed internal key (at least 8 bytes).
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= INTERNAL_KEY_TRAILER_LEN);
    &internal_key[..internal_key.len() - INTERNAL_KEY_TRAILER_LEN]
}

fn extract_trailer(internal_key: &[u8]) -> u64 {
    let start = internal_key.len() - INTERNAL_KEY_TRAILER_LEN;
    let mut trailer = [0u8; 8];
    trailer.copy_from_slice(&internal_key[start..]);
    u64::from_le_bytes(trailer)
}

/// A decoded view over an encoded internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    /// The user key.
    pub user_key: &'a [u8],
    /// The sequence number of the write.
    pub sequence: SequenceNumber,
    /// Value or tombstone.
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    /// Parses an encoded internal key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corruption` if the key is shorter than its trailer or the
    /// type byte is unknown.
    pub fn parse(internal_key: &'a [u8]) -> Result<Self> {
        if internal_key.len() < INTERNAL_KEY_TRAILER_LEN {
            return Err(Error::corruption(format!(
                "internal key too short: {} bytes",
                internal_key.len()
            )));
        }
        let trailer = extract_trailer(internal_key);
        let value_type = ValueType::from_u8((trailer & 0xff) as u8).ok_or_else(|| {
            Error::corruption(format!("unknown value type {} in internal key", trailer & 0xff))
        })?;
        Ok(Self { user_key: extract_user_key(internal_key), sequence: trailer >> 8, value_type })
    }

    /// Re-encodes this key.
    pub fn to_internal_key(&self) -> InternalKey {
        InternalKey::new(self.user_key, self.sequence, self.value_type)
    }
}

/// Internal key used in MemTable and SSTable, kept in its encoded form.
///
/// # Example
///
/// ```rust
/// use lsmdb::memtable::{InternalKey, ValueType};
///
/// let key = InternalKey::new(b"user_key", 42, ValueType::Value);
/// assert_eq!(key.user_key(), b"user_key");
/// assert_eq!(key.sequence(), 42);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct InternalKey {
    rep: Vec<u8>,
}

impl InternalKey {
    /// Creates a new InternalKey.
    ///
    /// # Arguments
    ///
    /// * `user_key` - The user-provided key
    /// * `sequence` - The sequence number for this operation
    /// * `value_type` - The type of value (Value or Deletion)
    pub fn new(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> Self {
        let mut rep = Vec::with_capacity(user_key.len() + INTERNAL_KEY_TRAILER_LEN);
        rep.extend_from_slice(user_key);
        rep.extend_from_slice(&pack_sequence_and_type(sequence, value_type).to_le_bytes());
        Self { rep }
    }

    /// Wraps an already encoded internal key after validating it.
    pub fn decode(encoded: &[u8]) -> Result<Self> {
        ParsedInternalKey::parse(encoded)?;
        Ok(Self { rep: encoded.to_vec() })
    }

    /// Returns the encoded bytes.
    pub fn encode(&self) -> &[u8] {
        &self.rep
    }

    /// Consumes the key and returns the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.rep
    }

    /// Returns the user key.
    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.rep)
    }

    /// Returns the sequence number.
    pub fn sequence(&self) -> SequenceNumber {
        extract_trailer(&self.rep) >> 8
    }

    /// Returns the value type.
    pub fn value_type(&self) -> ValueType {
        // Construction always goes through `new` or a validated `decode`.
        ValueType::from_u8((extract_trailer(&self.rep) & 0xff) as u8).unwrap_or(ValueType::Value)
    }

    /// Returns true if no key has been assigned.
    pub fn is_empty(&self) -> bool {
        self.rep.is_empty()
    }

    /// Returns the total encoded size of this InternalKey.
    pub fn encoded_size(&self) -> usize {
        self.rep.len()
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rep.len() < INTERNAL_KEY_TRAILER_LEN {
            return write!(f, "InternalKey(<invalid>)");
        }
        write!(
            f,
            "'{}' @ {} : {:?}",
            String::from_utf8_lossy(self.user_key()),
            self.sequence(),
            self.value_type()
        )
    }
}

/// Orders encoded internal keys: user key ascending, then trailer descending.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user_comparator: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    /// Wraps a user key comparator.
    pub fn new(user_comparator: Arc<dyn Comparator>) -> Self {
        Self { user_comparator }
    }

    /// The wrapped user comparator.
    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user_comparator
    }

    /// Compares two internal keys given in their structured form.
    pub fn compare_keys(&self, a: &InternalKey, b: &InternalKey) -> Ordering {
        self.compare(a.encode(), b.encode())
    }
}

impl fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InternalKeyComparator({})", self.user_comparator.name())
    }
}

impl Comparator for InternalKeyComparator {
    fn name(&self) -> &str {
        "leveldb.InternalKeyComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user_comparator
            .compare(extract_user_key(a), extract_user_key(b))
            .then_with(|| extract_trailer(b).cmp(&extract_trailer(a)))
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let user_start = extract_user_key(start);
        let user_limit = extract_user_key(limit);
        let mut tmp = user_start.to_vec();
        self.user_comparator.find_shortest_separator(&mut tmp, user_limit);
        if tmp.len() < user_start.len()
            && self.user_comparator.compare(user_start, &tmp) == Ordering::Less
        {
            // The user key got shorter but larger: give it the earliest
            // possible trailer so it still sorts before `limit`.
            tmp.extend_from_slice(
                &pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK).to_le_bytes(),
            );
            debug_assert_eq!(self.compare(start, &tmp), Ordering::Less);
            debug_assert_eq!(self.compare(&tmp, limit), Ordering::Less);
            *start = tmp;
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_key = extract_user_key(key);
        let mut tmp = user_key.to_vec();
        self.user_comparator.find_short_successor(&mut tmp);
        if tmp.len() < user_key.len()
            && self.user_comparator.compare(user_key, &tmp) == Ordering::Less
        {
            tmp.extend_from_slice(
                &pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK).to_le_bytes(),
            );
            *key = tmp;
        }
    }
}

/// A point-lookup target: `user_key` at `sequence` with the seek type.
#[derive(Debug, Clone)]
pub struct LookupKey {
    internal: InternalKey,
}

impl LookupKey {
    /// Builds the lookup target for `user_key` as of `sequence`.
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        Self { internal: InternalKey::new(user_key, sequence, VALUE_TYPE_FOR_SEEK) }
    }

    /// The encoded internal key to seek to.
    pub fn internal_key(&self) -> &[u8] {
        self.internal.encode()
    }

    /// The user key being looked up.
    pub fn user_key(&self) -> &[u8] {
        self.internal.user_key()
    }

    /// The snapshot sequence of the lookup.
    pub fn sequence(&self) -> SequenceNumber {
        self.internal.sequence()
    }
}
