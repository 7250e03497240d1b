//! User key comparators.
//!
//! The engine orders user keys through a [`Comparator`]. Its name is written
//! into the manifest so that a database is never reopened with an ordering
//! different from the one it was built with.

use std::cmp::Ordering;
use std::fmt;

/// A total order over user keys.
///
/// Besides comparison, a comparator can shorten keys that are only used as
/// separators (index block keys). Both shortening hooks may simply leave the
/// key untouched.
pub trait Comparator: Send + Sync {
    /// Name persisted in the manifest; changing the ordering must change the name.
    fn name(&self) -> &str;

    /// Three-way comparison of two user keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// If `start < limit`, changes `start` to a short key in `[start, limit)`.
    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]);

    /// Changes `key` to a short key `>= key`.
    fn find_short_successor(&self, key: &mut Vec<u8>);
}

impl fmt::Debug for dyn Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Comparator({})", self.name())
    }
}

/// Lexicographic byte-wise ordering.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &str {
        "leveldb.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let min_len = start.len().min(limit.len());
        let mut diff = 0;
        while diff < min_len && start[diff] == limit[diff] {
            diff += 1;
        }

        // One key is a prefix of the other.
        if diff >= min_len {
            return;
        }

        let byte = start[diff];
        if byte < 0xff && byte + 1 < limit[diff] {
            start[diff] += 1;
            start.truncate(diff + 1);
            debug_assert_eq!(self.compare(start, limit), Ordering::Less);
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        for i in 0..key.len() {
            if key[i] != 0xff {
                key[i] += 1;
                key.truncate(i + 1);
                return;
            }
        }
        // All 0xff: leave it alone.
    }
}
