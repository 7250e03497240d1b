//! Per-level compaction statistics and the property renderers built on them.

use crate::cache::CacheStats;
use crate::compaction::{Version, NUM_LEVELS};
use serde::Serialize;
use std::fmt::Write as _;

/// Work done by flushes and compactions that wrote into one level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelStats {
    /// Wall time spent, in microseconds
    pub micros: u64,
    /// Bytes of input tables read
    pub bytes_read: u64,
    /// Bytes of output tables written
    pub bytes_written: u64,
}

impl LevelStats {
    pub(crate) fn add(&mut self, other: LevelStats) {
        self.micros += other.micros;
        self.bytes_read += other.bytes_read;
        self.bytes_written += other.bytes_written;
    }
}

/// One row of `lsmdb.stats`.
#[derive(Debug, Clone, Serialize)]
pub struct LevelSummary {
    /// Level number
    pub level: usize,
    /// Number of table files
    pub files: usize,
    /// Total table bytes
    pub size_bytes: u64,
    /// Accumulated compaction work
    #[serde(flatten)]
    pub compaction: LevelStats,
}

/// Snapshot of the engine statistics.
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    /// Levels that hold files or have seen compaction work
    pub levels: Vec<LevelSummary>,
    /// Memory used by the active and immutable memtables
    pub memtable_bytes: usize,
    /// Table cache counters
    pub table_cache: CacheStats,
}

impl DbStats {
    pub(crate) fn collect(
        version: &Version,
        stats: &[LevelStats; NUM_LEVELS],
        memtable_bytes: usize,
        table_cache: CacheStats,
    ) -> Self {
        let levels = (0..NUM_LEVELS)
            .filter(|&level| version.num_files(level) > 0 || stats[level].micros > 0)
            .map(|level| LevelSummary {
                level,
                files: version.num_files(level),
                size_bytes: version.num_level_bytes(level),
                compaction: stats[level],
            })
            .collect();
        Self { levels, memtable_bytes, table_cache }
    }

    /// Renders the fixed-width table returned by `lsmdb.stats`.
    pub fn to_table(&self) -> String {
        let mut out = String::new();
        out.push_str("                               Compactions\n");
        out.push_str("Level  Files Size(MB) Time(sec) Read(MB) Write(MB)\n");
        out.push_str("--------------------------------------------------\n");
        for row in &self.levels {
            let _ = writeln!(
                out,
                "{:>3} {:>8} {:>8.0} {:>9.0} {:>8.0} {:>9.0}",
                row.level,
                row.files,
                row.size_bytes as f64 / 1048576.0,
                row.compaction.micros as f64 / 1e6,
                row.compaction.bytes_read as f64 / 1048576.0,
                row.compaction.bytes_written as f64 / 1048576.0
            );
        }
        out
    }
}

/// Renders `lsmdb.sstables`: every file of every level.
pub(crate) fn describe_tables(version: &Version) -> String {
    let mut out = String::new();
    for level in 0..NUM_LEVELS {
        let _ = writeln!(out, "--- level {} ---", level);
        for f in version.files(level) {
            let _ = writeln!(
                out,
                " {}:{}[{} .. {}]",
                f.number,
                f.file_size,
                String::from_utf8_lossy(f.smallest.user_key()),
                String::from_utf8_lossy(f.largest.user_key())
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::compaction::FileMetaData;
    use crate::memtable::{InternalKey, InternalKeyComparator, ValueType};
    use std::sync::Arc;

    fn version() -> Version {
        let mut version = Version::new(InternalKeyComparator::new(Arc::new(BytewiseComparator)));
        version.files[1].push(Arc::new(FileMetaData::new(
            12,
            3 * 1048576,
            InternalKey::new(b"apple", 3, ValueType::Value),
            InternalKey::new(b"pear", 9, ValueType::Value),
        )));
        version
    }

    #[test]
    fn test_collect_skips_idle_levels() {
        let mut stats = [LevelStats::default(); NUM_LEVELS];
        stats[2].add(LevelStats { micros: 2_000_000, bytes_read: 10, bytes_written: 20 });

        let db_stats = DbStats::collect(&version(), &stats, 1024, CacheStats::default());
        let levels: Vec<usize> = db_stats.levels.iter().map(|l| l.level).collect();
        assert_eq!(levels, vec![1, 2]);

        let table = db_stats.to_table();
        assert!(table.contains("Level  Files"));
        assert_eq!(table.lines().count(), 5);
    }

    #[test]
    fn test_json_is_flat_per_level() {
        let stats = [LevelStats::default(); NUM_LEVELS];
        let db_stats = DbStats::collect(&version(), &stats, 0, CacheStats::default());
        let json: serde_json::Value = serde_json::to_value(&db_stats).unwrap();
        assert_eq!(json["levels"][0]["files"], 1);
        assert_eq!(json["levels"][0]["bytes_written"], 0);
        assert_eq!(json["levels"][0]["size_bytes"], 3 * 1048576);
    }

    #[test]
    fn test_describe_tables() {
        let text = describe_tables(&version());
        assert!(text.contains("--- level 1 ---\n 12:3145728[apple .. pear]\n"));
        assert_eq!(text.matches("--- level").count(), NUM_LEVELS);
    }
}
