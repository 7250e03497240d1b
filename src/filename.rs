//! Names of the files that make up a database directory.
//!
//! ```text
//! NNNNNN.log        write-ahead log
//! NNNNNN.sst        table
//! MANIFEST-NNNNNN   version edit log
//! CURRENT           name of the active manifest
//! LOCK              advisory lock
//! LOG, LOG.old      informational logs
//! NNNNNN.dbtmp      temporary file
//! ```

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Kind of a file found in a database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// Write-ahead log
    Log,
    /// Lock file
    DbLock,
    /// Table file
    Table,
    /// Manifest
    Descriptor,
    /// CURRENT pointer
    Current,
    /// Temporary file
    Temp,
    /// Informational log
    InfoLog,
}

fn make_file_name(number: u64, suffix: &str) -> String {
    format!("{:06}.{}", number, suffix)
}

/// `NNNNNN.log`
pub fn log_file_name(number: u64) -> String {
    make_file_name(number, "log")
}

/// `NNNNNN.sst`
pub fn table_file_name(number: u64) -> String {
    make_file_name(number, "sst")
}

/// `MANIFEST-NNNNNN`
pub fn descriptor_file_name(number: u64) -> String {
    format!("MANIFEST-{:06}", number)
}

/// `CURRENT`
pub fn current_file_name() -> &'static str {
    "CURRENT"
}

/// `LOCK`
pub fn lock_file_name() -> &'static str {
    "LOCK"
}

/// `NNNNNN.dbtmp`
pub fn temp_file_name(number: u64) -> String {
    make_file_name(number, "dbtmp")
}

/// `LOG`
pub fn info_log_file_name() -> &'static str {
    "LOG"
}

/// `LOG.old`
pub fn old_info_log_file_name() -> &'static str {
    "LOG.old"
}

/// Parses a file name into its type and number.
///
/// Files without a number report 0. Returns `None` for names the engine
/// does not own.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    match name {
        "CURRENT" => return Some((FileType::Current, 0)),
        "LOCK" => return Some((FileType::DbLock, 0)),
        "LOG" | "LOG.old" => return Some((FileType::InfoLog, 0)),
        _ => {}
    }

    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return parse_number(rest).map(|n| (FileType::Descriptor, n));
    }

    let (stem, suffix) = name.rsplit_once('.')?;
    let file_type = match suffix {
        "log" => FileType::Log,
        "sst" => FileType::Table,
        "dbtmp" => FileType::Temp,
        _ => return None,
    };
    parse_number(stem).map(|n| (file_type, n))
}

fn parse_number(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Points CURRENT at `MANIFEST-<descriptor_number>`.
///
/// The new contents are written to a temp file, synced, and renamed over
/// CURRENT so readers always see either the old or the new manifest name.
pub fn set_current_file(db_dir: &Path, descriptor_number: u64) -> Result<()> {
    let manifest = descriptor_file_name(descriptor_number);
    let temp = db_dir.join(temp_file_name(descriptor_number));

    let write_temp = || -> Result<()> {
        let mut file = File::create(&temp)?;
        file.write_all(manifest.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        Ok(())
    };

    let result = write_temp().and_then(|()| {
        fs::rename(&temp, db_dir.join(current_file_name()))?;
        Ok(())
    });
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

/// Reads CURRENT and returns the manifest file name it points to.
pub fn read_current_file(db_dir: &Path) -> Result<String> {
    let path = db_dir.join(current_file_name());
    let contents = fs::read_to_string(&path)?;
    let Some(name) = contents.strip_suffix('\n') else {
        return Err(Error::corruption("CURRENT file does not end with newline"));
    };
    if name.is_empty() || name.contains('\n') {
        return Err(Error::corruption(format!("CURRENT file is malformed: {:?}", contents)));
    }
    Ok(name.to_string())
}

/// Lists the names of every entry in `db_dir`.
pub fn list_files(db_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(db_dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Joins a file name onto the database directory.
pub fn db_path(db_dir: &Path, name: &str) -> PathBuf {
    db_dir.join(name)
}
