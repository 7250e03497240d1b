// Fault Injection Tests for lsmdb
// These tests damage the files on disk and check how the engine reacts

use lsmdb::filename::{parse_file_name, FileType};
use lsmdb::{CompressionType, Error, Options, ReadOptions, DB};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn files_of_type(dir: &Path, file_type: FileType) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .and_then(parse_file_name)
                .map(|(t, _)| t == file_type)
                .unwrap_or(false)
        })
        .map(|e| e.path())
        .collect();
    files.sort();
    files
}

/// Writes `count` keys and flushes them into a single table.
fn populate(dir: &Path, count: usize) {
    let db = DB::open(dir, Options::default().compression(CompressionType::None)).unwrap();
    for i in 0..count {
        db.put(format!("key{:05}", i).as_bytes(), &[b'v'; 100]).unwrap();
    }
    db.flush_memtable().unwrap();
}

/// Test opening a missing directory without create_if_missing
#[test]
fn test_missing_directory_handling() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nonexistent");

    let err = DB::open(&db_path, Options::default().create_if_missing(false)).err().unwrap();
    assert!(matches!(err, Error::NotFound(_)), "unexpected error: {}", err);
    assert!(!db_path.join("CURRENT").exists());

    // The default creates it
    let db = DB::open(&db_path, Options::default()).unwrap();
    assert!(db_path.join("CURRENT").exists());
    db.put(b"key", b"value").unwrap();
    assert_eq!(db.get(b"key").unwrap(), Some(b"value".to_vec()));
}

/// Test a second handle on the same directory is refused
#[test]
fn test_lock_held_by_open_database() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    assert!(DB::open(dir.path(), Options::default()).is_err());
    assert!(DB::destroy(dir.path()).is_err());

    drop(db);
    let db = DB::open(dir.path(), Options::default()).unwrap();
    db.put(b"after", b"unlock").unwrap();
}

/// Test a CURRENT file without its trailing newline
#[test]
fn test_malformed_current_file() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), 10);

    let current = dir.path().join("CURRENT");
    let contents = fs::read_to_string(&current).unwrap();
    fs::write(&current, contents.trim_end()).unwrap();

    let err = DB::open(dir.path(), Options::default()).err().unwrap();
    assert!(err.is_corruption(), "unexpected error: {}", err);
}

/// Test a CURRENT file naming a manifest that does not exist
#[test]
fn test_current_points_to_missing_manifest() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), 10);

    fs::write(dir.path().join("CURRENT"), "MANIFEST-999999\n").unwrap();
    let err = DB::open(dir.path(), Options::default()).err().unwrap();
    assert!(err.is_corruption(), "unexpected error: {}", err);
}

/// Test a damaged manifest record is never skipped
#[test]
fn test_corrupted_manifest() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), 10);

    let manifests = files_of_type(dir.path(), FileType::Descriptor);
    assert_eq!(manifests.len(), 1);
    let mut data = fs::read(&manifests[0]).unwrap();
    // Inside the payload of the first record
    data[10] ^= 0xff;
    fs::write(&manifests[0], &data).unwrap();

    let err = DB::open(dir.path(), Options::default()).err().unwrap();
    assert!(err.is_corruption(), "unexpected error: {}", err);
}

/// Test a table that vanished from disk surfaces as an error on read
#[test]
fn test_missing_table_file() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), 100);

    let tables = files_of_type(dir.path(), FileType::Table);
    assert_eq!(tables.len(), 1);
    fs::remove_file(&tables[0]).unwrap();

    let db = DB::open(dir.path(), Options::default()).unwrap();
    let err = db.get(b"key00050").err().unwrap();
    assert!(matches!(err, Error::NotFound(_)), "unexpected error: {}", err);

    // Keys outside every table never touch the file
    assert_eq!(db.get(b"zzz").unwrap(), None);
}

/// Test a flipped bit inside a data block fails its checksum
#[test]
fn test_corrupted_table_block() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), 1000);

    let tables = files_of_type(dir.path(), FileType::Table);
    let mut data = fs::read(&tables[0]).unwrap();
    data[50] ^= 0x01;
    fs::write(&tables[0], &data).unwrap();

    let db = DB::open(dir.path(), Options::default()).unwrap();
    let err = db.get(b"key00000").err().unwrap();
    assert!(err.is_corruption(), "unexpected error: {}", err);

    // Blocks after the damaged one still read fine
    assert_eq!(db.get(b"key00999").unwrap(), Some(vec![b'v'; 100]));

    let mut iter = db.iter(&ReadOptions::new().verify_checksums(true)).unwrap();
    assert!(iter.seek_to_first().is_err() || iter.collect_remaining().is_err());
}

/// Test garbage appended to the log tail
#[test]
fn test_garbage_after_log_tail() {
    let dir = TempDir::new().unwrap();
    {
        let db = DB::open(dir.path(), Options::default()).unwrap();
        db.put(b"key1", b"value1").unwrap();
        db.put(b"key2", b"value2").unwrap();
        db.suspend_compactions();
        let logs = files_of_type(dir.path(), FileType::Log);
        let mut data = fs::read(logs.last().unwrap()).unwrap();
        data.extend_from_slice(b"CORRUPTED_DATA_12345");
        fs::write(logs.last().unwrap(), &data).unwrap();
        db.resume_compactions();
        // Dropping the handle only writes to the current log, which stays as damaged
    }

    let db = DB::open(dir.path(), Options::default()).unwrap();
    assert_eq!(db.get(b"key1").unwrap(), Some(b"value1".to_vec()));
    assert_eq!(db.get(b"key2").unwrap(), Some(b"value2".to_vec()));
}

/// Test leftover temporary and unknown files are tolerated
#[test]
fn test_stray_files_in_directory() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), 20);

    fs::write(dir.path().join("000999.dbtmp"), b"half written").unwrap();
    fs::write(dir.path().join("notes.txt"), b"not ours").unwrap();

    let db = DB::open(dir.path(), Options::default()).unwrap();
    assert_eq!(db.get(b"key00010").unwrap(), Some(vec![b'v'; 100]));

    // Obsolete temp files are removed, foreign files are left alone
    assert!(!dir.path().join("000999.dbtmp").exists());
    assert!(dir.path().join("notes.txt").exists());
}

/// Test destroying a database removes its files
#[test]
fn test_destroy_then_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    populate(&path, 20);

    DB::destroy(&path).unwrap();
    assert!(!path.exists());

    let err = DB::open(&path, Options::default().create_if_missing(false)).err().unwrap();
    assert!(matches!(err, Error::NotFound(_)));

    let db = DB::open(&path, Options::default()).unwrap();
    assert_eq!(db.get(b"key00010").unwrap(), None);
}

/// Test rapid open/close cycles release the lock and keep data
#[test]
fn test_rapid_open_close() {
    let dir = TempDir::new().unwrap();

    for i in 0..10 {
        let db = DB::open(dir.path(), Options::default()).unwrap();
        db.put(format!("session_{}", i).as_bytes(), b"value").unwrap();
        drop(db);
    }

    let db = DB::open(dir.path(), Options::default()).unwrap();
    for i in 0..10 {
        assert_eq!(db.get(format!("session_{}", i).as_bytes()).unwrap(), Some(b"value".to_vec()));
    }
    assert_eq!(files_of_type(dir.path(), FileType::Log).len(), 1);
    assert_eq!(files_of_type(dir.path(), FileType::Descriptor).len(), 1);
}
