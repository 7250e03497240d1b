//! Randomized tests that drive the database and a `BTreeMap` with the same
//! operations and compare what they report.

use lsmdb::{CompressionType, Options, ReadOptions, Snapshot, WriteBatch, WriteOptions, DB};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

type Model = BTreeMap<Vec<u8>, Vec<u8>>;

fn small_options() -> Options {
    Options::default()
        .write_buffer_size(8 * 1024)
        .block_size(256)
        .compression(CompressionType::None)
}

fn scan(db: &DB, read: &ReadOptions) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut iter = db.iter(read).unwrap();
    iter.seek_to_first().unwrap();
    iter.collect_remaining().unwrap()
}

fn check_against(db: &DB, read: &ReadOptions, model: &Model) {
    let expected: Vec<_> = model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    assert_eq!(scan(db, read), expected);
}

fn random_key(rng: &mut StdRng) -> Vec<u8> {
    format!("key{:04}", rng.random_range(0..600)).into_bytes()
}

fn random_value(rng: &mut StdRng) -> Vec<u8> {
    let len = rng.random_range(0..200);
    (0..len).map(|_| rng.random::<u8>()).collect()
}

fn run_workload(dir: &Path, seed: u64, steps: usize) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut model = Model::new();
    let mut snapshots: Vec<(Snapshot, Model)> = Vec::new();
    let mut db = DB::open(dir, small_options()).unwrap();

    for step in 0..steps {
        match rng.random_range(0..100) {
            0..=49 => {
                let (key, value) = (random_key(&mut rng), random_value(&mut rng));
                db.put(&key, &value).unwrap();
                model.insert(key, value);
            }
            50..=64 => {
                let key = random_key(&mut rng);
                db.delete(&key).unwrap();
                model.remove(&key);
            }
            65..=74 => {
                let mut batch = WriteBatch::new();
                for _ in 0..rng.random_range(1..20) {
                    let key = random_key(&mut rng);
                    if rng.random_bool(0.3) {
                        batch.delete(&key);
                        model.remove(&key);
                    } else {
                        let value = random_value(&mut rng);
                        batch.put(&key, &value);
                        model.insert(key, value);
                    }
                }
                db.write(&WriteOptions::default(), &batch).unwrap();
            }
            75..=89 => {
                let key = random_key(&mut rng);
                assert_eq!(
                    db.get(&key).unwrap(),
                    model.get(&key).cloned(),
                    "step {} key {:?}",
                    step,
                    key
                );
            }
            90..=93 => {
                if snapshots.len() < 4 {
                    snapshots.push((db.snapshot(), model.clone()));
                } else {
                    snapshots.remove(0);
                }
            }
            94..=95 => db.flush_memtable().unwrap(),
            96 => db.compact_range(None, None).unwrap(),
            97 => {
                let (a, b) = (random_key(&mut rng), random_key(&mut rng));
                let (begin, end) = if a <= b { (a, b) } else { (b, a) };
                db.compact_range(Some(begin.as_slice()), Some(end.as_slice())).unwrap();
            }
            _ => {
                // Snapshots do not survive a reopen
                snapshots.clear();
                drop(db);
                db = DB::open(dir, small_options()).unwrap();
            }
        }

        if step % 500 == 499 {
            check_against(&db, &ReadOptions::default(), &model);
            for (snapshot, frozen) in &snapshots {
                check_against(&db, &ReadOptions::new().snapshot(snapshot.clone()), frozen);
            }
        }
    }

    check_against(&db, &ReadOptions::default(), &model);
    drop(snapshots);
    drop(db);

    let db = DB::open(dir, small_options()).unwrap();
    check_against(&db, &ReadOptions::default(), &model);
}

#[test]
fn test_random_workload_matches_model() {
    let _ = env_logger::builder().is_test(true).try_init();
    for seed in [1, 7, 42] {
        let dir = TempDir::new().unwrap();
        run_workload(dir.path(), seed, 4000);
    }
}

#[test]
fn test_seek_matches_model() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), small_options()).unwrap();
    let mut rng = StdRng::seed_from_u64(99);
    let mut model = Model::new();

    for i in 0..3000 {
        let key = random_key(&mut rng);
        if i % 5 == 4 {
            db.delete(&key).unwrap();
            model.remove(&key);
        } else {
            db.put(&key, &key).unwrap();
            model.insert(key.clone(), key);
        }
    }

    let mut iter = db.iter(&ReadOptions::default()).unwrap();
    for _ in 0..500 {
        let target = format!("key{:04}", rng.random_range(0..650)).into_bytes();
        iter.seek(&target).unwrap();
        match model.range(target.clone()..).next() {
            Some((k, v)) => {
                assert!(iter.valid());
                assert_eq!(iter.key(), k.as_slice());
                assert_eq!(iter.value(), v.as_slice());
            }
            None => assert!(!iter.valid()),
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Put(u8, Vec<u8>),
    Delete(u8),
    Flush,
    Compact,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (any::<u8>(), proptest::collection::vec(any::<u8>(), 0..64))
            .prop_map(|(k, v)| Op::Put(k, v)),
        3 => any::<u8>().prop_map(Op::Delete),
        1 => Just(Op::Flush),
        1 => Just(Op::Compact),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_operations_match_model(ops in proptest::collection::vec(op_strategy(), 1..200)) {
        let dir = TempDir::new().unwrap();
        let db = DB::open(dir.path(), small_options()).unwrap();
        let mut model = Model::new();

        for op in &ops {
            match op {
                Op::Put(k, v) => {
                    db.put(&[*k], v).unwrap();
                    model.insert(vec![*k], v.clone());
                }
                Op::Delete(k) => {
                    db.delete(&[*k]).unwrap();
                    model.remove(&vec![*k]);
                }
                Op::Flush => db.flush_memtable().unwrap(),
                Op::Compact => db.compact_range(None, None).unwrap(),
            }
        }

        let expected: Vec<_> = model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        prop_assert_eq!(scan(&db, &ReadOptions::default()), expected.clone());

        drop(db);
        let db = DB::open(dir.path(), small_options()).unwrap();
        prop_assert_eq!(scan(&db, &ReadOptions::default()), expected);
    }
}
