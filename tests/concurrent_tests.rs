// Concurrent Access Tests for Strata
// These tests verify thread-safety and concurrent access patterns

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use strata::{ColumnFamilyOptions, Options, WalSyncPolicy, WriteBatch, DB};
use tempfile::TempDir;

/// Test concurrent writes from multiple threads
#[test]
fn test_concurrent_writes() {
    let dir = TempDir::new().unwrap();
    let options = Options::default().memtable_size(64 * 1024);
    let db = Arc::new(DB::open(dir.path(), options).unwrap());

    let num_threads = 8;
    let writes_per_thread = 500;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..writes_per_thread {
                    let key = format!("thread_{}_key_{}", thread_id, i);
                    let value = format!("thread_{}_value_{}", thread_id, i);
                    db.put(key.as_bytes(), value.as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every write took exactly one sequence
    assert_eq!(db.latest_sequence(), (num_threads * writes_per_thread) as u64);
    for thread_id in 0..num_threads {
        for i in (0..writes_per_thread).step_by(50) {
            let key = format!("thread_{}_key_{}", thread_id, i);
            let expected = format!("thread_{}_value_{}", thread_id, i);
            assert_eq!(db.get(key.as_bytes()).unwrap(), Some(expected.into_bytes()));
        }
    }
    db.wait_for_background_work().unwrap();
    assert_eq!(db.iter().unwrap().count(), num_threads * writes_per_thread);
}

/// Readers never see a key go backwards while a writer updates it.
#[test]
fn test_concurrent_reads_during_writes() {
    let dir = TempDir::new().unwrap();
    let options = Options::default().memtable_size(32 * 1024);
    let db = Arc::new(DB::open(dir.path(), options).unwrap());
    db.put(b"counter", &0u64.to_le_bytes()).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let db = Arc::clone(&db);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for i in 1..=2_000u64 {
                db.put(b"counter", &i.to_le_bytes()).unwrap();
                db.put(format!("filler_{}", i).as_bytes(), &[0u8; 64]).unwrap();
            }
            done.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last = 0u64;
                while !done.load(Ordering::Acquire) {
                    let raw = db.get(b"counter").unwrap().unwrap();
                    let value = u64::from_le_bytes(raw.try_into().unwrap());
                    assert!(value >= last, "counter went from {} to {}", last, value);
                    last = value;
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(
        db.get(b"counter").unwrap(),
        Some(2_000u64.to_le_bytes().to_vec())
    );
}

/// Synced batches from many threads are committed in groups.
#[test]
fn test_concurrent_synced_batches() {
    let dir = TempDir::new().unwrap();
    let options = Options::default().wal_sync_policy(WalSyncPolicy::PerBatch);
    let db = Arc::new(DB::open(dir.path(), options).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in 0..50 {
                    let mut batch = WriteBatch::new();
                    batch.put(format!("t{}_a{}", t, i).as_bytes(), b"1");
                    batch.put(format!("t{}_b{}", t, i).as_bytes(), b"2");
                    db.write(batch).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(db.latest_sequence(), 400);
    drop(db);

    let db = DB::open(dir.path(), Options::default()).unwrap();
    assert_eq!(db.iter().unwrap().count(), 400);
}

/// Flushes, compactions and family changes run alongside writers.
#[test]
fn test_concurrent_background_work() {
    let dir = TempDir::new().unwrap();
    let options = Options::default()
        .memtable_size(16 * 1024)
        .level0_compaction_trigger(2);
    let db = Arc::new(DB::open(dir.path(), options).unwrap());
    let side = db
        .create_column_family("side", ColumnFamilyOptions::default().memtable_size(16 * 1024))
        .unwrap();

    let writers: Vec<_> = (0..3)
        .map(|t| {
            let db = Arc::clone(&db);
            let side = side.clone();
            thread::spawn(move || {
                for i in 0..1_500 {
                    let key = format!("w{}_{:05}", t, i);
                    db.put(key.as_bytes(), &[b'v'; 40]).unwrap();
                    db.put_cf(&side, key.as_bytes(), b"s").unwrap();
                }
            })
        })
        .collect();

    let admin = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for round in 0..5 {
                let name = format!("tmp{}", round);
                let cf = db
                    .create_column_family(&name, ColumnFamilyOptions::default())
                    .unwrap();
                db.put_cf(&cf, b"k", b"v").unwrap();
                db.flush().unwrap();
                db.drop_column_family(&cf).unwrap();
            }
            db.compact_range(None, None).unwrap();
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    admin.join().unwrap();
    db.wait_for_background_work().unwrap();

    for t in 0..3 {
        for i in (0..1_500).step_by(149) {
            let key = format!("w{}_{:05}", t, i);
            assert_eq!(db.get(key.as_bytes()).unwrap(), Some(vec![b'v'; 40]));
            assert_eq!(db.get_cf(&side, key.as_bytes()).unwrap(), Some(b"s".to_vec()));
        }
    }
    assert_eq!(db.column_families().len(), 2);
    assert!(db.background_errors().try_recv().is_err());
}
