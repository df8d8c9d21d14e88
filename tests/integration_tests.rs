// End-to-End Integration Tests for Strata
// These tests verify complete CRUD flows, batches, merges and iteration

use std::sync::Arc;

use strata::{
    ColumnFamilyOptions, Error, Options, ReverseBytewiseComparator, StringAppendOperator,
    U64AddOperator, WriteBatch, WriteOptions, DB,
};
use tempfile::TempDir;

fn collect(db: &DB, start: Option<&[u8]>, end: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
    db.scan(start, end)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

/// Test complete CRUD flow
#[test]
fn test_e2e_complete_crud() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    // Create
    db.put(b"user:1", b"Alice").unwrap();
    db.put(b"user:2", b"Bob").unwrap();
    db.put(b"user:3", b"Charlie").unwrap();

    // Read
    assert_eq!(db.get(b"user:1").unwrap(), Some(b"Alice".to_vec()));
    assert_eq!(db.get(b"user:2").unwrap(), Some(b"Bob".to_vec()));
    assert_eq!(db.get(b"user:3").unwrap(), Some(b"Charlie".to_vec()));

    // Update
    db.put(b"user:2", b"Bob_Updated").unwrap();
    assert_eq!(db.get(b"user:2").unwrap(), Some(b"Bob_Updated".to_vec()));

    // Delete
    db.delete(b"user:1").unwrap();
    assert_eq!(db.get(b"user:1").unwrap(), None);

    assert_eq!(db.get(b"user:2").unwrap(), Some(b"Bob_Updated".to_vec()));
    assert_eq!(db.get(b"user:3").unwrap(), Some(b"Charlie".to_vec()));
    assert_eq!(db.get(b"user:4").unwrap(), None);
}

/// Test a bulk load that spills through several memtables
#[test]
fn test_e2e_bulk_write_across_flushes() {
    let dir = TempDir::new().unwrap();
    let options = Options::default().memtable_size(64 * 1024);
    let db = DB::open(dir.path(), options).unwrap();

    let record_count = 20_000;
    for i in 0..record_count {
        let key = format!("key_{:08}", i);
        let value = format!("value_{:08}", i);
        db.put(key.as_bytes(), value.as_bytes()).unwrap();
    }
    db.wait_for_background_work().unwrap();

    for i in (0..record_count).step_by(997) {
        let key = format!("key_{:08}", i);
        let expected = format!("value_{:08}", i);
        assert_eq!(
            db.get(key.as_bytes()).unwrap(),
            Some(expected.into_bytes()),
            "lost {}",
            key
        );
    }
    assert_eq!(db.iter().unwrap().count(), record_count);
}

/// A batch becomes visible all at once and consumes one sequence per op.
#[test]
fn test_e2e_write_batch() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();
    db.put(b"a", b"old").unwrap();
    let before = db.latest_sequence();

    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    batch.put(b"b", b"2");
    batch.delete(b"a");
    batch.put(b"c", b"3");
    db.write(batch).unwrap();

    assert_eq!(db.latest_sequence(), before + 4);
    assert_eq!(db.get(b"a").unwrap(), None);
    assert_eq!(db.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(db.get(b"c").unwrap(), Some(b"3".to_vec()));

    // An empty batch is a no-op
    db.write(WriteBatch::new()).unwrap();
    assert_eq!(db.latest_sequence(), before + 4);
}

/// Later writes of the same key win, in memory and on disk.
#[test]
fn test_e2e_put_put_delete() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    db.put(b"k", b"v1").unwrap();
    db.put(b"k", b"v2").unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"v2".to_vec()));
    db.flush().unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"v2".to_vec()));

    db.delete(b"k").unwrap();
    assert_eq!(db.get(b"k").unwrap(), None);
    db.flush().unwrap();
    assert_eq!(db.get(b"k").unwrap(), None);
    assert!(collect(&db, None, None).is_empty());
}

/// Test iteration order and half-open scan bounds
#[test]
fn test_e2e_scan_bounds() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();
    for key in ["d", "a", "c", "e", "b"] {
        db.put(key.as_bytes(), key.to_uppercase().as_bytes()).unwrap();
    }
    db.flush().unwrap();
    db.put(b"bb", b"BB").unwrap();
    db.delete(b"d").unwrap();

    let keys: Vec<Vec<u8>> = collect(&db, None, None).into_iter().map(|(k, _)| k).collect();
    assert_eq!(
        keys,
        vec![
            b"a".to_vec(),
            b"b".to_vec(),
            b"bb".to_vec(),
            b"c".to_vec(),
            b"e".to_vec()
        ]
    );

    let range = collect(&db, Some(b"b".as_slice()), Some(b"e".as_slice()));
    assert_eq!(
        range,
        vec![
            (b"b".to_vec(), b"B".to_vec()),
            (b"bb".to_vec(), b"BB".to_vec()),
            (b"c".to_vec(), b"C".to_vec()),
        ]
    );
    assert!(collect(&db, Some(b"x".as_slice()), None).is_empty());
}

/// Test seeking an iterator to a key between existing keys
#[test]
fn test_e2e_iterator_seek() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();
    for i in 0..50u32 {
        db.put(format!("k{:03}", i * 2).as_bytes(), b"v").unwrap();
    }

    let mut iter = db.iter().unwrap();
    iter.seek(b"k011");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"k012");
    iter.advance();
    assert_eq!(iter.key(), b"k014");
    iter.seek(b"k999");
    assert!(!iter.valid());
    iter.status().unwrap();
}

/// Merge operands fold onto the base value in write order.
#[test]
fn test_e2e_merge_counter() {
    let dir = TempDir::new().unwrap();
    let options = Options::default().merge_operator(Arc::new(U64AddOperator));
    let db = DB::open(dir.path(), options.clone()).unwrap();

    db.put(b"hits", &10u64.to_le_bytes()).unwrap();
    db.merge(b"hits", &5u64.to_le_bytes()).unwrap();
    db.flush().unwrap();
    db.merge(b"hits", &1u64.to_le_bytes()).unwrap();
    db.merge(b"fresh", &7u64.to_le_bytes()).unwrap();

    assert_eq!(db.get(b"hits").unwrap(), Some(16u64.to_le_bytes().to_vec()));
    assert_eq!(db.get(b"fresh").unwrap(), Some(7u64.to_le_bytes().to_vec()));

    db.compact_range(None, None).unwrap();
    assert_eq!(db.get(b"hits").unwrap(), Some(16u64.to_le_bytes().to_vec()));

    drop(db);
    let db = DB::open(dir.path(), options).unwrap();
    assert_eq!(db.get(b"hits").unwrap(), Some(16u64.to_le_bytes().to_vec()));
}

/// A merge after a delete starts from no base value.
#[test]
fn test_e2e_merge_after_delete() {
    let dir = TempDir::new().unwrap();
    let options = Options::default().merge_operator(Arc::new(StringAppendOperator::new(b',')));
    let db = DB::open(dir.path(), options).unwrap();

    db.merge(b"list", b"a").unwrap();
    db.merge(b"list", b"b").unwrap();
    db.delete(b"list").unwrap();
    db.merge(b"list", b"c").unwrap();
    assert_eq!(db.get(b"list").unwrap(), Some(b"c".to_vec()));

    let entries: Vec<_> = db.iter().unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(entries, vec![(b"list".to_vec(), b"c".to_vec())]);
}

/// Merging without an operator is rejected at write time.
#[test]
fn test_e2e_merge_without_operator() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();
    assert!(matches!(
        db.merge(b"k", b"v"),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(db.get(b"k").unwrap(), None);
}

/// Synced and unlogged writes are both readable.
#[test]
fn test_e2e_write_options() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();
    db.put_opt(b"synced", b"1", &WriteOptions::synced()).unwrap();
    let unlogged = WriteOptions {
        sync: false,
        disable_wal: true,
    };
    db.put_opt(b"unlogged", b"2", &unlogged).unwrap();

    assert_eq!(db.get(b"synced").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get(b"unlogged").unwrap(), Some(b"2".to_vec()));

    // Once flushed, unlogged writes survive a reopen too
    db.flush().unwrap();
    drop(db);
    let db = DB::open(dir.path(), Options::default()).unwrap();
    assert_eq!(db.get(b"unlogged").unwrap(), Some(b"2".to_vec()));
}

/// A custom comparator orders iteration.
#[test]
fn test_e2e_reverse_comparator() {
    let dir = TempDir::new().unwrap();
    let options = Options::default().comparator(Arc::new(ReverseBytewiseComparator));
    let db = DB::open(dir.path(), options.clone()).unwrap();
    for key in ["a", "c", "b"] {
        db.put(key.as_bytes(), b"v").unwrap();
    }
    db.flush().unwrap();
    db.put(b"d", b"v").unwrap();

    let keys: Vec<Vec<u8>> = collect(&db, None, None).into_iter().map(|(k, _)| k).collect();
    assert_eq!(
        keys,
        vec![b"d".to_vec(), b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]
    );
    drop(db);

    // Reopening with another comparator is refused
    let err = DB::open(dir.path(), Options::default()).err().unwrap();
    assert!(matches!(err, Error::InvalidArgument(_)));
    let db = DB::open(dir.path(), options).unwrap();
    assert_eq!(db.get(b"d").unwrap(), Some(b"v".to_vec()));
}

/// Test that data survives a clean close and reopen
#[test]
fn test_e2e_close_and_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = DB::open(dir.path(), Options::default()).unwrap();
        for i in 0..500 {
            db.put(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes())
                .unwrap();
        }
        db.close().unwrap();
    }
    let db = DB::open(dir.path(), Options::default()).unwrap();
    for i in 0..500 {
        assert_eq!(
            db.get(format!("key{}", i).as_bytes()).unwrap(),
            Some(format!("value{}", i).into_bytes())
        );
    }
    assert!(db.latest_sequence() >= 500);
}

/// The options file describes every column family.
#[test]
fn test_e2e_options_file() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();
    db.create_column_family("meta", ColumnFamilyOptions::default().memtable_size(1 << 20))
        .unwrap();

    let raw = std::fs::read(dir.path().join("OPTIONS")).unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(doc["column_families"]["meta"]["memtable_size"], 1 << 20);
    assert!(doc["column_families"]["default"].is_object());
}
