// Boundary Condition Tests for Strata
// These tests verify edge cases in keys, values, options and lifecycle

use strata::{Error, Options, WriteBatch, DB};
use tempfile::TempDir;

/// Test empty key and empty value handling
#[test]
fn test_empty_key_and_value() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    db.put(b"", b"empty key").unwrap();
    db.put(b"empty value", b"").unwrap();
    assert_eq!(db.get(b"").unwrap(), Some(b"empty key".to_vec()));
    assert_eq!(db.get(b"empty value").unwrap(), Some(Vec::new()));

    db.flush().unwrap();
    assert_eq!(db.get(b"").unwrap(), Some(b"empty key".to_vec()));
    assert_eq!(db.get(b"empty value").unwrap(), Some(Vec::new()));

    // An empty value is not a deletion
    let first = db.iter().unwrap().next().unwrap().unwrap();
    assert_eq!(first, (Vec::new(), b"empty key".to_vec()));
}

/// Test large keys and values that span several blocks
#[test]
fn test_large_key_and_value() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    let key = vec![b'k'; 64 * 1024];
    let value: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    db.put(&key, &value).unwrap();
    db.flush().unwrap();
    assert_eq!(db.get(&key).unwrap(), Some(value.clone()));

    drop(db);
    let db = DB::open(dir.path(), Options::default()).unwrap();
    assert_eq!(db.get(&key).unwrap(), Some(value));
}

/// Test arbitrary binary keys, including separators and high bytes
#[test]
fn test_binary_keys() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    let keys: Vec<Vec<u8>> = vec![
        vec![0x00],
        vec![0x00, 0x00],
        vec![0x00, 0xff],
        vec![0x7f],
        vec![0xff],
        vec![0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff],
    ];
    for (i, key) in keys.iter().enumerate().rev() {
        db.put(key, &[i as u8]).unwrap();
    }
    db.flush().unwrap();

    let seen: Vec<Vec<u8>> = db.iter().unwrap().map(|e| e.unwrap().0).collect();
    assert_eq!(seen, keys);
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(db.get(key).unwrap(), Some(vec![i as u8]));
    }
}

/// A key that is a prefix of another stays distinct.
#[test]
fn test_prefix_keys() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();
    db.put(b"app", b"1").unwrap();
    db.put(b"apple", b"2").unwrap();
    db.put(b"ap", b"3").unwrap();
    db.flush().unwrap();
    db.delete(b"app").unwrap();

    assert_eq!(db.get(b"ap").unwrap(), Some(b"3".to_vec()));
    assert_eq!(db.get(b"app").unwrap(), None);
    assert_eq!(db.get(b"apple").unwrap(), Some(b"2".to_vec()));
    assert_eq!(db.get(b"appl").unwrap(), None);
}

/// Test delete of a key that never existed
#[test]
fn test_delete_missing_key() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();
    db.delete(b"never").unwrap();
    assert_eq!(db.get(b"never").unwrap(), None);
    assert_eq!(db.latest_sequence(), 1);
}

/// Test iterating an empty database
#[test]
fn test_empty_database_iteration() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();
    let mut iter = db.iter().unwrap();
    assert!(!iter.valid());
    iter.seek(b"anything");
    assert!(!iter.valid());
    assert!(iter.next().is_none());
    db.flush().unwrap();
    db.compact_range(None, None).unwrap();
}

/// Test a single batch larger than a memtable
#[test]
fn test_batch_larger_than_memtable() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default().memtable_size(4 * 1024)).unwrap();

    let mut batch = WriteBatch::new();
    for i in 0..1_000 {
        batch.put(format!("key{:04}", i).as_bytes(), &[b'z'; 100]);
    }
    db.write(batch).unwrap();
    db.put(b"after", b"batch").unwrap();
    db.wait_for_background_work().unwrap();

    assert_eq!(db.get(b"key0999").unwrap(), Some(vec![b'z'; 100]));
    assert_eq!(db.get(b"after").unwrap(), Some(b"batch".to_vec()));
}

/// Test invalid option values are rejected on open
#[test]
fn test_invalid_options() {
    let dir = TempDir::new().unwrap();
    let cases = [
        Options::default().memtable_size(0),
        Options::default().num_levels(1),
        Options::default().block_size(0),
        Options::default().max_background_jobs(0),
    ];
    for options in cases {
        assert!(matches!(
            DB::open(dir.path(), options),
            Err(Error::InvalidArgument(_))
        ));
    }
}

/// Test creation flags on open
#[test]
fn test_open_flags() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");

    let missing = Options::default().create_if_missing(false);
    assert!(matches!(DB::open(&path, missing), Err(Error::NotFound(_))));

    drop(DB::open(&path, Options::default()).unwrap());
    let exclusive = Options::default().error_if_exists(true);
    assert!(matches!(
        DB::open(&path, exclusive),
        Err(Error::AlreadyExists(_))
    ));
    assert!(DB::open(&path, Options::default().create_if_missing(false)).is_ok());
}

/// Test many reopen cycles on one directory
#[test]
fn test_repeated_reopen() {
    let dir = TempDir::new().unwrap();
    for round in 0..10u32 {
        let db = DB::open(dir.path(), Options::default()).unwrap();
        if round > 0 {
            assert_eq!(
                db.get(b"round").unwrap(),
                Some((round - 1).to_le_bytes().to_vec())
            );
        }
        db.put(b"round", &round.to_le_bytes()).unwrap();
        if round % 3 == 0 {
            db.close().unwrap();
        }
    }
}
