//! Basic usage example for Strata
//!
//! This example demonstrates the fundamental operations:
//! - Opening a database
//! - Writing, reading and deleting keys
//! - Atomic batches and merge counters
//! - Snapshots and range scans

use std::sync::Arc;

use anyhow::Context;
use strata::{Options, ReadOptions, U64AddOperator, WalSyncPolicy, WriteBatch, DB};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path = std::env::temp_dir().join("strata_basic_example");
    let options = Options::default()
        .memtable_size(4 * 1024 * 1024)
        .wal_sync_policy(WalSyncPolicy::PerBatch)
        .merge_operator(Arc::new(U64AddOperator));

    let db = DB::open(&path, options.clone())
        .with_context(|| format!("opening {}", path.display()))?;
    println!("Database opened at {}", db.path().display());

    println!("Writing data...");
    db.put(b"key1", b"value1")?;
    db.put(b"key2", b"value2")?;
    db.put(b"key3", b"value3")?;

    if let Some(value) = db.get(b"key1")? {
        println!("key1 => {}", String::from_utf8_lossy(&value));
    }

    println!("Deleting key2...");
    db.delete(b"key2")?;
    assert!(db.get(b"key2")?.is_none());

    // Several updates applied atomically
    let mut batch = WriteBatch::new();
    batch.put(b"user:1", b"alice");
    batch.put(b"user:2", b"bob");
    batch.merge(b"users", &2u64.to_le_bytes());
    db.write(batch)?;

    let snapshot = db.snapshot();
    db.put(b"user:1", b"alice v2")?;
    db.merge(b"users", &1u64.to_le_bytes())?;

    let old = db.get_opt(b"user:1", ReadOptions::at(&snapshot))?;
    println!(
        "user:1 at sequence {} => {:?}",
        snapshot.sequence(),
        old.map(|v| String::from_utf8_lossy(&v).into_owned())
    );
    db.release_snapshot(snapshot);

    let users = db.get(b"users")?.context("counter missing")?;
    let count = u64::from_le_bytes(users.as_slice().try_into()?);
    println!("users counter => {}", count);

    println!("Scanning user:*");
    for entry in db.scan(Some(b"user:".as_slice()), Some(b"user;".as_slice()))? {
        let (key, value) = entry?;
        println!(
            "  {} => {}",
            String::from_utf8_lossy(&key),
            String::from_utf8_lossy(&value)
        );
    }

    db.flush()?;
    db.compact_range(None, None)?;
    println!(
        "Tables: L0={} L1={}",
        db.num_files_at_level(&db.default_cf(), 0),
        db.num_files_at_level(&db.default_cf(), 1)
    );

    db.close()?;
    println!("Database closed");
    Ok(())
}
