//! # Strata - An Embedded LSM-Tree Storage Engine
//!
//! Strata is a persistent, ordered key-value store in the RocksDB and
//! LevelDB tradition. Writes go to a write-ahead log and an in-memory
//! memtable; full memtables are flushed to immutable sorted tables on disk,
//! which background compactions merge down a hierarchy of levels.
//!
//! ## Architecture
//!
//! - **WAL (Write-Ahead Log)**: Every committed batch is logged before it
//!   becomes visible
//! - **MemTable**: Lock-free skiplist of recent writes
//! - **SSTable**: Immutable block-based tables with bloom filters
//! - **Version / Manifest**: The set of live tables, kept in an append-only log
//! - **Compaction**: Leveled compaction on a background worker pool
//! - **Column Families**: Independent keyspaces sharing one WAL
//! - **Snapshots**: Consistent point-in-time reads
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use strata::{WriteBatch, DB, Options};
//!
//! # fn main() -> Result<(), strata::Error> {
//! let db = DB::open("./data", Options::default())?;
//!
//! db.put(b"key1", b"value1")?;
//!
//! let mut batch = WriteBatch::new();
//! batch.put(b"key2", b"value2");
//! batch.delete(b"key1");
//! db.write(batch)?;
//!
//! let snapshot = db.snapshot();
//! db.put(b"key2", b"changed")?;
//! assert_eq!(
//!     db.get_opt(b"key2", strata::ReadOptions::at(&snapshot))?,
//!     Some(b"value2".to_vec())
//! );
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod column_family;
pub mod compaction;
pub mod comparator;
pub mod config;
pub mod error;
pub mod filename;
pub mod filter;
pub mod iterator;
pub mod memtable;
pub mod merge_operator;
pub mod snapshot;
pub mod sstable;
pub mod version;
pub mod wal;
pub mod write_batch;

mod db;

pub use column_family::{ColumnFamilyDescriptor, ColumnFamilyHandle, DEFAULT_COLUMN_FAMILY_NAME};
pub use comparator::{BytewiseComparator, Comparator, ReverseBytewiseComparator};
pub use config::{
    ColumnFamilyOptions, CompressionType, FlushOptions, Options, ReadOptions, WalRecoveryMode,
    WalSyncPolicy, WriteOptions,
};
pub use db::DB;
pub use error::{Error, Result};
pub use iterator::DBIterator;
pub use merge_operator::{MergeOperator, StringAppendOperator, U64AddOperator};
pub use snapshot::Snapshot;
pub use write_batch::WriteBatch;
