//! # MemTable - In-Memory Sorted Table
//!
//! The MemTable is an in-memory data structure that stores recent writes.
//! It uses a SkipList for efficient concurrent reads and writes.
//!
//! ## Design
//!
//! - Based on crossbeam-skiplist for lock-free concurrent access
//! - Keys carry their column family's comparator, so the skip list orders
//!   them exactly like the tables they are flushed into
//! - Holds puts, tombstones and merge operands, tagged with sequence numbers
//! - Tracks size to determine when to freeze and flush
//! - Remembers the WAL file its records were logged to
//!
//! ## Thread Safety
//!
//! Inserts come only from the commit-group leader; any number of readers
//! and iterators run concurrently without locks.

mod internal_key;

pub use internal_key::{
    encode_internal_key, extract_user_key, parse_internal_key, InternalKey,
    InternalKeyComparator, Record, ValueType, INTERNAL_KEY_TRAILER, MAX_SEQUENCE,
};

use std::cmp::Ordering as CmpOrdering;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

use crate::comparator::Comparator;
use crate::error::Result;
use crate::iterator::InternalIterator;

/// Per-entry bookkeeping charged against the size limit.
const ENTRY_OVERHEAD: usize = 32;

/// Skip list key: an internal key plus the ordering it sorts by.
#[derive(Clone)]
struct MemKey {
    key: InternalKey,
    cmp: Arc<dyn Comparator>,
}

impl MemKey {
    fn cmp_parts(&self, user_key: &[u8], sequence: u64, value_type: ValueType) -> CmpOrdering {
        self.cmp
            .compare(&self.key.user_key, user_key)
            .then_with(|| sequence.cmp(&self.key.sequence))
            .then_with(|| (value_type as u8).cmp(&(self.key.value_type as u8)))
    }
}

impl PartialEq for MemKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for MemKey {}

impl PartialOrd for MemKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.cmp_parts(&other.key.user_key, other.key.sequence, other.key.value_type)
    }
}

/// MemTable stores recent writes in memory using a SkipList.
///
/// # Example
///
/// ```rust,no_run
/// use strata::comparator::bytewise;
/// use strata::memtable::MemTable;
///
/// let memtable = MemTable::new(bytewise(), 1);
/// memtable.put(b"key1", b"value1", 1);
/// let record = memtable.get(b"key1", 2).unwrap();
/// assert_eq!(record.value, b"value1");
/// ```
pub struct MemTable {
    data: SkipMap<MemKey, Vec<u8>>,

    /// Approximate size in bytes (keys + values + overhead)
    size: AtomicUsize,

    comparator: Arc<dyn Comparator>,

    /// Oldest WAL file holding records of this memtable.
    wal_number: AtomicU64,
}

impl MemTable {
    /// Creates a new empty MemTable whose records live in WAL `wal_number`.
    pub fn new(comparator: Arc<dyn Comparator>, wal_number: u64) -> Self {
        Self {
            data: SkipMap::new(),
            size: AtomicUsize::new(0),
            comparator,
            wal_number: AtomicU64::new(wal_number),
        }
    }

    fn mem_key(&self, user_key: &[u8], sequence: u64, value_type: ValueType) -> MemKey {
        MemKey {
            key: InternalKey::new(user_key.to_vec(), sequence, value_type),
            cmp: Arc::clone(&self.comparator),
        }
    }

    /// Inserts a record.
    pub fn add(&self, sequence: u64, value_type: ValueType, key: &[u8], value: &[u8]) {
        let entry_size = key.len() + value.len() + INTERNAL_KEY_TRAILER + ENTRY_OVERHEAD;
        self.data
            .insert(self.mem_key(key, sequence, value_type), value.to_vec());
        self.size.fetch_add(entry_size, Ordering::Relaxed);
    }

    /// Inserts a value.
    pub fn put(&self, key: &[u8], value: &[u8], sequence: u64) {
        self.add(sequence, ValueType::Value, key, value);
    }

    /// Inserts a tombstone.
    pub fn delete(&self, key: &[u8], sequence: u64) {
        self.add(sequence, ValueType::Deletion, key, &[]);
    }

    /// Inserts a merge operand.
    pub fn merge(&self, key: &[u8], operand: &[u8], sequence: u64) {
        self.add(sequence, ValueType::Merge, key, operand);
    }

    /// Returns the newest record of `key` with sequence `<= max_sequence`.
    pub fn get(&self, key: &[u8], max_sequence: u64) -> Option<Record> {
        let lookup = self.mem_key(key, max_sequence, ValueType::FOR_SEEK);
        let entry = self.data.lower_bound(Bound::Included(&lookup))?;
        let found = &entry.key().key;
        if self.comparator.compare(&found.user_key, key) != CmpOrdering::Equal {
            return None;
        }
        Some(Record {
            key: found.user_key.clone(),
            sequence: found.sequence,
            value_type: found.value_type,
            value: entry.value().clone(),
        })
    }

    /// Visits the versions of `key` visible at `max_sequence`, newest first.
    ///
    /// `visit` returns `true` to stop. Returns whether it stopped.
    pub fn for_each_version<F>(&self, key: &[u8], max_sequence: u64, mut visit: F) -> Result<bool>
    where
        F: FnMut(ValueType, &[u8]) -> Result<bool>,
    {
        let lookup = self.mem_key(key, max_sequence, ValueType::FOR_SEEK);
        for entry in self.data.range(lookup..) {
            let found = &entry.key().key;
            if self.comparator.compare(&found.user_key, key) != CmpOrdering::Equal {
                break;
            }
            if visit(found.value_type, entry.value())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns the approximate memory usage in bytes.
    pub fn approximate_size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the memtable holds no records.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Oldest WAL file this memtable depends on.
    pub fn wal_number(&self) -> u64 {
        self.wal_number.load(Ordering::Acquire)
    }

    /// Re-homes an empty memtable onto a newer WAL.
    pub(crate) fn set_wal_number(&self, number: u64) {
        self.wal_number.store(number, Ordering::Release);
    }

    /// The user comparator.
    pub fn comparator(&self) -> &Arc<dyn Comparator> {
        &self.comparator
    }

    /// Returns an iterator over all records in internal key order.
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            table: Arc::clone(self),
            current: None,
        }
    }
}

struct Cursor {
    key: MemKey,
    encoded: Vec<u8>,
    value: Vec<u8>,
}

/// Iterator over a memtable.
///
/// Holds the memtable by `Arc` and re-seeks past the last returned key on
/// every step, so it borrows nothing and sees records inserted after it
/// was created (callers filter those by sequence).
pub struct MemTableIterator {
    table: Arc<MemTable>,
    current: Option<Cursor>,
}

fn load(entry: Option<crossbeam_skiplist::map::Entry<'_, MemKey, Vec<u8>>>) -> Option<Cursor> {
    entry.map(|e| Cursor {
        key: e.key().clone(),
        encoded: e.key().key.encode(),
        value: e.value().clone(),
    })
}

impl InternalIterator for MemTableIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.current = load(self.table.data.front());
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        let target = InternalKey::decode(target)?;
        let probe = MemKey {
            key: target,
            cmp: Arc::clone(&self.table.comparator),
        };
        self.current = load(self.table.data.lower_bound(Bound::Included(&probe)));
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        if let Some(cur) = self.current.take() {
            self.current = load(self.table.data.lower_bound(Bound::Excluded(&cur.key)));
        }
        Ok(())
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |c| c.encoded.as_slice())
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |c| c.value.as_slice())
    }
}
