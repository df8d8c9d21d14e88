//! Snapshot implementation for point-in-time consistent reads.
//!
//! Snapshots allow reading data as it existed at a specific point in time,
//! providing isolation from concurrent writes. While a snapshot is alive,
//! compaction keeps every record it can see.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Registry of live snapshot sequence numbers.
#[derive(Debug, Default)]
pub struct SnapshotList {
    // sequence -> number of snapshots taken at it
    live: Mutex<BTreeMap<u64, usize>>,
}

impl SnapshotList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a snapshot at `sequence`.
    pub fn acquire(self: &Arc<Self>, sequence: u64) -> Snapshot {
        *self.live.lock().entry(sequence).or_insert(0) += 1;
        Snapshot {
            sequence,
            list: Arc::clone(self),
        }
    }

    /// Registers a snapshot at the value of `latest`, read under the list
    /// lock so that a compaction collecting [`sequences`](Self::sequences)
    /// either sees the snapshot or ran entirely before it.
    pub(crate) fn acquire_latest(self: &Arc<Self>, latest: &AtomicU64) -> Snapshot {
        let mut live = self.live.lock();
        let sequence = latest.load(Ordering::Acquire);
        *live.entry(sequence).or_insert(0) += 1;
        Snapshot {
            sequence,
            list: Arc::clone(self),
        }
    }

    fn release(&self, sequence: u64) {
        let mut live = self.live.lock();
        if let Some(count) = live.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                live.remove(&sequence);
            }
        }
    }

    /// Distinct live sequences, ascending.
    pub fn sequences(&self) -> Vec<u64> {
        self.live.lock().keys().copied().collect()
    }

    /// Oldest live sequence.
    pub fn oldest(&self) -> Option<u64> {
        self.live.lock().keys().next().copied()
    }

    /// Number of live snapshots.
    pub fn len(&self) -> usize {
        self.live.lock().values().sum()
    }

    /// Returns true if no snapshot is live.
    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }
}

/// A snapshot represents a point-in-time view of the database.
///
/// All read operations through a snapshot will see data as it existed
/// at the time the snapshot was created, even if the data is modified
/// or deleted afterwards. The snapshot is released when dropped.
///
/// # Example
///
/// ```rust,no_run
/// use strata::{DB, Options, ReadOptions};
///
/// # fn main() -> Result<(), strata::Error> {
/// let db = DB::open("./data", Options::default())?;
///
/// db.put(b"key1", b"value1")?;
///
/// // Create a snapshot
/// let snapshot = db.snapshot();
///
/// // Modify the database
/// db.put(b"key1", b"value2")?;
///
/// // Snapshot still sees the old value
/// let old = db.get_opt(b"key1", ReadOptions::at(&snapshot))?;
/// assert_eq!(old, Some(b"value1".to_vec()));
///
/// // Current DB sees the new value
/// assert_eq!(db.get(b"key1")?, Some(b"value2".to_vec()));
/// # Ok(())
/// # }
/// ```
pub struct Snapshot {
    /// Sequence number at the time of snapshot creation.
    /// Reads only see records with a sequence <= this one.
    sequence: u64,
    list: Arc<SnapshotList>,
}

impl Snapshot {
    /// Returns the sequence number of this snapshot.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.list.release(self.sequence);
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("sequence", &self.sequence)
            .finish()
    }
}
