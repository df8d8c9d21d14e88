//! The database handle.
//!
//! [`DB`] is a thin front over `DbInner`, which the background workers
//! share. State is split across a few locks, always taken in this order:
//!
//! 1. `write`: the commit-group leader and WAL
//! 2. `versions`: the manifest and current version
//! 3. `bg`: background job bookkeeping
//! 4. `super_version` (write side)
//!
//! Readers only ever take the `super_version` read lock, long enough to
//! clone an `Arc`.

mod background;
mod read;
mod recovery;
mod write;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::cache::BlockCache;
use crate::column_family::{
    CfView, ColumnFamilyDescriptor, ColumnFamilyHandle, SuperVersion, DEFAULT_COLUMN_FAMILY_ID,
    DEFAULT_COLUMN_FAMILY_NAME,
};
use crate::config::{ColumnFamilyOptions, FlushOptions, Options, ReadOptions, WriteOptions};
use crate::error::{Error, IoContext, Result};
use crate::iterator::DBIterator;
use crate::snapshot::{Snapshot, SnapshotList};
use crate::version::{ManifestState, VersionEdit, VersionSet};
use crate::write_batch::WriteBatch;

use background::Job;
use write::{PendingWrite, WriteState};

/// Errors buffered for [`DB::background_errors`] before new ones are dropped.
const ERROR_CHANNEL_CAPACITY: usize = 64;

/// How long a stalled caller sleeps before re-checking its condition.
const STALL_POLL: Duration = Duration::from_millis(100);

/// Bookkeeping of scheduled and running background work.
#[derive(Default)]
struct BgState {
    /// Jobs sent to the workers and not finished yet
    scheduled: usize,
    /// Column families with a flush queued or running
    flushing: HashSet<u32>,
    /// Column families with an automatic compaction queued
    compaction_queued: HashSet<u32>,
    /// Running compactions per column family
    running_compactions: HashMap<u32, usize>,
    /// Files reserved by running compactions
    being_compacted: HashSet<u64>,
    shutting_down: bool,
    /// A failure writes cannot proceed past
    error: Option<Error>,
}

pub(crate) struct DbInner {
    dir: PathBuf,
    options: Options,
    cache: Option<Arc<BlockCache>>,
    versions: Mutex<VersionSet>,
    super_version: RwLock<Arc<SuperVersion>>,
    write: Mutex<WriteState>,
    queue: Mutex<VecDeque<Arc<PendingWrite>>>,
    bg: Mutex<BgState>,
    bg_cv: Condvar,
    snapshots: Arc<SnapshotList>,
    last_sequence: AtomicU64,
    jobs: Sender<Job>,
    errors_tx: Sender<Error>,
    errors_rx: Receiver<Error>,
}

impl DbInner {
    fn super_version(&self) -> Arc<SuperVersion> {
        Arc::clone(&self.super_version.read())
    }

    /// Id of a live column family, or `InvalidArgument` for a dropped one.
    fn resolve(&self, handle: &ColumnFamilyHandle) -> Result<u32> {
        if self.super_version().cf(handle.id()).is_some() {
            Ok(handle.id())
        } else {
            Err(Error::invalid_argument(format!(
                "column family {:?} has been dropped",
                handle.name()
            )))
        }
    }

    fn persist_options(&self) -> Result<()> {
        let sv = self.super_version();
        self.options.persist(
            &self.dir,
            sv.cfs
                .values()
                .map(|view| (view.handle.name(), view.options.as_ref())),
        )
    }

    /// The sticky error, if one was recorded.
    fn bg_error(&self) -> Option<Error> {
        self.bg.lock().error.as_ref().map(Error::duplicate)
    }

    /// Records an error that stops further writes.
    fn set_sticky_error(&self, err: &Error) {
        let mut bg = self.bg.lock();
        if bg.error.is_none() {
            log::error!("Database entered error state: {}", err);
            bg.error = Some(err.duplicate());
        }
        self.bg_cv.notify_all();
    }

    /// Hands a background failure to whoever listens on the error channel.
    fn report_error(&self, err: Error) {
        if self.errors_tx.try_send(err).is_err() {
            log::warn!("Background error channel is full, dropping error");
        }
    }

    fn shutdown(&self) {
        let mut bg = self.bg.lock();
        bg.shutting_down = true;
        self.bg_cv.notify_all();
    }
}

/// The main database handle.
///
/// This is the primary interface for interacting with the storage engine.
/// It supports point writes and reads, atomic batches, merges, iterators,
/// snapshots and column families.
///
/// # Thread Safety
///
/// `DB` is `Send + Sync` and can be safely shared across threads using
/// `Arc<DB>`. Concurrent writers are grouped into a single WAL append.
///
/// # Example
///
/// ```rust,no_run
/// use strata::{DB, Options, WriteBatch};
///
/// # fn main() -> Result<(), strata::Error> {
/// let db = DB::open("./data", Options::default())?;
///
/// db.put(b"key1", b"value1")?;
///
/// let mut batch = WriteBatch::new();
/// batch.put(b"key2", b"value2");
/// batch.delete(b"key1");
/// db.write(batch)?;
///
/// assert_eq!(db.get(b"key1")?, None);
/// db.close()?;
/// # Ok(())
/// # }
/// ```
pub struct DB {
    inner: Arc<DbInner>,
    workers: Vec<JoinHandle<()>>,
}

impl DB {
    /// Opens a database at the specified path with the given options.
    ///
    /// If the database does not exist, it will be created (unless
    /// `create_if_missing` is off). If it exists, every table the manifest
    /// names is opened and the WAL is replayed into level 0.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The options are invalid
    /// - The database has column families besides `default`; use
    ///   [`DB::open_cf`]
    /// - Recovery fails due to corrupted data
    /// - The directory is inaccessible
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use strata::{DB, Options};
    ///
    /// # fn main() -> Result<(), strata::Error> {
    /// let options = Options::default();
    /// let db = DB::open("./my_database", options)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        Self::open_cf(path, options, Vec::new())
    }

    /// Opens a database together with its column families.
    ///
    /// Every column family that exists on disk must be listed, `default`
    /// excepted. Listed families that do not exist yet are created. A
    /// `default` descriptor overrides `options.default_cf`.
    pub fn open_cf<P: AsRef<Path>>(
        path: P,
        options: Options,
        descriptors: Vec<ColumnFamilyDescriptor>,
    ) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();
        let cache = (options.block_cache_size > 0)
            .then(|| Arc::new(BlockCache::new(options.block_cache_size)));
        let recovered = recovery::recover(&dir, &options, descriptors, cache.clone())?;

        let (jobs, job_rx) = channel::unbounded();
        let (errors_tx, errors_rx) = channel::bounded(ERROR_CHANNEL_CAPACITY);
        let num_workers = options.max_background_jobs;
        let inner = Arc::new(DbInner {
            dir,
            options,
            cache,
            versions: Mutex::new(recovered.versions),
            super_version: RwLock::new(Arc::new(recovered.super_version)),
            write: Mutex::new(WriteState { wal: recovered.wal }),
            queue: Mutex::new(VecDeque::new()),
            bg: Mutex::new(BgState::default()),
            bg_cv: Condvar::new(),
            snapshots: Arc::new(SnapshotList::new()),
            last_sequence: AtomicU64::new(recovered.last_sequence),
            jobs,
            errors_tx,
            errors_rx,
        });
        inner.persist_options()?;

        let mut db = DB {
            inner,
            workers: Vec::with_capacity(num_workers),
        };
        for i in 0..num_workers {
            let inner = Arc::clone(&db.inner);
            let rx = job_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("strata-bg-{}", i))
                .spawn(move || background::worker_loop(inner, rx))
                .with_path("spawn worker for", &db.inner.dir)?;
            db.workers.push(handle);
        }

        let sv = db.inner.super_version();
        for id in sv.cfs.keys() {
            db.inner.maybe_schedule_compaction(*id);
        }
        log::info!(
            "Opened database at {} ({} column families, last sequence {})",
            db.inner.dir.display(),
            sv.cfs.len(),
            db.inner.last_sequence.load(Ordering::Acquire)
        );
        Ok(db)
    }

    /// Names of the column families of the database at `path`.
    pub fn list_column_families<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
        let dir = path.as_ref();
        let state = ManifestState::load(dir)?
            .ok_or_else(|| Error::not_found(format!("no database at {}", dir.display())))?;
        Ok(state.families.into_values().map(|f| f.name).collect())
    }

    /// Flushes every column family, waits for background work and closes
    /// the database.
    ///
    /// Dropping a `DB` without closing it is safe as well: unflushed
    /// writes are replayed from the WAL on the next open.
    pub fn close(self) -> Result<()> {
        let mut first_error = None;
        for handle in self.column_families() {
            if let Err(e) = self.flush_cf(&handle, FlushOptions { wait: true }) {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.wait_for_background_work() {
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.inner.write.lock().wal.sync() {
            first_error.get_or_insert(e);
        }
        log::info!("Closed database at {}", self.inner.dir.display());
        first_error.map_or(Ok(()), Err)
    }

    /// Inserts a key-value pair into the database.
    ///
    /// If the key already exists, its value will be overwritten.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use strata::{DB, Options};
    /// # fn main() -> Result<(), strata::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// db.put(b"key", b"value")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_opt(key, value, &WriteOptions::default())
    }

    /// Inserts a key-value pair into column family `cf`.
    pub fn put_cf(&self, cf: &ColumnFamilyHandle, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_cf_opt(cf, key, value, &WriteOptions::default())
    }

    /// Inserts a key-value pair with explicit write options.
    pub fn put_opt(&self, key: &[u8], value: &[u8], options: &WriteOptions) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.inner.write(batch, options)
    }

    /// Inserts a key-value pair into `cf` with explicit write options.
    pub fn put_cf_opt(
        &self,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        value: &[u8],
        options: &WriteOptions,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put_cf(cf, key, value);
        self.inner.write(batch, options)
    }

    /// Deletes a key from the database.
    ///
    /// Deleting a key that does not exist is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.delete_opt(key, &WriteOptions::default())
    }

    /// Deletes a key from column family `cf`.
    pub fn delete_cf(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<()> {
        self.delete_cf_opt(cf, key, &WriteOptions::default())
    }

    /// Deletes a key with explicit write options.
    pub fn delete_opt(&self, key: &[u8], options: &WriteOptions) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.inner.write(batch, options)
    }

    /// Deletes a key from `cf` with explicit write options.
    pub fn delete_cf_opt(
        &self,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        options: &WriteOptions,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete_cf(cf, key);
        self.inner.write(batch, options)
    }

    /// Records a merge operand for `key`.
    ///
    /// Fails with [`Error::InvalidArgument`] unless the column family has a
    /// merge operator.
    pub fn merge(&self, key: &[u8], operand: &[u8]) -> Result<()> {
        self.merge_opt(key, operand, &WriteOptions::default())
    }

    /// Records a merge operand for `key` in column family `cf`.
    pub fn merge_cf(&self, cf: &ColumnFamilyHandle, key: &[u8], operand: &[u8]) -> Result<()> {
        self.merge_cf_opt(cf, key, operand, &WriteOptions::default())
    }

    /// Records a merge operand with explicit write options.
    pub fn merge_opt(&self, key: &[u8], operand: &[u8], options: &WriteOptions) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.merge(key, operand);
        self.inner.write(batch, options)
    }

    /// Records a merge operand in `cf` with explicit write options.
    pub fn merge_cf_opt(
        &self,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        operand: &[u8],
        options: &WriteOptions,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.merge_cf(cf, key, operand);
        self.inner.write(batch, options)
    }

    /// Applies a batch atomically: readers see all of it or none of it.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        self.inner.write(batch, &WriteOptions::default())
    }

    /// Applies a batch atomically with explicit write options.
    pub fn write_opt(&self, batch: WriteBatch, options: &WriteOptions) -> Result<()> {
        self.inner.write(batch, options)
    }

    /// Retrieves the value of a key from the default column family.
    ///
    /// Returns `Ok(None)` if the key does not exist or was deleted.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use strata::{DB, Options};
    /// # fn main() -> Result<(), strata::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// if let Some(value) = db.get(b"key")? {
    ///     println!("Value: {:?}", value);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner
            .get(DEFAULT_COLUMN_FAMILY_ID, key, &ReadOptions::default())
    }

    /// Retrieves the value of a key from column family `cf`.
    pub fn get_cf(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_cf_opt(cf, key, ReadOptions::default())
    }

    /// Retrieves the value of a key, optionally as of a snapshot.
    pub fn get_opt(&self, key: &[u8], options: ReadOptions<'_>) -> Result<Option<Vec<u8>>> {
        self.inner.get(DEFAULT_COLUMN_FAMILY_ID, key, &options)
    }

    /// Retrieves the value of a key from `cf`, optionally as of a snapshot.
    pub fn get_cf_opt(
        &self,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        options: ReadOptions<'_>,
    ) -> Result<Option<Vec<u8>>> {
        let id = self.inner.resolve(cf)?;
        self.inner.get(id, key, &options)
    }

    /// Iterates the whole default column family.
    pub fn iter(&self) -> Result<DBIterator> {
        self.inner.iter(
            DEFAULT_COLUMN_FAMILY_ID,
            &ReadOptions::default(),
            None,
            None,
        )
    }

    /// Iterates column family `cf`, optionally as of a snapshot.
    pub fn iter_cf(&self, cf: &ColumnFamilyHandle, options: ReadOptions<'_>) -> Result<DBIterator> {
        let id = self.inner.resolve(cf)?;
        self.inner.iter(id, &options, None, None)
    }

    /// Iterates the keys of the default column family in `[start, end)`.
    /// `None` leaves that side unbounded.
    pub fn scan(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<DBIterator> {
        self.inner.iter(
            DEFAULT_COLUMN_FAMILY_ID,
            &ReadOptions::default(),
            start.map(<[u8]>::to_vec),
            end.map(<[u8]>::to_vec),
        )
    }

    /// Iterates the keys of `cf` in `[start, end)`.
    pub fn scan_cf(
        &self,
        cf: &ColumnFamilyHandle,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        options: ReadOptions<'_>,
    ) -> Result<DBIterator> {
        let id = self.inner.resolve(cf)?;
        self.inner.iter(
            id,
            &options,
            start.map(<[u8]>::to_vec),
            end.map(<[u8]>::to_vec),
        )
    }

    /// Takes a snapshot of the current state.
    ///
    /// Reads through [`ReadOptions::at`] see exactly the writes committed
    /// before this call. The snapshot is released when dropped.
    pub fn snapshot(&self) -> Snapshot {
        self.inner
            .snapshots
            .acquire_latest(&self.inner.last_sequence)
    }

    /// Releases a snapshot. Same as dropping it.
    pub fn release_snapshot(&self, snapshot: Snapshot) {
        drop(snapshot);
    }

    /// Creates a column family.
    ///
    /// Fails with [`Error::AlreadyExists`] if the name is taken.
    pub fn create_column_family(
        &self,
        name: &str,
        options: ColumnFamilyOptions,
    ) -> Result<ColumnFamilyHandle> {
        options.validate()?;
        let handle = {
            let state = self.inner.write.lock();
            let mut versions = self.inner.versions.lock();
            if versions.families().values().any(|f| f.name == name) {
                return Err(Error::AlreadyExists(format!("column family {:?}", name)));
            }
            let id = versions.new_column_family_id();
            let wal_number = state.wal.number();
            let mut edit = VersionEdit::new();
            edit.add_column_family(id, name, options.comparator.name());
            edit.set_log_number(id, wal_number);
            edit.set_max_column_family(id);
            let version = versions.log_and_apply(edit, &[])?;

            let handle = ColumnFamilyHandle::new(id, name);
            let mut guard = self.inner.super_version.write();
            let mut sv = guard.with_version(version);
            sv.cfs.insert(
                id,
                CfView::new(handle.clone(), Arc::new(options), wal_number),
            );
            *guard = Arc::new(sv);
            handle
        };
        log::info!("Created column family {:?} (id {})", name, handle.id());
        self.inner.persist_options()?;
        Ok(handle)
    }

    /// Drops a column family and all of its data.
    ///
    /// The `default` column family cannot be dropped. Handles to a dropped
    /// family fail every later operation with [`Error::InvalidArgument`].
    pub fn drop_column_family(&self, cf: &ColumnFamilyHandle) -> Result<()> {
        if cf.id() == DEFAULT_COLUMN_FAMILY_ID {
            return Err(Error::invalid_argument(
                "the default column family cannot be dropped",
            ));
        }
        {
            let _state = self.inner.write.lock();
            let mut versions = self.inner.versions.lock();
            if versions.family(cf.id()).is_none() {
                return Err(Error::invalid_argument(format!(
                    "column family {:?} has been dropped",
                    cf.name()
                )));
            }
            let mut edit = VersionEdit::new();
            edit.drop_column_family(cf.id());
            let version = versions.log_and_apply(edit, &[])?;

            let mut guard = self.inner.super_version.write();
            let mut sv = guard.with_version(version);
            sv.cfs.remove(&cf.id());
            *guard = Arc::new(sv);
        }
        log::info!("Dropped column family {:?} (id {})", cf.name(), cf.id());
        self.inner.persist_options()
    }

    /// Handle of the column family called `name`.
    pub fn cf_handle(&self, name: &str) -> Option<ColumnFamilyHandle> {
        self.inner
            .super_version()
            .cfs
            .values()
            .find(|view| view.handle.name() == name)
            .map(|view| view.handle.clone())
    }

    /// Handle of the `default` column family.
    pub fn default_cf(&self) -> ColumnFamilyHandle {
        ColumnFamilyHandle::new(DEFAULT_COLUMN_FAMILY_ID, DEFAULT_COLUMN_FAMILY_NAME)
    }

    /// Handles of every live column family, by id.
    pub fn column_families(&self) -> Vec<ColumnFamilyHandle> {
        self.inner
            .super_version()
            .cfs
            .values()
            .map(|view| view.handle.clone())
            .collect()
    }

    /// Freezes the default column family's memtable and writes it to level 0.
    ///
    /// Blocks until the table is installed.
    pub fn flush(&self) -> Result<()> {
        self.flush_cf(&self.default_cf(), FlushOptions::default())
    }

    /// Freezes the memtable of `cf` and schedules it for writing to level 0.
    pub fn flush_cf(&self, cf: &ColumnFamilyHandle, options: FlushOptions) -> Result<()> {
        let id = self.inner.resolve(cf)?;
        self.inner.flush_cf(id, options.wait)
    }

    /// Compacts every level of the default column family over the user
    /// keys in `[start, end]`.
    pub fn compact_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.compact_range_cf(&self.default_cf(), start, end)
    }

    /// Compacts every level of `cf` over the user keys in `[start, end]`.
    ///
    /// The memtable is flushed first. Returns once the range has been
    /// pushed down to the deepest level holding data.
    pub fn compact_range_cf(
        &self,
        cf: &ColumnFamilyHandle,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        let id = self.inner.resolve(cf)?;
        self.inner.flush_cf(id, true)?;
        let (reply, done) = channel::bounded(1);
        self.inner.schedule_job(Job::Manual {
            cf: id,
            start: start.map(<[u8]>::to_vec),
            end: end.map(<[u8]>::to_vec),
            reply,
        })?;
        done.recv()
            .map_err(|_| Error::invalid_state("background workers stopped"))?
    }

    /// Blocks until no flush or compaction is scheduled or running.
    ///
    /// Returns the sticky background error, if there is one.
    pub fn wait_for_background_work(&self) -> Result<()> {
        let mut bg = self.inner.bg.lock();
        while bg.scheduled > 0 && !bg.shutting_down {
            self.inner.bg_cv.wait_for(&mut bg, STALL_POLL);
        }
        match &bg.error {
            Some(e) => Err(e.duplicate()),
            None => Ok(()),
        }
    }

    /// Number of table files at `level` of `cf`.
    ///
    /// A dropped column family, or a level past `num_levels`, has no files
    /// and reports 0 rather than an error.
    pub fn num_files_at_level(&self, cf: &ColumnFamilyHandle, level: usize) -> usize {
        self.inner
            .super_version()
            .version
            .num_files_at_level(cf.id(), level)
    }

    /// Sequence number of the last committed write.
    pub fn latest_sequence(&self) -> u64 {
        self.inner.last_sequence.load(Ordering::Acquire)
    }

    /// Channel receiving flush and compaction failures.
    ///
    /// Every clone of the receiver competes for the same errors.
    pub fn background_errors(&self) -> Receiver<Error> {
        self.inner.errors_rx.clone()
    }

    /// Path of the database directory.
    pub fn path(&self) -> &Path {
        &self.inner.dir
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        self.inner.shutdown();
        for _ in &self.workers {
            let _ = self.inner.jobs.send(Job::Shutdown);
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Background worker panicked");
            }
        }
        if let Err(e) = self.inner.write.lock().wal.flush() {
            log::warn!("Failed to flush WAL on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge_operator::StringAppendOperator;
    use tempfile::TempDir;

    fn small_options() -> Options {
        Options::default()
            .memtable_size(4 * 1024)
            .max_background_jobs(1)
    }

    #[test]
    fn test_db_open() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), Options::default());
        assert!(db.is_ok());
        assert!(temp_dir.path().join("CURRENT").exists());
        assert!(temp_dir.path().join("OPTIONS").exists());
    }

    #[test]
    fn test_db_put_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), Options::default()).unwrap();

        db.put(b"key1", b"value1").unwrap();
        db.put(b"key2", b"value2").unwrap();

        assert_eq!(db.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(db.get(b"key2").unwrap(), Some(b"value2".to_vec()));
        assert_eq!(db.get(b"key3").unwrap(), None);
        assert_eq!(db.latest_sequence(), 2);
    }

    #[test]
    fn test_db_delete() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), Options::default()).unwrap();

        db.put(b"key1", b"value1").unwrap();
        db.delete(b"key1").unwrap();
        assert_eq!(db.get(b"key1").unwrap(), None);
    }

    #[test]
    fn test_db_error_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        DB::open(temp_dir.path(), Options::default())
            .unwrap()
            .close()
            .unwrap();

        let result = DB::open(temp_dir.path(), Options::default().error_if_exists(true));
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_db_missing_without_create() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent");
        let result = DB::open(&path, Options::default().create_if_missing(false));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_manual_flush() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), Options::default()).unwrap();
        let cf = db.default_cf();

        for i in 0..100 {
            let key = format!("key{:03}", i);
            db.put(key.as_bytes(), b"value").unwrap();
        }
        db.flush().unwrap();
        assert_eq!(db.num_files_at_level(&cf, 0), 1);
        assert_eq!(db.get(b"key050").unwrap(), Some(b"value".to_vec()));

        // Nothing to flush.
        db.flush().unwrap();
        assert_eq!(db.num_files_at_level(&cf, 0), 1);
    }

    #[test]
    fn test_auto_flush_on_memtable_full() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), small_options()).unwrap();
        let cf = db.default_cf();

        for i in 0..500 {
            let key = format!("key{:05}", i);
            db.put(key.as_bytes(), &[b'v'; 64]).unwrap();
        }
        db.wait_for_background_work().unwrap();
        let tables: usize = (0..7).map(|l| db.num_files_at_level(&cf, l)).sum();
        assert!(tables > 0);
        for i in (0..500).step_by(37) {
            let key = format!("key{:05}", i);
            assert_eq!(db.get(key.as_bytes()).unwrap(), Some(vec![b'v'; 64]));
        }
    }

    #[test]
    fn test_merge_requires_operator() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), Options::default()).unwrap();
        assert!(matches!(
            db.merge(b"k", b"x"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_merge_across_flush() {
        let temp_dir = TempDir::new().unwrap();
        let options =
            Options::default().merge_operator(Arc::new(StringAppendOperator::new(b',')));
        let db = DB::open(temp_dir.path(), options).unwrap();

        db.put(b"k", b"a").unwrap();
        db.merge(b"k", b"b").unwrap();
        db.flush().unwrap();
        db.merge(b"k", b"c").unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"a,b,c".to_vec()));
    }

    #[test]
    fn test_column_family_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), Options::default()).unwrap();

        let users = db
            .create_column_family("users", ColumnFamilyOptions::default())
            .unwrap();
        assert!(matches!(
            db.create_column_family("users", ColumnFamilyOptions::default()),
            Err(Error::AlreadyExists(_))
        ));
        db.put_cf(&users, b"alice", b"1").unwrap();
        db.put(b"alice", b"default").unwrap();
        assert_eq!(db.get_cf(&users, b"alice").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.cf_handle("users"), Some(users.clone()));

        db.drop_column_family(&users).unwrap();
        assert!(matches!(
            db.get_cf(&users, b"alice"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(db.cf_handle("users").is_none());
        assert_eq!(db.get(b"alice").unwrap(), Some(b"default".to_vec()));
        assert!(matches!(
            db.drop_column_family(&db.default_cf()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_close_then_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let db = DB::open(temp_dir.path(), Options::default()).unwrap();
            db.put(b"key1", b"value1").unwrap();
            db.close().unwrap();
        }
        let db = DB::open(temp_dir.path(), Options::default()).unwrap();
        assert_eq!(db.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(db.num_files_at_level(&db.default_cf(), 0), 1);
    }
}
