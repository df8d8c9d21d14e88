//! The write path: group commit, backpressure and memtable switches.
//!
//! A writer queues its batch and takes the write mutex. If another writer
//! already committed the batch on its behalf, it returns; otherwise it
//! becomes the leader and commits everything queued, up to
//! `max_write_group_bytes`, with one WAL flush or sync for the group.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{DbInner, STALL_POLL};
use crate::config::{WalSyncPolicy, WriteOptions};
use crate::error::{Error, Result};
use crate::memtable::{MemTable, ValueType};
use crate::wal::Wal;
use crate::write_batch::WriteBatch;

/// State owned by the commit-group leader.
pub(crate) struct WriteState {
    pub(crate) wal: Wal,
}

/// A batch waiting for a leader to commit it.
pub(crate) struct PendingWrite {
    batch: WriteBatch,
    options: WriteOptions,
    result: Mutex<Option<Result<()>>>,
}

impl DbInner {
    pub(crate) fn write(&self, batch: WriteBatch, options: &WriteOptions) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.check_batch(&batch)?;
        let pending = Arc::new(PendingWrite {
            batch,
            options: *options,
            result: Mutex::new(None),
        });
        self.queue.lock().push_back(Arc::clone(&pending));

        let mut state = self.write.lock();
        loop {
            if let Some(result) = pending.result.lock().take() {
                return result;
            }
            self.commit_group(&mut state);
        }
    }

    /// Rejects batches naming dropped column families, or merging into a
    /// family without a merge operator.
    fn check_batch(&self, batch: &WriteBatch) -> Result<()> {
        let sv = self.super_version();
        for op in batch.iter() {
            let view = sv.cf(op.cf()).ok_or_else(|| {
                Error::invalid_argument(format!("column family {} does not exist", op.cf()))
            })?;
            if op.value_type() == ValueType::Merge && view.options.merge_operator.is_none() {
                return Err(Error::invalid_argument(format!(
                    "column family {:?} has no merge operator",
                    view.handle.name()
                )));
            }
        }
        Ok(())
    }

    /// Commits the writes at the front of the queue and hands each its result.
    fn commit_group(&self, state: &mut WriteState) {
        let group: Vec<Arc<PendingWrite>> = {
            let mut queue = self.queue.lock();
            let mut group = Vec::new();
            let mut bytes = 0;
            while let Some(front) = queue.front() {
                let size = front.batch.approximate_size();
                if !group.is_empty() && bytes + size > self.options.max_write_group_bytes {
                    break;
                }
                bytes += size;
                if let Some(w) = queue.pop_front() {
                    group.push(w);
                }
            }
            group
        };
        if group.is_empty() {
            return;
        }

        let result = self.apply_group(state, &group);
        if let Err(e) = &result {
            log::debug!("Commit group of {} writes failed: {}", group.len(), e);
        }
        for w in &group {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(e.duplicate()),
            };
            *w.result.lock() = Some(r);
        }
    }

    fn apply_group(&self, state: &mut WriteState, group: &[Arc<PendingWrite>]) -> Result<()> {
        if let Some(e) = self.bg_error() {
            return Err(e);
        }
        let families: BTreeSet<u32> = group
            .iter()
            .flat_map(|w| w.batch.iter().map(|op| op.cf()))
            .collect();
        for cf in families {
            self.make_room(state, cf)?;
        }

        let policy = self.options.wal_sync_policy;
        let base = self.last_sequence.load(Ordering::Acquire);
        let mut next = base + 1;
        let mut logged = false;
        let mut sync = policy == WalSyncPolicy::PerBatch;
        for w in group {
            if !w.options.disable_wal {
                let res = state.wal.append(&w.batch, next).and_then(|_| {
                    if policy == WalSyncPolicy::PerWrite {
                        state.wal.sync()
                    } else {
                        Ok(())
                    }
                });
                if let Err(e) = res {
                    self.set_sticky_error(&e);
                    return Err(e);
                }
                logged = true;
                sync |= w.options.sync;
            }
            next += w.batch.len() as u64;
        }
        if logged {
            let res = if sync {
                state.wal.sync()
            } else {
                state.wal.flush()
            };
            if let Err(e) = res {
                self.set_sticky_error(&e);
                return Err(e);
            }
        }

        // A family dropped after the batch was checked loses its records.
        let sv = self.super_version();
        let mut sequence = base;
        for w in group {
            for op in w.batch.iter() {
                sequence += 1;
                if let Some(view) = sv.cf(op.cf()) {
                    view.mem
                        .add(sequence, op.value_type(), op.key(), op.value());
                }
            }
        }
        self.last_sequence.store(sequence, Ordering::Release);
        Ok(())
    }

    /// Makes sure column family `cf` can take more writes, switching to a
    /// fresh memtable when the current one is full.
    ///
    /// Stalls while the family has too many frozen memtables or level 0
    /// files. A sticky error or shutdown ends the stall with an error.
    fn make_room(&self, state: &mut WriteState, cf: u32) -> Result<()> {
        let mut stalled = false;
        loop {
            let sv = self.super_version();
            let Some(view) = sv.cf(cf) else {
                return Ok(());
            };
            let full = view.mem.approximate_size() >= view.options.memtable_size;
            let too_many_imm = full && view.imm.len() >= view.options.max_immutable_memtables;
            let l0_files = sv.version.num_files_at_level(cf, 0);
            let too_many_l0 = l0_files >= view.options.level0_stop_writes_trigger;

            if !too_many_imm && !too_many_l0 {
                if stalled {
                    log::debug!("Writes to column family {} resumed", cf);
                }
                if full {
                    self.switch_memtable(state, cf)?;
                }
                return Ok(());
            }

            if too_many_l0 {
                self.maybe_schedule_compaction(cf);
            }
            let mut bg = self.bg.lock();
            if let Some(e) = &bg.error {
                return Err(e.duplicate());
            }
            if bg.shutting_down {
                return Err(Error::invalid_state("database is shutting down"));
            }
            if !stalled {
                log::info!(
                    "Stalling writes to column family {}: {} frozen memtables, {} level 0 files",
                    cf,
                    view.imm.len(),
                    l0_files
                );
                stalled = true;
            }
            self.bg_cv.wait_for(&mut bg, STALL_POLL);
        }
    }

    /// Freezes the memtable of `cf` and starts a new WAL for the memtable
    /// replacing it. The frozen memtable is queued for flushing.
    pub(crate) fn switch_memtable(&self, state: &mut WriteState, cf: u32) -> Result<()> {
        let number = self.versions.lock().new_file_number();
        let wal = Wal::create(&self.dir, number)?;
        state.wal.flush()?;
        let old = std::mem::replace(&mut state.wal, wal);
        log::debug!(
            "Switched WAL {} -> {} for column family {}",
            old.number(),
            number,
            cf
        );
        drop(old);

        {
            let mut guard = self.super_version.write();
            let mut sv = (**guard).clone();
            for (id, view) in sv.cfs.iter_mut() {
                if *id == cf {
                    let fresh = Arc::new(MemTable::new(
                        Arc::clone(&view.options.comparator),
                        number,
                    ));
                    let frozen = std::mem::replace(&mut view.mem, fresh);
                    view.imm.insert(0, frozen);
                } else if view.mem.is_empty() {
                    // Only the leader inserts, so this memtable stays empty
                    // until it is re-homed.
                    view.mem.set_wal_number(number);
                }
            }
            *guard = Arc::new(sv);
        }
        self.schedule_flush(cf);
        Ok(())
    }

    /// Freezes the memtable of `cf` if it holds anything and, with `wait`,
    /// blocks until every frozen memtable of the family is in a table.
    pub(crate) fn flush_cf(&self, cf: u32, wait: bool) -> Result<()> {
        let targets = {
            let mut state = self.write.lock();
            if let Some(e) = self.bg_error() {
                return Err(e);
            }
            let sv = self.super_version();
            let Some(view) = sv.cf(cf) else {
                return Err(Error::invalid_argument(format!(
                    "column family {} does not exist",
                    cf
                )));
            };
            if view.mem.is_empty() && view.imm.is_empty() {
                return Ok(());
            }
            if !view.mem.is_empty() {
                self.switch_memtable(&mut state, cf)?;
            }
            self.super_version()
                .cf(cf)
                .map(|v| v.imm.clone())
                .unwrap_or_default()
        };
        self.schedule_flush(cf);
        if !wait {
            return Ok(());
        }

        let mut bg = self.bg.lock();
        loop {
            if let Some(e) = &bg.error {
                return Err(e.duplicate());
            }
            let sv = self.super_version();
            let pending = sv.cf(cf).is_some_and(|view| {
                view.imm
                    .iter()
                    .any(|m| targets.iter().any(|t| Arc::ptr_eq(m, t)))
            });
            if !pending {
                return Ok(());
            }
            if bg.shutting_down {
                return Err(Error::invalid_state("database is shutting down"));
            }
            self.bg_cv.wait_for(&mut bg, STALL_POLL);
        }
    }
}
