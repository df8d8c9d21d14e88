//! Background flushes and compactions.
//!
//! A fixed pool of worker threads takes [`Job`]s from a crossbeam
//! channel. Each job re-reads the current state when it starts, so a job
//! that has nothing left to do simply returns.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender};

use super::{BgState, DbInner, STALL_POLL};
use crate::column_family::CfView;
use crate::compaction::{CompactionJob, CompactionPicker, CompactionResult, CompactionTask};
use crate::error::{Error, Result};
use crate::filename::{list_files, FileType};
use crate::memtable::{InternalKeyComparator, MemTable};
use crate::sstable::Table;
use crate::version::{TableFile, Version, VersionEdit};

/// Attempts at flushing one memtable before the failure becomes sticky.
const FLUSH_ATTEMPTS: u32 = 3;

/// Delay before the first flush retry; doubles with every attempt.
const FLUSH_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Work for the background pool.
pub(crate) enum Job {
    /// Flush the frozen memtables of a column family, oldest first.
    Flush(u32),
    /// Run one automatic compaction of a column family, if one is needed.
    Compact(u32),
    /// Compact a key range of a column family down through every level.
    Manual {
        cf: u32,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
        reply: Sender<Result<()>>,
    },
    /// Stop the worker.
    Shutdown,
}

pub(crate) fn worker_loop(inner: Arc<DbInner>, jobs: Receiver<Job>) {
    log::debug!("Background worker started");
    while let Ok(job) = jobs.recv() {
        match job {
            Job::Shutdown => break,
            Job::Flush(cf) => inner.run_flush(cf),
            Job::Compact(cf) => inner.run_compaction(cf),
            Job::Manual {
                cf,
                start,
                end,
                reply,
            } => {
                let result = inner.run_manual_compaction(cf, start.as_deref(), end.as_deref());
                let _ = reply.send(result);
            }
        }
        inner.finish_job();
    }
    log::debug!("Background worker stopped");
}

impl DbInner {
    fn send_job(&self, bg: &mut BgState, job: Job) -> Result<()> {
        bg.scheduled += 1;
        if self.jobs.send(job).is_err() {
            bg.scheduled -= 1;
            return Err(Error::invalid_state("background workers stopped"));
        }
        Ok(())
    }

    pub(crate) fn schedule_job(&self, job: Job) -> Result<()> {
        let mut bg = self.bg.lock();
        if bg.shutting_down {
            return Err(Error::invalid_state("database is shutting down"));
        }
        self.send_job(&mut bg, job)
    }

    fn finish_job(&self) {
        let mut bg = self.bg.lock();
        bg.scheduled = bg.scheduled.saturating_sub(1);
        self.bg_cv.notify_all();
    }

    /// Queues a flush of `cf` unless one is already queued or running.
    pub(crate) fn schedule_flush(&self, cf: u32) {
        let mut bg = self.bg.lock();
        if bg.shutting_down || bg.error.is_some() || !bg.flushing.insert(cf) {
            return;
        }
        if let Err(e) = self.send_job(&mut bg, Job::Flush(cf)) {
            bg.flushing.remove(&cf);
            log::warn!("Could not schedule flush of column family {}: {}", cf, e);
        }
    }

    /// Queues a compaction of `cf` if a level is over its target and the
    /// family has a compaction slot left.
    pub(crate) fn maybe_schedule_compaction(&self, cf: u32) {
        let sv = self.super_version();
        let (Some(view), Some(levels)) = (sv.cf(cf), sv.version.cf(cf)) else {
            return;
        };
        if !CompactionPicker::new(cf, &view.options, &view.icmp).needs_compaction(levels) {
            return;
        }
        let mut bg = self.bg.lock();
        let running = bg.running_compactions.get(&cf).copied().unwrap_or(0);
        if bg.shutting_down
            || bg.error.is_some()
            || running >= self.options.max_compactions_per_cf
            || !bg.compaction_queued.insert(cf)
        {
            return;
        }
        if let Err(e) = self.send_job(&mut bg, Job::Compact(cf)) {
            bg.compaction_queued.remove(&cf);
            log::warn!("Could not schedule compaction of column family {}: {}", cf, e);
        }
    }

    fn run_flush(&self, cf: u32) {
        let mut attempt = 0;
        loop {
            if self.bg.lock().shutting_down {
                break;
            }
            match self.flush_oldest(cf) {
                Ok(true) => attempt = 0,
                Ok(false) => break,
                Err(e) => {
                    attempt += 1;
                    log::warn!(
                        "Flush of column family {} failed (attempt {}/{}): {}",
                        cf,
                        attempt,
                        FLUSH_ATTEMPTS,
                        e
                    );
                    if attempt >= FLUSH_ATTEMPTS {
                        let err = Error::Background(format!(
                            "flush of column family {} failed: {}",
                            cf, e
                        ));
                        self.set_sticky_error(&err);
                        self.report_error(err);
                        break;
                    }
                    thread::sleep(FLUSH_RETRY_BACKOFF * 2u32.pow(attempt - 1));
                }
            }
        }

        {
            let mut bg = self.bg.lock();
            bg.flushing.remove(&cf);
            self.bg_cv.notify_all();
        }
        // A memtable frozen while this job was finishing found it still
        // marked as flushing.
        if self
            .super_version()
            .cf(cf)
            .is_some_and(|view| !view.imm.is_empty())
        {
            self.schedule_flush(cf);
        }
        self.maybe_schedule_compaction(cf);
    }

    /// Writes the oldest frozen memtable of `cf` to level 0. Returns false
    /// when there was nothing to flush.
    fn flush_oldest(&self, cf: u32) -> Result<bool> {
        let sv = self.super_version();
        let Some(view) = sv.cf(cf) else {
            return Ok(false);
        };
        let Some(mem) = view.imm.last().cloned() else {
            return Ok(false);
        };
        // The next oldest memtable decides which logs are still needed.
        let log_number = view
            .imm
            .iter()
            .rev()
            .nth(1)
            .map_or_else(|| view.mem.wal_number(), |m| m.wal_number());

        let job = CompactionJob::for_flush(&self.dir, &view.options, self.snapshots.sequences());
        let mut input = mem.iter();
        let result = job.run(&mut input, &mut || self.versions.lock().new_file_number())?;
        let added = match self.open_outputs(&result, &view.icmp) {
            Ok(added) => added,
            Err(e) => {
                result.discard();
                return Err(e);
            }
        };

        let mut edit = VersionEdit::new();
        for file in &added {
            edit.add_file(cf, 0, file.meta.clone());
        }
        edit.set_log_number(cf, log_number);
        edit.set_last_sequence(self.last_sequence.load(Ordering::Acquire));
        match self.install(cf, edit, &added, Some(&mem)) {
            Ok(true) => {}
            Ok(false) => {
                drop(added);
                result.discard();
                return Ok(false);
            }
            Err(e) => {
                drop(added);
                result.discard();
                return Err(e);
            }
        }

        log::info!(
            "Flushed {} records of column family {} to level 0 ({} bytes)",
            mem.len(),
            cf,
            result.stats.output_bytes
        );
        self.delete_obsolete_wals();
        Ok(true)
    }

    fn open_outputs(
        &self,
        result: &CompactionResult,
        icmp: &InternalKeyComparator,
    ) -> Result<Vec<Arc<TableFile>>> {
        result
            .outputs
            .iter()
            .map(|output| {
                let table = Table::open(
                    &output.path,
                    output.meta.number,
                    icmp.clone(),
                    self.cache.clone(),
                )?;
                Ok(Arc::new(TableFile::new(
                    output.meta.clone(),
                    Arc::new(table),
                    self.cache.clone(),
                )))
            })
            .collect()
    }

    /// Logs `edit` and publishes the new version, retiring `flushed` from
    /// the frozen memtables. Returns false if `cf` was dropped meanwhile.
    fn install(
        &self,
        cf: u32,
        edit: VersionEdit,
        added: &[Arc<TableFile>],
        flushed: Option<&Arc<MemTable>>,
    ) -> Result<bool> {
        let mut versions = self.versions.lock();
        if versions.family(cf).is_none() {
            return Ok(false);
        }
        let version = versions.log_and_apply(edit, added)?;
        {
            let mut guard = self.super_version.write();
            let mut sv = guard.with_version(version);
            if let (Some(mem), Some(view)) = (flushed, sv.cfs.get_mut(&cf)) {
                view.imm.retain(|m| !Arc::ptr_eq(m, mem));
            }
            *guard = Arc::new(sv);
        }
        let _bg = self.bg.lock();
        self.bg_cv.notify_all();
        Ok(true)
    }

    /// Removes logs that no memtable depends on.
    fn delete_obsolete_wals(&self) {
        let Some(min) = self.super_version().min_wal_number() else {
            return;
        };
        let files = match list_files(&self.dir) {
            Ok(files) => files,
            Err(e) => {
                log::warn!("Failed to list {}: {}", self.dir.display(), e);
                return;
            }
        };
        for (kind, path) in files {
            if let FileType::Wal(n) = kind {
                if n < min {
                    match std::fs::remove_file(&path) {
                        Ok(()) => log::debug!("Deleted obsolete WAL {}", path.display()),
                        Err(e) => {
                            log::warn!("Failed to delete WAL {}: {}", path.display(), e)
                        }
                    }
                }
            }
        }
    }

    fn run_compaction(&self, cf: u32) {
        let Some((task, view, version)) = self.pick_compaction(cf) else {
            return;
        };
        // Another slot may find work that does not overlap this task.
        self.maybe_schedule_compaction(cf);

        let result = self.execute_compaction(&task, &view, &version);
        self.release_compaction(&task);
        match result {
            Ok(()) => self.maybe_schedule_compaction(cf),
            Err(e) => {
                log::error!(
                    "Compaction of column family {} level {} failed: {}",
                    cf,
                    task.level,
                    e
                );
                self.report_error(Error::Background(format!(
                    "compaction of column family {} level {} failed: {}",
                    cf, task.level, e
                )));
            }
        }
    }

    /// Picks and reserves the next automatic compaction of `cf`.
    fn pick_compaction(&self, cf: u32) -> Option<(CompactionTask, CfView, Arc<Version>)> {
        let versions = self.versions.lock();
        let mut bg = self.bg.lock();
        bg.compaction_queued.remove(&cf);
        let running = bg.running_compactions.get(&cf).copied().unwrap_or(0);
        if bg.shutting_down
            || bg.error.is_some()
            || running >= self.options.max_compactions_per_cf
        {
            return None;
        }

        let version = versions.current();
        let view = self.super_version().cf(cf)?.clone();
        let levels = version.cf(cf)?;
        let task = CompactionPicker::new(cf, &view.options, &view.icmp)
            .pick_compaction(levels, &bg.being_compacted)?;
        bg.being_compacted.extend(task.input_numbers());
        *bg.running_compactions.entry(cf).or_insert(0) += 1;
        drop(bg);
        drop(versions);
        Some((task, view, version))
    }

    fn release_compaction(&self, task: &CompactionTask) {
        let mut bg = self.bg.lock();
        for number in task.input_numbers() {
            bg.being_compacted.remove(&number);
        }
        if let Some(running) = bg.running_compactions.get_mut(&task.cf) {
            *running = running.saturating_sub(1);
        }
        self.bg_cv.notify_all();
    }

    /// Runs a reserved task and installs its result.
    fn execute_compaction(
        &self,
        task: &CompactionTask,
        view: &CfView,
        version: &Version,
    ) -> Result<()> {
        let cf = task.cf;
        if task.is_trivial_move() {
            let file = &task.inputs[0];
            let mut edit = VersionEdit::new();
            edit.delete_file(cf, task.level, file.number());
            edit.add_file(cf, task.output_level, file.meta.clone());
            if self.install(cf, edit, &[], None)? {
                log::info!(
                    "Moved table {} of column family {} from level {} to level {}",
                    file.number(),
                    cf,
                    task.level,
                    task.output_level
                );
            }
            return Ok(());
        }

        let Some(levels) = version.cf(cf) else {
            return Ok(());
        };
        let job = CompactionJob::new(
            &self.dir,
            task,
            &view.options,
            levels,
            self.snapshots.sequences(),
        );
        let mut input = CompactionJob::input_iterator(task, &view.icmp);
        let result = job.run(&mut input, &mut || self.versions.lock().new_file_number())?;
        let added = match self.open_outputs(&result, &view.icmp) {
            Ok(added) => added,
            Err(e) => {
                result.discard();
                return Err(e);
            }
        };

        let mut edit = VersionEdit::new();
        for file in &task.inputs {
            edit.delete_file(cf, task.level, file.number());
        }
        for file in &task.output_inputs {
            edit.delete_file(cf, task.output_level, file.number());
        }
        for file in &added {
            edit.add_file(cf, task.output_level, file.meta.clone());
        }
        match self.install(cf, edit, &added, None) {
            Ok(true) => {}
            Ok(false) => {
                drop(added);
                result.discard();
                return Ok(());
            }
            Err(e) => {
                drop(added);
                result.discard();
                return Err(e);
            }
        }

        log::info!(
            "Compacted column family {} level {} -> {}: {} files ({} bytes) into {} files ({} bytes), {} -> {} records",
            cf,
            task.level,
            task.output_level,
            task.inputs.len() + task.output_inputs.len(),
            task.input_bytes(),
            added.len(),
            result.stats.output_bytes,
            result.stats.input_records,
            result.stats.output_records
        );
        Ok(())
    }

    /// Pushes `[start, end]` of `cf` down from level 0 through the deepest
    /// level holding data.
    fn run_manual_compaction(
        &self,
        cf: u32,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        let sv = self.super_version();
        let view = sv.cf(cf).cloned().ok_or_else(|| {
            Error::invalid_argument(format!("column family {} does not exist", cf))
        })?;
        let deepest = sv
            .version
            .cf(cf)
            .and_then(|levels| levels.deepest_non_empty_level())
            .unwrap_or(0);
        let last_source = (deepest + 1).min(view.options.num_levels - 1);
        drop(sv);

        for level in 0..last_source {
            let Some((task, version)) = self.reserve_range(cf, &view, level, start, end)? else {
                continue;
            };
            let result = self.execute_compaction(&task, &view, &version);
            self.release_compaction(&task);
            result?;
        }
        log::info!("Manual compaction of column family {} finished", cf);
        self.maybe_schedule_compaction(cf);
        Ok(())
    }

    /// Picks the files of `level` in the range and reserves them, waiting
    /// for running compactions that hold any of them.
    fn reserve_range(
        &self,
        cf: u32,
        view: &CfView,
        level: usize,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<Option<(CompactionTask, Arc<Version>)>> {
        let picker = CompactionPicker::new(cf, &view.options, &view.icmp);
        loop {
            let versions = self.versions.lock();
            let version = versions.current();
            let mut bg = self.bg.lock();
            if bg.shutting_down {
                return Err(Error::invalid_state("database is shutting down"));
            }
            let levels = version.cf(cf).ok_or_else(|| {
                Error::invalid_argument(format!("column family {} was dropped", cf))
            })?;
            let Some(task) = picker.pick_range(levels, level, start, end) else {
                return Ok(None);
            };
            if task
                .all_inputs()
                .any(|f| bg.being_compacted.contains(&f.number()))
            {
                drop(versions);
                self.bg_cv.wait_for(&mut bg, STALL_POLL);
                continue;
            }
            bg.being_compacted.extend(task.input_numbers());
            *bg.running_compactions.entry(cf).or_insert(0) += 1;
            return Ok(Some((task, Arc::clone(&version))));
        }
    }
}
