//! Compaction module for managing SSTable compaction.
//!
//! This module implements the compaction process that merges multiple SSTables
//! into new ones one level down, removing deleted entries and versions no
//! reader can see any more.
//!
//! ## Compaction Strategy
//!
//! We use Leveled Compaction inspired by RocksDB:
//! - Level 0: New SSTables from flush (may overlap)
//! - Level 1+: Non-overlapping SSTables
//! - Each level has a size threshold
//!
//! ## Compaction Triggers
//!
//! - Level 0: When number of files >= `level0_compaction_trigger`
//! - Level N: When total size >= `base_level_size * multiplier^(N-1)`
//!
//! ## Process
//!
//! 1. Pick files for compaction (picker.rs)
//! 2. Merge the inputs with a k-way merging iterator
//! 3. Collapse each key's versions against live snapshots (merge.rs)
//! 4. Write new SSTables, cut at `target_file_size`
//! 5. Install a version edit; old files go once unreferenced
//!
//! Flushes reuse the same writer with level 0 as the output.

pub mod merge;
pub mod picker;

pub use merge::{collapse_versions, stripe_of};
pub use picker::{CompactionPicker, CompactionTask};

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ColumnFamilyOptions;
use crate::error::Result;
use crate::filename::table_path;
use crate::iterator::{InternalIterator, LevelIterator, MergingIterator};
use crate::memtable::{extract_user_key, InternalKeyComparator, Record};
use crate::merge_operator::MergeOperator;
use crate::sstable::{TableBuilder, TableBuilderOptions};
use crate::version::{FileMetaData, LevelFiles, TableFile};

/// A table written by a job.
#[derive(Debug, Clone)]
pub struct CompactionOutput {
    /// Metadata to record in the manifest
    pub meta: FileMetaData,
    /// Where the table was written
    pub path: PathBuf,
}

/// Counters of one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Records read
    pub input_records: u64,
    /// Records written
    pub output_records: u64,
    /// Bytes written
    pub output_bytes: u64,
}

/// Result of a compaction operation
#[derive(Debug, Default)]
pub struct CompactionResult {
    /// Tables written, in key order
    pub outputs: Vec<CompactionOutput>,
    /// Job counters
    pub stats: CompactionStats,
}

impl CompactionResult {
    /// Deletes every output table; used when the job cannot be installed.
    pub fn discard(&self) {
        remove_outputs(&self.outputs);
    }
}

fn remove_outputs(outputs: &[CompactionOutput]) {
    for output in outputs {
        if let Err(e) = fs::remove_file(&output.path) {
            log::warn!("Failed to remove {}: {}", output.path.display(), e);
        }
    }
}

/// Compaction job that executes the compaction process
pub struct CompactionJob {
    dir: PathBuf,
    output_level: usize,
    icmp: InternalKeyComparator,
    table_options: TableBuilderOptions,
    target_file_size: u64,
    snapshots: Vec<u64>,
    merge_operator: Option<Arc<dyn MergeOperator>>,
    /// Levels below the output, to decide whether a key is at its bottom
    deeper: Vec<Vec<Arc<TableFile>>>,
    may_reach_bottom: bool,
}

impl CompactionJob {
    /// Prepares a job for `task` over the column family's current `levels`.
    ///
    /// `snapshots` are the live snapshot sequences, ascending.
    pub fn new(
        dir: &Path,
        task: &CompactionTask,
        options: &ColumnFamilyOptions,
        levels: &LevelFiles,
        snapshots: Vec<u64>,
    ) -> Self {
        let deeper = (task.output_level + 1..levels.num_levels())
            .map(|level| levels.files(level).to_vec())
            .collect();
        Self {
            dir: dir.to_path_buf(),
            output_level: task.output_level,
            icmp: InternalKeyComparator::new(Arc::clone(&options.comparator)),
            table_options: TableBuilderOptions::from_cf(options, task.output_level),
            target_file_size: options.target_file_size,
            snapshots,
            merge_operator: options.merge_operator.clone(),
            deeper,
            may_reach_bottom: true,
        }
    }

    /// Prepares a memtable flush into one level 0 table.
    pub fn for_flush(dir: &Path, options: &ColumnFamilyOptions, snapshots: Vec<u64>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            output_level: 0,
            icmp: InternalKeyComparator::new(Arc::clone(&options.comparator)),
            table_options: TableBuilderOptions::from_cf(options, 0),
            target_file_size: u64::MAX,
            snapshots,
            merge_operator: options.merge_operator.clone(),
            deeper: Vec::new(),
            may_reach_bottom: false,
        }
    }

    /// Merged view of every input of `task`.
    pub fn input_iterator(task: &CompactionTask, icmp: &InternalKeyComparator) -> MergingIterator {
        let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
        if task.level == 0 {
            for file in &task.inputs {
                children.push(Box::new(file.table().iter(false)));
            }
        } else {
            children.push(Box::new(LevelIterator::new(
                task.inputs.clone(),
                icmp.clone(),
                false,
            )));
        }
        if !task.output_inputs.is_empty() {
            children.push(Box::new(LevelIterator::new(
                task.output_inputs.clone(),
                icmp.clone(),
                false,
            )));
        }
        MergingIterator::new(children, icmp.clone())
    }

    /// Whether no level below the output holds `user_key`.
    fn is_bottommost(&self, user_key: &[u8]) -> bool {
        self.may_reach_bottom
            && self.deeper.iter().all(|files| {
                let idx = files.partition_point(|f| {
                    self.icmp.compare_user(f.meta.largest_user_key(), user_key) == Ordering::Less
                });
                files
                    .get(idx)
                    .map_or(true, |f| !f.contains_key(&self.icmp, user_key))
            })
    }

    /// Execute the compaction
    ///
    /// This will:
    /// 1. Walk `input` (positioned or not) in internal key order
    /// 2. Collapse the versions of each user key
    /// 3. Write survivors to new tables numbered by `next_file_number`
    ///
    /// On error every table written so far is removed.
    pub fn run(
        &self,
        input: &mut dyn InternalIterator,
        next_file_number: &mut dyn FnMut() -> u64,
    ) -> Result<CompactionResult> {
        let mut state = OutputState {
            job: self,
            builder: None,
            result: CompactionResult::default(),
        };
        match state.drain(input, next_file_number) {
            Ok(()) => Ok(state.result),
            Err(e) => {
                if let Some((_, builder)) = state.builder.take() {
                    if let Err(abandon_err) = builder.abandon() {
                        log::warn!("Failed to abandon compaction output: {}", abandon_err);
                    }
                }
                state.result.discard();
                Err(e)
            }
        }
    }
}

struct OutputState<'a> {
    job: &'a CompactionJob,
    builder: Option<(u64, TableBuilder)>,
    result: CompactionResult,
}

impl OutputState<'_> {
    fn drain(
        &mut self,
        input: &mut dyn InternalIterator,
        next_file_number: &mut dyn FnMut() -> u64,
    ) -> Result<()> {
        let job = self.job;
        let icmp = &job.icmp;
        input.seek_to_first()?;
        let mut versions: Vec<Record> = Vec::new();
        while input.valid() {
            self.result.stats.input_records += 1;
            let user_key = extract_user_key(input.key());
            if let Some(last) = versions.last() {
                if icmp.compare_user(&last.key, user_key) != Ordering::Equal {
                    let group = std::mem::take(&mut versions);
                    self.write_key(group, next_file_number)?;
                }
            }
            versions.push(Record::from_encoded(input.key(), input.value())?);
            input.next()?;
        }
        if !versions.is_empty() {
            self.write_key(versions, next_file_number)?;
        }
        self.finish_output()
    }

    fn write_key(
        &mut self,
        versions: Vec<Record>,
        next_file_number: &mut dyn FnMut() -> u64,
    ) -> Result<()> {
        let bottommost = self.job.is_bottommost(&versions[0].key);
        let survivors = collapse_versions(
            versions,
            &self.job.snapshots,
            bottommost,
            self.job.merge_operator.as_deref(),
        )?;
        if survivors.is_empty() {
            return Ok(());
        }
        // Outputs are cut only between user keys.
        if self
            .builder
            .as_ref()
            .is_some_and(|(_, b)| b.file_size() >= self.job.target_file_size)
        {
            self.finish_output()?;
        }
        if self.builder.is_none() {
            let number = next_file_number();
            let path = table_path(&self.job.dir, number);
            let builder = TableBuilder::new(
                &path,
                self.job.icmp.clone(),
                self.job.table_options,
            )?;
            self.builder = Some((number, builder));
        }
        if let Some((_, builder)) = self.builder.as_mut() {
            for record in &survivors {
                builder.add_record(record)?;
                self.result.stats.output_records += 1;
            }
        }
        Ok(())
    }

    fn finish_output(&mut self) -> Result<()> {
        let Some((number, builder)) = self.builder.take() else {
            return Ok(());
        };
        let path = builder.path().to_path_buf();
        match builder.finish() {
            Ok((size, props)) => {
                self.result.stats.output_bytes += size;
                self.result.outputs.push(CompactionOutput {
                    meta: FileMetaData::from_properties(number, size, &props),
                    path,
                });
                log::debug!(
                    "Wrote level {} table {} ({} bytes)",
                    self.job.output_level,
                    number,
                    size
                );
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }
}
