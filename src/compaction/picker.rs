//! Compaction file picker.
//!
//! This module selects which files should be compacted based on the
//! Leveled Compaction strategy. Files reserved by a running compaction are
//! never handed out twice.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::ColumnFamilyOptions;
use crate::memtable::InternalKeyComparator;
use crate::version::{LevelFiles, TableFile};

/// A compaction task selected by the picker
#[derive(Debug, Clone)]
pub struct CompactionTask {
    /// Column family id
    pub cf: u32,
    /// Source level
    pub level: usize,
    /// Target level (level + 1)
    pub output_level: usize,
    /// Input files from the source level
    pub inputs: Vec<Arc<TableFile>>,
    /// Overlapping files from the target level
    pub output_inputs: Vec<Arc<TableFile>>,
    /// Requested through `compact_range`
    pub manual: bool,
}

impl CompactionTask {
    /// Every input file, source level first.
    pub fn all_inputs(&self) -> impl Iterator<Item = &Arc<TableFile>> {
        self.inputs.iter().chain(self.output_inputs.iter())
    }

    /// Numbers of every input file.
    pub fn input_numbers(&self) -> Vec<u64> {
        self.all_inputs().map(|f| f.number()).collect()
    }

    /// Total input bytes.
    pub fn input_bytes(&self) -> u64 {
        self.all_inputs().map(|f| f.meta.file_size).sum()
    }

    /// A single file with nothing to merge against can change level by
    /// an edit alone.
    pub fn is_trivial_move(&self) -> bool {
        !self.manual && self.inputs.len() == 1 && self.output_inputs.is_empty()
    }
}

/// Picker for selecting files to compact
pub struct CompactionPicker<'a> {
    cf: u32,
    options: &'a ColumnFamilyOptions,
    icmp: &'a InternalKeyComparator,
}

impl<'a> CompactionPicker<'a> {
    /// Create a new compaction picker for column family `cf`
    pub fn new(cf: u32, options: &'a ColumnFamilyOptions, icmp: &'a InternalKeyComparator) -> Self {
        Self { cf, options, icmp }
    }

    /// Score of every source level; `>= 1` means the level needs compaction.
    ///
    /// The last level is never a source.
    pub fn scores(&self, levels: &LevelFiles) -> Vec<(usize, f64)> {
        let last = self.options.num_levels - 1;
        (0..last)
            .map(|level| {
                let score = if level == 0 {
                    levels.files(0).len() as f64 / self.options.level0_compaction_trigger as f64
                } else {
                    levels.level_bytes(level) as f64
                        / self.options.max_bytes_for_level(level) as f64
                };
                (level, score)
            })
            .collect()
    }

    /// Whether any level has a score of at least 1.
    pub fn needs_compaction(&self, levels: &LevelFiles) -> bool {
        self.scores(levels).iter().any(|(_, s)| *s >= 1.0)
    }

    /// Pick files for compaction
    ///
    /// Levels are tried from the highest score down. Returns None if no
    /// level needs compaction or every candidate is reserved.
    pub fn pick_compaction(
        &self,
        levels: &LevelFiles,
        busy: &HashSet<u64>,
    ) -> Option<CompactionTask> {
        let mut scores: Vec<(usize, f64)> = self
            .scores(levels)
            .into_iter()
            .filter(|(_, s)| *s >= 1.0)
            .collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (level, score) in scores {
            let task = if level == 0 {
                self.pick_level0_compaction(levels, busy)
            } else {
                self.pick_level_compaction(levels, level, busy)
            };
            if let Some(task) = task {
                log::debug!(
                    "Picked level {} compaction for column family {} (score {:.2}): {} + {} files",
                    level,
                    self.cf,
                    score,
                    task.inputs.len(),
                    task.output_inputs.len()
                );
                return Some(task);
            }
        }
        None
    }

    /// Pick files for Level 0 compaction
    ///
    /// Level 0 files may overlap, so all of them go down together with the
    /// overlapping Level 1 files. Only one Level 0 compaction runs at a time.
    fn pick_level0_compaction(
        &self,
        levels: &LevelFiles,
        busy: &HashSet<u64>,
    ) -> Option<CompactionTask> {
        let inputs = levels.files(0).to_vec();
        if inputs.is_empty() || inputs.iter().any(|f| busy.contains(&f.number())) {
            return None;
        }
        let (start, end) = self.user_key_range(&inputs);
        let output_inputs = levels.overlapping(self.icmp, 1, Some(&start), Some(&end));
        if output_inputs.iter().any(|f| busy.contains(&f.number())) {
            return None;
        }
        Some(CompactionTask {
            cf: self.cf,
            level: 0,
            output_level: 1,
            inputs,
            output_inputs,
            manual: false,
        })
    }

    /// Pick files for Level N compaction (N >= 1)
    ///
    /// Files at Level N don't overlap, so the oldest eligible file goes
    /// down on its own.
    fn pick_level_compaction(
        &self,
        levels: &LevelFiles,
        level: usize,
        busy: &HashSet<u64>,
    ) -> Option<CompactionTask> {
        let mut candidates: Vec<&Arc<TableFile>> = levels
            .files(level)
            .iter()
            .filter(|f| !busy.contains(&f.number()))
            .collect();
        candidates.sort_by_key(|f| f.number());

        candidates.into_iter().find_map(|file| {
            let output_inputs = levels.overlapping(
                self.icmp,
                level + 1,
                Some(file.meta.smallest_user_key()),
                Some(file.meta.largest_user_key()),
            );
            if output_inputs.iter().any(|f| busy.contains(&f.number())) {
                return None;
            }
            Some(CompactionTask {
                cf: self.cf,
                level,
                output_level: level + 1,
                inputs: vec![Arc::clone(file)],
                output_inputs,
                manual: false,
            })
        })
    }

    /// Files of `level` overlapping `[start, end]` and what they overlap
    /// one level down, for a manual compaction. None if the range holds
    /// nothing at `level`.
    pub fn pick_range(
        &self,
        levels: &LevelFiles,
        level: usize,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Option<CompactionTask> {
        let mut inputs = levels.overlapping(self.icmp, level, start, end);
        if inputs.is_empty() {
            return None;
        }
        if level == 0 {
            // Level 0 files overlapping the inputs must go down with them,
            // or an older version could end up above a newer one.
            loop {
                let (lo, hi) = self.user_key_range(&inputs);
                let grown = levels.overlapping(self.icmp, 0, Some(&lo), Some(&hi));
                if grown.len() == inputs.len() {
                    break;
                }
                inputs = grown;
            }
        }
        let (lo, hi) = self.user_key_range(&inputs);
        let output_inputs = levels.overlapping(self.icmp, level + 1, Some(&lo), Some(&hi));
        Some(CompactionTask {
            cf: self.cf,
            level,
            output_level: level + 1,
            inputs,
            output_inputs,
            manual: true,
        })
    }

    /// Smallest and largest user key across `files`.
    fn user_key_range(&self, files: &[Arc<TableFile>]) -> (Vec<u8>, Vec<u8>) {
        let mut lo: &[u8] = files[0].meta.smallest_user_key();
        let mut hi: &[u8] = files[0].meta.largest_user_key();
        for f in &files[1..] {
            if self.icmp.compare_user(f.meta.smallest_user_key(), lo).is_lt() {
                lo = f.meta.smallest_user_key();
            }
            if self.icmp.compare_user(f.meta.largest_user_key(), hi).is_gt() {
                hi = f.meta.largest_user_key();
            }
        }
        (lo.to_vec(), hi.to_vec())
    }
}
