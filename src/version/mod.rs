//! Versions: immutable snapshots of the table files of every column family.
//!
//! A [`Version`] is shared as `Arc<Version>`; every reader, iterator and
//! compaction clones the `Arc` it started from, so a version stays intact
//! for as long as anyone uses it. Installing a new version goes through
//! [`VersionSet::log_and_apply`], which records the edit in the manifest
//! before the new version becomes current.

pub mod edit;
pub mod manifest;
mod set;

pub use edit::{VersionChange, VersionEdit};
pub use set::{FamilyRecord, ManifestState, VersionSet};

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::BlockCache;
use crate::error::{Error, Result};
use crate::memtable::{extract_user_key, InternalKeyComparator};
use crate::sstable::{Table, TableProperties};

/// Metadata of one table file, as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetaData {
    /// File number
    pub number: u64,
    /// Size of the file in bytes
    pub file_size: u64,
    /// Smallest internal key
    pub smallest: Vec<u8>,
    /// Largest internal key
    pub largest: Vec<u8>,
    /// Number of records
    pub num_entries: u64,
    /// Lowest sequence number in the file
    pub smallest_sequence: u64,
    /// Highest sequence number in the file
    pub largest_sequence: u64,
}

impl FileMetaData {
    /// Builds the metadata of a freshly written table.
    pub fn from_properties(number: u64, file_size: u64, props: &TableProperties) -> Self {
        Self {
            number,
            file_size,
            smallest: props.smallest_key.clone(),
            largest: props.largest_key.clone(),
            num_entries: props.num_entries,
            smallest_sequence: props.smallest_sequence,
            largest_sequence: props.largest_sequence,
        }
    }

    /// Smallest user key.
    pub fn smallest_user_key(&self) -> &[u8] {
        extract_user_key(&self.smallest)
    }

    /// Largest user key.
    pub fn largest_user_key(&self) -> &[u8] {
        extract_user_key(&self.largest)
    }
}

/// A live table: its metadata plus the open reader.
///
/// Once a compaction removes the file from the current version it is
/// marked obsolete; the file is deleted when the last `Arc` drops.
pub struct TableFile {
    /// Manifest metadata
    pub meta: FileMetaData,
    table: Arc<Table>,
    cache: Option<Arc<BlockCache>>,
    obsolete: AtomicBool,
}

impl TableFile {
    /// Wraps an opened table.
    pub fn new(meta: FileMetaData, table: Arc<Table>, cache: Option<Arc<BlockCache>>) -> Self {
        Self {
            meta,
            table,
            cache,
            obsolete: AtomicBool::new(false),
        }
    }

    /// The table reader.
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// File number.
    pub fn number(&self) -> u64 {
        self.meta.number
    }

    /// Schedules the file for deletion once unreferenced.
    pub(crate) fn mark_obsolete(&self) {
        self.obsolete.store(true, AtomicOrdering::Release);
    }

    /// Whether the file has left the current version.
    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(AtomicOrdering::Acquire)
    }

    /// Whether the user-key range of this file intersects `[start, end]`.
    /// `None` bounds are unbounded.
    pub fn overlaps(
        &self,
        icmp: &InternalKeyComparator,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> bool {
        let before_start = start
            .is_some_and(|s| icmp.compare_user(self.meta.largest_user_key(), s) == Ordering::Less);
        let after_end = end.is_some_and(|e| {
            icmp.compare_user(self.meta.smallest_user_key(), e) == Ordering::Greater
        });
        !before_start && !after_end
    }

    /// Whether `user_key` falls inside this file's key range.
    pub fn contains_key(&self, icmp: &InternalKeyComparator, user_key: &[u8]) -> bool {
        self.overlaps(icmp, Some(user_key), Some(user_key))
    }
}

impl Drop for TableFile {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        if let Some(cache) = &self.cache {
            cache.erase_file(self.meta.number);
        }
        let path = self.table.path();
        match fs::remove_file(path) {
            Ok(()) => log::debug!("Deleted obsolete table {}", path.display()),
            Err(e) => log::warn!("Failed to delete obsolete table {}: {}", path.display(), e),
        }
    }
}

impl fmt::Debug for TableFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableFile")
            .field("meta", &self.meta)
            .field("obsolete", &self.is_obsolete())
            .finish()
    }
}

/// The levels of one column family.
///
/// Level 0 is ordered newest first and may overlap. Levels `>= 1` are
/// ordered by smallest key and never overlap.
#[derive(Debug, Clone, Default)]
pub struct LevelFiles {
    levels: Vec<Vec<Arc<TableFile>>>,
}

impl LevelFiles {
    /// Empty levels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Levels from already-opened files, sorted into level order.
    pub(crate) fn from_levels(levels: Vec<Vec<Arc<TableFile>>>) -> Self {
        let mut files = Self { levels };
        files.sort_levels();
        files
    }

    /// Number of levels holding or having held files.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Files of `level`.
    pub fn files(&self, level: usize) -> &[Arc<TableFile>] {
        self.levels.get(level).map_or(&[][..], |l| l.as_slice())
    }

    /// Total bytes stored at `level`.
    pub fn level_bytes(&self, level: usize) -> u64 {
        self.files(level).iter().map(|f| f.meta.file_size).sum()
    }

    /// Total file count.
    pub fn num_files(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Deepest level holding a file.
    pub fn deepest_non_empty_level(&self) -> Option<usize> {
        self.levels.iter().rposition(|l| !l.is_empty())
    }

    /// Iterates every file with its level.
    pub fn all_files(&self) -> impl Iterator<Item = (usize, &Arc<TableFile>)> {
        self.levels
            .iter()
            .enumerate()
            .flat_map(|(level, files)| files.iter().map(move |f| (level, f)))
    }

    /// Files of `level` whose user-key range intersects `[start, end]`.
    pub fn overlapping(
        &self,
        icmp: &InternalKeyComparator,
        level: usize,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<Arc<TableFile>> {
        self.files(level)
            .iter()
            .filter(|f| f.overlaps(icmp, start, end))
            .cloned()
            .collect()
    }

    /// File of level `>= 1` that may hold `user_key`.
    pub fn find_in_level(
        &self,
        icmp: &InternalKeyComparator,
        level: usize,
        user_key: &[u8],
    ) -> Option<&Arc<TableFile>> {
        let files = self.files(level);
        let idx = files.partition_point(|f| {
            icmp.compare_user(f.meta.largest_user_key(), user_key) == Ordering::Less
        });
        files.get(idx).filter(|f| {
            icmp.compare_user(f.meta.smallest_user_key(), user_key) != Ordering::Greater
        })
    }

    fn find(&self, number: u64) -> Option<&Arc<TableFile>> {
        self.all_files().map(|(_, f)| f).find(|f| f.number() == number)
    }

    fn level_mut(&mut self, level: usize) -> &mut Vec<Arc<TableFile>> {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, Vec::new);
        }
        &mut self.levels[level]
    }

    fn sort_levels(&mut self) {
        for (level, files) in self.levels.iter_mut().enumerate() {
            if level == 0 {
                files.sort_by(|a, b| {
                    b.meta
                        .largest_sequence
                        .cmp(&a.meta.largest_sequence)
                        .then(b.number().cmp(&a.number()))
                });
            } else {
                files.sort_by(|a, b| {
                    a.table()
                        .comparator()
                        .compare(&a.meta.smallest, &b.meta.smallest)
                });
            }
        }
    }

    fn check_disjoint(&self, cf: u32) -> Result<()> {
        for (level, files) in self.levels.iter().enumerate().skip(1) {
            for pair in files.windows(2) {
                let icmp = pair[0].table().comparator();
                if icmp.compare_user(pair[0].meta.largest_user_key(), pair[1].meta.smallest_user_key())
                    != Ordering::Less
                {
                    return Err(Error::corruption(format!(
                        "files {} and {} overlap at level {} of column family {}",
                        pair[0].number(),
                        pair[1].number(),
                        level,
                        cf
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The table files of every column family at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Version {
    families: BTreeMap<u32, LevelFiles>,
}

impl Version {
    /// An empty version.
    pub fn new() -> Self {
        Self::default()
    }

    /// A version built from already-sorted levels.
    pub(crate) fn from_families(families: BTreeMap<u32, LevelFiles>) -> Result<Self> {
        let mut version = Self { families };
        for (cf, levels) in version.families.iter_mut() {
            levels.sort_levels();
            levels.check_disjoint(*cf)?;
        }
        Ok(version)
    }

    /// Levels of column family `cf`.
    pub fn cf(&self, cf: u32) -> Option<&LevelFiles> {
        self.families.get(&cf)
    }

    /// Column family ids present.
    pub fn column_families(&self) -> impl Iterator<Item = u32> + '_ {
        self.families.keys().copied()
    }

    /// Number of files at `level` of `cf`.
    pub fn num_files_at_level(&self, cf: u32, level: usize) -> usize {
        self.cf(cf).map_or(0, |l| l.files(level).len())
    }

    /// Applies `edit`, resolving added files from `added` or, for moved
    /// files, from this version. Also returns the files the edit removed
    /// for good.
    pub fn apply(
        &self,
        edit: &VersionEdit,
        added: &[Arc<TableFile>],
    ) -> Result<(Version, Vec<Arc<TableFile>>)> {
        let mut next = self.clone();
        let mut removed = Vec::new();
        let mut touched = Vec::new();
        for change in &edit.changes {
            match change {
                VersionChange::AddColumnFamily { id, .. } => {
                    next.families.entry(*id).or_default();
                }
                VersionChange::DropColumnFamily { id } => {
                    if let Some(levels) = next.families.remove(id) {
                        removed.extend(levels.all_files().map(|(_, f)| Arc::clone(f)));
                    }
                }
                VersionChange::AddFile { cf, level, meta } => {
                    let file = added
                        .iter()
                        .find(|f| f.number() == meta.number)
                        .or_else(|| self.cf(*cf).and_then(|l| l.find(meta.number)))
                        .cloned()
                        .ok_or_else(|| {
                            Error::invalid_state(format!(
                                "edit adds unknown file {}",
                                meta.number
                            ))
                        })?;
                    let levels = next.families.get_mut(cf).ok_or_else(|| {
                        Error::invalid_argument(format!("column family {} does not exist", cf))
                    })?;
                    levels.level_mut(*level).push(file);
                    touched.push(*cf);
                }
                VersionChange::DeleteFile {
                    cf,
                    level,
                    file_number,
                } => {
                    let levels = next.families.get_mut(cf).ok_or_else(|| {
                        Error::invalid_argument(format!("column family {} does not exist", cf))
                    })?;
                    let files = levels.level_mut(*level);
                    let pos = files
                        .iter()
                        .position(|f| f.number() == *file_number)
                        .ok_or_else(|| {
                            Error::invalid_state(format!(
                                "edit deletes file {} missing from level {}",
                                file_number, level
                            ))
                        })?;
                    removed.push(files.remove(pos));
                }
                VersionChange::SetLogNumber { .. }
                | VersionChange::SetNextFileNumber(_)
                | VersionChange::SetLastSequence(_)
                | VersionChange::SetMaxColumnFamily(_) => {}
            }
        }
        for cf in touched {
            if let Some(levels) = next.families.get_mut(&cf) {
                levels.sort_levels();
                levels.check_disjoint(cf)?;
            }
        }
        // A moved file is deleted from one level and added to another.
        let still_live: Vec<u64> = edit.added_files().collect();
        removed.retain(|f| !still_live.contains(&f.number()));
        Ok((next, removed))
    }
}
