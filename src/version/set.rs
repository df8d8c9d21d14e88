use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::edit::{VersionChange, VersionEdit};
use super::manifest::{manifest_path, read_manifest, ManifestWriter};
use super::{FileMetaData, TableFile, Version};
use crate::error::{Error, Result};
use crate::filename::{read_current, set_current};

/// Manifest-level description of a column family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyRecord {
    /// Column family name
    pub name: String,
    /// Name of the comparator it was created with
    pub comparator: String,
    /// WALs below this number hold no unflushed data of the family
    pub log_number: u64,
}

/// The database state described by a manifest, before any table is opened.
#[derive(Debug, Clone, Default)]
pub struct ManifestState {
    /// Live column families by id.
    pub families: BTreeMap<u32, FamilyRecord>,
    /// Files per column family, as `(level, meta)`.
    pub files: BTreeMap<u32, Vec<(usize, FileMetaData)>>,
    /// Next file number to hand out.
    pub next_file_number: u64,
    /// Last sequence number persisted.
    pub last_sequence: u64,
    /// Highest column family id ever assigned.
    pub max_column_family: u32,
    /// Number of the manifest the state was read from.
    pub manifest_number: Option<u64>,
}

impl ManifestState {
    /// Applies one edit.
    pub fn apply(&mut self, edit: &VersionEdit) -> Result<()> {
        for change in &edit.changes {
            match change {
                VersionChange::AddColumnFamily {
                    id,
                    name,
                    comparator,
                } => {
                    self.families.insert(
                        *id,
                        FamilyRecord {
                            name: name.clone(),
                            comparator: comparator.clone(),
                            log_number: 0,
                        },
                    );
                    self.files.entry(*id).or_default();
                    self.max_column_family = self.max_column_family.max(*id);
                }
                VersionChange::DropColumnFamily { id } => {
                    self.families.remove(id);
                    self.files.remove(id);
                }
                VersionChange::AddFile { cf, level, meta } => {
                    self.files
                        .get_mut(cf)
                        .ok_or_else(|| {
                            Error::corruption(format!(
                                "manifest adds file {} to unknown column family {}",
                                meta.number, cf
                            ))
                        })?
                        .push((*level, meta.clone()));
                    self.next_file_number = self.next_file_number.max(meta.number + 1);
                }
                VersionChange::DeleteFile {
                    cf,
                    level,
                    file_number,
                } => {
                    if let Some(files) = self.files.get_mut(cf) {
                        files.retain(|(l, m)| !(l == level && m.number == *file_number));
                    }
                }
                VersionChange::SetLogNumber { cf, log_number } => {
                    if let Some(family) = self.families.get_mut(cf) {
                        family.log_number = *log_number;
                    }
                }
                VersionChange::SetNextFileNumber(n) => {
                    self.next_file_number = self.next_file_number.max(*n);
                }
                VersionChange::SetLastSequence(s) => {
                    self.last_sequence = self.last_sequence.max(*s);
                }
                VersionChange::SetMaxColumnFamily(id) => {
                    self.max_column_family = self.max_column_family.max(*id);
                }
            }
        }
        Ok(())
    }

    /// Reads the state named by `dir/CURRENT`, or `None` for a fresh directory.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let number = match read_current(dir)? {
            Some(n) => n,
            None => return Ok(None),
        };
        let path = manifest_path(dir, number);
        if !path.exists() {
            return Err(Error::corruption(format!(
                "CURRENT names missing manifest {}",
                path.display()
            )));
        }
        let mut state = ManifestState {
            next_file_number: number + 1,
            manifest_number: Some(number),
            ..Default::default()
        };
        for edit in read_manifest(&path)? {
            state.apply(&edit)?;
        }
        log::debug!(
            "Read manifest {}: {} column families, next file {}, last sequence {}",
            path.display(),
            state.families.len(),
            state.next_file_number,
            state.last_sequence
        );
        Ok(Some(state))
    }

    /// Smallest log number over all column families.
    pub fn min_log_number(&self) -> u64 {
        self.families
            .values()
            .map(|f| f.log_number)
            .min()
            .unwrap_or(0)
    }
}

/// Owner of the current [`Version`] and the manifest that records it.
pub struct VersionSet {
    dir: PathBuf,
    current: Arc<Version>,
    families: BTreeMap<u32, FamilyRecord>,
    manifest: Option<ManifestWriter>,
    next_file_number: u64,
    last_sequence: u64,
    max_column_family: u32,
}

impl VersionSet {
    /// Installs a recovered state under a new manifest.
    ///
    /// The new manifest starts with a snapshot of the full state; once it
    /// is durable `CURRENT` is switched over and the previous manifest is
    /// removed.
    pub fn create(
        dir: &Path,
        version: Version,
        families: BTreeMap<u32, FamilyRecord>,
        next_file_number: u64,
        last_sequence: u64,
        max_column_family: u32,
        previous_manifest: Option<u64>,
    ) -> Result<Self> {
        let mut set = Self {
            dir: dir.to_path_buf(),
            current: Arc::new(version),
            families,
            manifest: None,
            next_file_number,
            last_sequence,
            max_column_family,
        };
        set.open_manifest()?;
        if let Some(old) = previous_manifest {
            let path = manifest_path(dir, old);
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("Failed to remove old manifest {}: {}", path.display(), e);
            }
        }
        Ok(set)
    }

    fn open_manifest(&mut self) -> Result<()> {
        let number = self.new_file_number();
        let mut writer = ManifestWriter::create(&self.dir, number)?;
        let snapshot = self.snapshot_edit();
        let res = writer
            .append(&snapshot)
            .and_then(|()| set_current(&self.dir, number));
        if let Err(e) = res {
            let path = writer.path().to_path_buf();
            drop(writer);
            let _ = fs::remove_file(&path);
            return Err(e);
        }
        log::info!("Started manifest {}", writer.path().display());
        self.manifest = Some(writer);
        Ok(())
    }

    /// An edit recreating the whole current state.
    fn snapshot_edit(&self) -> VersionEdit {
        let mut edit = VersionEdit::new();
        for (id, family) in &self.families {
            edit.add_column_family(*id, &family.name, &family.comparator);
            edit.set_log_number(*id, family.log_number);
            if let Some(levels) = self.current.cf(*id) {
                for (level, file) in levels.all_files() {
                    edit.add_file(*id, level, file.meta.clone());
                }
            }
        }
        edit.set_next_file_number(self.next_file_number);
        edit.set_last_sequence(self.last_sequence);
        edit.set_max_column_family(self.max_column_family);
        edit
    }

    /// Records `edit` in the manifest, then makes the result current.
    ///
    /// `added` holds the opened tables of the files the edit adds. On a
    /// manifest failure nothing changes and the next call starts a fresh
    /// manifest.
    pub fn log_and_apply(
        &mut self,
        mut edit: VersionEdit,
        added: &[Arc<TableFile>],
    ) -> Result<Arc<Version>> {
        let (version, removed) = self.current.apply(&edit, added)?;

        if self.manifest.is_none() {
            self.open_manifest()?;
        }
        edit.set_next_file_number(self.next_file_number);
        let writer = self
            .manifest
            .as_mut()
            .ok_or_else(|| Error::invalid_state("manifest unavailable"))?;
        if let Err(e) = writer.append(&edit) {
            log::error!("Manifest write to {} failed: {}", writer.path().display(), e);
            self.manifest = None;
            return Err(e);
        }

        for change in &edit.changes {
            match change {
                VersionChange::AddColumnFamily {
                    id,
                    name,
                    comparator,
                } => {
                    self.families.insert(
                        *id,
                        FamilyRecord {
                            name: name.clone(),
                            comparator: comparator.clone(),
                            log_number: 0,
                        },
                    );
                    self.max_column_family = self.max_column_family.max(*id);
                }
                VersionChange::DropColumnFamily { id } => {
                    self.families.remove(id);
                }
                VersionChange::SetLogNumber { cf, log_number } => {
                    if let Some(family) = self.families.get_mut(cf) {
                        family.log_number = (*log_number).max(family.log_number);
                    }
                }
                VersionChange::SetLastSequence(s) => {
                    self.last_sequence = self.last_sequence.max(*s);
                }
                VersionChange::SetMaxColumnFamily(id) => {
                    self.max_column_family = self.max_column_family.max(*id);
                }
                VersionChange::AddFile { .. }
                | VersionChange::DeleteFile { .. }
                | VersionChange::SetNextFileNumber(_) => {}
            }
        }
        for file in &removed {
            file.mark_obsolete();
        }
        self.current = Arc::new(version);
        Ok(Arc::clone(&self.current))
    }

    /// The current version.
    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current)
    }

    /// Hands out a new file number.
    pub fn new_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }

    /// Next file number that would be handed out.
    pub fn next_file_number(&self) -> u64 {
        self.next_file_number
    }

    /// Last sequence number recorded in the manifest.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Reserves a new column family id.
    pub fn new_column_family_id(&mut self) -> u32 {
        self.max_column_family += 1;
        self.max_column_family
    }

    /// Manifest record of column family `id`.
    pub fn family(&self, id: u32) -> Option<&FamilyRecord> {
        self.families.get(&id)
    }

    /// All live column families.
    pub fn families(&self) -> &BTreeMap<u32, FamilyRecord> {
        &self.families
    }

    /// Number of the manifest being appended to.
    pub fn manifest_number(&self) -> Option<u64> {
        self.manifest.as_ref().map(ManifestWriter::number)
    }
}
