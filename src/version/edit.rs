//! Version edits: the unit of change recorded in the manifest.

use serde::{Deserialize, Serialize};

use super::FileMetaData;
use crate::error::Result;

/// One change to the database state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionChange {
    /// A column family was created.
    AddColumnFamily {
        /// Column family id
        id: u32,
        /// Column family name
        name: String,
        /// Name of its user comparator
        comparator: String,
    },
    /// A column family was dropped along with its files.
    DropColumnFamily {
        /// Column family id
        id: u32,
    },
    /// A table became part of a level.
    AddFile {
        /// Column family id
        cf: u32,
        /// Level the file is added to
        level: usize,
        /// File metadata
        meta: FileMetaData,
    },
    /// A table left a level.
    DeleteFile {
        /// Column family id
        cf: u32,
        /// Level the file is removed from
        level: usize,
        /// File number to delete
        file_number: u64,
    },
    /// WALs older than `log_number` hold no unflushed data of `cf`.
    SetLogNumber {
        /// Column family id
        cf: u32,
        /// Oldest WAL still needed
        log_number: u64,
    },
    /// Next file number to hand out.
    SetNextFileNumber(u64),
    /// Highest sequence number persisted in tables.
    SetLastSequence(u64),
    /// Highest column family id ever assigned.
    SetMaxColumnFamily(u32),
}

/// An atomic group of changes, written as one manifest record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEdit {
    /// Changes, applied in order.
    pub changes: Vec<VersionChange>,
}

impl VersionEdit {
    /// Creates an empty edit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new column family.
    pub fn add_column_family(&mut self, id: u32, name: &str, comparator: &str) {
        self.changes.push(VersionChange::AddColumnFamily {
            id,
            name: name.to_string(),
            comparator: comparator.to_string(),
        });
    }

    /// Records a dropped column family.
    pub fn drop_column_family(&mut self, id: u32) {
        self.changes.push(VersionChange::DropColumnFamily { id });
    }

    /// Records a table added to `level` of `cf`.
    pub fn add_file(&mut self, cf: u32, level: usize, meta: FileMetaData) {
        self.changes.push(VersionChange::AddFile { cf, level, meta });
    }

    /// Records a table removed from `level` of `cf`.
    pub fn delete_file(&mut self, cf: u32, level: usize, file_number: u64) {
        self.changes.push(VersionChange::DeleteFile {
            cf,
            level,
            file_number,
        });
    }

    /// Records the oldest WAL `cf` still depends on.
    pub fn set_log_number(&mut self, cf: u32, log_number: u64) {
        self.changes
            .push(VersionChange::SetLogNumber { cf, log_number });
    }

    /// Records the next file number.
    pub fn set_next_file_number(&mut self, number: u64) {
        self.changes.push(VersionChange::SetNextFileNumber(number));
    }

    /// Records the last sequence number.
    pub fn set_last_sequence(&mut self, sequence: u64) {
        self.changes.push(VersionChange::SetLastSequence(sequence));
    }

    /// Records the highest column family id handed out.
    pub fn set_max_column_family(&mut self, id: u32) {
        self.changes.push(VersionChange::SetMaxColumnFamily(id));
    }

    /// Returns true for an edit with no changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Numbers of the files this edit adds.
    pub fn added_files(&self) -> impl Iterator<Item = u64> + '_ {
        self.changes.iter().filter_map(|c| match c {
            VersionChange::AddFile { meta, .. } => Some(meta.number),
            _ => None,
        })
    }

    /// Serializes the edit as a manifest record payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Parses a manifest record payload.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}
