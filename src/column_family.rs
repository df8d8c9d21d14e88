//! Column families and the per-read view of their state.
//!
//! Every column family has its own memtables, levels and options, but all
//! of them share one WAL, one sequence space and one manifest. A
//! [`SuperVersion`] bundles the memtables of every family with the
//! [`Version`] they sit on top of; readers clone one `Arc<SuperVersion>`
//! and never lock again.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::ColumnFamilyOptions;
use crate::memtable::{InternalKeyComparator, MemTable};
use crate::version::Version;

/// Id of the column family every database has.
pub const DEFAULT_COLUMN_FAMILY_ID: u32 = 0;

/// Name of the column family every database has.
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

/// A reference to a column family of an open database.
///
/// Handles are cheap to clone. Using a handle after its column family was
/// dropped fails with [`Error::InvalidArgument`](crate::Error::InvalidArgument).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ColumnFamilyHandle {
    id: u32,
    name: Arc<str>,
}

impl ColumnFamilyHandle {
    pub(crate) fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: Arc::from(name),
        }
    }

    /// Numeric id, unique for the lifetime of the database.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Column family name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ColumnFamilyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColumnFamily({}, {:?})", self.id, self.name)
    }
}

/// A column family to open together with the database.
#[derive(Debug, Clone)]
pub struct ColumnFamilyDescriptor {
    /// Column family name
    pub name: String,
    /// Its options
    pub options: ColumnFamilyOptions,
}

impl ColumnFamilyDescriptor {
    /// Describes column family `name`.
    pub fn new(name: impl Into<String>, options: ColumnFamilyOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

/// In-memory state of one column family.
#[derive(Clone)]
pub struct CfView {
    /// Its handle
    pub handle: ColumnFamilyHandle,
    /// Its options
    pub options: Arc<ColumnFamilyOptions>,
    /// Internal key order of its records
    pub icmp: InternalKeyComparator,
    /// Memtable receiving writes
    pub mem: Arc<MemTable>,
    /// Frozen memtables, newest first
    pub imm: Vec<Arc<MemTable>>,
}

impl CfView {
    /// Creates the view of a family with an empty memtable on WAL `wal_number`.
    pub fn new(
        handle: ColumnFamilyHandle,
        options: Arc<ColumnFamilyOptions>,
        wal_number: u64,
    ) -> Self {
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let mem = Arc::new(MemTable::new(Arc::clone(&options.comparator), wal_number));
        Self {
            handle,
            options,
            icmp,
            mem,
            imm: Vec::new(),
        }
    }

    /// Oldest WAL holding data not yet in a table.
    pub fn min_wal_number(&self) -> u64 {
        self.imm
            .last()
            .map_or_else(|| self.mem.wal_number(), |m| m.wal_number())
    }
}

/// Memtables of every column family plus the version underneath them.
#[derive(Clone)]
pub struct SuperVersion {
    /// Column families by id
    pub cfs: BTreeMap<u32, CfView>,
    /// Table files
    pub version: Arc<Version>,
}

impl SuperVersion {
    /// View of column family `id`.
    pub fn cf(&self, id: u32) -> Option<&CfView> {
        self.cfs.get(&id)
    }

    /// Oldest WAL any column family still needs.
    pub fn min_wal_number(&self) -> Option<u64> {
        self.cfs.values().map(CfView::min_wal_number).min()
    }

    /// Same memtables on top of `version`.
    pub fn with_version(&self, version: Arc<Version>) -> SuperVersion {
        SuperVersion {
            cfs: self.cfs.clone(),
            version,
        }
    }
}
