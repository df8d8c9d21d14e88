//! Configuration options for the strata storage engine.
//!
//! [`Options`] carries database-wide settings plus the
//! [`ColumnFamilyOptions`] of the default column family. Every other
//! column family is created with its own `ColumnFamilyOptions`.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::comparator::{self, Comparator};
use crate::error::{Error, IoContext, Result};
use crate::merge_operator::MergeOperator;
use crate::snapshot::Snapshot;

/// Name of the options file written into the database directory.
pub const OPTIONS_FILE: &str = "OPTIONS";

/// Compression algorithms supported by strata.
///
/// Every variant exists regardless of enabled features so that files can
/// always be described; `validate()` rejects a codec that was not compiled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    None = 0,

    /// Snappy compression (fast, moderate compression ratio).
    Snappy = 1,

    /// LZ4 compression (very fast, lower compression ratio).
    Lz4 = 2,

    /// Zstandard compression (good ratio at moderate speed).
    Zstd = 3,

    /// Zlib (deflate) compression.
    Zlib = 4,
}

impl CompressionType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Snappy),
            2 => Some(CompressionType::Lz4),
            3 => Some(CompressionType::Zstd),
            4 => Some(CompressionType::Zlib),
            _ => None,
        }
    }

    /// Whether this build can encode and decode the codec.
    pub fn is_supported(self) -> bool {
        match self {
            CompressionType::None => true,
            CompressionType::Snappy => cfg!(feature = "snappy"),
            CompressionType::Lz4 => cfg!(feature = "lz4-compression"),
            CompressionType::Zstd => cfg!(feature = "zstd-compression"),
            CompressionType::Zlib => cfg!(feature = "zlib-compression"),
        }
    }
}

impl Default for CompressionType {
    fn default() -> Self {
        if cfg!(feature = "snappy") {
            CompressionType::Snappy
        } else {
            CompressionType::None
        }
    }
}

/// When the WAL is fsynced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WalSyncPolicy {
    /// Only when a write asks for it with [`WriteOptions::sync`].
    #[default]
    Never,
    /// Once per commit group, after all of its records are appended.
    PerBatch,
    /// After every appended record.
    PerWrite,
}

/// How WAL corruption is handled on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WalRecoveryMode {
    /// Replay up to a corrupt or incomplete trailing record, log it, continue.
    #[default]
    TolerateCorruptedTail,
    /// Fail on any WAL corruption, including a torn tail.
    AbsoluteConsistency,
}

/// Per column family configuration.
#[derive(Clone)]
pub struct ColumnFamilyOptions {
    /// Key ordering.
    /// Default: [`comparator::BytewiseComparator`]
    pub comparator: Arc<dyn Comparator>,

    /// Operator for merge records. Merges are rejected when unset.
    /// Default: None
    pub merge_operator: Option<Arc<dyn MergeOperator>>,

    /// Size threshold for freezing the active memtable (in bytes).
    /// Default: 4MB
    pub memtable_size: usize,

    /// Frozen memtables allowed before writes stall.
    /// Default: 2
    pub max_immutable_memtables: usize,

    /// Uncompressed data block size for tables (in bytes).
    /// Default: 4KB
    pub block_size: usize,

    /// Keys between restart points in a data block.
    /// Default: 16
    pub block_restart_interval: usize,

    /// Compression used for levels without an entry in `compression_per_level`.
    /// Default: Snappy when the `snappy` feature is enabled
    pub compression: CompressionType,

    /// Compression per level, indexed by level number.
    /// Default: empty
    pub compression_per_level: Vec<CompressionType>,

    /// Bloom filter bits per key. 0 disables filters.
    /// Default: 10
    pub bloom_bits_per_key: usize,

    /// Number of levels, level 0 included.
    /// Default: 7
    pub num_levels: usize,

    /// Level 0 file count that triggers compaction.
    /// Default: 4
    pub level0_compaction_trigger: usize,

    /// Level 0 file count at which writes stall.
    /// Default: 12
    pub level0_stop_writes_trigger: usize,

    /// Target size of level 1 (in bytes).
    /// Default: 10MB
    pub base_level_size: u64,

    /// Size ratio between adjacent levels.
    /// Default: 10
    pub level_size_multiplier: u64,

    /// Files produced by compaction are cut at this size (in bytes).
    /// Default: 2MB
    pub target_file_size: u64,
}

impl Default for ColumnFamilyOptions {
    fn default() -> Self {
        Self {
            comparator: comparator::bytewise(),
            merge_operator: None,
            memtable_size: 4 * 1024 * 1024,
            max_immutable_memtables: 2,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: CompressionType::default(),
            compression_per_level: Vec::new(),
            bloom_bits_per_key: 10,
            num_levels: 7,
            level0_compaction_trigger: 4,
            level0_stop_writes_trigger: 12,
            base_level_size: 10 * 1024 * 1024,
            level_size_multiplier: 10,
            target_file_size: 2 * 1024 * 1024,
        }
    }
}

impl fmt::Debug for ColumnFamilyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnFamilyOptions")
            .field("comparator", &self.comparator.name())
            .field(
                "merge_operator",
                &self.merge_operator.as_ref().map(|m| m.name().to_string()),
            )
            .field("memtable_size", &self.memtable_size)
            .field("max_immutable_memtables", &self.max_immutable_memtables)
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("compression", &self.compression)
            .field("compression_per_level", &self.compression_per_level)
            .field("bloom_bits_per_key", &self.bloom_bits_per_key)
            .field("num_levels", &self.num_levels)
            .field("level0_compaction_trigger", &self.level0_compaction_trigger)
            .field("level0_stop_writes_trigger", &self.level0_stop_writes_trigger)
            .field("base_level_size", &self.base_level_size)
            .field("level_size_multiplier", &self.level_size_multiplier)
            .field("target_file_size", &self.target_file_size)
            .finish()
    }
}

impl ColumnFamilyOptions {
    /// Creates a new ColumnFamilyOptions with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key comparator.
    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Sets the merge operator.
    pub fn merge_operator(mut self, op: Arc<dyn MergeOperator>) -> Self {
        self.merge_operator = Some(op);
        self
    }

    /// Sets the memtable size threshold.
    pub fn memtable_size(mut self, size: usize) -> Self {
        self.memtable_size = size;
        self
    }

    /// Sets the number of frozen memtables allowed before writes stall.
    pub fn max_immutable_memtables(mut self, n: usize) -> Self {
        self.max_immutable_memtables = n;
        self
    }

    /// Sets the block size for tables.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the default compression algorithm.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Sets compression per level.
    pub fn compression_per_level(mut self, levels: Vec<CompressionType>) -> Self {
        self.compression_per_level = levels;
        self
    }

    /// Sets bloom filter bits per key.
    pub fn bloom_bits_per_key(mut self, bits: usize) -> Self {
        self.bloom_bits_per_key = bits;
        self
    }

    /// Sets the number of levels.
    pub fn num_levels(mut self, n: usize) -> Self {
        self.num_levels = n;
        self
    }

    /// Sets the level 0 compaction trigger.
    pub fn level0_compaction_trigger(mut self, n: usize) -> Self {
        self.level0_compaction_trigger = n;
        self
    }

    /// Sets the level 0 stop-writes trigger.
    pub fn level0_stop_writes_trigger(mut self, n: usize) -> Self {
        self.level0_stop_writes_trigger = n;
        self
    }

    /// Sets the level 1 target size.
    pub fn base_level_size(mut self, size: u64) -> Self {
        self.base_level_size = size;
        self
    }

    /// Sets the compaction output file size.
    pub fn target_file_size(mut self, size: u64) -> Self {
        self.target_file_size = size;
        self
    }

    /// Compression for tables written to `level`.
    pub fn compression_for_level(&self, level: usize) -> CompressionType {
        self.compression_per_level
            .get(level)
            .copied()
            .unwrap_or(self.compression)
    }

    /// Target total size of `level` (level >= 1).
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut size = self.base_level_size;
        for _ in 1..level {
            size = size.saturating_mul(self.level_size_multiplier);
        }
        size
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.memtable_size == 0 {
            return Err(Error::invalid_argument("memtable_size must be > 0"));
        }
        if self.max_immutable_memtables == 0 {
            return Err(Error::invalid_argument("max_immutable_memtables must be > 0"));
        }
        if self.block_size == 0 {
            return Err(Error::invalid_argument("block_size must be > 0"));
        }
        if self.block_restart_interval == 0 {
            return Err(Error::invalid_argument("block_restart_interval must be > 0"));
        }
        if self.num_levels < 2 {
            return Err(Error::invalid_argument("num_levels must be >= 2"));
        }
        if self.level0_compaction_trigger == 0 {
            return Err(Error::invalid_argument(
                "level0_compaction_trigger must be > 0",
            ));
        }
        if self.level0_stop_writes_trigger < self.level0_compaction_trigger {
            return Err(Error::invalid_argument(
                "level0_stop_writes_trigger must be >= level0_compaction_trigger",
            ));
        }
        if self.base_level_size == 0 || self.target_file_size == 0 {
            return Err(Error::invalid_argument("level and file sizes must be > 0"));
        }
        if self.level_size_multiplier < 2 {
            return Err(Error::invalid_argument("level_size_multiplier must be >= 2"));
        }
        let codecs = std::iter::once(&self.compression).chain(&self.compression_per_level);
        for codec in codecs {
            if !codec.is_supported() {
                return Err(Error::invalid_argument(format!(
                    "compression {codec:?} is not enabled in this build"
                )));
            }
        }
        Ok(())
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "comparator": self.comparator.name(),
            "merge_operator": self.merge_operator.as_ref().map(|m| m.name()),
            "memtable_size": self.memtable_size,
            "max_immutable_memtables": self.max_immutable_memtables,
            "block_size": self.block_size,
            "block_restart_interval": self.block_restart_interval,
            "compression": self.compression,
            "compression_per_level": self.compression_per_level,
            "bloom_bits_per_key": self.bloom_bits_per_key,
            "num_levels": self.num_levels,
            "level0_compaction_trigger": self.level0_compaction_trigger,
            "level0_stop_writes_trigger": self.level0_stop_writes_trigger,
            "base_level_size": self.base_level_size,
            "level_size_multiplier": self.level_size_multiplier,
            "target_file_size": self.target_file_size,
        })
    }
}

/// Configuration options for opening a database.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the database if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Error if the database already exists.
    /// Default: false
    pub error_if_exists: bool,

    /// When WAL appends are fsynced.
    /// Default: WalSyncPolicy::Never
    pub wal_sync_policy: WalSyncPolicy,

    /// Handling of WAL corruption during recovery.
    /// Default: WalRecoveryMode::TolerateCorruptedTail
    pub wal_recovery_mode: WalRecoveryMode,

    /// Number of background flush/compaction threads.
    /// Default: 2
    pub max_background_jobs: usize,

    /// Concurrent compactions allowed per column family.
    /// Default: 2
    pub max_compactions_per_cf: usize,

    /// Block cache size (in bytes).
    /// Set to 0 to disable caching.
    /// Default: 8MB
    pub block_cache_size: usize,

    /// Upper bound on the bytes a single commit group gathers.
    /// Default: 1MB
    pub max_write_group_bytes: usize,

    /// Options of the default column family.
    pub default_cf: ColumnFamilyOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            wal_sync_policy: WalSyncPolicy::default(),
            wal_recovery_mode: WalRecoveryMode::default(),
            max_background_jobs: 2,
            max_compactions_per_cf: 2,
            block_cache_size: 8 * 1024 * 1024,
            max_write_group_bytes: 1024 * 1024,
            default_cf: ColumnFamilyOptions::default(),
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether opening an existing database is an error.
    pub fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the WAL sync policy.
    pub fn wal_sync_policy(mut self, policy: WalSyncPolicy) -> Self {
        self.wal_sync_policy = policy;
        self
    }

    /// Sets the WAL recovery mode.
    pub fn wal_recovery_mode(mut self, mode: WalRecoveryMode) -> Self {
        self.wal_recovery_mode = mode;
        self
    }

    /// Sets the number of background threads.
    pub fn max_background_jobs(mut self, n: usize) -> Self {
        self.max_background_jobs = n;
        self
    }

    /// Sets the block cache size.
    pub fn block_cache_size(mut self, size: usize) -> Self {
        self.block_cache_size = size;
        self
    }

    /// Sets the default column family's comparator.
    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.default_cf.comparator = comparator;
        self
    }

    /// Sets the default column family's merge operator.
    pub fn merge_operator(mut self, op: Arc<dyn MergeOperator>) -> Self {
        self.default_cf.merge_operator = Some(op);
        self
    }

    /// Sets the default column family's memtable size threshold.
    pub fn memtable_size(mut self, size: usize) -> Self {
        self.default_cf.memtable_size = size;
        self
    }

    /// Sets the default column family's block size.
    pub fn block_size(mut self, size: usize) -> Self {
        self.default_cf.block_size = size;
        self
    }

    /// Sets the default column family's compression algorithm.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.default_cf.compression = compression;
        self
    }

    /// Sets the default column family's bloom filter bits per key.
    pub fn bloom_bits_per_key(mut self, bits: usize) -> Self {
        self.default_cf.bloom_bits_per_key = bits;
        self
    }

    /// Sets the default column family's level 0 compaction trigger.
    pub fn level0_compaction_trigger(mut self, n: usize) -> Self {
        self.default_cf.level0_compaction_trigger = n;
        if self.default_cf.level0_stop_writes_trigger < n {
            self.default_cf.level0_stop_writes_trigger = n;
        }
        self
    }

    /// Sets the default column family's level 1 target size.
    pub fn base_level_size(mut self, size: u64) -> Self {
        self.default_cf.base_level_size = size;
        self
    }

    /// Sets the default column family's compaction output file size.
    pub fn target_file_size(mut self, size: u64) -> Self {
        self.default_cf.target_file_size = size;
        self
    }

    /// Sets the default column family's number of levels.
    pub fn num_levels(mut self, n: usize) -> Self {
        self.default_cf.num_levels = n;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_background_jobs == 0 {
            return Err(Error::invalid_argument("max_background_jobs must be > 0"));
        }
        if self.max_compactions_per_cf == 0 {
            return Err(Error::invalid_argument("max_compactions_per_cf must be > 0"));
        }
        if self.max_write_group_bytes == 0 {
            return Err(Error::invalid_argument("max_write_group_bytes must be > 0"));
        }
        self.default_cf.validate()
    }

    /// Writes a JSON description of the options in effect to `dir/OPTIONS`.
    pub(crate) fn persist<'a>(
        &self,
        dir: &Path,
        families: impl IntoIterator<Item = (&'a str, &'a ColumnFamilyOptions)>,
    ) -> Result<()> {
        let cfs: serde_json::Map<String, serde_json::Value> = families
            .into_iter()
            .map(|(name, opts)| (name.to_string(), opts.describe()))
            .collect();
        let doc = serde_json::json!({
            "db": {
                "wal_sync_policy": self.wal_sync_policy,
                "wal_recovery_mode": self.wal_recovery_mode,
                "max_background_jobs": self.max_background_jobs,
                "max_compactions_per_cf": self.max_compactions_per_cf,
                "block_cache_size": self.block_cache_size,
                "max_write_group_bytes": self.max_write_group_bytes,
            },
            "column_families": cfs,
        });
        let tmp = dir.join(format!("{OPTIONS_FILE}.tmp"));
        let dst = dir.join(OPTIONS_FILE);
        fs::write(&tmp, serde_json::to_vec_pretty(&doc)?).with_path("write", &tmp)?;
        fs::rename(&tmp, &dst).with_path("rename", &dst)?;
        Ok(())
    }
}

/// Options for a single read.
#[derive(Clone, Copy)]
pub struct ReadOptions<'a> {
    /// Read as of this snapshot instead of the latest state.
    pub snapshot: Option<&'a Snapshot>,

    /// Whether blocks read for this operation enter the block cache.
    /// Default: true
    pub fill_cache: bool,
}

impl Default for ReadOptions<'_> {
    fn default() -> Self {
        Self {
            snapshot: None,
            fill_cache: true,
        }
    }
}

impl<'a> ReadOptions<'a> {
    /// Reads bound to `snapshot`.
    pub fn at(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            fill_cache: true,
        }
    }
}

/// Options for a single write.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Fsync the WAL before acknowledging, regardless of policy.
    pub sync: bool,

    /// Skip the WAL. The write is lost on crash until flushed.
    pub disable_wal: bool,
}

impl WriteOptions {
    /// Synchronous write options.
    pub fn synced() -> Self {
        Self {
            sync: true,
            disable_wal: false,
        }
    }
}

/// Options for an explicit flush.
#[derive(Debug, Clone, Copy)]
pub struct FlushOptions {
    /// Block until the frozen memtable is on disk.
    /// Default: true
    pub wait: bool,
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self { wait: true }
    }
}
