//! Opening a database: manifest replay, WAL replay and directory cleanup.
//!
//! Recovery never carries memtables over. Everything replayed from the WAL
//! is written to level 0 tables and recorded in a fresh manifest before
//! the old logs are removed and a new WAL is started.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::BlockCache;
use crate::column_family::{
    CfView, ColumnFamilyDescriptor, ColumnFamilyHandle, SuperVersion, DEFAULT_COLUMN_FAMILY_ID,
    DEFAULT_COLUMN_FAMILY_NAME,
};
use crate::compaction::CompactionJob;
use crate::config::{ColumnFamilyOptions, Options, WalRecoveryMode};
use crate::error::{Error, IoContext, Result};
use crate::filename::{list_files, table_path, FileType, CURRENT_FILE};
use crate::memtable::{InternalKeyComparator, MemTable};
use crate::sstable::Table;
use crate::version::{
    FamilyRecord, FileMetaData, LevelFiles, ManifestState, TableFile, Version, VersionSet,
};
use crate::wal::{recover_wal, Wal};

/// Everything `DB::open_cf` needs to start serving.
pub(super) struct Recovered {
    pub(super) versions: VersionSet,
    pub(super) super_version: SuperVersion,
    pub(super) wal: Wal,
    pub(super) last_sequence: u64,
}

/// A column family as it will be served: name plus options.
type Family = (String, Arc<ColumnFamilyOptions>);

pub(super) fn recover(
    dir: &Path,
    options: &Options,
    descriptors: Vec<ColumnFamilyDescriptor>,
    cache: Option<Arc<BlockCache>>,
) -> Result<Recovered> {
    options.validate()?;
    let mut requested = requested_families(options, descriptors)?;
    prepare_dir(dir, options)?;

    let mut state = match ManifestState::load(dir)? {
        Some(state) => state,
        None => {
            log::info!("Creating new database at {}", dir.display());
            fresh_state(&requested[0].1)
        }
    };
    let min_log_number = state.min_log_number();
    let families = resolve_families(&mut state, &mut requested)?;

    let mut next_file = state.next_file_number;
    let existing = list_files(dir)?;
    for (kind, _) in &existing {
        if let FileType::Wal(n) | FileType::Table(n) | FileType::Manifest(n) = kind {
            next_file = next_file.max(n + 1);
        }
    }

    let mut levels = open_tables(dir, &state, &families, &cache)?;
    let mut last_sequence = state.last_sequence;
    for cf_levels in levels.values() {
        for file in cf_levels.iter().flatten() {
            last_sequence = last_sequence.max(file.meta.largest_sequence);
        }
    }

    let mut wals: Vec<(u64, PathBuf)> = existing
        .iter()
        .filter_map(|(kind, path)| match kind {
            FileType::Wal(n) if *n >= min_log_number => Some((*n, path.clone())),
            _ => None,
        })
        .collect();
    wals.sort();
    let replayed = replay_wals(
        dir,
        options,
        &state,
        &families,
        &wals,
        &mut next_file,
        &cache,
    )?;
    last_sequence = last_sequence.max(replayed.last_sequence);
    for (cf, file) in replayed.tables {
        let cf_levels = levels.entry(cf).or_default();
        if cf_levels.is_empty() {
            cf_levels.push(Vec::new());
        }
        cf_levels[0].push(file);
    }

    // Everything up to here is in tables; the new WAL starts clean.
    let wal_number = next_file;
    next_file += 1;
    for family in state.families.values_mut() {
        family.log_number = wal_number;
    }

    let version = Version::from_families(
        levels
            .into_iter()
            .map(|(cf, files)| (cf, LevelFiles::from_levels(files)))
            .collect(),
    )?;
    let versions = VersionSet::create(
        dir,
        version,
        state.families.clone(),
        next_file,
        last_sequence,
        state.max_column_family,
        state.manifest_number,
    )?;
    remove_stale_files(dir, &versions, wal_number)?;
    let wal = Wal::create(dir, wal_number)?;

    let cfs = families
        .into_iter()
        .map(|(id, (name, opts))| {
            let handle = ColumnFamilyHandle::new(id, &name);
            (id, CfView::new(handle, opts, wal_number))
        })
        .collect();
    Ok(Recovered {
        super_version: SuperVersion {
            cfs,
            version: versions.current(),
        },
        versions,
        wal,
        last_sequence,
    })
}

/// The families to open, `default` first.
fn requested_families(
    options: &Options,
    descriptors: Vec<ColumnFamilyDescriptor>,
) -> Result<Vec<(String, ColumnFamilyOptions)>> {
    let mut out = vec![(
        DEFAULT_COLUMN_FAMILY_NAME.to_string(),
        options.default_cf.clone(),
    )];
    for descriptor in descriptors {
        descriptor.options.validate()?;
        if descriptor.name.is_empty() {
            return Err(Error::invalid_argument("column family name is empty"));
        }
        if descriptor.name == DEFAULT_COLUMN_FAMILY_NAME {
            out[0].1 = descriptor.options;
            continue;
        }
        if out.iter().any(|(name, _)| *name == descriptor.name) {
            return Err(Error::invalid_argument(format!(
                "column family {:?} is listed twice",
                descriptor.name
            )));
        }
        out.push((descriptor.name, descriptor.options));
    }
    Ok(out)
}

fn prepare_dir(dir: &Path, options: &Options) -> Result<()> {
    if dir.join(CURRENT_FILE).exists() {
        if options.error_if_exists {
            return Err(Error::AlreadyExists(format!(
                "database already exists at {}",
                dir.display()
            )));
        }
        return Ok(());
    }
    if !options.create_if_missing {
        return Err(Error::not_found(format!(
            "no database at {}",
            dir.display()
        )));
    }
    fs::create_dir_all(dir).with_path("create", dir)
}

fn fresh_state(default_options: &ColumnFamilyOptions) -> ManifestState {
    let mut state = ManifestState {
        next_file_number: 1,
        ..Default::default()
    };
    state.families.insert(
        DEFAULT_COLUMN_FAMILY_ID,
        FamilyRecord {
            name: DEFAULT_COLUMN_FAMILY_NAME.to_string(),
            comparator: default_options.comparator.name().to_string(),
            log_number: 0,
        },
    );
    state.files.insert(DEFAULT_COLUMN_FAMILY_ID, Vec::new());
    state
}

/// Matches the requested families against the manifest, creating the
/// missing ones in `state`.
fn resolve_families(
    state: &mut ManifestState,
    requested: &mut Vec<(String, ColumnFamilyOptions)>,
) -> Result<BTreeMap<u32, Family>> {
    let mut families = BTreeMap::new();
    for (id, record) in &state.families {
        let pos = requested
            .iter()
            .position(|(name, _)| *name == record.name)
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "column family {:?} exists but was not opened",
                    record.name
                ))
            })?;
        let (name, opts) = requested.remove(pos);
        if opts.comparator.name() != record.comparator {
            return Err(Error::invalid_argument(format!(
                "column family {:?} was created with comparator {:?}, opened with {:?}",
                name,
                record.comparator,
                opts.comparator.name()
            )));
        }
        families.insert(*id, (name, Arc::new(opts)));
    }
    for (name, opts) in requested.drain(..) {
        state.max_column_family += 1;
        let id = state.max_column_family;
        log::info!("Creating column family {:?} (id {})", name, id);
        state.families.insert(
            id,
            FamilyRecord {
                name: name.clone(),
                comparator: opts.comparator.name().to_string(),
                log_number: 0,
            },
        );
        state.files.insert(id, Vec::new());
        families.insert(id, (name, Arc::new(opts)));
    }
    Ok(families)
}

fn open_table(
    dir: &Path,
    meta: FileMetaData,
    icmp: &InternalKeyComparator,
    cache: &Option<Arc<BlockCache>>,
) -> Result<Arc<TableFile>> {
    let path = table_path(dir, meta.number);
    if !path.exists() {
        return Err(Error::corruption(format!(
            "manifest references missing table {}",
            path.display()
        )));
    }
    let table = Table::open(&path, meta.number, icmp.clone(), cache.clone())?;
    Ok(Arc::new(TableFile::new(meta, Arc::new(table), cache.clone())))
}

/// Opens every table the manifest lists, per family and level.
fn open_tables(
    dir: &Path,
    state: &ManifestState,
    families: &BTreeMap<u32, Family>,
    cache: &Option<Arc<BlockCache>>,
) -> Result<BTreeMap<u32, Vec<Vec<Arc<TableFile>>>>> {
    let mut out: BTreeMap<u32, Vec<Vec<Arc<TableFile>>>> = BTreeMap::new();
    for (id, (name, opts)) in families {
        let cf_levels = out.entry(*id).or_default();
        let Some(files) = state.files.get(id) else {
            continue;
        };
        let icmp = InternalKeyComparator::new(Arc::clone(&opts.comparator));
        for (level, meta) in files {
            if *level >= opts.num_levels {
                return Err(Error::invalid_argument(format!(
                    "column family {:?} has files at level {} but num_levels is {}",
                    name, level, opts.num_levels
                )));
            }
            let file = open_table(dir, meta.clone(), &icmp, cache)?;
            if cf_levels.len() <= *level {
                cf_levels.resize_with(level + 1, Vec::new);
            }
            cf_levels[*level].push(file);
        }
        log::debug!(
            "Opened {} tables of column family {:?}",
            files.len(),
            name
        );
    }
    Ok(out)
}

struct Replayed {
    /// New level 0 tables, oldest first
    tables: Vec<(u32, Arc<TableFile>)>,
    last_sequence: u64,
}

fn replay_wals(
    dir: &Path,
    options: &Options,
    state: &ManifestState,
    families: &BTreeMap<u32, Family>,
    wals: &[(u64, PathBuf)],
    next_file: &mut u64,
    cache: &Option<Arc<BlockCache>>,
) -> Result<Replayed> {
    let mut replayed = Replayed {
        tables: Vec::new(),
        last_sequence: 0,
    };
    let mut mems: BTreeMap<u32, Arc<MemTable>> = BTreeMap::new();

    for (number, path) in wals {
        let recovery = recover_wal(path)?;
        let mut records = 0usize;
        for (first_sequence, batch) in &recovery.batches {
            for (i, op) in batch.iter().enumerate() {
                let sequence = first_sequence + i as u64;
                replayed.last_sequence = replayed.last_sequence.max(sequence);
                let cf = op.cf();
                // Dropped, or already flushed before this log.
                let Some(record) = state.families.get(&cf) else {
                    continue;
                };
                if *number < record.log_number {
                    continue;
                }
                let Some((_, opts)) = families.get(&cf) else {
                    continue;
                };
                let mem = mems.entry(cf).or_insert_with(|| {
                    Arc::new(MemTable::new(Arc::clone(&opts.comparator), *number))
                });
                mem.add(sequence, op.value_type(), op.key(), op.value());
                records += 1;
            }

            let full: Vec<u32> = mems
                .iter()
                .filter(|(cf, mem)| {
                    families
                        .get(cf)
                        .is_some_and(|(_, opts)| mem.approximate_size() >= opts.memtable_size)
                })
                .map(|(cf, _)| *cf)
                .collect();
            for cf in full {
                if let (Some(mem), Some((_, opts))) = (mems.remove(&cf), families.get(&cf)) {
                    let tables = write_level0_table(dir, opts, &mem, next_file, cache)?;
                    replayed.tables.extend(tables.into_iter().map(|t| (cf, t)));
                }
            }
        }

        if let Some(tail) = recovery.tail {
            match options.wal_recovery_mode {
                WalRecoveryMode::AbsoluteConsistency => return Err(tail),
                WalRecoveryMode::TolerateCorruptedTail => {
                    log::warn!("Stopped replaying {} at damaged tail: {}", path.display(), tail)
                }
            }
        }
        log::info!(
            "Replayed {} records from {}",
            records,
            path.display()
        );
    }

    for (cf, mem) in mems {
        if mem.is_empty() {
            continue;
        }
        if let Some((_, opts)) = families.get(&cf) {
            let tables = write_level0_table(dir, opts, &mem, next_file, cache)?;
            replayed.tables.extend(tables.into_iter().map(|t| (cf, t)));
        }
    }
    Ok(replayed)
}

/// Writes a recovered memtable out as a level 0 table.
fn write_level0_table(
    dir: &Path,
    opts: &ColumnFamilyOptions,
    mem: &Arc<MemTable>,
    next_file: &mut u64,
    cache: &Option<Arc<BlockCache>>,
) -> Result<Vec<Arc<TableFile>>> {
    let job = CompactionJob::for_flush(dir, opts, Vec::new());
    let mut input = mem.iter();
    let result = job.run(&mut input, &mut || {
        let n = *next_file;
        *next_file += 1;
        n
    })?;
    let icmp = InternalKeyComparator::new(Arc::clone(&opts.comparator));
    let mut tables = Vec::with_capacity(result.outputs.len());
    for output in &result.outputs {
        match open_table(dir, output.meta.clone(), &icmp, cache) {
            Ok(table) => tables.push(table),
            Err(e) => {
                drop(tables);
                result.discard();
                return Err(e);
            }
        }
    }
    log::info!(
        "Wrote {} recovered records to {} level 0 table(s)",
        result.stats.output_records,
        tables.len()
    );
    Ok(tables)
}

/// Removes replayed logs, unreferenced tables, old manifests and temp files.
fn remove_stale_files(dir: &Path, versions: &VersionSet, wal_number: u64) -> Result<()> {
    let current = versions.current();
    let live: HashSet<u64> = current
        .column_families()
        .filter_map(|cf| current.cf(cf))
        .flat_map(|levels| levels.all_files().map(|(_, f)| f.number()))
        .collect();
    let manifest = versions.manifest_number();

    let mut removed = 0;
    for (kind, path) in list_files(dir)? {
        let stale = match kind {
            FileType::Wal(n) => n < wal_number,
            FileType::Table(n) => !live.contains(&n),
            FileType::Manifest(n) => Some(n) != manifest,
            FileType::Temp => true,
            FileType::Current => false,
        };
        if !stale {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => log::warn!("Failed to remove stale file {}: {}", path.display(), e),
        }
    }
    if removed > 0 {
        log::debug!("Removed {} stale files from {}", removed, dir.display());
    }
    Ok(())
}
