//! Database directory layout.
//!
//! ```text
//! 000007.log       write-ahead log, one per memtable generation
//! 000012.sst       sorted table
//! MANIFEST-000005  version edit log
//! CURRENT          name of the live manifest
//! OPTIONS          options in effect (informational)
//! ```
//!
//! All numbered files draw from one monotonically increasing counter.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoContext, Result};

/// Name of the file pointing at the live manifest.
pub const CURRENT_FILE: &str = "CURRENT";

/// Kind of a file found in a database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// `NNNNNN.log`
    Wal(u64),
    /// `NNNNNN.sst`
    Table(u64),
    /// `MANIFEST-NNNNNN`
    Manifest(u64),
    /// `CURRENT`
    Current,
    /// `*.tmp` left behind by an interrupted rename
    Temp,
}

/// `NNNNNN.log`
pub fn wal_filename(number: u64) -> String {
    format!("{:06}.log", number)
}

/// `NNNNNN.sst`
pub fn table_filename(number: u64) -> String {
    format!("{:06}.sst", number)
}

/// `MANIFEST-NNNNNN`
pub fn manifest_filename(number: u64) -> String {
    format!("MANIFEST-{:06}", number)
}

/// Path of table `number` under `dir`.
pub fn table_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(table_filename(number))
}

/// Classifies a file name; `None` for files the engine does not own.
pub fn parse_filename(name: &str) -> Option<FileType> {
    if name == CURRENT_FILE {
        return Some(FileType::Current);
    }
    if name.ends_with(".tmp") {
        return Some(FileType::Temp);
    }
    if let Some(num) = name.strip_prefix("MANIFEST-") {
        return num.parse().ok().map(FileType::Manifest);
    }
    if let Some(num) = name.strip_suffix(".log") {
        return num.parse().ok().map(FileType::Wal);
    }
    if let Some(num) = name.strip_suffix(".sst") {
        return num.parse().ok().map(FileType::Table);
    }
    None
}

/// Lists the engine-owned files in `dir`.
pub fn list_files(dir: &Path) -> Result<Vec<(FileType, PathBuf)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).with_path("list", dir)? {
        let entry = entry.with_path("list", dir)?;
        let name = entry.file_name();
        if let Some(kind) = name.to_str().and_then(parse_filename) {
            out.push((kind, entry.path()));
        }
    }
    Ok(out)
}

/// Reads the manifest number named by `CURRENT`, if the file exists.
pub fn read_current(dir: &Path) -> Result<Option<u64>> {
    let path = dir.join(CURRENT_FILE);
    let contents = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io("read", &path, e)),
    };
    match parse_filename(contents.trim_end()) {
        Some(FileType::Manifest(n)) => Ok(Some(n)),
        _ => Err(Error::corruption(format!(
            "CURRENT does not name a manifest: {:?}",
            contents
        ))),
    }
}

/// Points `CURRENT` at manifest `number`.
///
/// Writes a temp file, fsyncs it, renames it over `CURRENT` and fsyncs the
/// directory, so a crash leaves either the old or the new pointer.
pub fn set_current(dir: &Path, number: u64) -> Result<()> {
    let tmp = dir.join(format!("{}.tmp", CURRENT_FILE));
    {
        let mut file = File::create(&tmp).with_path("create", &tmp)?;
        file.write_all(format!("{}\n", manifest_filename(number)).as_bytes())
            .with_path("write", &tmp)?;
        file.sync_all().with_path("sync", &tmp)?;
    }
    let current = dir.join(CURRENT_FILE);
    fs::rename(&tmp, &current).with_path("rename", &current)?;
    sync_dir(dir)
}

/// Makes directory entries (creates, renames, deletes) durable.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .with_path("sync directory", dir)
}

/// Directory handles cannot be fsynced on this platform.
#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
