//! Manifest log: a sequence of [`VersionEdit`] records framed like the WAL.

use std::path::{Path, PathBuf};

use super::edit::VersionEdit;
use crate::error::{Error, Result};
use crate::filename::manifest_filename;
use crate::wal::{LogReader, LogWriter};

/// Appends edits to a manifest file.
pub struct ManifestWriter {
    number: u64,
    writer: LogWriter,
}

impl ManifestWriter {
    /// Creates `MANIFEST-{number}` inside `dir`.
    pub fn create(dir: &Path, number: u64) -> Result<Self> {
        let writer = LogWriter::create(dir.join(manifest_filename(number)))?;
        Ok(Self { number, writer })
    }

    /// Manifest file number.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Path of the manifest.
    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Appends `edit` and syncs it to disk.
    pub fn append(&mut self, edit: &VersionEdit) -> Result<()> {
        self.writer.add_record(&edit.encode()?)?;
        self.writer.sync()
    }
}

/// Reads every complete edit from the manifest at `path`.
///
/// A torn final record is what a crash during an install leaves behind;
/// it is dropped with a warning and the edits before it are returned.
pub fn read_manifest(path: &Path) -> Result<Vec<VersionEdit>> {
    let mut reader = LogReader::open(path)?;
    let mut edits = Vec::new();
    loop {
        match reader.read_record() {
            Ok(Some(record)) => edits.push(VersionEdit::decode(&record).map_err(|e| {
                Error::corruption(format!(
                    "undecodable edit in {} at offset {}: {}",
                    path.display(),
                    reader.position(),
                    e
                ))
            })?),
            Ok(None) => break,
            Err(Error::TruncatedLog { offset, reason }) => {
                log::warn!(
                    "Ignoring torn manifest tail in {} at offset {}: {}",
                    path.display(),
                    offset,
                    reason
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(edits)
}

/// Path of manifest `number` under `dir`.
pub fn manifest_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(manifest_filename(number))
}
