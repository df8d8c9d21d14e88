//! Log writer shared by the WAL and the manifest.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::record::encode_record;
use crate::error::{IoContext, Result};

/// Appends framed records to a log file.
pub struct LogWriter {
    /// Path to the log file
    path: PathBuf,
    /// Buffered writer for efficient I/O
    writer: BufWriter<File>,
    /// Bytes appended, buffered ones included
    file_size: u64,
}

impl LogWriter {
    /// Creates (or truncates) the log file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).with_path("create", &path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            file_size: 0,
        })
    }

    /// Appends one logical record. It reaches the OS on [`flush`](Self::flush)
    /// and the disk on [`sync`](Self::sync).
    pub fn add_record(&mut self, data: &[u8]) -> Result<()> {
        let framed = encode_record(data);
        self.writer
            .write_all(&framed)
            .with_path("append", &self.path)?;
        self.file_size += framed.len() as u64;
        Ok(())
    }

    /// Hands buffered bytes to the OS.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().with_path("flush", &self.path)
    }

    /// Flushes and fsyncs the file.
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.writer
            .get_ref()
            .sync_data()
            .with_path("sync", &self.path)
    }

    /// Get the current file size
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Get the path to the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        // Best effort flush on drop
        if let Err(e) = self.writer.flush() {
            log::warn!("failed to flush {} on drop: {}", self.path.display(), e);
        }
    }
}
