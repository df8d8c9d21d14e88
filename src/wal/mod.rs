//! Write-Ahead Log (WAL) implementation.
//!
//! The WAL ensures durability by persisting every write batch before it is
//! applied to the MemTable. Each memtable generation gets its own log file;
//! a log is deleted once every column family has flushed the data it holds.
//!
//! ## Architecture
//!
//! - **Record Format**: Each batch is one logical record with a CRC32 checksum
//! - **Fragmentation**: Large batches are split into First/Middle/Last fragments
//! - **Recovery**: On startup, logs are replayed in file-number order
//!
//! ## Usage
//!
//! ```rust,no_run
//! use strata::wal::{recover_wal, Wal};
//! use strata::WriteBatch;
//!
//! # fn main() -> Result<(), strata::Error> {
//! let mut wal = Wal::create(std::path::Path::new("./data"), 7)?;
//! let mut batch = WriteBatch::new();
//! batch.put(b"key1", b"value1");
//! wal.append(&batch, 1)?;
//! wal.sync()?;
//!
//! let recovered = recover_wal(std::path::Path::new("./data/000007.log"))?;
//! for (sequence, batch) in &recovered.batches {
//!     println!("batch at {} with {} ops", sequence, batch.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::LogReader;
pub use record::{RecordType, HEADER_SIZE, MAX_RECORD_SIZE};
pub use writer::LogWriter;

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::filename::wal_filename;
use crate::write_batch::WriteBatch;

/// An open write-ahead log file.
pub struct Wal {
    number: u64,
    writer: LogWriter,
}

impl Wal {
    /// Creates log number `number` inside `dir`.
    pub fn create(dir: &Path, number: u64) -> Result<Self> {
        let writer = LogWriter::create(dir.join(wal_filename(number)))?;
        Ok(Self { number, writer })
    }

    /// File number of this log.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Path of this log.
    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Appends `batch` with its first sequence number. Returns the sequence
    /// of the batch's last operation.
    pub fn append(&mut self, batch: &WriteBatch, first_sequence: u64) -> Result<u64> {
        self.writer.add_record(&batch.encode(first_sequence))?;
        Ok(first_sequence + batch.len().saturating_sub(1) as u64)
    }

    /// Hands buffered records to the OS.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }

    /// Flushes and fsyncs the log.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.sync()
    }

    /// Bytes appended so far.
    pub fn file_size(&self) -> u64 {
        self.writer.file_size()
    }
}

/// Batches read back from one log file.
#[derive(Debug)]
pub struct WalRecovery {
    /// Path of the replayed log.
    pub path: PathBuf,
    /// `(first_sequence, batch)` pairs in log order.
    pub batches: Vec<(u64, WriteBatch)>,
    /// Tail damage that ended the replay, if any. Always
    /// [`Error::TruncatedLog`]; mid-file corruption fails the call.
    pub tail: Option<Error>,
}

/// Reads every intact batch from the log at `path`.
pub fn recover_wal(path: &Path) -> Result<WalRecovery> {
    let mut reader = LogReader::open(path)?;
    let mut batches = Vec::new();
    let tail = loop {
        match reader.read_record() {
            Ok(Some(payload)) => batches.push(WriteBatch::decode(&payload)?),
            Ok(None) => break None,
            Err(e @ Error::TruncatedLog { .. }) => break Some(e),
            Err(e) => return Err(e),
        }
    };
    Ok(WalRecovery {
        path: path.to_path_buf(),
        batches,
        tail,
    })
}
