//! Error types for the strata storage engine.

use std::io;
use std::path::Path;

use thiserror::Error;

/// The result type used throughout strata.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for strata operations.
///
/// A missing key is not an error: point reads return `Ok(None)`.
/// [`Error::NotFound`] is reserved for missing databases, files and
/// column families.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error, with the operation and path it happened on.
    #[error("IO error ({context}): {source}")]
    Io {
        /// Operation and path, e.g. `"open /tmp/db/000004.sst"`.
        context: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// A table block failed its checksum or is structurally malformed.
    #[error("Corrupt block: {0}")]
    CorruptBlock(String),

    /// A log ended in an incomplete or corrupt record.
    ///
    /// Everything before `offset` was read successfully.
    #[error("Truncated log at offset {offset}: {reason}")]
    TruncatedLog {
        /// Byte offset of the first unreadable record.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// Data corruption outside a table block (manifest, WAL body, file set).
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Keys were added to a table builder out of order.
    #[error("Out of order write: {0}")]
    OutOfOrderWrite(String),

    /// The requested database, file or column family was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The database is in an invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The database or column family already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A background flush or compaction failed.
    #[error("Background error: {0}")]
    Background(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new corrupt block error.
    pub fn corrupt_block(msg: impl Into<String>) -> Self {
        Error::CorruptBlock(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Wraps an I/O error with the operation and path it came from.
    pub fn io(op: &str, path: &Path, source: io::Error) -> Self {
        Error::Io {
            context: format!("{} {}", op, path.display()),
            source,
        }
    }

    /// Returns true for data-integrity failures.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::CorruptBlock(_) | Error::TruncatedLog { .. } | Error::Corruption(_)
        )
    }

    /// Produces an equivalent error for another caller.
    ///
    /// Used when one failure has to be reported to every writer in a
    /// commit group; `io::Error` itself is not `Clone`.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::Io { context, source } => Error::Io {
                context: context.clone(),
                source: io::Error::new(source.kind(), source.to_string()),
            },
            Error::CorruptBlock(m) => Error::CorruptBlock(m.clone()),
            Error::TruncatedLog { offset, reason } => Error::TruncatedLog {
                offset: *offset,
                reason: reason.clone(),
            },
            Error::Corruption(m) => Error::Corruption(m.clone()),
            Error::OutOfOrderWrite(m) => Error::OutOfOrderWrite(m.clone()),
            Error::NotFound(m) => Error::NotFound(m.clone()),
            Error::InvalidArgument(m) => Error::InvalidArgument(m.clone()),
            Error::InvalidState(m) => Error::InvalidState(m.clone()),
            Error::AlreadyExists(m) => Error::AlreadyExists(m.clone()),
            Error::Serialization(m) => Error::Serialization(m.clone()),
            Error::Background(m) => Error::Background(m.clone()),
        }
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io {
            context: "io".to_string(),
            source,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Attaches operation and path context to `io::Result`s.
pub(crate) trait IoContext<T> {
    fn with_path(self, op: &str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::result::Result<T, io::Error> {
    fn with_path(self, op: &str, path: &Path) -> Result<T> {
        self.map_err(|e| Error::io(op, path, e))
    }
}
