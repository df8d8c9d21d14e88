//! SSTable (Sorted String Table) implementation.
//!
//! SSTable is an immutable, sorted file format for storing internal-key
//! records. The format is designed for efficient sequential writes and
//! random reads.
//!
//! ## File Format
//!
//! ```text
//! [Data Block 1]
//! [Data Block 2]
//! ...
//! [Data Block N]
//! [Filter Block]     // Bloom filter over user keys
//! [Properties Block] // bincode-encoded TableProperties
//! [Meta Index Block] // "filter.bloom", "properties" -> handles
//! [Index Block]      // last internal key of each data block -> handle
//! [Footer: 48B]      // Points to meta index and index blocks
//! ```
//!
//! Every block is followed by a 5-byte trailer (compression tag + CRC32).
//! Only data blocks are ever compressed.
//!
//! ## Index Format
//!
//! The index block contains entries that map keys to data blocks:
//! - Key: The largest internal key in the block
//! - Value: 16-byte [`BlockHandle`] (offset, size including trailer)

pub mod block;
pub mod builder;
pub mod footer;
pub mod index;
pub mod properties;
pub mod reader;

pub use block::{seal_block, unseal_block, Block, BlockBuilder, BlockIterator, BLOCK_TRAILER_SIZE};
pub use builder::{TableBuilder, TableBuilderOptions};
pub use footer::{BlockHandle, Footer, BLOCK_HANDLE_SIZE};
pub use properties::TableProperties;
pub use reader::{Table, TableIterator, TableScan};

/// Default block size (4KB)
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Footer size in bytes (fixed)
pub const FOOTER_SIZE: usize = 48;

/// Current table format version.
pub const FORMAT_VERSION: u32 = 1;

/// Magic number for SSTable files
pub const MAGIC_NUMBER: u64 = 0x5441424c455f5353; // "SSTABLE_" in hex

/// Meta-index key of the filter block.
pub const FILTER_BLOCK_KEY: &str = "filter.bloom";

/// Meta-index key of the properties block.
pub const PROPERTIES_BLOCK_KEY: &str = "properties";
