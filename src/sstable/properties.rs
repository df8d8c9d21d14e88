//! Table properties block.

use serde::{Deserialize, Serialize};

use crate::config::CompressionType;
use crate::error::Result;

/// Summary statistics written into every table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProperties {
    /// Records in the table.
    pub num_entries: u64,
    /// Tombstones among them.
    pub num_deletions: u64,
    /// Merge operands among them.
    pub num_merges: u64,
    /// Data blocks written.
    pub num_data_blocks: u64,
    /// Sum of internal key lengths.
    pub raw_key_size: u64,
    /// Sum of value lengths.
    pub raw_value_size: u64,
    /// Bytes of data blocks on disk, trailers included.
    pub data_size: u64,
    /// Bytes of the filter block.
    pub filter_size: u64,
    /// Smallest internal key.
    pub smallest_key: Vec<u8>,
    /// Largest internal key.
    pub largest_key: Vec<u8>,
    /// Lowest sequence number.
    pub smallest_sequence: u64,
    /// Highest sequence number.
    pub largest_sequence: u64,
    /// Name of the user comparator the table is ordered by.
    pub comparator: String,
    /// Compression requested for data blocks.
    pub compression: CompressionType,
}

impl Default for TableProperties {
    fn default() -> Self {
        Self {
            num_entries: 0,
            num_deletions: 0,
            num_merges: 0,
            num_data_blocks: 0,
            raw_key_size: 0,
            raw_value_size: 0,
            data_size: 0,
            filter_size: 0,
            smallest_key: Vec::new(),
            largest_key: Vec::new(),
            smallest_sequence: u64::MAX,
            largest_sequence: 0,
            comparator: String::new(),
            compression: CompressionType::None,
        }
    }
}

impl TableProperties {
    /// Serializes with bincode.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserializes with bincode.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}
