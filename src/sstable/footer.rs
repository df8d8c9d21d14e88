//! SSTable footer implementation.
//!
//! The footer is a fixed-size (48 bytes) structure at the end of an SSTable
//! file. It locates the meta-index and index blocks and identifies the format.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};
use crate::sstable::{FOOTER_SIZE, FORMAT_VERSION, MAGIC_NUMBER};

/// Encoded size of a [`BlockHandle`].
pub const BLOCK_HANDLE_SIZE: usize = 16;

/// BlockHandle represents a pointer to a block in the SSTable file.
///
/// `size` includes the block trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    /// Offset of the block in the file
    pub offset: u64,
    /// Size of the block in bytes
    pub size: u64,
}

impl BlockHandle {
    /// Create a new BlockHandle
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Encode the BlockHandle to bytes (16 bytes: 8 for offset + 8 for size)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BLOCK_HANDLE_SIZE);
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.size);
        buf
    }

    /// Decode a BlockHandle from bytes
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < BLOCK_HANDLE_SIZE {
            return Err(Error::corrupt_block(format!(
                "block handle too short: {} bytes",
                data.len()
            )));
        }
        let offset = data.get_u64_le();
        let size = data.get_u64_le();
        Ok(Self { offset, size })
    }

    /// Get the end offset of this block
    pub fn end_offset(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

/// Footer is the last 48 bytes of an SSTable file.
///
/// Format:
/// ```text
/// [meta_index_handle: 16 bytes]
/// [index_handle: 16 bytes]
/// [format_version: u32]
/// [reserved: u32]
/// [magic: u64]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    /// Handle to the meta index block
    pub meta_index_handle: BlockHandle,
    /// Handle to the index block
    pub index_handle: BlockHandle,
    /// Table format version
    pub format_version: u32,
}

impl Footer {
    /// Create a new Footer for the current format version
    pub fn new(meta_index_handle: BlockHandle, index_handle: BlockHandle) -> Self {
        Self {
            meta_index_handle,
            index_handle,
            format_version: FORMAT_VERSION,
        }
    }

    /// Encode the footer to bytes (48 bytes)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        buf.extend_from_slice(&self.meta_index_handle.encode());
        buf.extend_from_slice(&self.index_handle.encode());
        buf.put_u32_le(self.format_version);
        buf.put_u32_le(0);
        buf.put_u64_le(MAGIC_NUMBER);
        buf
    }

    /// Decode a footer from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != FOOTER_SIZE {
            return Err(Error::corruption(format!(
                "footer size mismatch: expected {}, got {}",
                FOOTER_SIZE,
                data.len()
            )));
        }

        let magic = (&data[40..48]).get_u64_le();
        if magic != MAGIC_NUMBER {
            return Err(Error::corruption(format!(
                "invalid SSTable magic number: expected {:#x}, got {:#x}",
                MAGIC_NUMBER, magic
            )));
        }
        let format_version = (&data[32..36]).get_u32_le();
        if format_version != FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "unsupported table format version {}",
                format_version
            )));
        }

        Ok(Self {
            meta_index_handle: BlockHandle::decode(&data[0..16])?,
            index_handle: BlockHandle::decode(&data[16..32])?,
            format_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_handle_encode_decode() {
        let handle = BlockHandle::new(1234, 5678);
        let encoded = handle.encode();
        assert_eq!(encoded.len(), BLOCK_HANDLE_SIZE);
        assert_eq!(BlockHandle::decode(&encoded).unwrap(), handle);
        assert_eq!(handle.end_offset(), 1234 + 5678);
    }

    #[test]
    fn test_footer_encode_decode() {
        let footer = Footer::new(BlockHandle::new(100, 50), BlockHandle::new(150, 75));
        let encoded = footer.encode();
        assert_eq!(encoded.len(), FOOTER_SIZE);
        assert_eq!(Footer::decode(&encoded).unwrap(), footer);
    }

    #[test]
    fn test_footer_invalid_magic() {
        let mut encoded = Footer::new(BlockHandle::default(), BlockHandle::default()).encode();
        encoded[47] ^= 0xff;
        assert!(Footer::decode(&encoded).is_err());
    }

    #[test]
    fn test_footer_unknown_version() {
        let mut footer = Footer::new(BlockHandle::default(), BlockHandle::default());
        footer.format_version = 99;
        assert!(Footer::decode(&footer.encode()).is_err());
    }
}
