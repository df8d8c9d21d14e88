//! Index block implementation for SSTable.
//!
//! The index block holds one entry per data block: the block's last
//! internal key mapped to its [`BlockHandle`]. Every entry is a restart
//! point, so a seek is a plain binary search.

use crate::error::Result;
use crate::memtable::InternalKeyComparator;
use crate::sstable::block::{Block, BlockBuilder, BlockIterator};
use crate::sstable::footer::BlockHandle;

/// Builds an index block.
pub struct IndexBlockBuilder {
    builder: BlockBuilder,
}

impl IndexBlockBuilder {
    /// Creates an empty index builder.
    pub fn new() -> Self {
        Self {
            builder: BlockBuilder::new(1),
        }
    }

    /// Records that the block at `handle` ends with `last_key`.
    pub fn add_entry(&mut self, last_key: &[u8], handle: BlockHandle) {
        self.builder.add(last_key, &handle.encode());
    }

    /// Number of data blocks indexed.
    pub fn len(&self) -> usize {
        self.builder.num_entries()
    }

    /// True when nothing was indexed.
    pub fn is_empty(&self) -> bool {
        self.builder.is_empty()
    }

    /// Serializes the index block.
    pub fn finish(&mut self) -> Vec<u8> {
        self.builder.finish()
    }
}

impl Default for IndexBlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Cursor over an index block.
pub struct IndexIterator {
    inner: BlockIterator,
}

impl IndexIterator {
    /// Wraps `block`, ordering its keys with `comparator`.
    pub fn new(block: &Block, comparator: &InternalKeyComparator) -> Self {
        Self {
            inner: block.iter(comparator),
        }
    }

    /// Positions at the first data block.
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.inner.seek_to_first()
    }

    /// Positions at the first data block that may hold keys `>= target`.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.inner.seek(target)
    }

    /// Moves to the next data block.
    pub fn next(&mut self) -> Result<()> {
        self.inner.next()
    }

    /// Whether positioned at an entry.
    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    /// Last internal key of the current data block.
    pub fn last_key(&self) -> &[u8] {
        self.inner.key()
    }

    /// Location of the current data block.
    pub fn handle(&self) -> Result<BlockHandle> {
        BlockHandle::decode(self.inner.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::bytewise;
    use crate::memtable::{encode_internal_key, ValueType};
    use bytes::Bytes;

    fn ikey(k: &str) -> Vec<u8> {
        encode_internal_key(k.as_bytes(), 1, ValueType::Value)
    }

    #[test]
    fn test_index_seek() {
        let icmp = InternalKeyComparator::new(bytewise());
        let mut builder = IndexBlockBuilder::new();
        builder.add_entry(&ikey("c"), BlockHandle::new(0, 100));
        builder.add_entry(&ikey("f"), BlockHandle::new(100, 100));
        builder.add_entry(&ikey("k"), BlockHandle::new(200, 100));
        assert_eq!(builder.len(), 3);
        let block = Block::new(Bytes::from(builder.finish())).unwrap();

        let mut iter = IndexIterator::new(&block, &icmp);
        iter.seek(&ikey("a")).unwrap();
        assert_eq!(iter.handle().unwrap(), BlockHandle::new(0, 100));
        iter.seek(&ikey("d")).unwrap();
        assert_eq!(iter.handle().unwrap(), BlockHandle::new(100, 100));
        iter.seek(&ikey("k")).unwrap();
        assert_eq!(iter.handle().unwrap(), BlockHandle::new(200, 100));
        iter.seek(&ikey("z")).unwrap();
        assert!(!iter.valid());
    }

    #[test]
    fn test_index_walk() {
        let icmp = InternalKeyComparator::new(bytewise());
        let mut builder = IndexBlockBuilder::new();
        for i in 0..10u64 {
            builder.add_entry(&ikey(&format!("key{:02}", i)), BlockHandle::new(i * 10, 10));
        }
        let block = Block::new(Bytes::from(builder.finish())).unwrap();
        let mut iter = IndexIterator::new(&block, &icmp);
        iter.seek_to_first().unwrap();
        let mut count = 0;
        while iter.valid() {
            assert_eq!(iter.handle().unwrap().offset, count * 10);
            count += 1;
            iter.next().unwrap();
        }
        assert_eq!(count, 10);
    }
}
