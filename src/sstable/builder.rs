//! SSTable builder implementation.
//!
//! Builds a table file from records arriving in strictly increasing
//! internal key order.

use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::{ColumnFamilyOptions, CompressionType};
use crate::error::{Error, IoContext, Result};
use crate::filter::BloomFilterBuilder;
use crate::memtable::{
    encode_internal_key, extract_user_key, parse_internal_key, InternalKeyComparator, Record,
    ValueType,
};
use crate::sstable::block::{seal_block, BlockBuilder};
use crate::sstable::footer::{BlockHandle, Footer};
use crate::sstable::index::IndexBlockBuilder;
use crate::sstable::properties::TableProperties;
use crate::sstable::{DEFAULT_BLOCK_SIZE, FILTER_BLOCK_KEY, PROPERTIES_BLOCK_KEY};

/// Knobs for writing one table.
#[derive(Debug, Clone, Copy)]
pub struct TableBuilderOptions {
    /// Target uncompressed size of a data block.
    pub block_size: usize,
    /// Keys between restart points in a data block.
    pub restart_interval: usize,
    /// Codec for data blocks.
    pub compression: CompressionType,
    /// Bloom filter density; 0 writes no filter.
    pub bloom_bits_per_key: usize,
}

impl Default for TableBuilderOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            restart_interval: 16,
            compression: CompressionType::None,
            bloom_bits_per_key: 10,
        }
    }
}

impl TableBuilderOptions {
    /// Settings for a table written into `level` of a column family.
    pub fn from_cf(cf: &ColumnFamilyOptions, level: usize) -> Self {
        Self {
            block_size: cf.block_size,
            restart_interval: cf.block_restart_interval,
            compression: cf.compression_for_level(level),
            bloom_bits_per_key: cf.bloom_bits_per_key,
        }
    }
}

/// TableBuilder builds an SSTable file.
///
/// Usage:
/// ```no_run
/// use strata::comparator::bytewise;
/// use strata::memtable::{InternalKeyComparator, Record};
/// use strata::sstable::{TableBuilder, TableBuilderOptions};
///
/// let icmp = InternalKeyComparator::new(bytewise());
/// let mut builder =
///     TableBuilder::new("000001.sst", icmp, TableBuilderOptions::default()).unwrap();
/// builder.add_record(&Record::put("key1", "value1", 1)).unwrap();
/// builder.add_record(&Record::put("key2", "value2", 2)).unwrap();
/// let (size, props) = builder.finish().unwrap();
/// assert_eq!(props.num_entries, 2);
/// ```
pub struct TableBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    icmp: InternalKeyComparator,
    options: TableBuilderOptions,
    data_block: BlockBuilder,
    index: IndexBlockBuilder,
    filter: Option<BloomFilterBuilder>,
    last_key: Vec<u8>,
    offset: u64,
    props: TableProperties,
}

impl TableBuilder {
    /// Creates the file at `path` and prepares to write into it.
    pub fn new(
        path: impl AsRef<Path>,
        icmp: InternalKeyComparator,
        options: TableBuilderOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).with_path("create", &path)?;
        let filter = (options.bloom_bits_per_key > 0)
            .then(|| BloomFilterBuilder::new(options.bloom_bits_per_key));
        let props = TableProperties {
            comparator: icmp.user_comparator().name().to_string(),
            compression: options.compression,
            ..Default::default()
        };
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            data_block: BlockBuilder::new(options.restart_interval),
            index: IndexBlockBuilder::new(),
            filter,
            icmp,
            options,
            last_key: Vec::new(),
            offset: 0,
            props,
        })
    }

    /// Appends an encoded internal key and its value.
    ///
    /// Keys must be strictly increasing under the internal key order.
    pub fn add(&mut self, internal_key: &[u8], value: &[u8]) -> Result<()> {
        let (user_key, sequence, value_type) = parse_internal_key(internal_key)
            .map_err(|e| Error::invalid_argument(format!("malformed internal key: {}", e)))?;

        let first = self.props.num_entries == 0;
        if !first && self.icmp.compare(internal_key, &self.last_key) != Ordering::Greater {
            return Err(Error::OutOfOrderWrite(format!(
                "{:?} does not sort after {:?}",
                String::from_utf8_lossy(user_key),
                String::from_utf8_lossy(extract_user_key(&self.last_key)),
            )));
        }

        let new_user_key = first
            || self
                .icmp
                .compare_user(user_key, extract_user_key(&self.last_key))
                != Ordering::Equal;
        if new_user_key {
            if let Some(filter) = self.filter.as_mut() {
                filter.add(user_key);
            }
        }

        self.data_block.add(internal_key, value);

        let props = &mut self.props;
        if first {
            props.smallest_key = internal_key.to_vec();
        }
        props.num_entries += 1;
        match value_type {
            ValueType::Deletion => props.num_deletions += 1,
            ValueType::Merge => props.num_merges += 1,
            ValueType::Value => {}
        }
        props.raw_key_size += internal_key.len() as u64;
        props.raw_value_size += value.len() as u64;
        props.smallest_sequence = props.smallest_sequence.min(sequence);
        props.largest_sequence = props.largest_sequence.max(sequence);

        self.last_key.clear();
        self.last_key.extend_from_slice(internal_key);

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    /// Appends a decoded record.
    pub fn add_record(&mut self, record: &Record) -> Result<()> {
        let key = encode_internal_key(&record.key, record.sequence, record.value_type);
        self.add(&key, &record.value)
    }

    fn write_raw(&mut self, stored: &[u8]) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, stored.len() as u64);
        self.writer
            .write_all(stored)
            .with_path("write", &self.path)?;
        self.offset += stored.len() as u64;
        Ok(handle)
    }

    /// Writes the buffered data block and indexes it.
    pub fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let raw = self.data_block.finish();
        let stored = seal_block(&raw, self.options.compression)?;
        let handle = self.write_raw(&stored)?;
        self.index.add_entry(&self.last_key, handle);
        self.props.num_data_blocks += 1;
        self.props.data_size += handle.size;
        Ok(())
    }

    /// Writes the meta blocks and footer, then fsyncs the file.
    ///
    /// Returns the final file size and the table's properties.
    pub fn finish(mut self) -> Result<(u64, TableProperties)> {
        self.flush_data_block()?;

        let mut meta_index = BlockBuilder::new(1);

        if let Some(filter) = self.filter.take() {
            let stored = seal_block(&filter.finish(), CompressionType::None)?;
            let handle = self.write_raw(&stored)?;
            self.props.filter_size = handle.size;
            meta_index.add(FILTER_BLOCK_KEY.as_bytes(), &handle.encode());
        }

        self.props.largest_key = self.last_key.clone();
        let stored = seal_block(&self.props.encode()?, CompressionType::None)?;
        let handle = self.write_raw(&stored)?;
        meta_index.add(PROPERTIES_BLOCK_KEY.as_bytes(), &handle.encode());

        let stored = seal_block(&meta_index.finish(), CompressionType::None)?;
        let meta_index_handle = self.write_raw(&stored)?;

        let stored = seal_block(&self.index.finish(), CompressionType::None)?;
        let index_handle = self.write_raw(&stored)?;

        let footer = Footer::new(meta_index_handle, index_handle);
        self.write_raw(&footer.encode())?;

        self.writer.flush().with_path("flush", &self.path)?;
        self.writer
            .get_ref()
            .sync_all()
            .with_path("sync", &self.path)?;

        Ok((self.offset, self.props))
    }

    /// Discards the partially written file.
    pub fn abandon(self) -> Result<()> {
        let path = self.path.clone();
        drop(self.writer);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io("remove", &path, e)),
        }
    }

    /// Records added so far.
    pub fn num_entries(&self) -> u64 {
        self.props.num_entries
    }

    /// Bytes written plus the buffered block.
    pub fn file_size(&self) -> u64 {
        self.offset + self.data_block.current_size_estimate() as u64
    }

    /// Last internal key added.
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    /// Path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::bytewise;
    use tempfile::TempDir;

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(bytewise())
    }

    #[test]
    fn test_builder_properties() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        let mut builder = TableBuilder::new(&path, icmp(), TableBuilderOptions::default()).unwrap();
        builder.add_record(&Record::put("a", "1", 5)).unwrap();
        builder.add_record(&Record::delete("b", 7)).unwrap();
        builder.add_record(&Record::merge("c", "+1", 6)).unwrap();
        let (size, props) = builder.finish().unwrap();

        assert_eq!(size, fs::metadata(&path).unwrap().len());
        assert_eq!(props.num_entries, 3);
        assert_eq!(props.num_deletions, 1);
        assert_eq!(props.num_merges, 1);
        assert_eq!(props.smallest_sequence, 5);
        assert_eq!(props.largest_sequence, 7);
        assert_eq!(props.smallest_key, Record::put("a", "", 5).internal_key());
        assert_eq!(props.largest_key, Record::merge("c", "", 6).internal_key());
        assert_eq!(props.comparator, "strata.BytewiseComparator");
    }

    #[test]
    fn test_out_of_order_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        let mut builder = TableBuilder::new(&path, icmp(), TableBuilderOptions::default()).unwrap();
        builder.add_record(&Record::put("b", "1", 1)).unwrap();
        assert!(matches!(
            builder.add_record(&Record::put("a", "1", 2)),
            Err(Error::OutOfOrderWrite(_))
        ));
        // Same user key with an older sequence sorts after; a newer one does not.
        builder.add_record(&Record::put("b", "0", 0)).unwrap();
        assert!(matches!(
            builder.add_record(&Record::put("b", "2", 9)),
            Err(Error::OutOfOrderWrite(_))
        ));
        // Exact duplicate.
        assert!(matches!(
            builder.add_record(&Record::put("b", "0", 0)),
            Err(Error::OutOfOrderWrite(_))
        ));
    }

    #[test]
    fn test_malformed_key_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        let mut builder = TableBuilder::new(&path, icmp(), TableBuilderOptions::default()).unwrap();
        assert!(matches!(
            builder.add(b"short", b"v"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_abandon_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        let mut builder = TableBuilder::new(&path, icmp(), TableBuilderOptions::default()).unwrap();
        builder.add_record(&Record::put("a", "1", 1)).unwrap();
        builder.abandon().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_small_blocks_split() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        let opts = TableBuilderOptions {
            block_size: 128,
            ..Default::default()
        };
        let mut builder = TableBuilder::new(&path, icmp(), opts).unwrap();
        for i in 0..100 {
            builder
                .add_record(&Record::put(format!("key{:04}", i), vec![b'x'; 32], 1))
                .unwrap();
        }
        let (_, props) = builder.finish().unwrap();
        assert!(props.num_data_blocks > 10);
    }
}
