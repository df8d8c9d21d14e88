//! SSTable reader implementation.
//!
//! Opens a table, verifies its footer, meta blocks and comparator, and
//! serves point lookups and ordered iteration. Blocks are read with
//! positional I/O so any number of threads can share one file handle.

use std::cmp::Ordering;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::cache::{BlockCache, CacheKey};
use crate::error::{Error, IoContext, Result};
use crate::filter::BloomFilter;
use crate::iterator::InternalIterator;
use crate::memtable::{
    encode_internal_key, extract_user_key, parse_internal_key, InternalKeyComparator, Record,
    ValueType, MAX_SEQUENCE,
};
use crate::sstable::block::{unseal_block, Block, BlockIterator};
use crate::sstable::footer::{BlockHandle, Footer};
use crate::sstable::index::IndexIterator;
use crate::sstable::properties::TableProperties;
use crate::sstable::{FILTER_BLOCK_KEY, FOOTER_SIZE, PROPERTIES_BLOCK_KEY};

/// Read access to one table file.
///
/// Usage:
/// ```no_run
/// use strata::comparator::bytewise;
/// use strata::memtable::InternalKeyComparator;
/// use strata::sstable::Table;
///
/// let icmp = InternalKeyComparator::new(bytewise());
/// let table = Table::open("000001.sst", 1, icmp, None).unwrap();
/// if let Some(record) = table.get(b"key1", u64::MAX).unwrap() {
///     println!("Found: {:?}", record);
/// }
/// ```
pub struct Table {
    file: File,
    path: PathBuf,
    file_number: u64,
    file_size: u64,
    icmp: InternalKeyComparator,
    index: Block,
    filter: Option<BloomFilter>,
    props: TableProperties,
    cache: Option<Arc<BlockCache>>,
}

impl Table {
    /// Opens and verifies a table file.
    ///
    /// Fails with [`Error::InvalidArgument`] if the table was written with
    /// a different comparator than `icmp` wraps.
    pub fn open(
        path: impl AsRef<Path>,
        file_number: u64,
        icmp: InternalKeyComparator,
        cache: Option<Arc<BlockCache>>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).with_path("open", &path)?;
        let file_size = file.metadata().with_path("stat", &path)?.len();
        if file_size < FOOTER_SIZE as u64 {
            return Err(Error::corruption(format!(
                "{} is too small to be a table ({} bytes)",
                path.display(),
                file_size
            )));
        }

        let mut footer_buf = vec![0u8; FOOTER_SIZE];
        read_at(&file, &mut footer_buf, file_size - FOOTER_SIZE as u64)
            .with_path("read", &path)?;
        let footer = Footer::decode(&footer_buf)?;

        let mut table = Self {
            file,
            path,
            file_number,
            file_size,
            icmp,
            index: Block::new(Bytes::from_static(&[0, 0, 0, 0]))?,
            filter: None,
            props: TableProperties::default(),
            cache,
        };

        let meta_index = table.read_uncached(&footer.meta_index_handle)?;
        let mut filter_handle = None;
        let mut props_handle = None;
        let mut iter = meta_index.iter_bytewise();
        iter.seek_to_first()?;
        while iter.valid() {
            let handle = BlockHandle::decode(iter.value())?;
            match iter.key() {
                k if k == FILTER_BLOCK_KEY.as_bytes() => filter_handle = Some(handle),
                k if k == PROPERTIES_BLOCK_KEY.as_bytes() => props_handle = Some(handle),
                _ => {}
            }
            iter.next()?;
        }

        let props_handle = props_handle.ok_or_else(|| {
            Error::corruption(format!("{} has no properties block", table.path.display()))
        })?;
        let props_data = table.read_raw(&props_handle)?;
        table.props = TableProperties::decode(&props_data)
            .map_err(|e| Error::corrupt_block(format!("properties block: {}", e)))?;

        let expected = table.icmp.user_comparator().name();
        if table.props.comparator != expected {
            return Err(Error::invalid_argument(format!(
                "{} was written with comparator {:?}, opened with {:?}",
                table.path.display(),
                table.props.comparator,
                expected
            )));
        }

        if let Some(handle) = filter_handle {
            let data = table.read_raw(&handle)?;
            table.filter = Some(BloomFilter::decode(&data)?);
        }

        table.index = table.read_uncached(&footer.index_handle)?;
        Ok(table)
    }

    /// Reads and verifies the stored bytes at `handle`.
    fn read_raw(&self, handle: &BlockHandle) -> Result<Bytes> {
        let data_end = self.file_size - FOOTER_SIZE as u64;
        if handle.offset > data_end || handle.end_offset() > data_end {
            return Err(Error::corrupt_block(format!(
                "block handle {:?} outside {} ({} bytes)",
                handle,
                self.path.display(),
                self.file_size
            )));
        }
        let mut buf = vec![0u8; handle.size as usize];
        read_at(&self.file, &mut buf, handle.offset).with_path("read", &self.path)?;
        unseal_block(&buf)
    }

    fn read_uncached(&self, handle: &BlockHandle) -> Result<Block> {
        Block::new(self.read_raw(handle)?)
    }

    /// Reads a data block through the block cache.
    pub fn read_block(&self, handle: &BlockHandle, fill_cache: bool) -> Result<Block> {
        let key = CacheKey::new(self.file_number, handle.offset);
        if let Some(cache) = &self.cache {
            if let Some(block) = cache.get(&key) {
                return Ok(block);
            }
        }
        let block = self.read_uncached(handle)?;
        if fill_cache {
            if let Some(cache) = &self.cache {
                cache.insert(key, block.clone());
            }
        }
        Ok(block)
    }

    /// False means the table definitely holds no record of `user_key`.
    pub fn may_contain(&self, user_key: &[u8]) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |f| f.may_contain(user_key))
    }

    fn walk_versions<F>(
        &self,
        user_key: &[u8],
        sequence: u64,
        fill_cache: bool,
        mut visit: F,
    ) -> Result<bool>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        if !self.may_contain(user_key) {
            return Ok(false);
        }
        let lookup = encode_internal_key(user_key, sequence, ValueType::FOR_SEEK);
        let mut index = IndexIterator::new(&self.index, &self.icmp);
        index.seek(&lookup)?;
        let mut first_block = true;
        while index.valid() {
            let block = self.read_block(&index.handle()?, fill_cache)?;
            let mut iter = block.iter(&self.icmp);
            if first_block {
                iter.seek(&lookup)?;
                first_block = false;
            } else {
                iter.seek_to_first()?;
            }
            while iter.valid() {
                if self.icmp.compare_user(extract_user_key(iter.key()), user_key) != Ordering::Equal {
                    return Ok(false);
                }
                if visit(iter.key(), iter.value())? {
                    return Ok(true);
                }
                iter.next()?;
            }
            index.next()?;
        }
        Ok(false)
    }

    /// Visits the versions of `user_key` with sequence `<= sequence`,
    /// newest first. `visit` returns `true` to stop; the return value says
    /// whether it did.
    pub fn for_each_version<F>(
        &self,
        user_key: &[u8],
        sequence: u64,
        fill_cache: bool,
        mut visit: F,
    ) -> Result<bool>
    where
        F: FnMut(ValueType, &[u8]) -> Result<bool>,
    {
        self.walk_versions(user_key, sequence, fill_cache, |key, value| {
            let (_, _, value_type) = parse_internal_key(key)?;
            visit(value_type, value)
        })
    }

    /// Newest record of `user_key` visible at `sequence`.
    pub fn get(&self, user_key: &[u8], sequence: u64) -> Result<Option<Record>> {
        let mut found = None;
        self.walk_versions(user_key, sequence, true, |key, value| {
            found = Some(Record::from_encoded(key, value)?);
            Ok(true)
        })?;
        Ok(found)
    }

    /// Iterates every record in internal key order.
    pub fn iter(self: &Arc<Self>, fill_cache: bool) -> TableIterator {
        TableIterator {
            index: IndexIterator::new(&self.index, &self.icmp),
            table: Arc::clone(self),
            data: None,
            fill_cache,
        }
    }

    /// Records whose user key lies in `[start, end)`, all versions included.
    pub fn scan(self: &Arc<Self>, start: Option<&[u8]>, end: Option<&[u8]>) -> TableScan {
        let mut scan = TableScan {
            iter: self.iter(true),
            end: end.map(<[u8]>::to_vec),
            done: false,
            pending_error: None,
        };
        scan.restart(start);
        scan
    }

    /// Table properties.
    pub fn properties(&self) -> &TableProperties {
        &self.props
    }

    /// File number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// File size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Smallest internal key.
    pub fn smallest(&self) -> &[u8] {
        &self.props.smallest_key
    }

    /// Largest internal key.
    pub fn largest(&self) -> &[u8] {
        &self.props.largest_key
    }

    /// Path of the table file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Comparator the table is ordered by.
    pub fn comparator(&self) -> &InternalKeyComparator {
        &self.icmp
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("file_number", &self.file_number)
            .field("file_size", &self.file_size)
            .field("entries", &self.props.num_entries)
            .finish()
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Two-level iterator over a table: the index picks a data block, the
/// block iterator walks it.
pub struct TableIterator {
    table: Arc<Table>,
    index: IndexIterator,
    data: Option<BlockIterator>,
    fill_cache: bool,
}

impl TableIterator {
    fn load_block(&mut self) -> Result<()> {
        self.data = if self.index.valid() {
            let block = self.table.read_block(&self.index.handle()?, self.fill_cache)?;
            Some(block.iter(&self.table.icmp))
        } else {
            None
        };
        Ok(())
    }

    fn skip_empty_forward(&mut self) -> Result<()> {
        loop {
            if matches!(&self.data, Some(d) if d.valid()) {
                return Ok(());
            }
            if !self.index.valid() {
                self.data = None;
                return Ok(());
            }
            self.index.next()?;
            self.load_block()?;
            if let Some(data) = self.data.as_mut() {
                data.seek_to_first()?;
            }
        }
    }

    /// The table being iterated.
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }
}

impl InternalIterator for TableIterator {
    fn valid(&self) -> bool {
        self.data.as_ref().is_some_and(BlockIterator::valid)
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.index.seek_to_first()?;
        self.load_block()?;
        if let Some(data) = self.data.as_mut() {
            data.seek_to_first()?;
        }
        self.skip_empty_forward()
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.index.seek(target)?;
        self.load_block()?;
        if let Some(data) = self.data.as_mut() {
            data.seek(target)?;
        }
        self.skip_empty_forward()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(data) = self.data.as_mut() {
            data.next()?;
        }
        self.skip_empty_forward()
    }

    fn key(&self) -> &[u8] {
        self.data.as_ref().map_or(&[][..], BlockIterator::key)
    }

    fn value(&self) -> &[u8] {
        self.data.as_ref().map_or(&[][..], BlockIterator::value)
    }
}

/// Range scan over a table yielding decoded records.
///
/// Stops after the first error. [`TableScan::restart`] repositions it.
pub struct TableScan {
    iter: TableIterator,
    end: Option<Vec<u8>>,
    done: bool,
    pending_error: Option<Error>,
}

impl TableScan {
    /// Repositions at the first record whose user key is `>= start`.
    pub fn restart(&mut self, start: Option<&[u8]>) {
        let positioned = match start {
            Some(key) => self
                .iter
                .seek(&encode_internal_key(key, MAX_SEQUENCE, ValueType::FOR_SEEK)),
            None => self.iter.seek_to_first(),
        };
        self.done = false;
        self.pending_error = positioned.err();
    }
}

impl Iterator for TableScan {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_error.take() {
            self.done = true;
            return Some(Err(err));
        }
        if self.done || !self.iter.valid() {
            return None;
        }
        if let Some(end) = &self.end {
            let icmp = self.iter.table.comparator();
            if icmp.compare_user(extract_user_key(self.iter.key()), end) != Ordering::Less {
                self.done = true;
                return None;
            }
        }
        let record = Record::from_encoded(self.iter.key(), self.iter.value());
        if record.is_err() {
            self.done = true;
            return Some(record);
        }
        if let Err(e) = self.iter.next() {
            self.pending_error = Some(e);
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{bytewise, ReverseBytewiseComparator};
    use crate::sstable::{TableBuilder, TableBuilderOptions};
    use std::fs;
    use tempfile::TempDir;

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(bytewise())
    }

    fn write_table(path: &Path, records: &[Record], opts: TableBuilderOptions) {
        let mut builder = TableBuilder::new(path, icmp(), opts).unwrap();
        for r in records {
            builder.add_record(r).unwrap();
        }
        builder.finish().unwrap();
    }

    fn sample(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::put(format!("key{:05}", i), format!("value{}", i), i as u64 + 1))
            .collect()
    }

    fn small_blocks() -> TableBuilderOptions {
        TableBuilderOptions {
            block_size: 256,
            ..Default::default()
        }
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        let records = sample(500);
        write_table(&path, &records, small_blocks());

        let table = Arc::new(Table::open(&path, 1, icmp(), None).unwrap());
        assert_eq!(table.properties().num_entries, 500);
        for r in records.iter().step_by(37) {
            let found = table.get(&r.key, MAX_SEQUENCE).unwrap().unwrap();
            assert_eq!(found.value, r.value);
        }
        assert!(table.get(b"missing", MAX_SEQUENCE).unwrap().is_none());

        let scanned: Vec<Record> = table.scan(None, None).map(|r| r.unwrap()).collect();
        assert_eq!(scanned, records);
    }

    #[test]
    fn test_versions_respect_sequence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        let records = vec![
            Record::put("a", "v3", 30),
            Record::delete("a", 20),
            Record::put("a", "v1", 10),
            Record::put("b", "x", 5),
        ];
        write_table(&path, &records, TableBuilderOptions::default());
        let table = Table::open(&path, 1, icmp(), None).unwrap();

        let at = |seq| table.get(b"a", seq).unwrap().map(|r| (r.value_type, r.value));
        assert_eq!(at(35), Some((ValueType::Value, b"v3".to_vec())));
        assert_eq!(at(25), Some((ValueType::Deletion, Vec::new())));
        assert_eq!(at(15), Some((ValueType::Value, b"v1".to_vec())));
        assert_eq!(at(5), None);

        let mut seen = Vec::new();
        table
            .for_each_version(b"a", MAX_SEQUENCE, true, |ty, _| {
                seen.push(ty);
                Ok(false)
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![ValueType::Value, ValueType::Deletion, ValueType::Value]
        );
    }

    #[test]
    fn test_versions_span_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        let records: Vec<_> = (1..=50u64)
            .rev()
            .map(|seq| Record::merge("counter", vec![b'x'; 40], seq))
            .collect();
        write_table(&path, &records, small_blocks());
        let table = Table::open(&path, 1, icmp(), None).unwrap();
        let mut count = 0;
        table
            .for_each_version(b"counter", MAX_SEQUENCE, true, |_, _| {
                count += 1;
                Ok(false)
            })
            .unwrap();
        assert_eq!(count, 50);
    }

    #[test]
    fn test_scan_range_and_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        write_table(&path, &sample(100), small_blocks());
        let table = Arc::new(Table::open(&path, 1, icmp(), None).unwrap());

        let mut scan = table.scan(Some(b"key00010"), Some(b"key00020"));
        let keys: Vec<_> = scan.by_ref().map(|r| r.unwrap().key).collect();
        assert_eq!(keys.len(), 10);
        assert_eq!(keys[0], b"key00010");
        assert_eq!(keys[9], b"key00019");

        scan.restart(Some(b"key00015"));
        assert_eq!(scan.next().unwrap().unwrap().key, b"key00015");
    }

    #[test]
    fn test_table_iterator_seek() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        write_table(&path, &sample(200), small_blocks());
        let table = Arc::new(Table::open(&path, 1, icmp(), None).unwrap());
        let mut iter = table.iter(true);
        iter.seek(&encode_internal_key(b"key00150", MAX_SEQUENCE, ValueType::FOR_SEEK))
            .unwrap();
        assert!(iter.valid());
        assert_eq!(extract_user_key(iter.key()), b"key00150");
        iter.seek(&encode_internal_key(b"zzz", MAX_SEQUENCE, ValueType::FOR_SEEK))
            .unwrap();
        assert!(!iter.valid());
    }

    #[test]
    fn test_bloom_filter_ruling_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        write_table(&path, &sample(1000), TableBuilderOptions::default());
        let table = Table::open(&path, 1, icmp(), None).unwrap();
        assert!(table.may_contain(b"key00042"));
        let ruled_out = (0..1000)
            .filter(|i| !table.may_contain(format!("nope{}", i).as_bytes()))
            .count();
        assert!(ruled_out > 900);
    }

    #[test]
    fn test_no_filter_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        let opts = TableBuilderOptions {
            bloom_bits_per_key: 0,
            ..Default::default()
        };
        write_table(&path, &sample(10), opts);
        let table = Table::open(&path, 1, icmp(), None).unwrap();
        assert!(table.may_contain(b"anything"));
        assert!(table.get(b"key00003", MAX_SEQUENCE).unwrap().is_some());
    }

    #[test]
    fn test_block_cache_used() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        write_table(&path, &sample(100), TableBuilderOptions::default());
        let cache = Arc::new(BlockCache::new(1 << 20));
        let table = Table::open(&path, 7, icmp(), Some(Arc::clone(&cache))).unwrap();
        table.get(b"key00001", MAX_SEQUENCE).unwrap();
        table.get(b"key00001", MAX_SEQUENCE).unwrap();
        assert!(cache.stats().hits >= 1);
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_corrupt_data_block() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        write_table(&path, &sample(50), TableBuilderOptions::default());
        let mut bytes = fs::read(&path).unwrap();
        bytes[10] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let table = Table::open(&path, 1, icmp(), None).unwrap();
        assert!(matches!(
            table.get(b"key00001", MAX_SEQUENCE),
            Err(Error::CorruptBlock(_))
        ));
    }

    #[test]
    fn test_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        write_table(&path, &sample(50), TableBuilderOptions::default());
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();
        assert!(Table::open(&path, 1, icmp(), None).unwrap_err().is_corruption());

        fs::write(&path, b"tiny").unwrap();
        assert!(Table::open(&path, 1, icmp(), None).unwrap_err().is_corruption());
    }

    #[test]
    fn test_comparator_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        write_table(&path, &sample(5), TableBuilderOptions::default());
        let other = InternalKeyComparator::new(Arc::new(ReverseBytewiseComparator));
        assert!(matches!(
            Table::open(&path, 1, other, None),
            Err(Error::InvalidArgument(_))
        ));
    }
}
