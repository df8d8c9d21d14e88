//! Block format implementation for SSTable.
//!
//! A block contains multiple key-value entries and uses restart points
//! for efficient binary search and prefix compression.
//!
//! On disk every block is followed by a 5-byte trailer holding the
//! compression type and a CRC32 of the stored bytes plus that type.

use std::cmp::Ordering;

use bytes::{Buf, BufMut, Bytes};

use crate::config::CompressionType;
use crate::error::{Error, Result};
use crate::memtable::InternalKeyComparator;

/// Size of the per-block trailer: compression type (1) + crc32 (4).
pub const BLOCK_TRAILER_SIZE: usize = 5;

const ENTRY_HEADER_SIZE: usize = 12;

/// Block stores key-value pairs with prefix compression.
///
/// Format:
/// ```text
/// [Entry 1]
/// [Entry 2]
/// ...
/// [Entry N]
/// [Restart Point 1: u32]
/// ...
/// [Restart Point M: u32]
/// [Num Restarts: u32]
/// ```
///
/// Each entry format:
/// ```text
/// [shared_key_len: u32]     // Length of shared prefix with previous key
/// [unshared_key_len: u32]   // Length of unshared key suffix
/// [value_len: u32]          // Length of value
/// [unshared_key: bytes]     // Key suffix
/// [value: bytes]            // Value data
/// ```
#[derive(Debug, Clone)]
pub struct Block {
    data: Bytes,
    restart_offset: usize,
    num_restarts: usize,
}

impl Block {
    /// Wraps decoded block contents, validating the restart array.
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corrupt_block(format!(
                "block too small: {} bytes",
                data.len()
            )));
        }
        let num_restarts = (&data[data.len() - 4..]).get_u32_le() as usize;
        let restart_bytes = num_restarts
            .checked_mul(4)
            .and_then(|n| n.checked_add(4))
            .filter(|n| *n <= data.len())
            .ok_or_else(|| {
                Error::corrupt_block(format!(
                    "{} restart points do not fit in {} bytes",
                    num_restarts,
                    data.len()
                ))
            })?;
        let restart_offset = data.len() - restart_bytes;
        if num_restarts == 0 && restart_offset != 0 {
            return Err(Error::corrupt_block("entries without restart points"));
        }
        let block = Self {
            data,
            restart_offset,
            num_restarts,
        };
        if restart_offset > 0 {
            for i in 0..num_restarts {
                if block.restart_point(i) >= restart_offset {
                    return Err(Error::corrupt_block(format!(
                        "restart point {} out of range",
                        i
                    )));
                }
            }
        }
        Ok(block)
    }

    /// Get the number of restart points
    pub fn num_restarts(&self) -> usize {
        self.num_restarts
    }

    fn restart_point(&self, index: usize) -> usize {
        let offset = self.restart_offset + index * 4;
        (&self.data[offset..offset + 4]).get_u32_le() as usize
    }

    /// Size of the decoded block in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// True when the block holds no entries.
    pub fn is_empty(&self) -> bool {
        self.restart_offset == 0
    }

    /// Iterates entries ordered by internal key.
    pub fn iter(&self, comparator: &InternalKeyComparator) -> BlockIterator {
        BlockIterator::new(self.clone(), Some(comparator.clone()))
    }

    /// Iterates entries whose keys are plain bytes (meta-index blocks).
    pub fn iter_bytewise(&self) -> BlockIterator {
        BlockIterator::new(self.clone(), None)
    }
}

/// BlockBuilder constructs blocks with prefix compression.
pub struct BlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    restart_interval: usize,
    last_key: Vec<u8>,
    num_entries: usize,
}

impl BlockBuilder {
    /// Creates a builder placing a restart point every `restart_interval` keys.
    pub fn new(restart_interval: usize) -> Self {
        Self {
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            restart_interval: restart_interval.max(1),
            last_key: Vec::new(),
            num_entries: 0,
        }
    }

    /// Appends an entry. Keys must arrive in increasing order; the table
    /// builder enforces that.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let shared = if self.counter < self.restart_interval {
            self.last_key
                .iter()
                .zip(key)
                .take_while(|(a, b)| a == b)
                .count()
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        };
        let unshared = key.len() - shared;

        self.buffer.put_u32_le(shared as u32);
        self.buffer.put_u32_le(unshared as u32);
        self.buffer.put_u32_le(value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        self.counter += 1;
        self.num_entries += 1;
    }

    /// Serializes the block and resets the builder.
    pub fn finish(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.buffer);
        if self.num_entries == 0 {
            self.restarts.clear();
        }
        for restart in &self.restarts {
            out.put_u32_le(*restart);
        }
        out.put_u32_le(self.restarts.len() as u32);
        self.reset();
        out
    }

    /// Discards buffered entries.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        self.num_entries = 0;
    }

    /// Size the block would have if finished now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// True when no entry was added since the last finish.
    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Number of buffered entries.
    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    /// Last key added.
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }
}

/// Iterator over the entries of one block.
pub struct BlockIterator {
    block: Block,
    comparator: Option<InternalKeyComparator>,
    /// Offset of the current entry; `restart_offset` when exhausted.
    current: usize,
    next_offset: usize,
    key: Vec<u8>,
    value_start: usize,
    value_end: usize,
}

impl BlockIterator {
    fn new(block: Block, comparator: Option<InternalKeyComparator>) -> Self {
        let end = block.restart_offset;
        Self {
            block,
            comparator,
            current: end,
            next_offset: end,
            key: Vec::new(),
            value_start: 0,
            value_end: 0,
        }
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match &self.comparator {
            Some(icmp) => icmp.compare(a, b),
            None => a.cmp(b),
        }
    }

    /// Whether the iterator is positioned at an entry.
    pub fn valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    /// Current key.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Current value.
    pub fn value(&self) -> &[u8] {
        &self.block.data[self.value_start..self.value_end]
    }

    /// A cheap handle on the current value.
    pub fn value_bytes(&self) -> Bytes {
        self.block.data.slice(self.value_start..self.value_end)
    }

    /// Positions at the first entry.
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.key.clear();
        self.parse_at(0)
    }

    /// Advances to the next entry.
    pub fn next(&mut self) -> Result<()> {
        if !self.valid() {
            return Ok(());
        }
        self.parse_at(self.next_offset)
    }

    /// Positions at the first entry with key `>= target`.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        if self.block.num_restarts == 0 {
            self.current = self.block.restart_offset;
            return Ok(());
        }
        let mut left = 0;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            self.key.clear();
            self.parse_at(self.block.restart_point(mid))?;
            if self.compare(&self.key, target) == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }
        self.key.clear();
        self.parse_at(self.block.restart_point(left))?;
        while self.valid() && self.compare(&self.key, target) == Ordering::Less {
            self.next()?;
        }
        Ok(())
    }

    fn parse_at(&mut self, offset: usize) -> Result<()> {
        let end = self.block.restart_offset;
        if offset >= end {
            self.current = end;
            self.next_offset = end;
            return Ok(());
        }
        if offset + ENTRY_HEADER_SIZE > end {
            return Err(Error::corrupt_block(format!(
                "entry header at {} overruns block",
                offset
            )));
        }
        let mut header = &self.block.data[offset..offset + ENTRY_HEADER_SIZE];
        let shared = header.get_u32_le() as usize;
        let unshared = header.get_u32_le() as usize;
        let value_len = header.get_u32_le() as usize;

        let key_start = offset + ENTRY_HEADER_SIZE;
        let value_start = key_start + unshared;
        let value_end = value_start + value_len;
        if shared > self.key.len() || value_end > end {
            return Err(Error::corrupt_block(format!(
                "malformed entry at offset {}",
                offset
            )));
        }

        self.key.truncate(shared);
        self.key
            .extend_from_slice(&self.block.data[key_start..value_start]);
        self.current = offset;
        self.value_start = value_start;
        self.value_end = value_end;
        self.next_offset = value_end;
        Ok(())
    }
}

/// Compresses a finished block and appends its trailer.
///
/// Falls back to storing the block raw unless compression saves at least
/// an eighth of its size.
pub fn seal_block(raw: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
    let (mut out, used) = match compress(compression, raw)? {
        Some(packed) if packed.len() < raw.len() - raw.len() / 8 => (packed, compression),
        _ => (raw.to_vec(), CompressionType::None),
    };
    out.push(used as u8);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&out);
    out.put_u32_le(hasher.finalize());
    Ok(out)
}

/// Verifies a stored block's trailer and returns its decoded contents.
pub fn unseal_block(stored: &[u8]) -> Result<Bytes> {
    if stored.len() < BLOCK_TRAILER_SIZE {
        return Err(Error::corrupt_block(format!(
            "block of {} bytes is shorter than its trailer",
            stored.len()
        )));
    }
    let payload_end = stored.len() - 4;
    let expected = (&stored[payload_end..]).get_u32_le();
    let actual = crc32fast::hash(&stored[..payload_end]);
    if expected != actual {
        return Err(Error::corrupt_block(format!(
            "checksum mismatch: expected {:#010x}, got {:#010x}",
            expected, actual
        )));
    }
    let tag = stored[payload_end - 1];
    let payload = &stored[..payload_end - 1];
    let compression = CompressionType::from_u8(tag)
        .ok_or_else(|| Error::corrupt_block(format!("unknown compression type {}", tag)))?;
    match compression {
        CompressionType::None => Ok(Bytes::copy_from_slice(payload)),
        other => decompress(other, payload).map(Bytes::from),
    }
}

fn compress(compression: CompressionType, raw: &[u8]) -> Result<Option<Vec<u8>>> {
    match compression {
        CompressionType::None => Ok(None),
        CompressionType::Snappy => snappy_compress(raw).map(Some),
        CompressionType::Lz4 => lz4_compress(raw).map(Some),
        CompressionType::Zstd => zstd_compress(raw).map(Some),
        CompressionType::Zlib => zlib_compress(raw).map(Some),
    }
}

fn decompress(compression: CompressionType, payload: &[u8]) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(payload.to_vec()),
        CompressionType::Snappy => snappy_decompress(payload),
        CompressionType::Lz4 => lz4_decompress(payload),
        CompressionType::Zstd => zstd_decompress(payload),
        CompressionType::Zlib => zlib_decompress(payload),
    }
}

#[cfg(feature = "snappy")]
fn snappy_compress(raw: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Encoder::new()
        .compress_vec(raw)
        .map_err(|e| Error::invalid_state(format!("snappy compression failed: {}", e)))
}

#[cfg(feature = "snappy")]
fn snappy_decompress(payload: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Decoder::new()
        .decompress_vec(payload)
        .map_err(|e| Error::corrupt_block(format!("snappy decompression failed: {}", e)))
}

#[cfg(not(feature = "snappy"))]
fn snappy_compress(_raw: &[u8]) -> Result<Vec<u8>> {
    Err(Error::invalid_argument("snappy support is not compiled in"))
}

#[cfg(not(feature = "snappy"))]
fn snappy_decompress(_payload: &[u8]) -> Result<Vec<u8>> {
    Err(Error::corrupt_block("block is snappy-compressed but snappy support is not compiled in"))
}

#[cfg(feature = "lz4-compression")]
fn lz4_compress(raw: &[u8]) -> Result<Vec<u8>> {
    lz4::block::compress(raw, None, true)
        .map_err(|e| Error::invalid_state(format!("lz4 compression failed: {}", e)))
}

#[cfg(feature = "lz4-compression")]
fn lz4_decompress(payload: &[u8]) -> Result<Vec<u8>> {
    lz4::block::decompress(payload, None)
        .map_err(|e| Error::corrupt_block(format!("lz4 decompression failed: {}", e)))
}

#[cfg(not(feature = "lz4-compression"))]
fn lz4_compress(_raw: &[u8]) -> Result<Vec<u8>> {
    Err(Error::invalid_argument("lz4 support is not compiled in"))
}

#[cfg(not(feature = "lz4-compression"))]
fn lz4_decompress(_payload: &[u8]) -> Result<Vec<u8>> {
    Err(Error::corrupt_block("block is lz4-compressed but lz4 support is not compiled in"))
}

#[cfg(feature = "zstd-compression")]
const ZSTD_LEVEL: i32 = 3;

#[cfg(feature = "zstd-compression")]
fn zstd_compress(raw: &[u8]) -> Result<Vec<u8>> {
    zstd::encode_all(raw, ZSTD_LEVEL)
        .map_err(|e| Error::invalid_state(format!("zstd compression failed: {}", e)))
}

#[cfg(feature = "zstd-compression")]
fn zstd_decompress(payload: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(payload)
        .map_err(|e| Error::corrupt_block(format!("zstd decompression failed: {}", e)))
}

#[cfg(not(feature = "zstd-compression"))]
fn zstd_compress(_raw: &[u8]) -> Result<Vec<u8>> {
    Err(Error::invalid_argument("zstd support is not compiled in"))
}

#[cfg(not(feature = "zstd-compression"))]
fn zstd_decompress(_payload: &[u8]) -> Result<Vec<u8>> {
    Err(Error::corrupt_block("block is zstd-compressed but zstd support is not compiled in"))
}

#[cfg(feature = "zlib-compression")]
fn zlib_compress(raw: &[u8]) -> Result<Vec<u8>> {
    use std::io::Write;

    let mut encoder = flate2::write::ZlibEncoder::new(
        Vec::with_capacity(raw.len()),
        flate2::Compression::default(),
    );
    encoder
        .write_all(raw)
        .and_then(|()| encoder.finish())
        .map_err(|e| Error::invalid_state(format!("zlib compression failed: {}", e)))
}

#[cfg(feature = "zlib-compression")]
fn zlib_decompress(payload: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read;

    let mut out = Vec::new();
    flate2::read::ZlibDecoder::new(payload)
        .read_to_end(&mut out)
        .map_err(|e| Error::corrupt_block(format!("zlib decompression failed: {}", e)))?;
    Ok(out)
}

#[cfg(not(feature = "zlib-compression"))]
fn zlib_compress(_raw: &[u8]) -> Result<Vec<u8>> {
    Err(Error::invalid_argument("zlib support is not compiled in"))
}

#[cfg(not(feature = "zlib-compression"))]
fn zlib_decompress(_payload: &[u8]) -> Result<Vec<u8>> {
    Err(Error::corrupt_block("block is zlib-compressed but zlib support is not compiled in"))
}
