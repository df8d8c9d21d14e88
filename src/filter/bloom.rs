//! Bloom Filter implementation.
//!
//! A space-efficient probabilistic data structure used to test whether an element
//! is a member of a set. False positive matches are possible, but false negatives are not.
//!
//! Serialized form: `[bit array][num_hashes: u8]`. Probes use double hashing
//! over two xxh64 hashes of the key (seeds 0 and 1), which are stable across
//! releases so persisted filters stay readable.

use xxhash_rust::xxh64::xxh64;

use crate::error::{Error, Result};

/// Hash functions are capped to bound probe cost.
const MAX_HASHES: u32 = 30;

fn key_hashes(key: &[u8]) -> (u64, u64) {
    (xxh64(key, 0), xxh64(key, 1))
}

/// Bit positions `h1 + i * h2 (mod m)` for `i` in `0..num_hashes`.
fn probes((h1, h2): (u64, u64), num_hashes: u32, num_bits: usize) -> impl Iterator<Item = usize> {
    let h2 = h2 | 1;
    (0..u64::from(num_hashes))
        .map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % num_bits as u64) as usize)
}

/// Builds a filter sized for a fixed number of bits per key.
///
/// # Example
/// ```
/// use strata::filter::{BloomFilter, BloomFilterBuilder};
///
/// let mut builder = BloomFilterBuilder::new(10);
/// builder.add(b"key1");
/// builder.add(b"key2");
/// let filter = BloomFilter::decode(&builder.finish()).unwrap();
///
/// assert!(filter.may_contain(b"key1"));
/// assert!(filter.may_contain(b"key2"));
/// ```
#[derive(Debug, Clone)]
pub struct BloomFilterBuilder {
    bits_per_key: usize,
    hashes: Vec<(u64, u64)>,
}

impl BloomFilterBuilder {
    /// Creates a builder with `bits_per_key` bits of filter per added key.
    pub fn new(bits_per_key: usize) -> Self {
        Self {
            bits_per_key: bits_per_key.max(1),
            hashes: Vec::new(),
        }
    }

    /// Adds a key.
    pub fn add(&mut self, key: &[u8]) {
        self.hashes.push(key_hashes(key));
    }

    /// Number of keys added.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// True when no key was added.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Serializes the filter.
    pub fn finish(&self) -> Vec<u8> {
        // k = bits_per_key * ln(2)
        let num_hashes = ((self.bits_per_key as f64 * 0.69) as u32).clamp(1, MAX_HASHES);
        let num_bits = (self.hashes.len() * self.bits_per_key).max(64);
        let num_bytes = num_bits.div_ceil(8);
        let num_bits = num_bytes * 8;

        let mut out = vec![0u8; num_bytes + 1];
        for hash in &self.hashes {
            for pos in probes(*hash, num_hashes, num_bits) {
                out[pos / 8] |= 1 << (pos % 8);
            }
        }
        out[num_bytes] = num_hashes as u8;
        out
    }
}

/// A decoded, read-only bloom filter.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_hashes: u32,
}

impl BloomFilter {
    /// Decodes a serialized filter.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (num_hashes, bits) = data
            .split_last()
            .ok_or_else(|| Error::corrupt_block("empty bloom filter"))?;
        let num_hashes = u32::from(*num_hashes);
        if num_hashes == 0 || num_hashes > MAX_HASHES || bits.is_empty() {
            return Err(Error::corrupt_block(format!(
                "invalid bloom filter: {} hashes over {} bytes",
                num_hashes,
                bits.len()
            )));
        }
        Ok(Self {
            bits: bits.to_vec(),
            num_hashes,
        })
    }

    /// Check if a key may exist (can have false positives)
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let num_bits = self.bits.len() * 8;
        probes(key_hashes(key), self.num_hashes, num_bits)
            .all(|pos| self.bits[pos / 8] & (1 << (pos % 8)) != 0)
    }

    /// Size of the bit array in bytes.
    pub fn size(&self) -> usize {
        self.bits.len()
    }

    /// Number of hash probes per key.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(keys: impl IntoIterator<Item = Vec<u8>>, bits: usize) -> BloomFilter {
        let mut builder = BloomFilterBuilder::new(bits);
        for key in keys {
            builder.add(&key);
        }
        BloomFilter::decode(&builder.finish()).unwrap()
    }

    #[test]
    fn test_bloom_filter_no_false_negatives() {
        let keys: Vec<_> = (0..5000).map(|i| format!("key{}", i).into_bytes()).collect();
        let filter = build(keys.clone(), 10);
        for key in &keys {
            assert!(filter.may_contain(key));
        }
    }

    #[test]
    fn test_bloom_filter_false_positive_rate() {
        let filter = build((0..10_000).map(|i| format!("key{}", i).into_bytes()), 10);
        let false_positives = (0..10_000)
            .filter(|i| filter.may_contain(format!("absent{}", i).as_bytes()))
            .count();
        // ~1% expected at 10 bits per key.
        assert!(false_positives < 300, "{} false positives", false_positives);
    }

    #[test]
    fn test_bloom_filter_encoding_is_stable() {
        let mut builder = BloomFilterBuilder::new(10);
        for key in [b"apple".as_slice(), b"banana", b"cherry"] {
            builder.add(key);
        }
        assert_eq!(builder.finish(), vec![241, 39, 66, 192, 4, 128, 4, 8, 6]);
    }

    #[test]
    fn test_bloom_filter_empty() {
        let filter = build(Vec::new(), 10);
        assert!(!filter.may_contain(b"anything"));
    }

    #[test]
    fn test_bloom_filter_decode_rejects_garbage() {
        assert!(BloomFilter::decode(&[]).is_err());
        assert!(BloomFilter::decode(&[0xff, 0]).is_err());
        assert!(BloomFilter::decode(&[0xff, 200]).is_err());
    }
}
