//! WAL record format implementation.
//!
//! Each physical record consists of:
//! - Checksum (4 bytes): CRC32 of type and data
//! - Length (2 bytes): Length of the data
//! - Type (1 byte): Record type (Full, First, Middle, Last)
//! - Data (variable): Fragment of the logical record
//!
//! The same framing carries WAL batches and manifest edits.

use bytes::{Buf, BufMut};
use crc32fast::Hasher;

/// Maximum size of a single fragment's data portion
pub const MAX_RECORD_SIZE: usize = 32 * 1024; // 32KB

/// Size of the record header (checksum + length + type)
pub const HEADER_SIZE: usize = 7;

/// Record types for handling logical records larger than one fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Complete logical record
    Full = 1,
    /// First fragment of a multi-fragment record
    First = 2,
    /// Middle fragment of a multi-fragment record
    Middle = 3,
    /// Last fragment of a multi-fragment record
    Last = 4,
}

impl RecordType {
    /// Convert from u8 to RecordType
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }
}

/// Decoded physical record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Stored checksum.
    pub checksum: u32,
    /// Payload length.
    pub length: usize,
    /// Raw type byte; validated after the checksum.
    pub record_type: u8,
}

impl Header {
    /// Parses the first [`HEADER_SIZE`] bytes of `data`.
    pub fn parse(mut data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            checksum: data.get_u32_le(),
            length: data.get_u16_le() as usize,
            record_type: data.get_u8(),
        })
    }
}

/// CRC32 over `type || data`.
pub fn checksum(record_type: u8, data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[record_type]);
    hasher.update(data);
    hasher.finalize()
}

/// Appends one framed fragment to `out`.
///
/// Format: [checksum: u32][length: u16][type: u8][data: bytes]
pub fn encode_fragment(out: &mut Vec<u8>, record_type: RecordType, data: &[u8]) {
    debug_assert!(data.len() <= MAX_RECORD_SIZE);
    out.reserve(HEADER_SIZE + data.len());
    out.put_u32_le(checksum(record_type as u8, data));
    out.put_u16_le(data.len() as u16);
    out.put_u8(record_type as u8);
    out.put_slice(data);
}

/// Frames a logical record, fragmenting it when it exceeds
/// [`MAX_RECORD_SIZE`]. An empty record becomes one empty `Full` fragment.
pub fn encode_record(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + HEADER_SIZE);
    if data.len() <= MAX_RECORD_SIZE {
        encode_fragment(&mut out, RecordType::Full, data);
        return out;
    }
    let chunks = data.chunks(MAX_RECORD_SIZE);
    let last = chunks.len() - 1;
    for (i, chunk) in chunks.enumerate() {
        let record_type = match i {
            0 => RecordType::First,
            i if i == last => RecordType::Last,
            _ => RecordType::Middle,
        };
        encode_fragment(&mut out, record_type, chunk);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_layout() {
        let mut out = Vec::new();
        encode_fragment(&mut out, RecordType::Full, b"hello");
        assert_eq!(out.len(), HEADER_SIZE + 5);
        let header = Header::parse(&out).unwrap();
        assert_eq!(header.length, 5);
        assert_eq!(header.record_type, RecordType::Full as u8);
        assert_eq!(header.checksum, checksum(1, b"hello"));
    }

    #[test]
    fn test_checksum_covers_type() {
        assert_ne!(checksum(1, b"abc"), checksum(2, b"abc"));
    }

    #[test]
    fn test_large_record_fragments() {
        let data = vec![9u8; MAX_RECORD_SIZE * 2 + 10];
        let framed = encode_record(&data);
        assert_eq!(framed.len(), data.len() + 3 * HEADER_SIZE);
        let first = Header::parse(&framed).unwrap();
        assert_eq!(first.record_type, RecordType::First as u8);
        assert_eq!(first.length, MAX_RECORD_SIZE);
        let second = Header::parse(&framed[HEADER_SIZE + MAX_RECORD_SIZE..]).unwrap();
        assert_eq!(second.record_type, RecordType::Middle as u8);
    }

    #[test]
    fn test_empty_record() {
        let framed = encode_record(&[]);
        assert_eq!(framed.len(), HEADER_SIZE);
        assert_eq!(Header::parse(&framed).unwrap().record_type, 1);
    }

    #[test]
    fn test_invalid_record_type() {
        assert!(RecordType::from_u8(0).is_none());
        assert!(RecordType::from_u8(5).is_none());
    }
}
