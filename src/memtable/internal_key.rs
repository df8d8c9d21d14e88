//! Internal key format.
//!
//! Every record is addressed by `user_key || sequence (u64 LE) || type (u8)`.
//! Internal keys order by user key ascending (per the column family's
//! comparator), then sequence descending, then type descending, so the
//! newest version of a key is always met first.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::{Error, Result};

/// Bytes appended to a user key: 8 for the sequence, 1 for the type.
pub const INTERNAL_KEY_TRAILER: usize = 9;

/// Largest sequence number, used for unbounded reads.
pub const MAX_SEQUENCE: u64 = u64::MAX;

/// Kind of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// Tombstone.
    Deletion = 0,
    /// Full value.
    Value = 1,
    /// Merge operand.
    Merge = 2,
}

impl ValueType {
    /// Type used in lookup keys. It is the largest, so a lookup key sorts
    /// before every record at the same sequence.
    pub const FOR_SEEK: ValueType = ValueType::Merge;

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ValueType::Deletion),
            1 => Some(ValueType::Value),
            2 => Some(ValueType::Merge),
            _ => None,
        }
    }
}

/// A decoded internal key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct InternalKey {
    /// The user-supplied key.
    pub user_key: Vec<u8>,
    /// Write order.
    pub sequence: u64,
    /// Record kind.
    pub value_type: ValueType,
}

impl InternalKey {
    /// Creates a new internal key.
    pub fn new(user_key: impl Into<Vec<u8>>, sequence: u64, value_type: ValueType) -> Self {
        Self {
            user_key: user_key.into(),
            sequence,
            value_type,
        }
    }

    /// Key that positions a seek at the newest version of `user_key`
    /// visible at `sequence`.
    pub fn for_lookup(user_key: &[u8], sequence: u64) -> Self {
        Self::new(user_key.to_vec(), sequence, ValueType::FOR_SEEK)
    }

    /// Encodes the key.
    pub fn encode(&self) -> Vec<u8> {
        encode_internal_key(&self.user_key, self.sequence, self.value_type)
    }

    /// Decodes an encoded key.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (user_key, sequence, value_type) = parse_internal_key(data)?;
        Ok(Self::new(user_key.to_vec(), sequence, value_type))
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{:?}",
            String::from_utf8_lossy(&self.user_key),
            self.sequence,
            self.value_type
        )
    }
}

/// A single versioned key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The user key.
    pub key: Vec<u8>,
    /// Sequence number.
    pub sequence: u64,
    /// Record kind.
    pub value_type: ValueType,
    /// Value or merge operand; empty for tombstones.
    pub value: Vec<u8>,
}

impl Record {
    /// A put record.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, sequence: u64) -> Self {
        Self {
            key: key.into(),
            sequence,
            value_type: ValueType::Value,
            value: value.into(),
        }
    }

    /// A tombstone.
    pub fn delete(key: impl Into<Vec<u8>>, sequence: u64) -> Self {
        Self {
            key: key.into(),
            sequence,
            value_type: ValueType::Deletion,
            value: Vec::new(),
        }
    }

    /// A merge operand.
    pub fn merge(key: impl Into<Vec<u8>>, operand: impl Into<Vec<u8>>, sequence: u64) -> Self {
        Self {
            key: key.into(),
            sequence,
            value_type: ValueType::Merge,
            value: operand.into(),
        }
    }

    /// The encoded internal key of this record.
    pub fn internal_key(&self) -> Vec<u8> {
        encode_internal_key(&self.key, self.sequence, self.value_type)
    }

    /// Rebuilds a record from an encoded internal key and its value.
    pub fn from_encoded(internal_key: &[u8], value: &[u8]) -> Result<Self> {
        let (key, sequence, value_type) = parse_internal_key(internal_key)?;
        Ok(Self {
            key: key.to_vec(),
            sequence,
            value_type,
            value: value.to_vec(),
        })
    }
}

/// Encodes `user_key || sequence || type`.
pub fn encode_internal_key(user_key: &[u8], sequence: u64, value_type: ValueType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(user_key.len() + INTERNAL_KEY_TRAILER);
    buf.extend_from_slice(user_key);
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.push(value_type as u8);
    buf
}

/// Splits an encoded internal key.
pub fn parse_internal_key(data: &[u8]) -> Result<(&[u8], u64, ValueType)> {
    if data.len() < INTERNAL_KEY_TRAILER {
        return Err(Error::corruption(format!(
            "internal key too short: {} bytes",
            data.len()
        )));
    }
    let split = data.len() - INTERNAL_KEY_TRAILER;
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&data[split..split + 8]);
    let value_type = ValueType::from_u8(data[data.len() - 1]).ok_or_else(|| {
        Error::corruption(format!("invalid value type {}", data[data.len() - 1]))
    })?;
    Ok((&data[..split], u64::from_le_bytes(seq), value_type))
}

/// The user key part of an encoded internal key.
pub fn extract_user_key(data: &[u8]) -> &[u8] {
    &data[..data.len().saturating_sub(INTERNAL_KEY_TRAILER)]
}

fn trailer(data: &[u8]) -> (u64, u8) {
    if data.len() < INTERNAL_KEY_TRAILER {
        return (0, 0);
    }
    let split = data.len() - INTERNAL_KEY_TRAILER;
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&data[split..split + 8]);
    (u64::from_le_bytes(seq), data[data.len() - 1])
}

/// Orders encoded internal keys with a user comparator.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    /// Wraps a user comparator.
    pub fn new(user: Arc<dyn Comparator>) -> Self {
        Self { user }
    }

    /// The wrapped user comparator.
    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user
    }

    /// Compares two user keys.
    pub fn compare_user(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user.compare(a, b)
    }

    /// Compares two encoded internal keys.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user
            .compare(extract_user_key(a), extract_user_key(b))
            .then_with(|| {
                let (seq_a, ty_a) = trailer(a);
                let (seq_b, ty_b) = trailer(b);
                seq_b.cmp(&seq_a).then(ty_b.cmp(&ty_a))
            })
    }

    /// Compares two decoded internal keys.
    pub fn compare_keys(&self, a: &InternalKey, b: &InternalKey) -> Ordering {
        self.user
            .compare(&a.user_key, &b.user_key)
            .then_with(|| b.sequence.cmp(&a.sequence))
            .then_with(|| b.value_type.cmp(&a.value_type))
    }
}

impl fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InternalKeyComparator")
            .field(&self.user.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{bytewise, ReverseBytewiseComparator};

    #[test]
    fn test_encode_decode() {
        let key = InternalKey::new(b"user".to_vec(), 77, ValueType::Merge);
        let encoded = key.encode();
        assert_eq!(encoded.len(), 4 + INTERNAL_KEY_TRAILER);
        assert_eq!(InternalKey::decode(&encoded).unwrap(), key);
        assert_eq!(extract_user_key(&encoded), b"user");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(InternalKey::decode(b"short").is_err());
        let mut bad = InternalKey::new(b"k".to_vec(), 1, ValueType::Value).encode();
        *bad.last_mut().unwrap() = 9;
        assert!(InternalKey::decode(&bad).is_err());
    }

    #[test]
    fn test_ordering() {
        let icmp = InternalKeyComparator::new(bytewise());
        let a1 = encode_internal_key(b"a", 1, ValueType::Value);
        let a2 = encode_internal_key(b"a", 2, ValueType::Value);
        let b1 = encode_internal_key(b"b", 1, ValueType::Value);

        // Newer sequence first for the same user key.
        assert_eq!(icmp.compare(&a2, &a1), Ordering::Less);
        assert_eq!(icmp.compare(&a1, &b1), Ordering::Less);
        assert_eq!(icmp.compare(&a1, &a1), Ordering::Equal);

        // Lookup key sorts before the record it should find.
        let lookup = InternalKey::for_lookup(b"a", 2).encode();
        assert_eq!(icmp.compare(&lookup, &a2), Ordering::Less);
        assert_eq!(icmp.compare(&lookup, &a1), Ordering::Less);
    }

    #[test]
    fn test_ordering_with_custom_comparator() {
        let icmp = InternalKeyComparator::new(Arc::new(ReverseBytewiseComparator));
        let a = InternalKey::new(b"a".to_vec(), 1, ValueType::Value);
        let b = InternalKey::new(b"b".to_vec(), 1, ValueType::Value);
        assert_eq!(icmp.compare_keys(&a, &b), Ordering::Greater);
        assert_eq!(icmp.compare(&a.encode(), &b.encode()), Ordering::Greater);
    }

    #[test]
    fn test_record_round_trip() {
        let rec = Record::delete(b"gone".to_vec(), 9);
        let back = Record::from_encoded(&rec.internal_key(), &rec.value).unwrap();
        assert_eq!(back, rec);
    }
}
