//! WriteBatch provides atomic batch write operations.
//!
//! WriteBatch allows multiple write operations (put, delete, merge) across
//! column families to be grouped together and applied atomically. The
//! batch is logged as one WAL record and its operations get consecutive
//! sequence numbers.
//!
//! # Example
//!
//! ```rust,no_run
//! use strata::{DB, Options, WriteBatch};
//!
//! # fn main() -> Result<(), strata::Error> {
//! let db = DB::open("./data", Options::default())?;
//! let mut batch = WriteBatch::new();
//!
//! // Add multiple operations to the batch
//! batch.put(b"key1", b"value1");
//! batch.put(b"key2", b"value2");
//! batch.delete(b"key3");
//!
//! // Apply all operations atomically
//! db.write(batch)?;
//! # Ok(())
//! # }
//! ```

use bytes::{Buf, BufMut};

use crate::column_family::{ColumnFamilyHandle, DEFAULT_COLUMN_FAMILY_ID};
use crate::error::{Error, Result};
use crate::memtable::ValueType;

/// Fixed part of the encoded batch: first sequence (8) + count (4).
pub(crate) const BATCH_HEADER_SIZE: usize = 12;

/// Type of write operation in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Put operation with key and value
    Put {
        /// Column family id
        cf: u32,
        /// Key to insert
        key: Vec<u8>,
        /// Value to associate with the key
        value: Vec<u8>,
    },
    /// Delete operation with key
    Delete {
        /// Column family id
        cf: u32,
        /// Key to delete
        key: Vec<u8>,
    },
    /// Merge operand for a key
    Merge {
        /// Column family id
        cf: u32,
        /// Key to merge into
        key: Vec<u8>,
        /// Operand handed to the column family's merge operator
        value: Vec<u8>,
    },
}

impl WriteOp {
    /// Column family the operation targets.
    pub fn cf(&self) -> u32 {
        match self {
            WriteOp::Put { cf, .. } | WriteOp::Delete { cf, .. } | WriteOp::Merge { cf, .. } => *cf,
        }
    }

    /// Key the operation targets.
    pub fn key(&self) -> &[u8] {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key, .. } | WriteOp::Merge { key, .. } => {
                key
            }
        }
    }

    /// Value or operand; empty for deletes.
    pub fn value(&self) -> &[u8] {
        match self {
            WriteOp::Put { value, .. } | WriteOp::Merge { value, .. } => value,
            WriteOp::Delete { .. } => &[],
        }
    }

    /// Record kind written for this operation.
    pub fn value_type(&self) -> ValueType {
        match self {
            WriteOp::Put { .. } => ValueType::Value,
            WriteOp::Delete { .. } => ValueType::Deletion,
            WriteOp::Merge { .. } => ValueType::Merge,
        }
    }
}

/// WriteBatch accumulates a sequence of write operations to be applied atomically.
///
/// Operations are buffered in memory and applied to the database together when
/// `DB::write()` is called. This provides better performance than individual writes
/// and ensures all operations succeed or fail together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    operations: Vec<WriteOp>,
    approximate_size: usize,
}

impl WriteBatch {
    /// Creates a new empty WriteBatch.
    ///
    /// # Example
    ///
    /// ```
    /// use strata::WriteBatch;
    ///
    /// let batch = WriteBatch::new();
    /// assert!(batch.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, op: WriteOp) {
        // tag + cf + key_len (+ value_len)
        let overhead = if matches!(op, WriteOp::Delete { .. }) { 9 } else { 13 };
        self.approximate_size += overhead + op.key().len() + op.value().len();
        self.operations.push(op);
    }

    /// Adds a Put operation to the batch.
    ///
    /// # Example
    ///
    /// ```
    /// use strata::WriteBatch;
    ///
    /// let mut batch = WriteBatch::new();
    /// batch.put(b"key", b"value");
    /// assert_eq!(batch.len(), 1);
    /// ```
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.put_cf_id(DEFAULT_COLUMN_FAMILY_ID, key, value);
    }

    /// Adds a Put into column family `cf`.
    pub fn put_cf(&mut self, cf: &ColumnFamilyHandle, key: &[u8], value: &[u8]) {
        self.put_cf_id(cf.id(), key, value);
    }

    pub(crate) fn put_cf_id(&mut self, cf: u32, key: &[u8], value: &[u8]) {
        self.push(WriteOp::Put {
            cf,
            key: key.to_vec(),
            value: value.to_vec(),
        });
    }

    /// Adds a Delete operation to the batch.
    ///
    /// # Example
    ///
    /// ```
    /// use strata::WriteBatch;
    ///
    /// let mut batch = WriteBatch::new();
    /// batch.delete(b"key");
    /// assert_eq!(batch.len(), 1);
    /// ```
    pub fn delete(&mut self, key: &[u8]) {
        self.delete_cf_id(DEFAULT_COLUMN_FAMILY_ID, key);
    }

    /// Adds a Delete into column family `cf`.
    pub fn delete_cf(&mut self, cf: &ColumnFamilyHandle, key: &[u8]) {
        self.delete_cf_id(cf.id(), key);
    }

    pub(crate) fn delete_cf_id(&mut self, cf: u32, key: &[u8]) {
        self.push(WriteOp::Delete {
            cf,
            key: key.to_vec(),
        });
    }

    /// Adds a merge operand for `key`.
    pub fn merge(&mut self, key: &[u8], operand: &[u8]) {
        self.merge_cf_id(DEFAULT_COLUMN_FAMILY_ID, key, operand);
    }

    /// Adds a merge operand into column family `cf`.
    pub fn merge_cf(&mut self, cf: &ColumnFamilyHandle, key: &[u8], operand: &[u8]) {
        self.merge_cf_id(cf.id(), key, operand);
    }

    pub(crate) fn merge_cf_id(&mut self, cf: u32, key: &[u8], operand: &[u8]) {
        self.push(WriteOp::Merge {
            cf,
            key: key.to_vec(),
            value: operand.to_vec(),
        });
    }

    /// Clears all operations from the batch.
    ///
    /// # Example
    ///
    /// ```
    /// use strata::WriteBatch;
    ///
    /// let mut batch = WriteBatch::new();
    /// batch.put(b"key", b"value");
    /// batch.clear();
    /// assert!(batch.is_empty());
    /// ```
    pub fn clear(&mut self) {
        self.operations.clear();
        self.approximate_size = 0;
    }

    /// Returns the number of operations in the batch.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the batch contains no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the approximate encoded size of the batch in bytes.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size
    }

    /// Returns an iterator over the operations in the batch.
    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.operations.iter()
    }

    /// Serializes the batch as a WAL payload.
    ///
    /// Format: `first_sequence u64 | count u32 | ops`, each op being
    /// `tag u8 | cf u32 | key_len u32 | key | [value_len u32 | value]`.
    pub(crate) fn encode(&self, first_sequence: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BATCH_HEADER_SIZE + self.approximate_size);
        buf.put_u64_le(first_sequence);
        buf.put_u32_le(self.operations.len() as u32);
        for op in &self.operations {
            buf.put_u8(op.value_type() as u8);
            buf.put_u32_le(op.cf());
            buf.put_u32_le(op.key().len() as u32);
            buf.put_slice(op.key());
            if !matches!(op, WriteOp::Delete { .. }) {
                buf.put_u32_le(op.value().len() as u32);
                buf.put_slice(op.value());
            }
        }
        buf
    }

    /// Parses a WAL payload into its first sequence number and batch.
    pub(crate) fn decode(mut data: &[u8]) -> Result<(u64, WriteBatch)> {
        fn take<'a>(data: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
            if data.len() < n {
                return Err(Error::corruption(format!(
                    "write batch truncated: need {} bytes, have {}",
                    n,
                    data.len()
                )));
            }
            let (head, rest) = data.split_at(n);
            *data = rest;
            Ok(head)
        }

        let mut header = take(&mut data, BATCH_HEADER_SIZE)?;
        let first_sequence = header.get_u64_le();
        let count = header.get_u32_le();

        let mut batch = WriteBatch::new();
        for _ in 0..count {
            let mut fixed = take(&mut data, 9)?;
            let tag = fixed.get_u8();
            let cf = fixed.get_u32_le();
            let key_len = fixed.get_u32_le() as usize;
            let key = take(&mut data, key_len)?;
            let value_type = ValueType::from_u8(tag)
                .ok_or_else(|| Error::corruption(format!("unknown write batch tag {}", tag)))?;
            match value_type {
                ValueType::Deletion => batch.delete_cf_id(cf, key),
                ValueType::Value | ValueType::Merge => {
                    let value_len = take(&mut data, 4)?.get_u32_le() as usize;
                    let value = take(&mut data, value_len)?;
                    if value_type == ValueType::Value {
                        batch.put_cf_id(cf, key, value);
                    } else {
                        batch.merge_cf_id(cf, key, value);
                    }
                }
            }
        }
        if !data.is_empty() {
            return Err(Error::corruption(format!(
                "{} trailing bytes after write batch",
                data.len()
            )));
        }
        Ok((first_sequence, batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_batch_new() {
        let batch = WriteBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn test_write_batch_mixed_operations() {
        let mut batch = WriteBatch::new();
        batch.put(b"key1", b"value1");
        batch.delete(b"key2");
        batch.merge(b"key3", b"+1");

        assert_eq!(batch.len(), 3);
        let kinds: Vec<_> = batch.iter().map(WriteOp::value_type).collect();
        assert_eq!(
            kinds,
            vec![ValueType::Value, ValueType::Deletion, ValueType::Merge]
        );
    }

    #[test]
    fn test_write_batch_clear() {
        let mut batch = WriteBatch::new();
        batch.put(b"key1", b"value1");
        batch.put(b"key2", b"value2");
        batch.clear();

        assert!(batch.is_empty());
        assert_eq!(batch.approximate_size(), 0);
    }

    #[test]
    fn test_approximate_size_matches_encoding() {
        let mut batch = WriteBatch::new();
        batch.put(b"key", b"value");
        batch.delete(b"gone");
        batch.merge_cf_id(3, b"counter", &7u64.to_le_bytes());
        assert_eq!(
            batch.encode(1).len(),
            BATCH_HEADER_SIZE + batch.approximate_size()
        );
    }

    #[test]
    fn test_encode_decode() {
        let mut batch = WriteBatch::new();
        batch.put(b"key1", b"value1");
        batch.delete_cf_id(2, b"key2");
        batch.merge_cf_id(5, b"key3", b"operand");
        batch.put(b"", b"");

        let (seq, decoded) = WriteBatch::decode(&batch.encode(42)).unwrap();
        assert_eq!(seq, 42);
        assert_eq!(decoded, batch);
        assert_eq!(decoded.iter().nth(1).unwrap().cf(), 2);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut batch = WriteBatch::new();
        batch.put(b"key", b"value");
        let encoded = batch.encode(1);

        assert!(WriteBatch::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(WriteBatch::decode(&encoded[..5]).is_err());

        let mut bad_tag = encoded.clone();
        bad_tag[BATCH_HEADER_SIZE] = 9;
        assert!(matches!(
            WriteBatch::decode(&bad_tag),
            Err(Error::Corruption(_))
        ));

        let mut trailing = encoded;
        trailing.push(0);
        assert!(WriteBatch::decode(&trailing).is_err());
    }
}
