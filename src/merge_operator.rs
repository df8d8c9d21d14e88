//! Read-modify-write operators for merge records.

use crate::error::{Error, Result};

/// Folds merge operands onto an existing value.
///
/// `operands` are ordered oldest first. `existing` is `None` when the key
/// had no value (never written, or deleted) below the oldest operand.
pub trait MergeOperator: Send + Sync {
    /// Stable identifier, recorded in the `OPTIONS` file.
    fn name(&self) -> &str;

    /// Produces the merged value.
    fn full_merge(&self, key: &[u8], existing: Option<&[u8]>, operands: &[Vec<u8>])
        -> Result<Vec<u8>>;
}

/// Appends operands to the existing value, separated by a delimiter byte.
#[derive(Debug, Clone, Copy)]
pub struct StringAppendOperator {
    delimiter: u8,
}

impl StringAppendOperator {
    /// Creates an operator joining values with `delimiter`.
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl Default for StringAppendOperator {
    fn default() -> Self {
        Self::new(b',')
    }
}

impl MergeOperator for StringAppendOperator {
    fn name(&self) -> &str {
        "strata.StringAppendOperator"
    }

    fn full_merge(
        &self,
        _key: &[u8],
        existing: Option<&[u8]>,
        operands: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        let mut out = existing.map(<[u8]>::to_vec).unwrap_or_default();
        for operand in operands {
            if !out.is_empty() {
                out.push(self.delimiter);
            }
            out.extend_from_slice(operand);
        }
        Ok(out)
    }
}

/// Treats values as little-endian `u64` counters and adds operands.
#[derive(Debug, Default, Clone, Copy)]
pub struct U64AddOperator;

impl U64AddOperator {
    fn decode(bytes: &[u8]) -> Result<u64> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| {
            Error::invalid_argument(format!("counter must be 8 bytes, got {}", bytes.len()))
        })?;
        Ok(u64::from_le_bytes(arr))
    }
}

impl MergeOperator for U64AddOperator {
    fn name(&self) -> &str {
        "strata.U64AddOperator"
    }

    fn full_merge(
        &self,
        _key: &[u8],
        existing: Option<&[u8]>,
        operands: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        let mut total = match existing {
            Some(v) => Self::decode(v)?,
            None => 0,
        };
        for operand in operands {
            total = total.wrapping_add(Self::decode(operand)?);
        }
        Ok(total.to_le_bytes().to_vec())
    }
}
