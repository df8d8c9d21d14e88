//! User key ordering.
//!
//! Every column family orders its keys with a [`Comparator`]. The
//! comparator's name is persisted in the manifest and in every table's
//! properties, and reopening a column family with a differently named
//! comparator is rejected.
//!
//! Two keys that compare `Equal` must be byte-identical: bloom filters and
//! memtable lookups hash and match raw bytes.

use std::cmp::Ordering;
use std::sync::Arc;

/// A total order over user keys.
pub trait Comparator: Send + Sync {
    /// Stable identifier recorded on disk.
    fn name(&self) -> &str;

    /// Compares two user keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Lexicographic byte order. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &str {
        "strata.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Reverse lexicographic byte order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReverseBytewiseComparator;

impl Comparator for ReverseBytewiseComparator {
    fn name(&self) -> &str {
        "strata.ReverseBytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }
}

/// Returns the default comparator.
pub fn bytewise() -> Arc<dyn Comparator> {
    Arc::new(BytewiseComparator)
}
