//! Iterators over internal keys and the user-facing database iterator.
//!
//! Every sorted source (memtable, table, level of tables) implements
//! [`InternalIterator`]. A [`MergingIterator`] combines them into one
//! stream ordered by internal key, and [`DBIterator`] turns that stream
//! into the visible key/value pairs at a sequence number.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::column_family::SuperVersion;
use crate::error::{Error, Result};
use crate::memtable::{encode_internal_key, parse_internal_key, InternalKeyComparator, ValueType};
use crate::merge_operator::MergeOperator;
use crate::sstable::TableIterator;
use crate::version::TableFile;

/// Cursor over encoded internal keys in ascending order.
///
/// `key` and `value` may only be called while `valid` is true.
pub trait InternalIterator: Send {
    /// Whether the cursor is at an entry.
    fn valid(&self) -> bool;
    /// Moves to the first entry.
    fn seek_to_first(&mut self) -> Result<()>;
    /// Moves to the first entry `>= target`.
    fn seek(&mut self, target: &[u8]) -> Result<()>;
    /// Moves to the following entry.
    fn next(&mut self) -> Result<()>;
    /// Encoded internal key of the current entry.
    fn key(&self) -> &[u8];
    /// Value of the current entry.
    fn value(&self) -> &[u8];
}

impl<I: InternalIterator + ?Sized> InternalIterator for Box<I> {
    fn valid(&self) -> bool {
        (**self).valid()
    }
    fn seek_to_first(&mut self) -> Result<()> {
        (**self).seek_to_first()
    }
    fn seek(&mut self, target: &[u8]) -> Result<()> {
        (**self).seek(target)
    }
    fn next(&mut self) -> Result<()> {
        (**self).next()
    }
    fn key(&self) -> &[u8] {
        (**self).key()
    }
    fn value(&self) -> &[u8] {
        (**self).value()
    }
}

/// K-way merge of internal iterators.
///
/// Children are listed newest source first; on identical keys the child
/// with the lowest index wins the tie.
pub struct MergingIterator {
    children: Vec<Box<dyn InternalIterator>>,
    icmp: InternalKeyComparator,
    current: Option<usize>,
}

impl MergingIterator {
    /// Merges `children` under `icmp`. The result is unpositioned.
    pub fn new(children: Vec<Box<dyn InternalIterator>>, icmp: InternalKeyComparator) -> Self {
        Self {
            children,
            icmp,
            current: None,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            smallest = match smallest {
                Some(s) if self.icmp.compare(child.key(), self.children[s].key()) != Ordering::Less => {
                    Some(s)
                }
                _ => Some(i),
            };
        }
        self.current = smallest;
    }
}

impl InternalIterator for MergingIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_first()?;
        }
        self.find_smallest();
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        for child in &mut self.children {
            child.seek(target)?;
        }
        self.find_smallest();
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        if let Some(i) = self.current {
            self.children[i].next()?;
            self.find_smallest();
        }
        Ok(())
    }

    fn key(&self) -> &[u8] {
        self.current.map_or(&[][..], |i| self.children[i].key())
    }

    fn value(&self) -> &[u8] {
        self.current.map_or(&[][..], |i| self.children[i].value())
    }
}

/// Concatenating iterator over the non-overlapping files of one level.
///
/// Only one table is open for iteration at a time.
pub struct LevelIterator {
    files: Vec<Arc<TableFile>>,
    icmp: InternalKeyComparator,
    index: usize,
    current: Option<TableIterator>,
    fill_cache: bool,
}

impl LevelIterator {
    /// Iterates `files`, which must be sorted by smallest key.
    pub fn new(files: Vec<Arc<TableFile>>, icmp: InternalKeyComparator, fill_cache: bool) -> Self {
        let index = files.len();
        Self {
            files,
            icmp,
            index,
            current: None,
            fill_cache,
        }
    }

    fn open_file(&mut self, index: usize) {
        self.index = index;
        self.current = self
            .files
            .get(index)
            .map(|f| f.table().iter(self.fill_cache));
    }

    fn skip_empty_forward(&mut self) -> Result<()> {
        while self.current.as_ref().is_some_and(|c| !c.valid()) {
            self.open_file(self.index + 1);
            if let Some(iter) = self.current.as_mut() {
                iter.seek_to_first()?;
            }
        }
        Ok(())
    }
}

impl InternalIterator for LevelIterator {
    fn valid(&self) -> bool {
        self.current.as_ref().is_some_and(|c| c.valid())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.open_file(0);
        if let Some(iter) = self.current.as_mut() {
            iter.seek_to_first()?;
        }
        self.skip_empty_forward()
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        let icmp = &self.icmp;
        let index = self
            .files
            .partition_point(|f| icmp.compare(&f.meta.largest, target) == Ordering::Less);
        self.open_file(index);
        if let Some(iter) = self.current.as_mut() {
            iter.seek(target)?;
        }
        self.skip_empty_forward()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(iter) = self.current.as_mut() {
            iter.next()?;
        }
        self.skip_empty_forward()
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |c| c.key())
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |c| c.value())
    }
}

/// An iterator over the visible key/value pairs of a column family.
///
/// The iterator pins the memtables and tables it was created over, so it
/// sees a consistent state no matter what is written, flushed or
/// compacted afterwards. Tombstones are hidden and merge operands are
/// folded into values.
///
/// # Example
///
/// ```rust,no_run
/// use strata::{DB, Options};
///
/// # fn main() -> Result<(), strata::Error> {
/// let db = DB::open("./data", Options::default())?;
///
/// db.put(b"key1", b"value1")?;
/// db.put(b"key2", b"value2")?;
///
/// let mut iter = db.iter()?;
/// while iter.valid() {
///     println!("{:?} => {:?}", iter.key(), iter.value());
///     iter.advance();
/// }
/// iter.status()?;
///
/// // Or as a std iterator:
/// for entry in db.scan(Some(b"key1".as_slice()), Some(b"key9".as_slice()))? {
///     let (key, value) = entry?;
///     println!("{:?} => {:?}", key, value);
/// }
/// # Ok(())
/// # }
/// ```
pub struct DBIterator {
    inner: MergingIterator,
    icmp: InternalKeyComparator,
    merge_operator: Option<Arc<dyn MergeOperator>>,
    sequence: u64,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    current: Option<(Vec<u8>, Vec<u8>)>,
    error: Option<Error>,
    _pinned: Arc<SuperVersion>,
}

impl DBIterator {
    pub(crate) fn new(
        inner: MergingIterator,
        icmp: InternalKeyComparator,
        merge_operator: Option<Arc<dyn MergeOperator>>,
        sequence: u64,
        lower: Option<Vec<u8>>,
        upper: Option<Vec<u8>>,
        pinned: Arc<SuperVersion>,
    ) -> Self {
        let mut iter = Self {
            inner,
            icmp,
            merge_operator,
            sequence,
            lower,
            upper,
            current: None,
            error: None,
            _pinned: pinned,
        };
        iter.seek_to_first();
        iter
    }

    /// Returns true if the iterator is positioned at a valid entry.
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Key at the current position; empty when not valid.
    pub fn key(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |(k, _)| k.as_slice())
    }

    /// Value at the current position; empty when not valid.
    pub fn value(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |(_, v)| v.as_slice())
    }

    /// The error that stopped iteration, if any.
    pub fn status(&self) -> Result<()> {
        match &self.error {
            Some(e) => Err(e.duplicate()),
            None => Ok(()),
        }
    }

    /// Sequence number the iterator reads at.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Moves to the next visible key.
    pub fn advance(&mut self) {
        let skip = self.current.take().map(|(key, _)| key);
        if skip.is_some() {
            let res = self.find_next_entry(skip);
            self.record(res);
        }
    }

    /// Positions at the first visible key `>= target` (and within bounds).
    pub fn seek(&mut self, target: &[u8]) {
        let start = match &self.lower {
            Some(lower) if self.icmp.compare_user(target, lower) == Ordering::Less => lower.clone(),
            _ => target.to_vec(),
        };
        let lookup = encode_internal_key(&start, self.sequence, ValueType::FOR_SEEK);
        self.current = None;
        self.error = None;
        let res = self
            .inner
            .seek(&lookup)
            .and_then(|()| self.find_next_entry(None));
        self.record(res);
    }

    /// Positions at the first visible key within bounds.
    pub fn seek_to_first(&mut self) {
        match self.lower.clone() {
            Some(lower) => self.seek(&lower),
            None => {
                self.current = None;
                self.error = None;
                let res = self
                    .inner
                    .seek_to_first()
                    .and_then(|()| self.find_next_entry(None));
                self.record(res);
            }
        }
    }

    fn record(&mut self, res: Result<()>) {
        if let Err(e) = res {
            log::error!("iterator stopped: {}", e);
            self.current = None;
            self.error = Some(e);
        }
    }

    fn past_upper(&self, user_key: &[u8]) -> bool {
        self.upper
            .as_ref()
            .is_some_and(|u| self.icmp.compare_user(user_key, u) != Ordering::Less)
    }

    fn find_next_entry(&mut self, mut skipping: Option<Vec<u8>>) -> Result<()> {
        self.current = None;
        while self.inner.valid() {
            let (user_key, sequence, value_type) = {
                let (k, s, t) = parse_internal_key(self.inner.key())?;
                (k.to_vec(), s, t)
            };
            if let Some(skip) = &skipping {
                if self.icmp.compare_user(&user_key, skip) == Ordering::Equal {
                    self.inner.next()?;
                    continue;
                }
            }
            if self.past_upper(&user_key) {
                return Ok(());
            }
            if sequence > self.sequence {
                self.inner.next()?;
                continue;
            }
            match value_type {
                ValueType::Deletion => {
                    skipping = Some(user_key);
                    self.inner.next()?;
                }
                ValueType::Value => {
                    let value = self.inner.value().to_vec();
                    self.inner.next()?;
                    self.current = Some((user_key, value));
                    return Ok(());
                }
                ValueType::Merge => {
                    let value = self.fold_merges(&user_key)?;
                    self.current = Some((user_key, value));
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Collects the operand chain of `user_key` starting at the current
    /// entry and folds it onto its base, if one is found.
    fn fold_merges(&mut self, user_key: &[u8]) -> Result<Vec<u8>> {
        let op = self.merge_operator.clone().ok_or_else(|| {
            Error::invalid_argument(format!(
                "merge record for {:?} but no merge operator is configured",
                String::from_utf8_lossy(user_key)
            ))
        })?;
        let mut operands = Vec::new();
        let mut base = None;
        while self.inner.valid() {
            let (key, _, value_type) = parse_internal_key(self.inner.key())?;
            if self.icmp.compare_user(key, user_key) != Ordering::Equal {
                break;
            }
            match value_type {
                ValueType::Merge => operands.push(self.inner.value().to_vec()),
                ValueType::Value => {
                    base = Some(self.inner.value().to_vec());
                    break;
                }
                ValueType::Deletion => break,
            }
            self.inner.next()?;
        }
        operands.reverse();
        op.full_merge(user_key, base.as_deref(), &operands)
    }
}

impl Iterator for DBIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.error.take() {
            return Some(Err(e));
        }
        let item = self.current.clone()?;
        self.advance();
        Some(Ok(item))
    }
}
