//! The read path.
//!
//! A lookup walks the sources of a column family newest first: active
//! memtable, frozen memtables, level 0 files newest first, then one file
//! per deeper level. The first value or tombstone ends the walk; merge
//! operands seen on the way are folded onto it.

use std::iter;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::DbInner;
use crate::config::ReadOptions;
use crate::error::{Error, Result};
use crate::iterator::{DBIterator, InternalIterator, LevelIterator, MergingIterator};
use crate::memtable::ValueType;
use crate::merge_operator::MergeOperator;

/// What a point lookup has found so far.
#[derive(Default)]
struct LookupState {
    /// Merge operands, newest first
    operands: Vec<Vec<u8>>,
    /// `Some(None)` for a tombstone
    base: Option<Option<Vec<u8>>>,
}

impl LookupState {
    /// Takes one version; returns true once the walk can stop.
    fn visit(&mut self, value_type: ValueType, value: &[u8]) -> bool {
        match value_type {
            ValueType::Value => {
                self.base = Some(Some(value.to_vec()));
                true
            }
            ValueType::Deletion => {
                self.base = Some(None);
                true
            }
            ValueType::Merge => {
                self.operands.push(value.to_vec());
                false
            }
        }
    }

    fn finish(
        mut self,
        key: &[u8],
        merge_operator: Option<&dyn MergeOperator>,
    ) -> Result<Option<Vec<u8>>> {
        let base = self.base.flatten();
        if self.operands.is_empty() {
            return Ok(base);
        }
        let op = merge_operator.ok_or_else(|| {
            Error::invalid_argument(format!(
                "merge record for {:?} but no merge operator is configured",
                String::from_utf8_lossy(key)
            ))
        })?;
        self.operands.reverse();
        op.full_merge(key, base.as_deref(), &self.operands).map(Some)
    }
}

impl DbInner {
    fn read_sequence(&self, options: &ReadOptions<'_>) -> u64 {
        match options.snapshot {
            Some(snapshot) => snapshot.sequence(),
            None => self.last_sequence.load(Ordering::Acquire),
        }
    }

    pub(crate) fn get(
        &self,
        cf: u32,
        key: &[u8],
        options: &ReadOptions<'_>,
    ) -> Result<Option<Vec<u8>>> {
        let sv = self.super_version();
        let sequence = self.read_sequence(options);
        let view = sv.cf(cf).ok_or_else(|| {
            Error::invalid_argument(format!("column family {} does not exist", cf))
        })?;
        let merge_operator = view.options.merge_operator.as_deref();
        let mut state = LookupState::default();

        for mem in iter::once(&view.mem).chain(view.imm.iter()) {
            if mem.for_each_version(key, sequence, |t, v| Ok(state.visit(t, v)))? {
                return state.finish(key, merge_operator);
            }
        }

        let Some(levels) = sv.version.cf(cf) else {
            return state.finish(key, merge_operator);
        };
        let icmp = &view.icmp;
        for file in levels.files(0) {
            if !file.contains_key(icmp, key) {
                continue;
            }
            let done = file.table().for_each_version(
                key,
                sequence,
                options.fill_cache,
                |t, v| Ok(state.visit(t, v)),
            )?;
            if done {
                return state.finish(key, merge_operator);
            }
        }
        for level in 1..levels.num_levels() {
            let Some(file) = levels.find_in_level(icmp, level, key) else {
                continue;
            };
            let done = file.table().for_each_version(
                key,
                sequence,
                options.fill_cache,
                |t, v| Ok(state.visit(t, v)),
            )?;
            if done {
                return state.finish(key, merge_operator);
            }
        }
        state.finish(key, merge_operator)
    }

    pub(crate) fn iter(
        &self,
        cf: u32,
        options: &ReadOptions<'_>,
        lower: Option<Vec<u8>>,
        upper: Option<Vec<u8>>,
    ) -> Result<DBIterator> {
        let sv = self.super_version();
        let sequence = self.read_sequence(options);
        let view = sv.cf(cf).ok_or_else(|| {
            Error::invalid_argument(format!("column family {} does not exist", cf))
        })?;

        let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
        children.push(Box::new(view.mem.iter()));
        for mem in &view.imm {
            children.push(Box::new(mem.iter()));
        }
        if let Some(levels) = sv.version.cf(cf) {
            for file in levels.files(0) {
                children.push(Box::new(file.table().iter(options.fill_cache)));
            }
            for level in 1..levels.num_levels() {
                let files = levels.files(level);
                if !files.is_empty() {
                    children.push(Box::new(LevelIterator::new(
                        files.to_vec(),
                        view.icmp.clone(),
                        options.fill_cache,
                    )));
                }
            }
        }

        let merged = MergingIterator::new(children, view.icmp.clone());
        Ok(DBIterator::new(
            merged,
            view.icmp.clone(),
            view.options.merge_operator.clone(),
            sequence,
            lower,
            upper,
            Arc::clone(&sv),
        ))
    }
}
