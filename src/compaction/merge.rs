//! Garbage collection of the versions of one user key during compaction.
//!
//! Live snapshot sequences split a key's history into stripes: stripe `i`
//! holds the records a reader at `snapshots[i]` can see but a reader at
//! `snapshots[i - 1]` cannot; the last stripe holds everything newer than
//! every snapshot. A reader only ever sees the newest record of a stripe,
//! so everything below it can go.

use crate::error::Result;
use crate::memtable::{Record, ValueType};
use crate::merge_operator::MergeOperator;

/// Stripe of `sequence` given ascending live `snapshots`.
pub fn stripe_of(sequence: u64, snapshots: &[u64]) -> usize {
    snapshots.partition_point(|s| *s < sequence)
}

/// Reduces the versions of one user key to those a reader can observe.
///
/// `versions` must be newest first. `bottommost` says no level below the
/// output holds the key, which lets tombstones go and merge chains fold
/// without a base. Returns the surviving records, newest first.
pub fn collapse_versions(
    versions: Vec<Record>,
    snapshots: &[u64],
    bottommost: bool,
    merge_operator: Option<&dyn MergeOperator>,
) -> Result<Vec<Record>> {
    let mut out = Vec::with_capacity(1);
    let mut i = 0;
    while i < versions.len() {
        let top = &versions[i];
        let stripe = stripe_of(top.sequence, snapshots);
        let stripe_end = versions[i..]
            .iter()
            .position(|r| stripe_of(r.sequence, snapshots) != stripe)
            .map_or(versions.len(), |p| i + p);
        let is_oldest_stripe = stripe_end == versions.len();

        match top.value_type {
            ValueType::Value => out.push(top.clone()),
            ValueType::Deletion => {
                // Nothing older survives in the output, and nothing older
                // exists below it.
                if !(bottommost && is_oldest_stripe && stripe == 0) {
                    out.push(top.clone());
                }
            }
            ValueType::Merge => {
                let chain_len = versions[i..stripe_end]
                    .iter()
                    .take_while(|r| r.value_type == ValueType::Merge)
                    .count();
                let chain = &versions[i..i + chain_len];
                let base = versions.get(i + chain_len).filter(|_| i + chain_len < stripe_end);
                let foldable = base.is_some() || (is_oldest_stripe && bottommost);

                match merge_operator.filter(|_| foldable) {
                    Some(op) => {
                        let operands: Vec<Vec<u8>> =
                            chain.iter().rev().map(|r| r.value.clone()).collect();
                        let existing = base
                            .filter(|b| b.value_type == ValueType::Value)
                            .map(|b| b.value.as_slice());
                        let merged = op.full_merge(&top.key, existing, &operands)?;
                        out.push(Record::put(top.key.clone(), merged, top.sequence));
                    }
                    None => {
                        out.extend(chain.iter().cloned());
                        // The chain's base still belongs to this stripe.
                        if let Some(base) = base {
                            out.push(base.clone());
                        }
                    }
                }
            }
        }
        i = stripe_end;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge_operator::StringAppendOperator;

    fn put(seq: u64, v: &str) -> Record {
        Record::put(b"k".to_vec(), v.as_bytes().to_vec(), seq)
    }

    fn del(seq: u64) -> Record {
        Record::delete(b"k".to_vec(), seq)
    }

    fn merge(seq: u64, v: &str) -> Record {
        Record::merge(b"k".to_vec(), v.as_bytes().to_vec(), seq)
    }

    fn seqs(records: &[Record]) -> Vec<u64> {
        records.iter().map(|r| r.sequence).collect()
    }

    #[test]
    fn test_stripe_of() {
        let snaps = [10, 20];
        assert_eq!(stripe_of(5, &snaps), 0);
        assert_eq!(stripe_of(10, &snaps), 0);
        assert_eq!(stripe_of(11, &snaps), 1);
        assert_eq!(stripe_of(25, &snaps), 2);
        assert_eq!(stripe_of(25, &[]), 0);
    }

    #[test]
    fn test_newest_wins_without_snapshots() {
        let out = collapse_versions(vec![put(3, "c"), put(2, "b"), put(1, "a")], &[], false, None)
            .unwrap();
        assert_eq!(seqs(&out), vec![3]);
    }

    #[test]
    fn test_snapshots_keep_visible_versions() {
        let out = collapse_versions(
            vec![put(30, "c"), put(25, "b"), put(15, "x"), put(5, "a")],
            &[10, 20],
            false,
            None,
        )
        .unwrap();
        assert_eq!(seqs(&out), vec![30, 15, 5]);
    }

    #[test]
    fn test_tombstone_dropped_only_at_bottom() {
        let versions = vec![del(3), put(2, "b")];
        let out = collapse_versions(versions.clone(), &[], true, None).unwrap();
        assert!(out.is_empty());

        let out = collapse_versions(versions.clone(), &[], false, None).unwrap();
        assert_eq!(seqs(&out), vec![3]);

        // A snapshot older than the tombstone still sees the put.
        let out = collapse_versions(versions, &[2], true, None).unwrap();
        assert_eq!(seqs(&out), vec![3, 2]);
    }

    #[test]
    fn test_merge_folds_onto_base() {
        let op = StringAppendOperator::new(b',');
        let out = collapse_versions(
            vec![merge(3, "c"), merge(2, "b"), put(1, "a")],
            &[],
            false,
            Some(&op),
        )
        .unwrap();
        assert_eq!(out, vec![Record::put(b"k".to_vec(), b"a,b,c".to_vec(), 3)]);
    }

    #[test]
    fn test_merge_over_tombstone_has_no_base() {
        let op = StringAppendOperator::new(b',');
        let out =
            collapse_versions(vec![merge(3, "x"), del(2)], &[], false, Some(&op)).unwrap();
        assert_eq!(out, vec![Record::put(b"k".to_vec(), b"x".to_vec(), 3)]);
    }

    #[test]
    fn test_merge_chain_kept_without_base() {
        let op = StringAppendOperator::new(b',');
        let versions = vec![merge(3, "c"), merge(2, "b")];
        let out = collapse_versions(versions.clone(), &[], false, Some(&op)).unwrap();
        assert_eq!(seqs(&out), vec![3, 2]);

        let out = collapse_versions(versions, &[], true, Some(&op)).unwrap();
        assert_eq!(out, vec![Record::put(b"k".to_vec(), b"b,c".to_vec(), 3)]);
    }

    #[test]
    fn test_merge_does_not_cross_snapshot() {
        let op = StringAppendOperator::new(b',');
        let out = collapse_versions(
            vec![merge(5, "b"), put(2, "a")],
            &[3],
            false,
            Some(&op),
        )
        .unwrap();
        assert_eq!(seqs(&out), vec![5, 2]);
        assert_eq!(out[0].value_type, ValueType::Merge);
    }

    #[test]
    fn test_collapse_is_idempotent() {
        let op = StringAppendOperator::new(b',');
        let versions = vec![merge(9, "d"), put(8, "c"), del(4), merge(3, "b"), put(1, "a")];
        let snaps = [2, 5];
        let once = collapse_versions(versions, &snaps, true, Some(&op)).unwrap();
        let twice = collapse_versions(once.clone(), &snaps, true, Some(&op)).unwrap();
        assert_eq!(once, twice);
    }
}
