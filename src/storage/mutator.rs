use std::collections::BTreeMap;

use rustc_hash::FxHashSet;
use tracing::{error, warn};

use super::codec::ValueCodec;
use super::commit::{CommitBatch, CommitReport};
use super::metrics::CommitMetrics;
use super::store::SparseStore;
use crate::types::{DpdError, Key, PartitionId, Result};

/// Staging area for writes to one partition.
///
/// Each index owns up to `num_slots` slots kept sorted by key. Writes beyond
/// that spill into a per-index overflow list which is not committed; the
/// partition only ever receives the first `num_slots` distinct keys per index
/// from one mutator.
///
/// A mutator that goes out of scope without [`Mutator::commit`] commits
/// itself. Errors from that implicit commit can only be logged, so call
/// `commit` explicitly when the outcome matters.
pub struct Mutator<'a, V: ValueCodec> {
    store: &'a SparseStore<V>,
    partition: PartitionId,
    num_slots: usize,
    rows: Vec<Vec<(Key, V)>>,
    overflow: BTreeMap<usize, Vec<(Key, V)>>,
    erased: FxHashSet<(usize, Key)>,
    committed: bool,
}

impl<'a, V: ValueCodec> Mutator<'a, V> {
    pub(crate) fn open(
        store: &'a SparseStore<V>,
        partition: PartitionId,
        num_indices: usize,
        num_slots: usize,
    ) -> Self {
        let rows = (0..num_indices).map(|_| Vec::new()).collect();
        Self {
            store,
            partition,
            num_slots,
            rows,
            overflow: BTreeMap::new(),
            erased: FxHashSet::default(),
            committed: false,
        }
    }

    /// Partition this mutator stages into.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Number of indices this mutator can stage into.
    pub fn num_indices(&self) -> usize {
        self.rows.len()
    }

    /// Staging slots per index.
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// True once [`Mutator::commit`] has run, successfully or not.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Returns the value slot for `key` under `index`, staging a default value
    /// if the key is not already in the index's slots.
    ///
    /// Once an index's slots are full, new keys land in the overflow list even
    /// if the same key is already there.
    pub fn set(&mut self, index: usize, key: Key) -> Result<&mut V> {
        self.check_writable(index)?;
        let num_slots = self.num_slots;
        let row = &mut self.rows[index];
        match row.binary_search_by_key(&key, |&(k, _)| k) {
            Ok(pos) => Ok(&mut row[pos].1),
            Err(pos) if row.len() < num_slots => {
                row.insert(pos, (key, V::default()));
                Ok(&mut row[pos].1)
            }
            Err(_) => {
                let spill = self.overflow.entry(index).or_default();
                spill.push((key, V::default()));
                let last = spill.len() - 1;
                Ok(&mut spill[last].1)
            }
        }
    }

    /// Stages `value` for `key` under `index`.
    pub fn insert(&mut self, index: usize, key: Key, value: V) -> Result<()> {
        *self.set(index, key)? = value;
        Ok(())
    }

    /// Records an erase request.
    ///
    /// Committed storage has no removal path, so the request is kept for
    /// inspection through [`Mutator::pending_erasures`] and the call reports
    /// `NotImplemented`.
    pub fn erase(&mut self, index: usize, key: Key) -> Result<()> {
        self.check_writable(index)?;
        self.erased.insert((index, key));
        warn!(partition = self.partition.0, index, key, "mutator.erase_unsupported");
        Err(DpdError::NotImplemented("erasing committed entries"))
    }

    /// True when `key` is staged under `index`, in a slot or in overflow.
    pub fn contains(&self, index: usize, key: Key) -> bool {
        self.get(index, key).is_some()
    }

    /// Staged value for `key` under `index`. Slot values win over overflow;
    /// among overflow entries the latest write wins.
    pub fn get(&self, index: usize, key: Key) -> Option<&V> {
        let row = self.rows.get(index)?;
        if let Ok(pos) = row.binary_search_by_key(&key, |&(k, _)| k) {
            return Some(&row[pos].1);
        }
        self.overflow
            .get(&index)?
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    /// Keys staged under `index`: slot keys ascending, then overflow keys in
    /// write order.
    pub fn row_keys(&self, index: usize) -> Result<Vec<Key>> {
        let row = self.rows.get(index).ok_or(DpdError::IndexOutOfRange {
            index,
            len: self.rows.len(),
        })?;
        let mut keys: Vec<Key> = row.iter().map(|&(k, _)| k).collect();
        if let Some(spill) = self.overflow.get(&index) {
            keys.extend(spill.iter().map(|&(k, _)| k));
        }
        Ok(keys)
    }

    /// Distinct staged keys across every index, in first-seen order.
    pub fn keys(&self) -> Vec<Key> {
        let mut seen = FxHashSet::default();
        let mut keys = Vec::new();
        for index in self.indices() {
            for (key, _) in self.staged(index) {
                if seen.insert(key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Indices with at least one staged entry, ascending.
    pub fn indices(&self) -> Vec<usize> {
        (0..self.rows.len())
            .filter(|&index| {
                !self.rows[index].is_empty() || self.overflow.contains_key(&index)
            })
            .collect()
    }

    /// Indices that have `key` staged, ascending.
    pub fn indices_with(&self, key: Key) -> Vec<usize> {
        self.indices()
            .into_iter()
            .filter(|&index| self.contains(index, key))
            .collect()
    }

    /// Entries staged past the slot capacity. These are not committed.
    pub fn overflow_len(&self) -> usize {
        self.overflow.values().map(Vec::len).sum()
    }

    /// Erase requests recorded so far.
    pub fn pending_erasures(&self) -> usize {
        self.erased.len()
    }

    /// Flattens the staged slots and merges them into the partition.
    ///
    /// The mutator is spent once this is called, whether or not the merge
    /// succeeds; later calls return `Ok(None)` and later writes fail with
    /// `UseAfterCommit`.
    pub fn commit(&mut self) -> Result<Option<CommitReport>> {
        if self.committed {
            return Ok(None);
        }
        self.committed = true;
        let batch = self.flatten()?;
        let dropped = self.overflow_len();
        if dropped > 0 {
            warn!(
                partition = self.partition.0,
                dropped,
                num_slots = self.num_slots,
                "mutator.overflow_dropped"
            );
            self.store.options().metrics.overflow_dropped(dropped);
        }
        self.rows.clear();
        self.overflow.clear();
        self.erased.clear();
        let mut report = self.store.commit(&batch)?;
        report.dropped_overflow = dropped;
        Ok(Some(report))
    }

    fn flatten(&self) -> Result<CommitBatch> {
        let mut batch = CommitBatch::new(self.partition, self.rows.len(), self.num_slots, V::SIZE)?;
        let mut scratch = vec![0u8; V::SIZE];
        for (index, row) in self.rows.iter().enumerate() {
            for (key, value) in row {
                value.encode(&mut scratch);
                batch.push(index, *key, &scratch)?;
            }
        }
        Ok(batch)
    }

    fn staged(&self, index: usize) -> impl Iterator<Item = (Key, &V)> + '_ {
        let slots = self.rows[index].iter();
        let spill = self.overflow.get(&index).into_iter().flatten();
        slots.chain(spill).map(|(k, v)| (*k, v))
    }

    fn check_writable(&self, index: usize) -> Result<()> {
        if self.committed {
            return Err(DpdError::UseAfterCommit);
        }
        if index >= self.rows.len() {
            return Err(DpdError::IndexOutOfRange {
                index,
                len: self.rows.len(),
            });
        }
        Ok(())
    }
}

impl<V: ValueCodec> Drop for Mutator<'_, V> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(err) = self.commit() {
            error!(partition = self.partition.0, error = %err, "mutator.implicit_commit_failed");
        }
    }
}
