//! Merging staged entries into a partition's committed buffers.
//!
//! A commit runs in three phases, all against one partition:
//!
//! 1. **Plan.** The batch is validated, each index's incoming run is sorted and
//!    split into overwrites of existing keys and true inserts, and the new
//!    reserve is decided. Grown buffers are allocated but not installed, and
//!    the resulting metadata is persisted. Nothing is modified until both
//!    succeed, and nothing after this phase can fail.
//! 2. **Merge.** A single ascending pass over the index table opens a gap
//!    after each mutated index's running offset, writes the inserts there with
//!    values appended at the end of the used value region, and stably merges
//!    the gap with the index's existing run.
//! 3. **Defragment.** Merging reorders entry records without moving value
//!    bytes. A cycle-following permutation pass swaps values back so that
//!    record `k` owns value slot `k`.

use smallvec::SmallVec;
use tracing::{debug, info, trace};

use super::codec::ValueCodec;
use super::metadata::MetadataStore;
use super::metrics::CommitMetrics;
use super::partition::{PartitionStore, ValueBuf};
use super::record::{EntryOffset, OffsetCount, PartitionMetadata};
use crate::types::{DpdError, Key, PartitionId, Result};

/// Flattened staged writes for one partition.
///
/// Index `i` owns the slot range `[i * num_slots, (i + 1) * num_slots)` of the
/// key and value arrays; only the first `count(i)` slots of each range are
/// meaningful.
#[derive(Debug, Clone)]
pub struct CommitBatch {
    partition: PartitionId,
    num_indices: usize,
    num_slots: usize,
    value_size: usize,
    counts: Vec<usize>,
    keys: Vec<Key>,
    values: Vec<u8>,
}

impl CommitBatch {
    /// Creates an empty batch covering `num_indices` indices with
    /// `num_slots` slots each.
    pub fn new(
        partition: PartitionId,
        num_indices: usize,
        num_slots: usize,
        value_size: usize,
    ) -> Result<Self> {
        if num_slots == 0 {
            return Err(DpdError::invalid("commit batch needs at least one slot per index"));
        }
        if value_size == 0 {
            return Err(DpdError::invalid("commit batch has zero-sized values"));
        }
        let slots = checked_slots(num_indices, num_slots, value_size)?;
        Ok(Self {
            partition,
            num_indices,
            num_slots,
            value_size,
            counts: zeroed(num_indices)?,
            keys: zeroed(slots)?,
            values: zeroed(slots * value_size)?,
        })
    }

    /// Assembles a batch from raw arrays: one count per index, and
    /// `counts.len() * num_slots` keys and values.
    pub fn from_parts(
        partition: PartitionId,
        num_slots: usize,
        value_size: usize,
        counts: Vec<usize>,
        keys: Vec<Key>,
        values: Vec<u8>,
    ) -> Result<Self> {
        let mut batch = Self::new(partition, counts.len(), num_slots, value_size)?;
        if keys.len() != batch.keys.len() {
            return Err(DpdError::invalid(format!(
                "expected {} keys, got {}",
                batch.keys.len(),
                keys.len()
            )));
        }
        if values.len() != batch.values.len() {
            return Err(DpdError::invalid(format!(
                "expected {} value bytes, got {}",
                batch.values.len(),
                values.len()
            )));
        }
        if let Some(index) = counts.iter().position(|&n| n > num_slots) {
            return Err(DpdError::invalid(format!(
                "index {index} claims {} entries but has {num_slots} slots",
                counts[index]
            )));
        }
        batch.counts = counts;
        batch.keys = keys;
        batch.values = values;
        Ok(batch)
    }

    /// Appends `(key, value)` to the slot range of `index`.
    pub fn push(&mut self, index: usize, key: Key, value: &[u8]) -> Result<()> {
        if index >= self.num_indices {
            return Err(DpdError::IndexOutOfRange {
                index,
                len: self.num_indices,
            });
        }
        if value.len() != self.value_size {
            return Err(DpdError::invalid(format!(
                "value has {} bytes, batch stores {}",
                value.len(),
                self.value_size
            )));
        }
        let n = self.counts[index];
        if n == self.num_slots {
            return Err(DpdError::invalid(format!(
                "index {index} already holds {n} staged entries"
            )));
        }
        let slot = index * self.num_slots + n;
        self.keys[slot] = key;
        self.values[slot * self.value_size..(slot + 1) * self.value_size].copy_from_slice(value);
        self.counts[index] = n + 1;
        Ok(())
    }

    /// Typed variant of [`CommitBatch::push`].
    pub fn push_value<V: ValueCodec>(&mut self, index: usize, key: Key, value: &V) -> Result<()> {
        if V::SIZE != self.value_size {
            return Err(DpdError::invalid(format!(
                "value type is {} bytes, batch stores {}",
                V::SIZE,
                self.value_size
            )));
        }
        let mut scratch = vec![0u8; V::SIZE];
        value.encode(&mut scratch);
        self.push(index, key, &scratch)
    }

    /// Partition the batch targets.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Indices covered, starting from index 0.
    pub fn num_indices(&self) -> usize {
        self.num_indices
    }

    /// Slots per index.
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Width of one staged value in bytes.
    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// Staged entries for `index`; zero for indices outside the batch.
    pub fn count(&self, index: usize) -> usize {
        self.counts.get(index).copied().unwrap_or(0)
    }

    /// Total staged entries over every index.
    pub fn staged(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Conservative incoming demand used by the growth check: every slot of
    /// every index, whether filled or not.
    pub fn demand(&self) -> usize {
        self.num_indices * self.num_slots
    }

    fn key(&self, index: usize, slot: usize) -> Key {
        self.keys[index * self.num_slots + slot]
    }

    fn value(&self, index: usize, slot: usize) -> &[u8] {
        let at = (index * self.num_slots + slot) * self.value_size;
        &self.values[at..at + self.value_size]
    }
}

/// Slot count of a `num_indices × num_slots` batch, rejecting shapes whose
/// key or value arrays could not be addressed.
pub(crate) fn checked_slots(
    num_indices: usize,
    num_slots: usize,
    value_size: usize,
) -> Result<usize> {
    let slots = num_indices.checked_mul(num_slots).ok_or_else(|| {
        DpdError::invalid(format!(
            "{num_indices} indices of {num_slots} slots overflow the slot count"
        ))
    })?;
    slots
        .checked_mul(value_size.max(core::mem::size_of::<Key>()))
        .filter(|&bytes| bytes <= isize::MAX as usize)
        .ok_or_else(|| {
            DpdError::invalid(format!(
                "{slots} slots of {value_size}-byte values exceed addressable memory"
            ))
        })?;
    Ok(slots)
}

fn zeroed<T: Clone + Default>(len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| DpdError::OutOfMemory { requested: len })?;
    v.resize(len, T::default());
    Ok(v)
}

/// Outcome of one commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Partition the batch was merged into.
    pub partition: PartitionId,
    /// Entries added to the partition.
    pub inserted: usize,
    /// Existing entries whose value was overwritten.
    pub updated: usize,
    /// Staged overflow entries that were not part of the batch.
    pub dropped_overflow: usize,
    /// Reserve before growth, when the commit grew the buffers.
    pub grown_from: Option<usize>,
    /// Used entries after the commit.
    pub size: usize,
    /// Reserve after the commit.
    pub reserve: usize,
}

/// Applies [`CommitBatch`]es to partition stores and persists the resulting
/// metadata.
pub struct CommitEngine<'a> {
    metadata: &'a dyn MetadataStore,
    metrics: &'a dyn CommitMetrics,
    max_reserve: Option<usize>,
}

/// Per-index work derived from a batch before anything is modified.
#[derive(Default)]
struct IndexPlan {
    /// Batch slots inserted as new records, ascending by key.
    inserts: SmallVec<[usize; 8]>,
    /// Existing value slots to overwrite, with the batch slot supplying the value.
    updates: SmallVec<[(usize, usize); 8]>,
}

impl<'a> CommitEngine<'a> {
    /// Engine persisting to `metadata` and reporting to `metrics`, with no
    /// reserve ceiling.
    pub fn new(metadata: &'a dyn MetadataStore, metrics: &'a dyn CommitMetrics) -> Self {
        Self {
            metadata,
            metrics,
            max_reserve: None,
        }
    }

    /// Caps the reserve growth may request.
    pub fn max_reserve(mut self, max_reserve: Option<usize>) -> Self {
        self.max_reserve = max_reserve;
        self
    }

    /// Merges `batch` into `store`.
    ///
    /// On error the store and its persisted metadata are left as they were.
    pub fn commit(&self, store: &mut PartitionStore, batch: &CommitBatch) -> Result<CommitReport> {
        let result = self.apply(store, batch);
        if let Err(err) = &result {
            debug!(partition = store.id().0, error = %err, "commit.failed");
            self.metrics.commit_failed();
        }
        result
    }

    fn apply(&self, store: &mut PartitionStore, batch: &CommitBatch) -> Result<CommitReport> {
        let md = self.load_metadata(store)?;
        validate_batch(store, batch)?;
        let plans = plan_indices(store, batch)?;
        let inserted: usize = plans.iter().map(|p| p.inserts.len()).sum();
        let updated: usize = plans.iter().map(|p| p.updates.len()).sum();

        let reserve = plan_reserve(&md, batch.demand(), self.max_reserve)?;
        let new_size = md.size + inserted;
        if new_size > reserve {
            return Err(DpdError::CapacityExceeded {
                size: new_size,
                reserve,
            });
        }

        let grown = if reserve != md.reserve {
            Some(store.prepare_grow(reserve)?)
        } else {
            None
        };
        let committed = PartitionMetadata {
            partition: md.partition,
            reserve,
            size: new_size,
            handle: if grown.is_some() { md.handle.next() } else { md.handle },
        };
        self.metadata.put(&committed)?;

        let mut grown_from = None;
        if let Some(buffers) = grown {
            store.install(buffers);
            info!(
                partition = md.partition.0,
                old_reserve = md.reserve,
                new_reserve = reserve,
                demand = batch.demand(),
                "commit.grow"
            );
            self.metrics.partition_grown(md.reserve, reserve);
            grown_from = Some(md.reserve);
        }

        {
            let parts = store.parts_mut();
            for plan in &plans {
                for &(value_slot, batch_slot) in &plan.updates {
                    let index = batch_slot / batch.num_slots;
                    let slot = batch_slot % batch.num_slots;
                    parts.values.put(value_slot, batch.value(index, slot));
                }
            }
            if inserted > 0 {
                merge_inserts(
                    &mut *parts.indices,
                    &mut *parts.entries,
                    &mut *parts.values,
                    md.size,
                    &plans,
                    batch,
                );
                defragment(&mut parts.entries[..new_size], &mut *parts.values);
            }
            *parts.used = new_size;
        }
        debug_assert_eq!(store.metadata(), committed);

        self.metrics.commit_applied(inserted, updated);
        debug!(
            partition = committed.partition.0,
            inserted,
            updated,
            size = committed.size,
            reserve = committed.reserve,
            "commit.applied"
        );
        Ok(CommitReport {
            partition: committed.partition,
            inserted,
            updated,
            dropped_overflow: 0,
            grown_from,
            size: committed.size,
            reserve: committed.reserve,
        })
    }

    fn load_metadata(&self, store: &PartitionStore) -> Result<PartitionMetadata> {
        let md = self.metadata.get(store.id())?;
        let live = store.metadata();
        if md != live {
            return Err(DpdError::corruption(format!(
                "metadata for partition {} ({md:?}) disagrees with its buffers ({live:?})",
                store.id()
            )));
        }
        Ok(md)
    }
}

/// Decides the reserve a commit with `demand` incoming slots runs against.
///
/// The reserve doubles until the headroom covers the demand, so a commit that
/// grows always ends with at least twice its previous reserve.
pub fn plan_reserve(
    md: &PartitionMetadata,
    demand: usize,
    max_reserve: Option<usize>,
) -> Result<usize> {
    let mut reserve = md.reserve.max(1);
    while reserve - md.size < demand {
        reserve = reserve.checked_mul(2).ok_or(DpdError::OutOfMemory {
            requested: usize::MAX,
        })?;
    }
    if reserve != md.reserve {
        if let Some(limit) = max_reserve {
            if reserve > limit {
                return Err(DpdError::OutOfMemory { requested: reserve });
            }
        }
    }
    Ok(reserve)
}

fn validate_batch(store: &PartitionStore, batch: &CommitBatch) -> Result<()> {
    if batch.partition != store.id() {
        return Err(DpdError::invalid(format!(
            "batch for partition {} applied to partition {}",
            batch.partition,
            store.id()
        )));
    }
    if batch.value_size != store.value_size() {
        return Err(DpdError::invalid(format!(
            "batch values are {} bytes, partition stores {}",
            batch.value_size,
            store.value_size()
        )));
    }
    if batch.num_indices > store.size() {
        return Err(DpdError::IndexOutOfRange {
            index: batch.num_indices - 1,
            len: store.size(),
        });
    }
    Ok(())
}

/// Sorts each incoming run, collapses repeated keys to their last write, and
/// separates overwrites of committed keys from inserts.
fn plan_indices(store: &PartitionStore, batch: &CommitBatch) -> Result<Vec<IndexPlan>> {
    let mut plans = Vec::with_capacity(batch.num_indices);
    for index in 0..batch.num_indices {
        let n = batch.count(index);
        let mut plan = IndexPlan::default();
        if n == 0 {
            plans.push(plan);
            continue;
        }
        let mut run: Vec<(Key, usize)> = (0..n).map(|slot| (batch.key(index, slot), slot)).collect();
        run.sort_by_key(|&(key, _)| key);
        let mut incoming: Vec<(Key, usize)> = Vec::with_capacity(run.len());
        for (key, slot) in run {
            match incoming.last_mut() {
                Some(last) if last.0 == key => last.1 = slot,
                _ => incoming.push((key, slot)),
            }
        }
        let existing = store.entries(index)?;
        for (key, slot) in incoming {
            let batch_slot = index * batch.num_slots + slot;
            match existing.binary_search_by_key(&key, |e| e.key) {
                Ok(pos) => plan.updates.push((existing[pos].value_offset, batch_slot)),
                Err(_) => plan.inserts.push(batch_slot),
            }
        }
        plans.push(plan);
    }
    Ok(plans)
}

/// Single ascending pass that opens a gap per mutated index, fills it, and
/// merges it with the index's existing run. Every index's offset is rewritten,
/// including indices the batch does not cover.
fn merge_inserts(
    indices: &mut [OffsetCount],
    entries: &mut [EntryOffset],
    values: &mut ValueBuf,
    old_size: usize,
    plans: &[IndexPlan],
    batch: &CommitBatch,
) {
    let mut offset = 0usize;
    let mut tail = old_size;
    let mut value_cursor = old_size;
    for (index, oc) in indices.iter_mut().enumerate() {
        debug_assert_eq!(oc.offset + (tail - old_size), offset, "index runs are contiguous");
        let inserts = plans.get(index).map(|p| p.inserts.as_slice()).unwrap_or(&[]);
        let n = inserts.len();
        if n == 0 {
            *oc = OffsetCount::new(offset, oc.count);
            offset += oc.count;
            continue;
        }
        entries.copy_within(offset..tail, offset + n);
        tail += n;
        for (j, &batch_slot) in inserts.iter().enumerate() {
            let slot = batch_slot % batch.num_slots;
            entries[offset + j] = EntryOffset::new(batch.key(index, slot), value_cursor);
            values.put(value_cursor, batch.value(index, slot));
            value_cursor += 1;
        }
        let count = oc.count + n;
        merge_runs(&mut entries[offset..offset + count], n, |a, b| a.key < b.key);
        trace!(index, inserted = n, count, offset, "commit.merge_index");
        *oc = OffsetCount::new(offset, count);
        offset += count;
    }
    debug_assert_eq!(offset, tail);
}

/// Stable in-place merge of the sorted runs `v[..mid]` and `v[mid..]`.
///
/// Rotation-based symmetric merge: `O(n log n)` comparisons and moves, no
/// allocation. On equal elements the left run comes first.
pub fn merge_runs<T, F>(v: &mut [T], mid: usize, less: F)
where
    F: Fn(&T, &T) -> bool,
{
    let len = v.len();
    if mid == 0 || mid >= len || !less(&v[mid], &v[mid - 1]) {
        return;
    }
    sym_merge(v, 0, mid, len, &less);
}

fn sym_merge<T, F>(v: &mut [T], a: usize, m: usize, b: usize, less: &F)
where
    F: Fn(&T, &T) -> bool,
{
    if m - a == 1 {
        // Single left element: find its slot in the right run and rotate it in.
        let (mut i, mut j) = (m, b);
        while i < j {
            let h = (i + j) / 2;
            if less(&v[h], &v[a]) {
                i = h + 1;
            } else {
                j = h;
            }
        }
        v[a..i].rotate_left(1);
        return;
    }
    if b - m == 1 {
        let (mut i, mut j) = (a, m);
        while i < j {
            let h = (i + j) / 2;
            if !less(&v[m], &v[h]) {
                i = h + 1;
            } else {
                j = h;
            }
        }
        v[i..=m].rotate_right(1);
        return;
    }
    let mid = (a + b) / 2;
    let n = mid + m;
    let (mut start, mut r) = if m > mid { (n - b, mid) } else { (a, m) };
    let p = n - 1;
    while start < r {
        let c = (start + r) / 2;
        if !less(&v[p - c], &v[c]) {
            start = c + 1;
        } else {
            r = c;
        }
    }
    let end = n - start;
    if start < m && m < end {
        v[start..end].rotate_left(m - start);
    }
    if a < start && start < mid {
        sym_merge(v, a, start, mid, less);
    }
    if mid < end && end < b {
        sym_merge(v, mid, end, b, less);
    }
}

/// Restores `entries[k].value_offset == k` by permuting value bytes in place.
///
/// `owner[p]` names the record whose value currently sits in slot `p`. Each
/// swap settles at least one slot, so the pass is linear in the entry count
/// and needs no value-sized scratch beyond the swap itself.
///
/// The merge hands out value slots `0..entries.len()` exactly once each, so
/// `owner` is a permutation.
fn defragment(entries: &mut [EntryOffset], values: &mut ValueBuf) {
    let n = entries.len();
    let mut owner = vec![usize::MAX; n];
    for (k, entry) in entries.iter().enumerate() {
        debug_assert_eq!(owner[entry.value_offset], usize::MAX, "value slot claimed twice");
        owner[entry.value_offset] = k;
    }
    let mut swaps = 0usize;
    for i in 0..n {
        while owner[i] != i {
            let k = owner[i];
            values.exchange(i, k);
            owner.swap(i, k);
            swaps += 1;
        }
    }
    for (k, entry) in entries.iter_mut().enumerate() {
        entry.value_offset = k;
    }
    trace!(entries = n, swaps, "commit.defragment");
}
