use std::marker::PhantomData;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::codec::ValueCodec;
use super::commit::{checked_slots, CommitBatch, CommitEngine, CommitReport};
use super::metadata::MetadataStore;
use super::mutator::Mutator;
use super::options::StoreOptions;
use super::partition::PartitionStore;
use super::record::PartitionMetadata;
use crate::types::{DpdError, Key, PartitionId, Result};

/// A set of partitions holding sparse `(key, value)` entries per index.
///
/// Each partition sits behind its own lock, so commits against different
/// partitions run in parallel. Values are fixed-width and typed through
/// [`ValueCodec`].
pub struct SparseStore<V> {
    partitions: Vec<Mutex<PartitionStore>>,
    options: StoreOptions,
    _values: PhantomData<fn() -> V>,
}

impl<V: ValueCodec> SparseStore<V> {
    /// Creates one partition per entry of `partition_sizes`, with ids `0..n`.
    ///
    /// Fails with `InvalidArgument` when the metadata store already holds a
    /// record for one of those ids, which happens when another live store
    /// shares it. Records written before a failure are removed again.
    pub fn create(partition_sizes: &[usize], options: StoreOptions) -> Result<Self> {
        if partition_sizes.is_empty() {
            return Err(DpdError::invalid("store needs at least one partition"));
        }
        if V::SIZE == 0 {
            return Err(DpdError::invalid("value type has zero size"));
        }
        if options.num_slots == 0 {
            return Err(DpdError::invalid("mutators need at least one slot per index"));
        }
        let mut partitions = Vec::with_capacity(partition_sizes.len());
        for (i, &size) in partition_sizes.iter().enumerate() {
            match Self::claim(&options, PartitionId(i as u64), size) {
                Ok(store) => partitions.push(Mutex::new(store)),
                Err(err) => {
                    for cell in partitions {
                        let store = cell.into_inner();
                        if let Err(cleanup) = options.metadata_store.remove(store.id()) {
                            warn!(
                                partition = store.id().0,
                                error = %cleanup,
                                "store.create_cleanup_failed"
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }
        info!(
            partitions = partitions.len(),
            reserve = options.initial_reserve,
            value_size = V::SIZE,
            "store.create"
        );
        Ok(Self {
            partitions,
            options,
            _values: PhantomData,
        })
    }

    /// Options the store was created with.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Number of partitions, which are numbered from zero.
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Number of indices in `partition`.
    pub fn partition_size(&self, partition: PartitionId) -> Result<usize> {
        Ok(self.partition(partition)?.lock().size())
    }

    /// Opens a mutator over every index of `partition` with the configured
    /// slot count.
    pub fn mutator(&self, partition: PartitionId) -> Result<Mutator<'_, V>> {
        let size = self.partition_size(partition)?;
        self.mutator_with(partition, size, self.options.num_slots)
    }

    /// Opens a mutator over the first `num_indices` indices of `partition`.
    pub fn mutator_with(
        &self,
        partition: PartitionId,
        num_indices: usize,
        num_slots: usize,
    ) -> Result<Mutator<'_, V>> {
        let size = self.partition_size(partition)?;
        if num_indices > size {
            return Err(DpdError::IndexOutOfRange {
                index: num_indices - 1,
                len: size,
            });
        }
        if num_slots == 0 {
            return Err(DpdError::invalid("mutator needs at least one slot per index"));
        }
        checked_slots(num_indices, num_slots, V::SIZE)?;
        debug!(partition = partition.0, num_indices, num_slots, "store.mutator");
        Ok(Mutator::open(self, partition, num_indices, num_slots))
    }

    /// Merges a flattened batch into its partition.
    pub fn commit(&self, batch: &CommitBatch) -> Result<CommitReport> {
        let mut store = self.partition(batch.partition())?.lock();
        CommitEngine::new(
            self.options.metadata_store.as_ref(),
            self.options.metrics.as_ref(),
        )
        .max_reserve(self.options.max_reserve)
        .commit(&mut store, batch)
    }

    /// Committed value of `key` under `index`.
    pub fn get(&self, partition: PartitionId, index: usize, key: Key) -> Result<Option<V>> {
        let store = self.partition(partition)?.lock();
        store.get(index, key)?.map(V::decode).transpose()
    }

    /// Committed entries of `index`, ascending by key.
    pub fn entries(&self, partition: PartitionId, index: usize) -> Result<Vec<(Key, V)>> {
        let store = self.partition(partition)?.lock();
        store
            .entries(index)?
            .iter()
            .map(|e| Ok((e.key, V::decode(store.value(e.value_offset)?)?)))
            .collect()
    }

    /// Committed entry count of `index`.
    pub fn len(&self, partition: PartitionId, index: usize) -> Result<usize> {
        let store = self.partition(partition)?.lock();
        Ok(store.offset_count(index)?.count)
    }

    /// Persisted metadata of `partition`.
    pub fn metadata(&self, partition: PartitionId) -> Result<PartitionMetadata> {
        self.partition(partition)?;
        self.options.metadata_store.get(partition)
    }

    /// Overwrites the value of an existing entry without changing layout.
    /// Returns `false` when `key` is not committed under `index`.
    pub fn update(&self, partition: PartitionId, index: usize, key: Key, value: &V) -> Result<bool> {
        let mut store = self.partition(partition)?.lock();
        match store.get_mut(index, key)? {
            Some(slot) => {
                value.encode(slot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Releases every partition and removes its metadata record.
    pub fn destroy(self) -> Result<()> {
        for cell in self.partitions {
            let store = cell.into_inner();
            self.options.metadata_store.remove(store.id())?;
            store.destroy();
        }
        Ok(())
    }

    /// Runs `f` against the locked partition store.
    pub(crate) fn with_partition<R>(
        &self,
        partition: PartitionId,
        f: impl FnOnce(&PartitionStore) -> R,
    ) -> Result<R> {
        let store = self.partition(partition)?.lock();
        Ok(f(&store))
    }

    fn partition(&self, partition: PartitionId) -> Result<&Mutex<PartitionStore>> {
        partition
            .slot()
            .and_then(|slot| self.partitions.get(slot))
            .ok_or_else(|| DpdError::NotFound(format!("partition {partition}")))
    }

    /// Allocates partition `id` and writes its first metadata record, unless
    /// the metadata store already has one.
    fn claim(options: &StoreOptions, id: PartitionId, size: usize) -> Result<PartitionStore> {
        match options.metadata_store.get(id) {
            Err(DpdError::NotFound(_)) => {}
            Ok(existing) => {
                return Err(DpdError::invalid(format!(
                    "metadata store already holds partition {id} ({} entries, reserve {})",
                    existing.size, existing.reserve
                )))
            }
            Err(err) => return Err(err),
        }
        let store = PartitionStore::create(id, size, options.initial_reserve, V::SIZE)?;
        options.metadata_store.put(&store.metadata())?;
        Ok(store)
    }
}
