use serde::Serialize;

use crate::storage::{SparseStore, ValueCodec};
use crate::types::{PartitionId, Result};

/// Layout statistics for one partition.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStats {
    /// Partition described.
    pub partition: u64,
    /// Number of indices.
    pub size: usize,
    /// Committed entries.
    pub used_entries: usize,
    /// Entry capacity of the current buffers.
    pub reserve: usize,
    /// `used_entries / reserve`.
    pub fill_ratio: f64,
    /// Longest run held by a single index.
    pub max_entries_per_index: usize,
    /// Indices with no committed entry.
    pub empty_indices: usize,
    /// Buffer handle, i.e. how many times the partition has grown.
    pub buffer_generation: u64,
    /// Width of one value in bytes.
    pub value_size: usize,
}

/// Collects layout statistics for every partition of `store`.
pub fn stats<V: ValueCodec>(store: &SparseStore<V>) -> Result<Vec<PartitionStats>> {
    (0..store.num_partitions())
        .map(|i| partition_stats(store, PartitionId(i as u64)))
        .collect()
}

/// Statistics for a single partition.
pub fn partition_stats<V: ValueCodec>(
    store: &SparseStore<V>,
    partition: PartitionId,
) -> Result<PartitionStats> {
    store.with_partition(partition, |part| {
        let table = part.index_table();
        PartitionStats {
            partition: partition.0,
            size: part.size(),
            used_entries: part.used(),
            reserve: part.reserve(),
            fill_ratio: part.used() as f64 / part.reserve() as f64,
            max_entries_per_index: table.iter().map(|oc| oc.count).max().unwrap_or(0),
            empty_indices: table.iter().filter(|oc| oc.count == 0).count(),
            buffer_generation: part.handle().0,
            value_size: part.value_size(),
        }
    })
}
