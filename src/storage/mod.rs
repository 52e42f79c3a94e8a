//! Partitioned sparse entry storage.
//!
//! Each partition keeps, per index, a sorted run of `(key, value)` entries in
//! shared entry/value buffers. Writes are staged in a [`Mutator`] and merged by
//! the commit engine in one pass per partition.

/// Fixed-width value encoding.
///
/// Converts between typed values and the byte stride stored in a partition.
pub mod codec;

/// Commit engine and flattened commit batches.
///
/// Merges staged entries into sorted, defragmented partition buffers.
pub mod commit;

/// Partition metadata persistence.
pub mod metadata;

/// Fixed-size entry and metadata records.
pub mod record;

mod metrics;
mod mutator;
mod options;
mod partition;
mod store;

pub use codec::{encode_to_vec, ValueCodec};
pub use commit::{merge_runs, plan_reserve, CommitBatch, CommitEngine, CommitReport};
pub use metadata::{MemMetadataStore, MetadataStore};

/// Metrics collection for commits.
pub use metrics::{default_metrics, CommitMetrics, CounterMetrics, NoopMetrics};

/// Staging writes for one partition.
pub use mutator::Mutator;

/// Store configuration.
pub use options::{
    ConfigError, StoreConfig, StoreOptions, DEFAULT_INITIAL_RESERVE, DEFAULT_NUM_SLOTS,
};

/// Raw partition buffers.
pub use partition::{PartitionStore, ValueBuf};
pub use record::{EntryOffset, OffsetCount, PartitionMetadata, META_RECORD_LEN};

/// Top-level partitioned store.
pub use store::SparseStore;
