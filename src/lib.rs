//! Partitioned sparse entry storage.
//!
//! A [`SparseStore`] shards an index domain into partitions. Every index owns
//! a sorted run of fixed-width `(key, value)` entries inside its partition's
//! shared buffers. Writes are staged through a [`Mutator`] and merged by a
//! single-pass commit that keeps runs sorted and value storage compact.
//!
//! ```
//! use dpd::{PartitionId, SparseStore, StoreOptions};
//!
//! let store: SparseStore<f64> =
//!     SparseStore::create(&[4], StoreOptions::new().initial_reserve(20))?;
//! let mut m = store.mutator(PartitionId(0))?;
//! *m.set(0, 5)? = 555.5;
//! *m.set(0, 3)? = 333.3;
//! m.commit()?;
//! assert_eq!(store.entries(PartitionId(0), 0)?, vec![(3, 333.3), (5, 555.5)]);
//! # Ok::<(), dpd::DpdError>(())
//! ```

#![warn(missing_docs)]

pub mod admin;
pub mod error;
pub mod primitives;
pub mod storage;
pub mod types;

pub use error::{DpdError, Result};
pub use storage::{
    CommitBatch, CommitReport, Mutator, SparseStore, StoreConfig, StoreOptions, ValueCodec,
};
pub use types::{BufferHandle, Key, PartitionId};
