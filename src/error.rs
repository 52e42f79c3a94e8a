//! Error type shared by every layer of the crate.

use thiserror::Error;

use crate::storage::ConfigError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DpdError>;

/// Errors reported by partition stores, mutators and the commit engine.
///
/// Every error is local to one partition; a failed commit leaves that
/// partition's metadata and buffers exactly as they were before the call.
#[derive(Debug, Error)]
pub enum DpdError {
    /// A zero-sized partition, reserve or value, or an otherwise malformed request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An index outside of the partition (or mutator) domain.
    #[error("index {index} out of range (domain has {len} indices)")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of addressable indices.
        len: usize,
    },
    /// A mutator was written to after it committed.
    #[error("mutator used after commit")]
    UseAfterCommit,
    /// Entry or value buffers could not be allocated.
    #[error("out of memory allocating {requested} entries")]
    OutOfMemory {
        /// Requested capacity in entries.
        requested: usize,
    },
    /// The merge would place more entries than the reserve holds.
    #[error("capacity exceeded: {size} entries do not fit reserve {reserve}")]
    CapacityExceeded {
        /// Entries the merge would produce.
        size: usize,
        /// Reserve available to the merge.
        reserve: usize,
    },
    /// The operation exists in the interface but has no committed semantics.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    /// A partition or metadata record does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// Persisted state failed validation.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DpdError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        DpdError::InvalidArgument(message.into())
    }

    pub(crate) fn corruption(message: impl Into<String>) -> Self {
        DpdError::Corruption(message.into())
    }
}
