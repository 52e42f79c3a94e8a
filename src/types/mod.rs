#![forbid(unsafe_code)]
//! Identifier types shared by the storage layers.

use std::fmt;

pub mod checksum;

pub use crate::error::{DpdError, Result};
pub use checksum::record_crc32;

/// Entry key. Entries of one index are kept strictly ascending by key.
pub type Key = u64;

/// One shard of an index domain.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct PartitionId(pub u64);

/// Identifies one generation of a partition's entry/value buffers.
///
/// A new handle is issued every time the buffers are reallocated by growth.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    /// Returns the handle issued for the next buffer generation.
    pub fn next(self) -> Self {
        BufferHandle(self.0 + 1)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for PartitionId {
    fn from(value: u64) -> Self {
        PartitionId(value)
    }
}

impl From<PartitionId> for u64 {
    fn from(value: PartitionId) -> Self {
        value.0
    }
}

impl PartitionId {
    /// Position in a store's partition table, if addressable on this target.
    pub(crate) fn slot(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}
