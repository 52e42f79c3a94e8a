use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::record::{PartitionMetadata, META_RECORD_LEN};
use crate::types::{DpdError, PartitionId, Result};

/// Key-value persistence for [`PartitionMetadata`], one record per partition.
///
/// Implementations only need last-writer-wins semantics per partition; the
/// commit engine never writes the same partition from two places at once.
pub trait MetadataStore: Send + Sync {
    /// Loads the record for `partition`.
    fn get(&self, partition: PartitionId) -> Result<PartitionMetadata>;

    /// Stores `metadata` under its own partition id.
    fn put(&self, metadata: &PartitionMetadata) -> Result<()>;

    /// Drops the record for `partition`. Missing records are not an error.
    fn remove(&self, partition: PartitionId) -> Result<()>;
}

/// In-process [`MetadataStore`] holding checksummed encoded records.
#[derive(Default)]
pub struct MemMetadataStore {
    records: RwLock<FxHashMap<PartitionId, [u8; META_RECORD_LEN]>>,
}

impl MemMetadataStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of partitions with a stored record.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True when no partition has a record.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn corrupt(&self, partition: PartitionId) {
        if let Some(bytes) = self.records.write().get_mut(&partition) {
            bytes[0] ^= 0xFF;
        }
    }
}

impl MetadataStore for MemMetadataStore {
    fn get(&self, partition: PartitionId) -> Result<PartitionMetadata> {
        let records = self.records.read();
        let bytes = records
            .get(&partition)
            .ok_or_else(|| DpdError::NotFound(format!("metadata for partition {partition}")))?;
        let md = PartitionMetadata::decode(bytes)?;
        if md.partition != partition {
            return Err(DpdError::corruption(format!(
                "metadata stored under partition {partition} describes partition {}",
                md.partition
            )));
        }
        Ok(md)
    }

    fn put(&self, metadata: &PartitionMetadata) -> Result<()> {
        let bytes = metadata.encode()?;
        self.records.write().insert(metadata.partition, bytes);
        Ok(())
    }

    fn remove(&self, partition: PartitionId) -> Result<()> {
        self.records.write().remove(&partition);
        Ok(())
    }
}
