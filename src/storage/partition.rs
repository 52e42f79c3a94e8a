use tracing::{debug, trace};

use super::record::{EntryOffset, OffsetCount, PartitionMetadata};
use crate::types::{BufferHandle, DpdError, Key, PartitionId, Result};

/// Flat value array with a fixed stride, addressed by entry position.
///
/// The length is always `capacity * value_size`; every accessor is bounds
/// checked against that.
#[derive(Debug, Clone)]
pub struct ValueBuf {
    value_size: usize,
    bytes: Vec<u8>,
}

impl ValueBuf {
    fn with_capacity(capacity: usize, value_size: usize) -> Result<Self> {
        let len = capacity
            .checked_mul(value_size)
            .ok_or(DpdError::OutOfMemory {
                requested: capacity,
            })?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| DpdError::OutOfMemory {
                requested: capacity,
            })?;
        bytes.resize(len, 0);
        Ok(Self { value_size, bytes })
    }

    /// Stride of one value in bytes.
    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// Number of value slots.
    pub fn capacity(&self) -> usize {
        self.bytes.len() / self.value_size
    }

    fn span(&self, slot: usize) -> Result<core::ops::Range<usize>> {
        if slot >= self.capacity() {
            return Err(DpdError::IndexOutOfRange {
                index: slot,
                len: self.capacity(),
            });
        }
        let start = slot * self.value_size;
        Ok(start..start + self.value_size)
    }

    /// Value bytes held in `slot`.
    pub fn get(&self, slot: usize) -> Result<&[u8]> {
        let span = self.span(slot)?;
        Ok(&self.bytes[span])
    }

    /// Mutable value bytes held in `slot`.
    pub fn get_mut(&mut self, slot: usize) -> Result<&mut [u8]> {
        let span = self.span(slot)?;
        Ok(&mut self.bytes[span])
    }

    /// Copies `src` into `slot`.
    pub fn write(&mut self, slot: usize, src: &[u8]) -> Result<()> {
        if src.len() != self.value_size {
            return Err(DpdError::invalid(format!(
                "value has {} bytes, partition stores {}",
                src.len(),
                self.value_size
            )));
        }
        self.span(slot)?;
        self.put(slot, src);
        Ok(())
    }

    /// Exchanges the values held in slots `a` and `b`.
    pub fn swap(&mut self, a: usize, b: usize) -> Result<()> {
        self.span(a)?;
        self.span(b)?;
        self.exchange(a, b);
        Ok(())
    }

    /// Unchecked-by-result form of [`ValueBuf::write`] for callers that have
    /// already validated the slot and width. Panics if either is wrong.
    pub(crate) fn put(&mut self, slot: usize, src: &[u8]) {
        let start = slot * self.value_size;
        self.bytes[start..start + self.value_size].copy_from_slice(src);
    }

    /// Infallible form of [`ValueBuf::swap`] for pre-validated slots.
    pub(crate) fn exchange(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let lo_start = lo * self.value_size;
        let (head, tail) = self.bytes.split_at_mut(hi * self.value_size);
        head[lo_start..lo_start + self.value_size].swap_with_slice(&mut tail[..self.value_size]);
    }

    fn copy_prefix(&mut self, other: &ValueBuf, slots: usize) -> Result<()> {
        let len = slots * self.value_size;
        let src = other
            .bytes
            .get(..len)
            .ok_or_else(|| DpdError::invalid("source value buffer shorter than prefix"))?;
        let dst = self
            .bytes
            .get_mut(..len)
            .ok_or_else(|| DpdError::invalid("destination value buffer shorter than prefix"))?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

/// Backing storage for one partition.
///
/// Holds the per-index `OffsetCount` table and the parallel entry/value arrays
/// sized to the reserve. The store performs allocation and copying only; the
/// commit engine owns every layout decision.
#[derive(Debug)]
pub struct PartitionStore {
    id: PartitionId,
    indices: Vec<OffsetCount>,
    entries: Vec<EntryOffset>,
    values: ValueBuf,
    used: usize,
    handle: BufferHandle,
}

impl PartitionStore {
    /// Allocates a partition of `size` indices with room for `initial_reserve`
    /// entries of `value_size` bytes each.
    pub fn create(
        id: PartitionId,
        size: usize,
        initial_reserve: usize,
        value_size: usize,
    ) -> Result<Self> {
        if size == 0 {
            return Err(DpdError::invalid(format!("partition {id} has zero indices")));
        }
        if initial_reserve == 0 {
            return Err(DpdError::invalid(format!("partition {id} has zero reserve")));
        }
        if value_size == 0 {
            return Err(DpdError::invalid(format!(
                "partition {id} has zero-sized values"
            )));
        }
        let mut indices = Vec::new();
        indices
            .try_reserve_exact(size)
            .map_err(|_| DpdError::OutOfMemory { requested: size })?;
        indices.resize(size, OffsetCount::default());
        let entries = alloc_entries(initial_reserve)?;
        let values = ValueBuf::with_capacity(initial_reserve, value_size)?;
        debug!(
            partition = id.0,
            size,
            reserve = initial_reserve,
            value_size,
            "partition.create"
        );
        Ok(Self {
            id,
            indices,
            entries,
            values,
            used: 0,
            handle: BufferHandle::default(),
        })
    }

    /// Reallocates the entry/value buffers with `new_reserve` capacity.
    ///
    /// The used prefix is copied verbatim, value offsets included. The old
    /// buffers are only released once the new ones exist, so a failed
    /// allocation leaves the partition untouched.
    pub fn grow(&mut self, new_reserve: usize) -> Result<BufferHandle> {
        let grown = self.prepare_grow(new_reserve)?;
        Ok(self.install(grown))
    }

    /// Allocates and fills grown buffers without installing them.
    pub(crate) fn prepare_grow(&self, new_reserve: usize) -> Result<GrownBuffers> {
        if new_reserve < self.used {
            return Err(DpdError::invalid(format!(
                "cannot shrink partition {} below {} used entries",
                self.id, self.used
            )));
        }
        let mut entries = alloc_entries(new_reserve)?;
        let mut values = ValueBuf::with_capacity(new_reserve, self.values.value_size())?;
        entries[..self.used].copy_from_slice(&self.entries[..self.used]);
        values.copy_prefix(&self.values, self.used)?;
        Ok(GrownBuffers { entries, values })
    }

    /// Swaps in buffers from [`PartitionStore::prepare_grow`] and advances the
    /// buffer handle. Cannot fail.
    pub(crate) fn install(&mut self, grown: GrownBuffers) -> BufferHandle {
        let old_reserve = self.reserve();
        self.entries = grown.entries;
        self.values = grown.values;
        self.handle = self.handle.next();
        trace!(
            partition = self.id.0,
            old_reserve,
            new_reserve = self.reserve(),
            handle = self.handle.0,
            "partition.grow"
        );
        self.handle
    }

    /// Releases the partition's buffers.
    pub fn destroy(self) {
        debug!(partition = self.id.0, reserve = self.reserve(), "partition.destroy");
    }

    /// Partition this store backs.
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Number of indices in the partition's domain.
    pub fn size(&self) -> usize {
        self.indices.len()
    }

    /// Entry capacity of the current buffers.
    pub fn reserve(&self) -> usize {
        self.entries.len()
    }

    /// Entries currently in use.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Width of one value in bytes.
    pub fn value_size(&self) -> usize {
        self.values.value_size()
    }

    /// Generation of the current buffers; advances on every growth.
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Metadata describing the store as it is right now.
    pub fn metadata(&self) -> PartitionMetadata {
        PartitionMetadata {
            partition: self.id,
            reserve: self.reserve(),
            size: self.used,
            handle: self.handle,
        }
    }

    /// Offset and count of `index` in the entry buffer.
    pub fn offset_count(&self, index: usize) -> Result<OffsetCount> {
        self.indices
            .get(index)
            .copied()
            .ok_or(DpdError::IndexOutOfRange {
                index,
                len: self.indices.len(),
            })
    }

    /// Committed entry records of `index`, ascending by key.
    pub fn entries(&self, index: usize) -> Result<&[EntryOffset]> {
        let oc = self.offset_count(index)?;
        self.entries.get(oc.range()).ok_or_else(|| {
            DpdError::corruption(format!(
                "index {index} of partition {} points past the entry buffer",
                self.id
            ))
        })
    }

    /// Value bytes of `key` under `index`, if present.
    pub fn get(&self, index: usize, key: Key) -> Result<Option<&[u8]>> {
        let run = self.entries(index)?;
        match run.binary_search_by_key(&key, |e| e.key) {
            Ok(pos) => Ok(Some(self.values.get(run[pos].value_offset)?)),
            Err(_) => Ok(None),
        }
    }

    /// Mutable value bytes of `key` under `index`, if present.
    pub fn get_mut(&mut self, index: usize, key: Key) -> Result<Option<&mut [u8]>> {
        let run = self.entries(index)?;
        match run.binary_search_by_key(&key, |e| e.key) {
            Ok(pos) => {
                let slot = run[pos].value_offset;
                Ok(Some(self.values.get_mut(slot)?))
            }
            Err(_) => Ok(None),
        }
    }

    /// Iterates the used entry records in buffer order.
    pub fn used_entries(&self) -> &[EntryOffset] {
        &self.entries[..self.used]
    }

    /// Value bytes held in `slot`.
    pub fn value(&self, slot: usize) -> Result<&[u8]> {
        self.values.get(slot)
    }

    pub(crate) fn parts_mut(&mut self) -> PartitionParts<'_> {
        PartitionParts {
            indices: &mut self.indices,
            entries: &mut self.entries,
            values: &mut self.values,
            used: &mut self.used,
        }
    }

    pub(crate) fn index_table(&self) -> &[OffsetCount] {
        &self.indices
    }
}

/// Buffers allocated for a growth but not yet installed.
pub(crate) struct GrownBuffers {
    entries: Vec<EntryOffset>,
    values: ValueBuf,
}

/// Split mutable borrow of a partition's buffers for the commit engine.
pub(crate) struct PartitionParts<'a> {
    pub indices: &'a mut [OffsetCount],
    pub entries: &'a mut [EntryOffset],
    pub values: &'a mut ValueBuf,
    pub used: &'a mut usize,
}

fn alloc_entries(capacity: usize) -> Result<Vec<EntryOffset>> {
    let mut entries = Vec::new();
    entries
        .try_reserve_exact(capacity)
        .map_err(|_| DpdError::OutOfMemory {
            requested: capacity,
        })?;
    entries.resize(capacity, EntryOffset::default());
    Ok(entries)
}
