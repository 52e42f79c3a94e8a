use core::ops::Range;

use crate::primitives::bytes::{buf::Cursor, le};
use crate::types::{record_crc32, BufferHandle, DpdError, Key, PartitionId, Result};

/// Encoded length of a [`PartitionMetadata`] record.
pub const META_RECORD_LEN: usize = 40;

const META_PARTITION: Range<usize> = 0..8;
const META_RESERVE: Range<usize> = 8..16;
const META_SIZE: Range<usize> = 16..24;
const META_HANDLE: Range<usize> = 24..32;
const META_CRC32: Range<usize> = 32..36;
const META_RESERVED: Range<usize> = 36..40;

/// Start and length of one index's entry run inside the partition buffers.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct OffsetCount {
    /// Position of the first entry record.
    pub offset: usize,
    /// Number of entries owned by the index.
    pub count: usize,
}

impl OffsetCount {
    /// Run of `count` records starting at `offset`.
    pub fn new(offset: usize, count: usize) -> Self {
        Self { offset, count }
    }

    /// One past the last entry record.
    pub fn end(&self) -> usize {
        self.offset + self.count
    }

    /// Record positions covered by the run.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }
}

/// A stored entry: its key and where its value lives in the value array.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct EntryOffset {
    /// Entry key, unique within its index.
    pub key: Key,
    /// Value slot holding the entry's bytes.
    pub value_offset: usize,
}

impl EntryOffset {
    /// Record for `key` whose value sits in slot `value_offset`.
    pub fn new(key: Key, value_offset: usize) -> Self {
        Self { key, value_offset }
    }
}

/// Bookkeeping for one partition, persisted through a
/// [`super::MetadataStore`] between commits.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PartitionMetadata {
    /// Partition the record describes.
    pub partition: PartitionId,
    /// Entry capacity of the current buffers.
    pub reserve: usize,
    /// Entries currently in use.
    pub size: usize,
    /// Generation of the buffers backing the partition.
    pub handle: BufferHandle,
}

impl PartitionMetadata {
    /// Metadata of an empty partition.
    pub fn new(partition: PartitionId, reserve: usize, handle: BufferHandle) -> Self {
        Self {
            partition,
            reserve,
            size: 0,
            handle,
        }
    }

    /// Entries that can still be added without growing.
    pub fn headroom(&self) -> usize {
        self.reserve.saturating_sub(self.size)
    }

    /// Serializes the record with its checksum.
    pub fn encode(&self) -> Result<[u8; META_RECORD_LEN]> {
        let mut out = [0u8; META_RECORD_LEN];
        le::put_u64(&mut out[META_PARTITION], self.partition.0)?;
        le::put_u64(&mut out[META_RESERVE], self.reserve as u64)?;
        le::put_u64(&mut out[META_SIZE], self.size as u64)?;
        le::put_u64(&mut out[META_HANDLE], self.handle.0)?;
        let crc = record_crc32(self.partition.0, &out[..META_CRC32.start]);
        le::put_u32(&mut out[META_CRC32], crc)?;
        out[META_RESERVED].fill(0);
        Ok(out)
    }

    /// Parses and checks an encoded record.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != META_RECORD_LEN {
            return Err(DpdError::corruption(format!(
                "metadata record has {} bytes, expected {META_RECORD_LEN}",
                bytes.len()
            )));
        }
        let mut cursor = Cursor::new(bytes);
        let partition = cursor.u64()?;
        let reserve = cursor.u64()?;
        let size = cursor.u64()?;
        let handle = cursor.u64()?;
        let stored_crc = cursor.u32()?;
        let crc = record_crc32(partition, &bytes[..META_CRC32.start]);
        if crc != stored_crc {
            return Err(DpdError::corruption(format!(
                "metadata checksum mismatch for partition {partition}"
            )));
        }
        let md = Self {
            partition: PartitionId(partition),
            reserve: to_usize(reserve)?,
            size: to_usize(size)?,
            handle: BufferHandle(handle),
        };
        if md.size > md.reserve {
            return Err(DpdError::corruption(format!(
                "partition {partition} records size {} above reserve {}",
                md.size, md.reserve
            )));
        }
        Ok(md)
    }
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| DpdError::corruption(format!("value {value} does not fit usize")))
}
