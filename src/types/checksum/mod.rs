//! Record checksums.

/// CRC32 of a persisted record, salted with the partition it belongs to so a
/// record copied under the wrong partition id fails validation.
pub fn record_crc32(partition: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&partition.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}
