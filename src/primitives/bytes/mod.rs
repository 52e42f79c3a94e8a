#![forbid(unsafe_code)]
//! Fixed-width encoders and a bounds-checked cursor used by the metadata record
//! layout.

pub mod le {
    //! Little-endian fixed-width integers.

    use crate::error::{DpdError, Result};

    const U64_LEN: usize = core::mem::size_of::<u64>();
    const U32_LEN: usize = core::mem::size_of::<u32>();

    /// Writes `v` into the first eight bytes of `dst`.
    pub fn put_u64(dst: &mut [u8], v: u64) -> Result<()> {
        let head = dst
            .get_mut(..U64_LEN)
            .ok_or_else(|| DpdError::invalid("u64 destination shorter than 8 bytes"))?;
        head.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Reads a u64 from the first eight bytes of `src`.
    pub fn get_u64(src: &[u8]) -> Result<u64> {
        let head = src.get(..U64_LEN).ok_or_else(|| {
            DpdError::corruption(format!("u64 source shorter than 8 bytes (have {})", src.len()))
        })?;
        let mut bytes = [0u8; U64_LEN];
        bytes.copy_from_slice(head);
        Ok(u64::from_le_bytes(bytes))
    }

    /// Writes `v` into the first four bytes of `dst`.
    pub fn put_u32(dst: &mut [u8], v: u32) -> Result<()> {
        let head = dst
            .get_mut(..U32_LEN)
            .ok_or_else(|| DpdError::invalid("u32 destination shorter than 4 bytes"))?;
        head.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Reads a u32 from the first four bytes of `src`.
    pub fn get_u32(src: &[u8]) -> Result<u32> {
        let head = src.get(..U32_LEN).ok_or_else(|| {
            DpdError::corruption(format!("u32 source shorter than 4 bytes (have {})", src.len()))
        })?;
        let mut bytes = [0u8; U32_LEN];
        bytes.copy_from_slice(head);
        Ok(u32::from_le_bytes(bytes))
    }
}

pub mod buf {
    //! A simple slice-backed cursor for ergonomic parsing.

    use core::fmt;

    use crate::error::{DpdError, Result};

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        buf: &'a [u8],
        off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes from the cursor, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .ok_or_else(|| DpdError::corruption("cursor offset overflow"))?;
            let slice = self.buf.get(self.off..end).ok_or_else(|| {
                DpdError::corruption(format!(
                    "cursor take beyond buffer: need {}, remaining {}",
                    n,
                    self.remaining()
                ))
            })?;
            self.off = end;
            Ok(slice)
        }

        /// Reads a little-endian u64.
        pub fn u64(&mut self) -> Result<u64> {
            super::le::get_u64(self.take(8)?)
        }

        /// Reads a little-endian u32.
        pub fn u32(&mut self) -> Result<u32> {
            super::le::get_u32(self.take(4)?)
        }

        /// Bytes consumed so far.
        pub fn offset(&self) -> usize {
            self.off
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
