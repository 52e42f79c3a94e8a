//! Low-level primitives for building the storage engine.

/// Byte-level utilities and encoding/decoding.
///
/// Fixed-width little-endian encoders and a bounds-checked read cursor.
pub mod bytes;
