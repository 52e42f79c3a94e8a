use crate::types::{DpdError, Result};

/// Fixed-width encoding for values stored in a partition.
///
/// The partition buffers are byte arrays with a stride of `SIZE`; the codec
/// converts between those bytes and the caller's value type. `Default` supplies
/// the value a freshly staged entry starts with.
pub trait ValueCodec: Clone + Default {
    /// Encoded width in bytes. Must be non-zero.
    const SIZE: usize;

    /// Writes the value into `out`, which is exactly `SIZE` bytes long.
    fn encode(&self, out: &mut [u8]);

    /// Reads a value back from exactly `SIZE` bytes.
    fn decode(src: &[u8]) -> Result<Self>;
}

macro_rules! le_value_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ValueCodec for $ty {
                const SIZE: usize = core::mem::size_of::<$ty>();

                fn encode(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(src: &[u8]) -> Result<Self> {
                    let bytes: [u8; core::mem::size_of::<$ty>()] =
                        src.try_into().map_err(|_| {
                            DpdError::corruption(concat!(stringify!($ty), " value length mismatch"))
                        })?;
                    Ok(<$ty>::from_le_bytes(bytes))
                }
            }
        )*
    };
}

le_value_codec!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl<const N: usize> ValueCodec for [u8; N]
where
    [u8; N]: Default,
{
    const SIZE: usize = N;

    fn encode(&self, out: &mut [u8]) {
        out.copy_from_slice(self);
    }

    fn decode(src: &[u8]) -> Result<Self> {
        src.try_into()
            .map_err(|_| DpdError::corruption("byte array value length mismatch"))
    }
}

/// Encodes `value` into a freshly allocated buffer.
pub fn encode_to_vec<V: ValueCodec>(value: &V) -> Vec<u8> {
    let mut out = vec![0u8; V::SIZE];
    value.encode(&mut out);
    out
}
