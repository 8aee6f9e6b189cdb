//! Fixed-size key codec for index cells.

use std::fmt::Debug;

/// A key type the index can store: totally ordered, trivially copyable, and
/// occupying a fixed number of bytes on disk.
///
/// Keys are decoded before every comparison, so the encoded image does not
/// need to be order-preserving; little-endian integer bytes are fine.
pub trait IndexKey: Copy + Ord + Debug {
    /// Encoded width in bytes. Every key of the type occupies exactly this
    /// much space in a cell.
    const SIZE: usize;
    /// Smallest key of the type, for full-range scans.
    const MIN: Self;
    /// Largest key of the type.
    const MAX: Self;

    /// Write the key into the first `SIZE` bytes of `buf`.
    fn encode(&self, buf: &mut [u8]);
    /// Read a key back from the first `SIZE` bytes of `buf`.
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_int_key {
    ($($ty:ty),* $(,)?) => {$(
        impl IndexKey for $ty {
            const SIZE: usize = size_of::<$ty>();
            const MIN: Self = <$ty>::MIN;
            const MAX: Self = <$ty>::MAX;

            fn encode(&self, buf: &mut [u8]) {
                buf[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }

            fn decode(buf: &[u8]) -> Self {
                Self::from_le_bytes(buf[..Self::SIZE].try_into().expect("fixed-width key"))
            }
        }
    )*};
}

impl_int_key!(u32, u64, i32, i64);
