//! Fixed-width on-disk words.
//!
//! Every structural field of a heap buffer is one word wide. The width is a
//! deployment parameter chosen by the type parameter `W` of
//! [`Heap`](crate::Heap); it is part of the on-disk format, so a buffer must
//! always be reopened with the word type it was created with. Words are stored
//! little-endian regardless of the host.

/// A fixed-width word used for every field of the on-disk layout.
///
/// This trait is sealed and implemented for [`u16`], [`u32`] and [`u64`].
pub trait Word: sealed::Sealed + Copy + Send + Sync + 'static {
    /// The width of the word in bytes.
    const SIZE: usize;
    /// The largest unsigned value a word can hold.
    const MAX: usize;

    /// Read an unsigned word from the first `SIZE` bytes of `bytes`.
    fn load(bytes: &[u8]) -> usize;
    /// Write `value` as an unsigned word into the first `SIZE` bytes.
    ///
    /// The value is truncated to the word width; callers validate first.
    fn store(bytes: &mut [u8], value: usize);
    /// Read a signed word.
    fn load_signed(bytes: &[u8]) -> isize;
    /// Write a signed word.
    fn store_signed(bytes: &mut [u8], value: isize);
}

mod sealed {
    pub trait Sealed {}
}

macro_rules! word_impl {
    ($unsigned:ty, $signed:ty) => {
        impl sealed::Sealed for $unsigned {}
        impl Word for $unsigned {
            const SIZE: usize = core::mem::size_of::<$unsigned>();
            #[allow(clippy::cast_possible_truncation)]
            const MAX: usize = if core::mem::size_of::<$unsigned>() >= core::mem::size_of::<usize>() {
                usize::MAX
            } else {
                <$unsigned>::MAX as usize
            };

            #[inline]
            fn load(bytes: &[u8]) -> usize {
                let mut raw = [0; core::mem::size_of::<$unsigned>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$unsigned>::from_le_bytes(raw) as usize
            }

            #[inline]
            fn store(bytes: &mut [u8], value: usize) {
                debug_assert!(value <= <Self as Word>::MAX, "value {value} does not fit a word");
                bytes[..Self::SIZE].copy_from_slice(&(value as $unsigned).to_le_bytes());
            }

            #[inline]
            fn load_signed(bytes: &[u8]) -> isize {
                let mut raw = [0; core::mem::size_of::<$signed>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$signed>::from_le_bytes(raw) as isize
            }

            #[inline]
            fn store_signed(bytes: &mut [u8], value: isize) {
                bytes[..Self::SIZE].copy_from_slice(&(value as $signed).to_le_bytes());
            }
        }
    };
}

word_impl!(u16, i16);
word_impl!(u32, i32);
word_impl!(u64, i64);
