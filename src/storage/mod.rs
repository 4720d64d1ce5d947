//! Byte storage a [`Heap`](crate::Heap) can live in.
//!
//! The allocator itself only needs a contiguous, writable byte slice. Where
//! those bytes come from (a vector, a borrowed slice, a memory-mapped file) and
//! how they reach stable storage is the business of a [`Storage`].
use std::io;

#[cfg(unix)]
mod mmap;
#[cfg(unix)]
pub use mmap::MmapFile;

/// A contiguous region of bytes backing a heap.
///
/// The length of the region must not change while a heap uses it.
pub trait Storage {
    /// The whole region.
    fn bytes(&self) -> &[u8];

    /// The whole region, mutably.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Make previous writes durable.
    ///
    /// Storages without a backing medium don't need to do anything.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// The length of the region in bytes.
    fn len(&self) -> usize {
        self.bytes().len()
    }

    /// Whether the region is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl Storage for Box<[u8]> {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl Storage for &mut [u8] {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::Storage;

    #[test]
    fn borrowed_slices_write_through() {
        let mut backing = [0u8; 8];
        {
            let mut storage: &mut [u8] = &mut backing;
            storage.bytes_mut()[3] = 42;
            assert_eq!(storage.len(), 8);
            storage.flush().unwrap();
        }
        assert_eq!(backing[3], 42);
    }

    #[test]
    fn owned_storages() {
        let mut vec = vec![0u8; 4];
        vec.bytes_mut()[0] = 1;
        assert_eq!(vec.bytes(), &[1, 0, 0, 0]);

        let boxed: Box<[u8]> = vec.into_boxed_slice();
        assert_eq!(Storage::len(&boxed), 4);
        assert!(!Storage::is_empty(&boxed));
    }
}
