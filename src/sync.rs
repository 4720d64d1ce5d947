use crate::error::Result;
use crate::storage::Storage;
use crate::word::Word;
use crate::Heap;

use spin::{Mutex, MutexGuard};

/// A [`Heap`] behind a spin lock, usable from several threads at once.
///
/// The heap itself never locks. This wrapper serializes all operations, so
/// each one runs to completion before the next starts. Use
/// [`lock()`](Self::lock) to run several operations (e.g. an allocation and
/// the writes initializing it) as one unit.
pub struct SharedHeap<S, W = u32> {
    inner: Mutex<Heap<S, W>>,
}
impl<S: Storage, W: Word> SharedHeap<S, W> {
    pub const fn new(heap: Heap<S, W>) -> Self {
        Self {
            inner: Mutex::new(heap),
        }
    }

    /// Lock the heap for exclusive use.
    pub fn lock(&self) -> MutexGuard<'_, Heap<S, W>> {
        self.inner.lock()
    }

    /// See [`Heap::alloc()`].
    ///
    /// # Errors
    /// Same as [`Heap::alloc()`].
    pub fn alloc(&self, n: usize) -> Result<usize> {
        self.lock().alloc(n)
    }

    /// See [`Heap::free()`].
    ///
    /// # Errors
    /// Same as [`Heap::free()`].
    pub fn free(&self, address: usize) -> Result<()> {
        self.lock().free(address)
    }

    pub fn record(&self) -> usize {
        self.lock().record()
    }

    /// See [`Heap::set_record()`].
    ///
    /// # Errors
    /// Same as [`Heap::set_record()`].
    pub fn set_record(&self, value: usize) -> Result<()> {
        self.lock().set_record(value)
    }

    /// Take the heap out of the lock.
    pub fn into_inner(self) -> Heap<S, W> {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::SharedHeap;
    use crate::Heap;

    #[test]
    fn operations_go_through_the_lock() {
        let shared = SharedHeap::new(Heap::<Vec<u8>>::create(vec![0; 256]).unwrap());
        let address = shared.alloc(16).unwrap();
        shared.set_record(address).unwrap();
        {
            let mut heap = shared.lock();
            heap.write_word(address, 7).unwrap();
        }
        assert_eq!(shared.record(), address);
        shared.free(address).unwrap();

        let heap = shared.into_inner();
        assert_eq!(heap.free_sizes(), [256 - 16 - 12]);
        heap.check().unwrap();
    }
}
