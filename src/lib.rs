//! Persistent heap living entirely inside a byte buffer
//!
//! This crate provides a single type called [`Heap`]. It manages a contiguous
//! region of bytes (a [`Vec<u8>`], a borrowed slice or a memory-mapped file)
//! as a heap: it hands out offsets into the region and takes them back. Every
//! piece of bookkeeping is stored in the region itself and consists of
//! offsets, never of pointers. Hence the bytes can be written to disk, mapped
//! at another address or copied around, and opened again later: all
//! allocations are still there.
//!
//! # Usage
//! ```
//! use bufheap::Heap;
//!
//! let mut heap = Heap::<Vec<u8>>::create(vec![0; 4096])?;
//! let address = heap.alloc(16)?;
//! heap.write_word(address, 42)?;
//! heap.set_record(address)?;
//!
//! // later, possibly in another process
//! let storage = heap.close()?;
//! let heap = Heap::<Vec<u8>>::open(storage)?;
//! assert_eq!(heap.read_word(heap.record())?, 42);
//! # Ok::<(), bufheap::Error>(())
//! ```
//! The [record](Heap::record) is a single word the user can store anything
//! in. Usually it is the address of some root data structure, from which
//! everything else in the heap is reachable.
//!
//! All structural fields are words of a fixed width, selected by the type
//! parameter `W` ([`u16`], [`u32`] (the default) or [`u64`]). The word width
//! limits the capacity of the heap and is part of the on-disk format: a
//! buffer must be opened with the same word type it was created with.
//!
//! # Implementation
//! The buffer starts with a header of four words, followed by the allocatable
//! region, which is partitioned into blocks. Each block is framed by a header
//! (a `used` flag and the size `key`) and a footer, which holds the start of
//! the block. The free blocks are additionally linked into an AVL tree keyed
//! by their size (the "free-tree"), whose node fields overlay the first four
//! words of the free payload. The following example uses `u32` words and a
//! buffer of 128 bytes.
//! 1.  A new heap consists of the header and a single free block.
//!     ```text
//!     0   4   8   12  16  20  24                        124 128
//!     nil max rec root|used key | tree links ... free   |foot|
//!     0   128 0   16  |0    100 |                       | 16 |
//!     ```
//!     The header holds the capacity (`max`), the user record and the root of
//!     the free-tree. Every block costs three words of overhead: `used`,
//!     `key` and the footer.
//! 2.  A block of 20 bytes is allocated.
//!     ```text
//!     16             44  48                       124
//!     |USED key=20   |16 |FREE key=68             | 48 |
//!     ```
//!     The smallest free block which fits the request is looked up in the
//!     free-tree and taken out of it. It is large enough, so the rest is split
//!     off as a new free block and put into the tree. The returned address is
//!     the payload at offset 24.
//!
//!     Requests are rounded up to a multiple of the word size and to at least
//!     four words. A rest is only split off if it can hold a minimal free
//!     block itself, otherwise the whole block is handed out.
//! 3.  A block of 8 bytes is allocated, which is rounded up to 16.
//!     ```text
//!     16             44  48         72  76             124
//!     |USED key=20   |16 |USED key=16|48|FREE key=40   | 76 |
//!     ```
//! 4.  The first allocation (address 24) is freed.
//!     ```text
//!     16             44  48         72  76             124
//!     |FREE key=20   |16 |USED key=16|48|FREE key=40   | 76 |
//!     ```
//!     Its predecessor would be named by the word before the block, which is
//!     still part of the header here. Its successor is in use. So the block
//!     is simply inserted into the free-tree.
//! 5.  The second allocation (address 56) is freed.
//!     ```text
//!     16                                               124
//!     |FREE key=100                                    | 16 |
//!     ```
//!     The word right before the block (offset 44) is the footer of the
//!     previous block, which is free. The word after the footer (offset 76)
//!     is the next block, which is free as well. Both are taken out of the
//!     free-tree and merged with the freed block into one, which then goes
//!     back into the tree. Therefore there are never two neighbouring free
//!     blocks and the picture of step 1 is restored.
//!
//! Allocation and deallocation take `O(log n)` time in the number of free
//! blocks. Nothing is ever scanned linearly except by the diagnostics
//! ([`Heap::blocks()`] and [`Heap::check()`]).
//!
//! # Concurrency
//! A [`Heap`] requires `&mut self` for every mutation, so it is never shared
//! without a lock. [`SharedHeap`] is such a lock around a heap. Sharing a
//! memory-mapped file between processes requires a lock on the OS level,
//! which this crate doesn't provide.
mod error;
mod log;
pub mod raw_allocator;
pub mod storage;
mod sync;
pub mod word;

pub use error::{Corruption, Error, Result};
pub use raw_allocator::buffer::{BlockInfo, BlockIter};
pub use raw_allocator::check::HeapStats;
#[cfg(unix)]
pub use storage::MmapFile;
pub use storage::Storage;
pub use sync::SharedHeap;
pub use word::Word;

use log::warn_log;
use raw_allocator::RawAllocator;

/// A persistent heap inside a [`Storage`].
///
/// The heap hands out payload addresses, which are byte offsets into the
/// storage. The user data can be accessed through the bounds-checked accessors
/// like [`read_word()`](Self::read_word) and [`bytes_mut()`](Self::bytes_mut).
///
/// Please refer to the [crate-level](crate)-documentation for the layout of
/// the heap and an example.
pub struct Heap<S, W = u32> {
    raw: RawAllocator<S, W>,
}
impl<S: Storage, W: Word> Heap<S, W> {
    /// Create a new, empty heap in `storage`.
    ///
    /// The capacity is the storage length rounded down to the word size. The
    /// previous contents of the storage are ignored and partially overwritten.
    ///
    /// # Errors
    /// [`Error::InvalidCapacity`] if the capacity is less than eleven words
    /// (the header and a single minimal block) or not addressable with `W`.
    pub fn create(storage: S) -> Result<Self> {
        RawAllocator::create(storage).map(|raw| Self { raw })
    }

    /// Open a heap which was created earlier in `storage`.
    ///
    /// Only the header is validated. Use [`check()`](Self::check) to verify
    /// the whole structure, e.g. after a crash.
    ///
    /// # Errors
    /// [`Error::InvalidHeader`] if the storage does not start with a header
    /// written by [`create()`](Self::create) with the same word type.
    pub fn open(storage: S) -> Result<Self> {
        RawAllocator::open(storage).map(|raw| Self { raw })
    }

    /// Write only a fresh header to `storage`, without any block.
    ///
    /// Such a heap cannot allocate anything. This is only useful to build a
    /// free-tree by hand through [`raw_mut()`](Self::raw_mut).
    ///
    /// # Errors
    /// Same as [`create()`](Self::create).
    pub fn format_unchecked(storage: S) -> Result<Self> {
        RawAllocator::format(storage).map(|raw| Self { raw })
    }

    /// Allocate a block of at least `n` bytes and return its address.
    ///
    /// # Errors
    /// [`Error::AllocFailed`] if there is no free block large enough. The
    /// heap is unchanged and still usable.
    pub fn alloc(&mut self, n: usize) -> Result<usize> {
        self.raw.alloc(n)
    }

    /// Free the block at `address`, which must have been returned by
    /// [`alloc()`](Self::alloc).
    ///
    /// # Errors
    /// [`Error::InvalidAddress`] or [`Error::DoubleFree`] if `address` is not
    /// a live allocation. The heap is unchanged in that case.
    pub fn free(&mut self, address: usize) -> Result<()> {
        self.raw.free(address)
    }

    /// Resizing is not supported.
    ///
    /// # Errors
    /// Always [`Error::Unsupported`].
    pub fn realloc(&mut self, address: usize, n: usize) -> Result<usize> {
        self.raw.realloc(address, n)
    }

    /// The user record word.
    pub fn record(&self) -> usize {
        self.raw.buffer().record()
    }

    /// Store `value` in the user record word.
    ///
    /// # Errors
    /// [`Error::WordOverflow`] if the value does not fit into a word.
    pub fn set_record(&mut self, value: usize) -> Result<()> {
        fits::<W>(value)?;
        self.raw.buffer_mut().set_record(value);
        Ok(())
    }

    /// The capacity of the heap in bytes, including the header.
    pub fn capacity(&self) -> usize {
        self.raw.buffer().max()
    }

    /// The usable size of the allocation at `address`.
    ///
    /// This is at least the requested size, but might be larger due to
    /// rounding or a rest too small to be split off.
    ///
    /// # Errors
    /// Same as [`free()`](Self::free).
    pub fn payload_size(&self, address: usize) -> Result<usize> {
        let node = self.raw.block_of(address)?;
        Ok(self.raw.buffer().key(node))
    }

    /// Read the unsigned word at `address`.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if the word is not completely inside the buffer.
    pub fn read_word(&self, address: usize) -> Result<usize> {
        let buffer = self.raw.buffer();
        let range = buffer.checked(address, W::SIZE)?;
        Ok(W::load(buffer.slice(range)))
    }

    /// Write the unsigned word `value` at `address`.
    ///
    /// # Errors
    /// - [`Error::WordOverflow`] if `value` does not fit into a word.
    /// - [`Error::OutOfBounds`] if the word is not completely inside the
    ///   buffer.
    pub fn write_word(&mut self, address: usize, value: usize) -> Result<()> {
        fits::<W>(value)?;
        let buffer = self.raw.buffer_mut();
        let range = buffer.checked(address, W::SIZE)?;
        W::store(buffer.slice_mut(range), value);
        Ok(())
    }

    /// Read the signed word at `address`.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if the word is not completely inside the buffer.
    pub fn read_signed(&self, address: usize) -> Result<isize> {
        let buffer = self.raw.buffer();
        let range = buffer.checked(address, W::SIZE)?;
        Ok(W::load_signed(buffer.slice(range)))
    }

    /// Write the signed word `value` at `address`.
    ///
    /// # Errors
    /// - [`Error::WordOverflow`] if `value` does not fit into a signed word.
    /// - [`Error::OutOfBounds`] if the word is not completely inside the
    ///   buffer.
    pub fn write_signed(&mut self, address: usize, value: isize) -> Result<()> {
        let max = W::MAX / 2;
        if value.unsigned_abs() > max + usize::from(value < 0) {
            return Err(Error::WordOverflow {
                value: value.unsigned_abs(),
                max,
            });
        }
        let buffer = self.raw.buffer_mut();
        let range = buffer.checked(address, W::SIZE)?;
        W::store_signed(buffer.slice_mut(range), value);
        Ok(())
    }

    /// The `len` bytes starting at `address`.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if the range is not completely inside the
    /// buffer.
    pub fn bytes(&self, address: usize, len: usize) -> Result<&[u8]> {
        let buffer = self.raw.buffer();
        let range = buffer.checked(address, len)?;
        Ok(buffer.slice(range))
    }

    /// The `len` bytes starting at `address`, mutably.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if the range is not completely inside the
    /// buffer.
    pub fn bytes_mut(&mut self, address: usize, len: usize) -> Result<&mut [u8]> {
        let buffer = self.raw.buffer_mut();
        let range = buffer.checked(address, len)?;
        Ok(buffer.slice_mut(range))
    }

    /// The number of bytes needed to store `n` bytes with
    /// [`write_prefixed()`](Self::write_prefixed).
    pub const fn prefixed_len(n: usize) -> usize {
        n.saturating_add(W::SIZE)
    }

    /// Store `data` at `address`, preceded by its length as a word.
    ///
    /// # Errors
    /// - [`Error::WordOverflow`] if the length does not fit into a word.
    /// - [`Error::OutOfBounds`] if the length word and the data are not
    ///   completely inside the buffer. Nothing is written in that case.
    pub fn write_prefixed(&mut self, address: usize, data: &[u8]) -> Result<()> {
        fits::<W>(data.len())?;
        let buffer = self.raw.buffer_mut();
        let range = buffer.checked(address, data.len().saturating_add(W::SIZE))?;
        let bytes = buffer.slice_mut(range);
        let (length, rest) = bytes.split_at_mut(W::SIZE);
        W::store(length, data.len());
        rest.copy_from_slice(data);
        Ok(())
    }

    /// The bytes stored at `address` by [`write_prefixed()`](Self::write_prefixed).
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if the length word or the data it announces are
    /// not completely inside the buffer.
    pub fn read_prefixed(&self, address: usize) -> Result<&[u8]> {
        let len = self.read_word(address)?;
        self.bytes(address + W::SIZE, len)
    }

    /// All blocks of the heap in address order.
    pub fn blocks(&self) -> BlockIter<'_, S, W> {
        self.raw.buffer().blocks()
    }

    /// The sizes of all free blocks in ascending order.
    pub fn free_sizes(&self) -> Vec<usize> {
        self.raw.buffer().in_order()
    }

    /// Verify the complete structure of the heap.
    ///
    /// This walks every block and every free-tree node, so it takes linear
    /// time. It never panics, even on a completely broken buffer.
    ///
    /// # Errors
    /// [`Error::Corrupted`] naming the first violated invariant.
    pub fn check(&self) -> Result<HeapStats> {
        self.raw.buffer().check().map_err(|corruption| {
            warn_log!(%corruption, "heap integrity check failed");
            Error::Corrupted(corruption)
        })
    }

    /// Make all changes durable, as far as the storage supports it.
    ///
    /// # Errors
    /// [`Error::Io`] if the storage failed to flush.
    pub fn flush(&mut self) -> Result<()> {
        self.raw.buffer_mut().storage_mut().flush()?;
        Ok(())
    }

    /// Flush the heap and hand back its storage.
    ///
    /// # Errors
    /// Same as [`flush()`](Self::flush). The storage is dropped in that case.
    pub fn close(mut self) -> Result<S> {
        self.flush()?;
        Ok(self.into_storage())
    }

    /// Hand back the storage without flushing.
    pub fn into_storage(self) -> S {
        self.raw.into_buffer().into_storage()
    }

    /// The underlying storage.
    pub fn storage(&self) -> &S {
        self.raw.buffer().storage()
    }

    /// The raw allocator, e.g. to inspect the free-tree.
    pub fn raw(&self) -> &RawAllocator<S, W> {
        &self.raw
    }

    /// The raw allocator, mutably.
    ///
    /// Writing to the buffer through it bypasses every check and can corrupt
    /// the heap.
    pub fn raw_mut(&mut self) -> &mut RawAllocator<S, W> {
        &mut self.raw
    }
}

/// Reject values which would be truncated when stored as a `W`.
fn fits<W: Word>(value: usize) -> Result<()> {
    if value > W::MAX {
        return Err(Error::WordOverflow {
            value,
            max: W::MAX,
        });
    }
    Ok(())
}
