//! This module provides the raw allocator and its support types.
//!
//! A "raw allocator" is one, that simply gets requests for a specific number
//! of bytes and hands out offsets into its buffer. It neither knows about
//! types nor about alignment beyond the word size: every block and every
//! payload starts at a multiple of the word size.
pub mod buffer;
pub mod check;
pub mod node;
pub mod tree;

use self::buffer::{Buffer, HEADER_WORDS};
use self::node::{Node, MIN_KEY_WORDS, OVERHEAD_WORDS};
use crate::error::{Error, Result};
use crate::log::{debug_log, trace_log};
use crate::storage::Storage;
use crate::word::Word;

/// A raw memory allocator over the bytes of a [`Storage`].
///
/// All of the allocator's state is kept inside the storage itself: the header
/// at offset zero, a header and footer around every block and the free-tree
/// linking the free blocks. Dropping the allocator and wrapping the same
/// bytes again with [`open()`](Self::open) continues exactly where it left
/// off.
pub struct RawAllocator<S, W> {
    buffer: Buffer<S, W>,
}
impl<S: Storage, W: Word> RawAllocator<S, W> {
    /// Smallest capacity: the header plus one block of the minimum size.
    pub const MIN_CAPACITY: usize = (HEADER_WORDS + MIN_KEY_WORDS + OVERHEAD_WORDS) * W::SIZE;
    /// Largest capacity addressable with a word.
    pub const MAX_CAPACITY: usize = W::MAX - W::MAX % W::SIZE;

    /// Write a fresh header to the storage, without any block.
    ///
    /// The allocatable region is left as it is. This is only useful to
    /// operate on the free-tree directly; use [`create()`](Self::create) for a
    /// usable heap.
    ///
    /// # Errors
    /// [`Error::InvalidCapacity`] if the word-rounded storage length is less
    /// than [`MIN_CAPACITY`](Self::MIN_CAPACITY) or more than
    /// [`MAX_CAPACITY`](Self::MAX_CAPACITY).
    pub fn format(storage: S) -> Result<Self> {
        let capacity = storage.bytes().len() / W::SIZE * W::SIZE;
        if !(Self::MIN_CAPACITY..=Self::MAX_CAPACITY).contains(&capacity) {
            return Err(Error::InvalidCapacity {
                capacity,
                min: Self::MIN_CAPACITY,
                max: Self::MAX_CAPACITY,
            });
        }

        let mut buffer = Buffer::new(storage);
        buffer.clear_header();
        buffer.set_max(capacity);
        Ok(Self { buffer })
    }

    /// Create a new heap spanning the whole storage.
    ///
    /// The heap consists of a single free block covering everything after the
    /// header.
    ///
    /// # Errors
    /// Same as [`format()`](Self::format).
    pub fn create(storage: S) -> Result<Self> {
        let mut allocator = Self::format(storage)?;
        let start = Buffer::<S, W>::region_start();
        let max = allocator.buffer.max();
        allocator.insert_free(Node(start), max - start - OVERHEAD_WORDS * W::SIZE);
        debug_log!(capacity = max, word = W::SIZE, "created heap");
        Ok(allocator)
    }

    /// Attach to a storage holding a heap created earlier.
    ///
    /// Only the header is validated, the rest of the structure is trusted.
    /// Use [`Buffer::check()`] for a full verification.
    ///
    /// # Errors
    /// [`Error::InvalidHeader`] if the header could not have been written by
    /// [`create()`](Self::create) with the same word type.
    pub fn open(storage: S) -> Result<Self> {
        let buffer = Buffer::<S, W>::new(storage);
        let start = Buffer::<S, W>::region_start();
        if buffer.len() < start {
            return Err(Error::InvalidHeader("storage is shorter than the header"));
        }
        if buffer.nil() != 0 {
            return Err(Error::InvalidHeader("nil word is not zero"));
        }
        let max = buffer.max();
        if max % W::SIZE != 0 || max < Self::MIN_CAPACITY || max > buffer.len() {
            return Err(Error::InvalidHeader("capacity does not match the storage"));
        }
        let root = buffer.root();
        if !root.is_nil() && (root.0 < start || root.0 >= max || root.0 % W::SIZE != 0) {
            return Err(Error::InvalidHeader("free-tree root is outside the heap"));
        }

        debug_log!(capacity = max, word = W::SIZE, "opened heap");
        Ok(Self { buffer })
    }

    /// The underlying buffer.
    pub fn buffer(&self) -> &Buffer<S, W> {
        &self.buffer
    }

    /// The underlying buffer, mutably.
    pub fn buffer_mut(&mut self) -> &mut Buffer<S, W> {
        &mut self.buffer
    }

    /// Unwrap the underlying buffer.
    pub fn into_buffer(self) -> Buffer<S, W> {
        self.buffer
    }

    /// The block size granted for a request of `n` bytes, if representable.
    fn request_size(n: usize) -> Option<usize> {
        let rounded = n.checked_add(W::SIZE - 1)? / W::SIZE * W::SIZE;
        Some(rounded.max(MIN_KEY_WORDS * W::SIZE))
    }

    /// Allocate a new memory block of at least `n` bytes.
    ///
    /// The request is rounded up to a multiple of the word size and to at
    /// least four words. The smallest free block which fits is taken. If it
    /// is large enough to leave a free block of the minimum size behind, it
    /// is split, otherwise it is handed out as a whole (slightly larger than
    /// requested).
    ///
    /// Returns the payload address of the block.
    ///
    /// # Errors
    /// [`Error::AllocFailed`] if there is no free block large enough. Nothing
    /// is changed in that case.
    pub fn alloc(&mut self, n: usize) -> Result<usize> {
        let request = Self::request_size(n).ok_or(Error::AllocFailed { requested: n })?;
        let Some(node) = self.buffer.smallest_fit(request) else {
            debug_log!(requested = request, "allocation failed");
            return Err(Error::AllocFailed { requested: n });
        };

        self.take_free(node)?;
        let size = self.buffer.key(node);
        if size >= request + (MIN_KEY_WORDS + OVERHEAD_WORDS) * W::SIZE {
            self.buffer.set_key(node, request);
            self.buffer.write_footer(node);
            let rest = self.buffer.next(node);
            let rest_size = size - request - OVERHEAD_WORDS * W::SIZE;
            self.insert_free(rest, rest_size);
            trace_log!(block = node.0, size = request, rest = rest.0, rest_size, "split block");
        }

        let address = node.payload::<W>();
        trace_log!(requested = n, address, size = self.buffer.key(node), "alloc");
        Ok(address)
    }

    /// Look up the used block belonging to a payload address.
    ///
    /// # Errors
    /// - [`Error::InvalidAddress`] if the address cannot be the payload of a
    ///   block (misaligned, outside the region or without a matching footer).
    /// - [`Error::DoubleFree`] if the block is free.
    pub fn block_of(&self, address: usize) -> Result<Node> {
        let start = Buffer::<S, W>::region_start();
        let max = self.buffer.max();
        if address % W::SIZE != 0 || address < start + 2 * W::SIZE || address >= max {
            return Err(Error::InvalidAddress { address });
        }

        let node = Node::from_payload::<W>(address);
        let key = self.buffer.key(node);
        let fits = node
            .0
            .checked_add(key)
            .and_then(|end| end.checked_add(OVERHEAD_WORDS * W::SIZE))
            .map_or(false, |end| end <= max);
        if !fits || self.buffer.get(self.buffer.foot(node)) != node.0 {
            return Err(Error::InvalidAddress { address });
        }
        if !self.buffer.used(node) {
            return Err(Error::DoubleFree { address });
        }
        Ok(node)
    }

    /// Free the block at the payload address `address`.
    ///
    /// The block is merged with its predecessor and its successor in address
    /// order, if they are free, so that no two neighbouring blocks are ever
    /// both free. The merged block is put into the free-tree.
    ///
    /// The headers of merged neighbours end up inside the payload of the
    /// merged block. They are marked free, so freeing such an address again is
    /// reported as a double free.
    ///
    /// # Errors
    /// See [`block_of()`](Self::block_of). The heap is not changed if the
    /// address is rejected.
    pub fn free(&mut self, address: usize) -> Result<()> {
        let node = self.block_of(address)?;
        let start = Buffer::<S, W>::region_start();
        let max = self.buffer.max();

        let prev = if node.0 - W::SIZE >= start {
            Some(self.buffer.prev(node)).filter(|&prev| !self.buffer.used(prev))
        } else {
            None
        };
        let next = Some(self.buffer.next(node)).filter(|&next| next.0 < max && !self.buffer.used(next));

        let mut merged = node;
        let mut size = self.buffer.key(node);
        if let Some(prev) = prev {
            self.take_free(prev)?;
            size += self.buffer.key(prev) + OVERHEAD_WORDS * W::SIZE;
            merged = prev;
        }
        if let Some(next) = next {
            self.take_free(next)?;
            size += self.buffer.key(next) + OVERHEAD_WORDS * W::SIZE;
        }
        self.insert_free(merged, size);
        // headers swallowed by the merged block must not look like live blocks
        if merged != node {
            self.buffer.set_used(node, false);
        }
        if let Some(next) = next {
            self.buffer.set_used(next, false);
        }

        trace_log!(
            address,
            block = merged.0,
            size,
            merged_prev = prev.is_some(),
            merged_next = next.is_some(),
            "free"
        );
        Ok(())
    }

    /// Resize an allocation.
    ///
    /// # Errors
    /// Always [`Error::Unsupported`]: allocate, copy and free instead.
    pub fn realloc(&mut self, _address: usize, _n: usize) -> Result<usize> {
        Err(Error::Unsupported("realloc"))
    }

    /// Put the block at `node` into the free-tree as a free block of `size`.
    fn insert_free(&mut self, node: Node, size: usize) {
        debug_assert!(size >= MIN_KEY_WORDS * W::SIZE, "free block of {size} bytes is too small");
        self.buffer.add_at(node, size);
        self.buffer.set_used(node, false);
        self.buffer.write_footer(node);
    }

    /// Take the free block at `node` out of the free-tree and mark it used.
    fn take_free(&mut self, node: Node) -> Result<()> {
        self.buffer.remove_at(node)?;
        self.buffer.set_used(node, true);
        Ok(())
    }
}
