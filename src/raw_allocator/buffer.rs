use super::node::Node;
use crate::error::{Corruption, Error, Result};
use crate::storage::Storage;
use crate::word::Word;

use core::marker::PhantomData;
use core::ops::Range;

/// Word index of the `nil` sentinel; always zero.
const NIL: usize = 0;
/// Word index of the capacity in bytes.
const MAX: usize = 1;
/// Word index of the user anchor.
const RECORD: usize = 2;
/// Word index of the free-tree root.
const ROOT: usize = 3;
/// Number of header words; the allocatable region starts right after them.
pub const HEADER_WORDS: usize = 4;

/// Word-granular view on the storage backing the heap.
///
/// The buffer knows the header layout at offset zero and provides word
/// access at arbitrary byte offsets. The plain accessors ([`get()`](Self::get),
/// [`set()`](Self::set) and the signed variants) are used by the allocator on
/// offsets it derived from the structure itself, so an offset outside the
/// buffer means the structure is broken: they panic. Everything reachable from
/// user input goes through the checked variants instead.
pub struct Buffer<S, W> {
    storage: S,
    _word: PhantomData<W>,
}
impl<S: Storage, W: Word> Buffer<S, W> {
    /// Wrap a storage without touching its contents.
    pub const fn new(storage: S) -> Self {
        Self {
            storage,
            _word: PhantomData,
        }
    }

    /// The wrapped storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Mutable access to the wrapped storage.
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Unwrap the storage.
    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Length of the storage in bytes (not necessarily the heap capacity).
    pub fn len(&self) -> usize {
        self.storage.bytes().len()
    }

    /// Read the unsigned word at `offset`.
    ///
    /// # Panics
    /// This function panics if the word does not lie completely inside the
    /// buffer.
    pub fn get(&self, offset: usize) -> usize {
        let bytes = self.storage.bytes();
        assert!(
            offset.checked_add(W::SIZE).map_or(false, |end| end <= bytes.len()),
            "word offset {offset:#x} out of bounds"
        );
        W::load(&bytes[offset..])
    }

    /// Write the unsigned word at `offset`.
    ///
    /// # Panics
    /// This function panics if the word does not lie completely inside the
    /// buffer.
    pub fn set(&mut self, offset: usize, value: usize) {
        let bytes = self.storage.bytes_mut();
        assert!(
            offset.checked_add(W::SIZE).map_or(false, |end| end <= bytes.len()),
            "word offset {offset:#x} out of bounds"
        );
        W::store(&mut bytes[offset..], value);
    }

    /// Read the signed word at `offset`.
    ///
    /// # Panics
    /// Same as [`get()`](Self::get).
    pub fn get_signed(&self, offset: usize) -> isize {
        let bytes = self.storage.bytes();
        assert!(
            offset.checked_add(W::SIZE).map_or(false, |end| end <= bytes.len()),
            "word offset {offset:#x} out of bounds"
        );
        W::load_signed(&bytes[offset..])
    }

    /// Write the signed word at `offset`.
    ///
    /// # Panics
    /// Same as [`set()`](Self::set).
    pub fn set_signed(&mut self, offset: usize, value: isize) {
        let bytes = self.storage.bytes_mut();
        assert!(
            offset.checked_add(W::SIZE).map_or(false, |end| end <= bytes.len()),
            "word offset {offset:#x} out of bounds"
        );
        W::store_signed(&mut bytes[offset..], value);
    }

    /// Read the unsigned word at `offset`, reporting a bad offset instead of
    /// panicking.
    pub fn load(&self, offset: usize) -> Result<usize, Corruption> {
        self.checked(offset, W::SIZE)
            .map(|range| W::load(&self.storage.bytes()[range]))
            .map_err(|_| Corruption::OutOfBounds { offset })
    }

    /// Read the signed word at `offset`, reporting a bad offset instead of
    /// panicking.
    pub fn load_signed(&self, offset: usize) -> Result<isize, Corruption> {
        self.checked(offset, W::SIZE)
            .map(|range| W::load_signed(&self.storage.bytes()[range]))
            .map_err(|_| Corruption::OutOfBounds { offset })
    }

    /// Validate an access of `len` bytes at `offset` against the storage
    /// length.
    pub fn checked(&self, offset: usize, len: usize) -> Result<Range<usize>> {
        let capacity = self.len();
        offset
            .checked_add(len)
            .filter(|&end| end <= capacity)
            .map(|end| offset..end)
            .ok_or(Error::OutOfBounds {
                offset,
                len,
                capacity,
            })
    }

    /// The bytes in `range`, which must have passed [`checked()`](Self::checked).
    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        &self.storage.bytes()[range]
    }

    /// The bytes in `range`, which must have passed [`checked()`](Self::checked).
    pub fn slice_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        &mut self.storage.bytes_mut()[range]
    }

    /// The `nil` sentinel stored at offset zero.
    pub fn nil(&self) -> usize {
        self.get(NIL * W::SIZE)
    }

    /// Capacity of the heap in bytes, i.e. the end of the allocatable region.
    pub fn max(&self) -> usize {
        self.get(MAX * W::SIZE)
    }

    pub fn set_max(&mut self, max: usize) {
        self.set(MAX * W::SIZE, max);
    }

    /// The user anchor word.
    pub fn record(&self) -> usize {
        self.get(RECORD * W::SIZE)
    }

    pub fn set_record(&mut self, record: usize) {
        self.set(RECORD * W::SIZE, record);
    }

    /// The root of the free-tree or [`Node::NIL`].
    pub fn root(&self) -> Node {
        Node(self.get(ROOT * W::SIZE))
    }

    pub fn set_root(&mut self, root: Node) {
        self.set(ROOT * W::SIZE, root.0);
    }

    /// Zero the header words.
    pub fn clear_header(&mut self) {
        for index in 0..HEADER_WORDS {
            self.set(index * W::SIZE, 0);
        }
    }

    /// Offset of the first block.
    pub const fn region_start() -> usize {
        HEADER_WORDS * W::SIZE
    }

    /// Iterate over all blocks in address order.
    pub fn blocks(&self) -> BlockIter<'_, S, W> {
        BlockIter::new(self)
    }
}

/// Summary of a single block as seen by an address-order walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Start of the block (its `used` word).
    pub block: usize,
    /// The payload address, as returned by `alloc` for a used block.
    pub address: usize,
    /// The usable size of the block.
    pub size: usize,
    /// Whether the block is allocated.
    pub used: bool,
}

/// Address-order iterator over the blocks of a buffer.
///
/// The iterator trusts the `key` word of each block. It stops at the end of
/// the allocatable region, or as soon as a block would not fit into it, so it
/// terminates even on a corrupt buffer.
pub struct BlockIter<'buffer, S, W> {
    buffer: &'buffer Buffer<S, W>,
    offset: usize,
}
impl<'buffer, S: Storage, W: Word> BlockIter<'buffer, S, W> {
    /// Create a block iterator over the given [`Buffer`].
    pub fn new(buffer: &'buffer Buffer<S, W>) -> Self {
        Self {
            buffer,
            offset: Buffer::<S, W>::region_start(),
        }
    }
}
impl<'buffer, S: Storage, W: Word> Iterator for BlockIter<'buffer, S, W> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let max = self.buffer.load(MAX * W::SIZE).ok()?.min(self.buffer.len());
        let block = self.offset;
        if block >= max {
            return None;
        }
        let size = self.buffer.load(Node(block).key_offset::<W>()).ok()?;
        let used = self.buffer.load(block).ok()? != 0;
        let end = block.checked_add(size)?.checked_add(3 * W::SIZE)?;
        if end > max {
            // a broken size: make sure the walk ends here
            self.offset = usize::MAX;
        } else {
            self.offset = end;
        }
        Some(BlockInfo {
            block,
            address: block + 2 * W::SIZE,
            size,
            used,
        })
    }
}
