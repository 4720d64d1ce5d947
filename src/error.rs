use thiserror::Error;

/// Errors reported by a [`Heap`](crate::Heap).
///
/// Only [`Error::AllocFailed`] is an ordinary, expected failure: the heap is
/// exhausted or too fragmented for the request and stays fully usable. Every
/// other variant means a contract was broken (a bad address, a corrupt or
/// foreign buffer, an unsupported call). Those must not be silently retried.
#[derive(Debug, Error)]
pub enum Error {
    /// No free block is large enough for the request.
    #[error("no free block of at least {requested} bytes")]
    AllocFailed {
        /// The number of bytes passed to `alloc`.
        requested: usize,
    },

    /// A node was removed from an empty free-tree.
    #[error("free-tree is empty, cannot remove node at {address:#x}")]
    NotFound {
        /// The block that was supposed to be in the tree.
        address: usize,
    },

    /// An access would touch bytes outside the buffer.
    #[error("access of {len} bytes at {offset:#x} is outside the buffer of {capacity} bytes")]
    OutOfBounds {
        /// Start of the rejected access.
        offset: usize,
        /// Length of the rejected access.
        len: usize,
        /// Capacity of the buffer.
        capacity: usize,
    },

    /// The operation is declared but intentionally not implemented.
    #[error("{0} is not supported")]
    Unsupported(&'static str),

    /// The storage cannot hold a heap with the chosen word size.
    #[error("capacity of {capacity} bytes is outside the supported range {min}..={max}")]
    InvalidCapacity {
        /// The (word-rounded) storage length.
        capacity: usize,
        /// Smallest capacity holding the header and one minimal block.
        min: usize,
        /// Largest capacity addressable with the word size.
        max: usize,
    },

    /// The header of an existing buffer is not one written by [`Heap::create`](crate::Heap::create).
    #[error("invalid heap header: {0}")]
    InvalidHeader(&'static str),

    /// The address was never returned by `alloc`.
    #[error("{address:#x} is not the address of an allocation")]
    InvalidAddress {
        /// The rejected payload address.
        address: usize,
    },

    /// The address belongs to a block which is already free.
    #[error("double free of {address:#x}")]
    DoubleFree {
        /// The rejected payload address.
        address: usize,
    },

    /// A value does not fit into a single word.
    #[error("value {value} does not fit into a word (maximum {max})")]
    WordOverflow {
        /// The rejected value.
        value: usize,
        /// Largest value of the word type.
        max: usize,
    },

    /// The integrity check found a violated invariant.
    #[error("heap structure is corrupted: {0}")]
    Corrupted(#[from] Corruption),

    /// The backing storage failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the heap is still in a well-defined state after this error.
    ///
    /// This is only the case for [`Error::AllocFailed`]: the caller may free
    /// something (or grow the storage out-of-band) and try again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::AllocFailed { .. })
    }
}

/// A violated structural invariant, as found by [`Heap::check`](crate::Heap::check).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Corruption {
    /// A header field has an impossible value.
    #[error("header: {0}")]
    Header(&'static str),

    /// A structural offset points outside the buffer.
    #[error("offset {offset:#x} is outside the buffer")]
    OutOfBounds {
        /// The offending offset.
        offset: usize,
    },

    /// The used flag is neither 0 nor 1.
    #[error("block {block:#x} has used flag {value}")]
    BadUsedFlag {
        /// The block start.
        block: usize,
        /// The stored flag.
        value: usize,
    },

    /// The footer does not name the block it terminates.
    #[error("block {block:#x} has footer {footer:#x}")]
    FooterMismatch {
        /// The block start.
        block: usize,
        /// The stored footer value.
        footer: usize,
    },

    /// A block extends past the end of the allocatable region.
    #[error("block {block:#x} ends at {end:#x}, past the end of the region")]
    Overrun {
        /// The block start.
        block: usize,
        /// One past the last byte of the block.
        end: usize,
    },

    /// Two neighbouring blocks are both free.
    #[error("adjacent free blocks at {first:#x} and {second:#x}")]
    AdjacentFree {
        /// The lower block.
        first: usize,
        /// The higher block.
        second: usize,
    },

    /// A free-tree node is smaller than the minimum free block.
    #[error("free node {node:#x} has key {key}, below the minimum")]
    KeyTooSmall {
        /// The node.
        node: usize,
        /// The stored key.
        key: usize,
    },

    /// A free-tree node is not the start of a free block.
    #[error("free node {node:#x} is not a free block")]
    NotAFreeBlock {
        /// The node.
        node: usize,
    },

    /// A child does not point back to its parent.
    #[error("node {node:#x} has parent {parent:#x}, expected {expected:#x}")]
    ParentMismatch {
        /// The child.
        node: usize,
        /// The stored parent link.
        parent: usize,
        /// The node whose child it is.
        expected: usize,
    },

    /// The stored balance differs from the recomputed one or is out of range.
    #[error("node {node:#x} has balance {stored}, subtree heights give {computed}")]
    BalanceMismatch {
        /// The node.
        node: usize,
        /// The stored balance.
        stored: isize,
        /// Height of the right minus height of the left subtree.
        computed: isize,
    },

    /// In-order traversal is not sorted by size.
    #[error("node {node:#x} with key {key} follows a key of {previous}")]
    OutOfOrder {
        /// The node.
        node: usize,
        /// Its key.
        key: usize,
        /// The key visited before it.
        previous: usize,
    },

    /// The tree visits a node twice or holds more nodes than free blocks.
    #[error("free-tree revisits node {node:#x}")]
    Cycle {
        /// The node visited again.
        node: usize,
    },

    /// The free-tree is deeper than any balanced tree fitting the buffer.
    #[error("free-tree exceeds {depth} levels at node {node:#x}")]
    TooDeep {
        /// The first node below the limit.
        node: usize,
        /// The depth limit.
        depth: usize,
    },

    /// Free blocks and tree nodes do not correspond.
    #[error("{free_blocks} free blocks but {tree_nodes} free-tree nodes")]
    Untracked {
        /// Free blocks found by the address-order walk.
        free_blocks: usize,
        /// Nodes reachable from the root.
        tree_nodes: usize,
    },
}

/// Result type used throughout this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
