//! Typed view on block records.
//!
//! A block is described by words at fixed offsets from its start:
//! ```text
//! free block                          used block
//! +---------+                         +---------+
//! | used=0  |  start                  | used=1  |  start
//! | key     |  start + 1W             | key     |  start + 1W
//! | left    |  start + 2W  <-+        | payload |  start + 2W  <-- returned
//! | right   |                |        |   ...   |                  by alloc
//! | parent  |                | key    |   ...   |
//! | balance |                | bytes  |   ...   |
//! |   ...   |  <-------------+        |   ...   |
//! | footer  |  start + key + 2W       | footer  |
//! +---------+                         +---------+
//! ```
//! The footer holds the start address of its own block. Hence the word right
//! before any block names the start of the previous block, and the word right
//! after the footer is the next block: both neighbours are reachable in O(1).
//!
//! The tree links only exist while a block is free. They overlay the first
//! four payload words, which is why a block is never smaller than `4W`.
use super::buffer::Buffer;
use crate::storage::Storage;
use crate::word::Word;

/// Word index of the used flag.
const USED: usize = 0;
/// Word index of the size.
const KEY: usize = 1;
/// Word index of the left child link.
const LEFT: usize = 2;
/// Word index of the right child link.
const RIGHT: usize = 3;
/// Word index of the parent link.
const PARENT: usize = 4;
/// Word index of the AVL balance factor.
const BALANCE: usize = 5;

/// Words of bookkeeping per block: `used`, `key` and the footer.
pub const OVERHEAD_WORDS: usize = 3;
/// Smallest key of a free block: room for the four tree-link words.
pub const MIN_KEY_WORDS: usize = 4;

/// A block, identified by the byte offset of its start.
///
/// Offset zero is the header's `nil` word and thus never a block, so
/// [`Node::NIL`] doubles as "no node".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Node(pub usize);
impl Node {
    /// The absent node.
    pub const NIL: Self = Self(0);

    /// Whether this is [`Node::NIL`].
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// Byte offset of the `key` word.
    pub const fn key_offset<W: Word>(self) -> usize {
        self.0 + KEY * W::SIZE
    }

    /// Byte offset of the `used` word.
    pub const fn used_offset<W: Word>(self) -> usize {
        self.0 + USED * W::SIZE
    }

    /// Byte offset of a child link.
    pub const fn link_offset<W: Word>(self, dir: Dir) -> usize {
        match dir {
            Dir::Left => self.0 + LEFT * W::SIZE,
            Dir::Right => self.0 + RIGHT * W::SIZE,
        }
    }

    /// Byte offset of the parent link.
    pub const fn parent_offset<W: Word>(self) -> usize {
        self.0 + PARENT * W::SIZE
    }

    /// Byte offset of the balance factor.
    pub const fn balance_offset<W: Word>(self) -> usize {
        self.0 + BALANCE * W::SIZE
    }

    /// The payload address of this block.
    pub const fn payload<W: Word>(self) -> usize {
        self.0 + 2 * W::SIZE
    }

    /// The block owning the payload at `address`.
    pub const fn from_payload<W: Word>(address: usize) -> Self {
        Self(address - 2 * W::SIZE)
    }
}

/// A child direction in the free-tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Left,
    Right,
}
impl Dir {
    pub const fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    /// The balance contribution of growing the subtree on this side.
    pub const fn sign(self) -> isize {
        match self {
            Self::Left => -1,
            Self::Right => 1,
        }
    }
}

impl<S: Storage, W: Word> Buffer<S, W> {
    pub fn key(&self, node: Node) -> usize {
        self.get(node.key_offset::<W>())
    }

    pub fn set_key(&mut self, node: Node, key: usize) {
        self.set(node.key_offset::<W>(), key);
    }

    pub fn link(&self, node: Node, dir: Dir) -> Node {
        Node(self.get(node.link_offset::<W>(dir)))
    }

    pub fn set_link(&mut self, node: Node, dir: Dir, child: Node) {
        self.set(node.link_offset::<W>(dir), child.0);
    }

    pub fn parent(&self, node: Node) -> Node {
        Node(self.get(node.parent_offset::<W>()))
    }

    pub fn set_parent(&mut self, node: Node, parent: Node) {
        self.set(node.parent_offset::<W>(), parent.0);
    }

    pub fn balance(&self, node: Node) -> isize {
        self.get_signed(node.balance_offset::<W>())
    }

    pub fn set_balance(&mut self, node: Node, balance: isize) {
        self.set_signed(node.balance_offset::<W>(), balance);
    }

    /// Whether the block is allocated.
    pub fn used(&self, node: Node) -> bool {
        self.get(node.used_offset::<W>()) != 0
    }

    pub fn set_used(&mut self, node: Node, used: bool) {
        self.set(node.used_offset::<W>(), usize::from(used));
    }

    /// Byte offset of the footer, derived from the current key.
    pub fn foot(&self, node: Node) -> usize {
        node.0 + self.key(node) + 2 * W::SIZE
    }

    /// Point the footer (at the position given by the current key) back at
    /// the block start.
    pub fn write_footer(&mut self, node: Node) {
        let foot = self.foot(node);
        self.set(foot, node.0);
    }

    /// The block following `node` in address order.
    ///
    /// This might be the end of the allocatable region, which is not a block.
    pub fn next(&self, node: Node) -> Node {
        Node(self.foot(node) + W::SIZE)
    }

    /// The block preceding `node` in address order.
    ///
    /// Must not be called for the first block, whose predecessor word is part
    /// of the header.
    pub fn prev(&self, node: Node) -> Node {
        Node(self.get(node.0 - W::SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::{Buffer, Dir, Node};

    /// Three blocks at 16 (used, 16 bytes), 44 (free, 20 bytes), 76 (used, 16 bytes).
    fn three_blocks() -> Buffer<Vec<u8>, u32> {
        let mut buffer = Buffer::new(vec![0; 104]);
        buffer.set_max(104);
        for (start, key, used) in [(16, 16, true), (44, 20, false), (76, 16, true)] {
            let node = Node(start);
            buffer.set_used(node, used);
            buffer.set_key(node, key);
            buffer.write_footer(node);
        }
        buffer
    }

    #[test]
    fn field_offsets() {
        let node = Node(16);
        assert_eq!(node.used_offset::<u32>(), 16);
        assert_eq!(node.key_offset::<u32>(), 20);
        assert_eq!(node.link_offset::<u32>(Dir::Left), 24);
        assert_eq!(node.link_offset::<u32>(Dir::Right), 28);
        assert_eq!(node.parent_offset::<u32>(), 32);
        assert_eq!(node.balance_offset::<u32>(), 36);
        assert_eq!(node.link_offset::<u16>(Dir::Right), 22);
        assert_eq!(node.payload::<u32>(), 24);
        assert_eq!(Node::from_payload::<u32>(24), node);
    }

    #[test]
    fn nil_is_offset_zero() {
        assert!(Node::NIL.is_nil());
        assert!(!Node(16).is_nil());
        assert_eq!(Node::NIL, Node(0));
    }

    #[test]
    fn address_order_neighbours() {
        let buffer = three_blocks();
        assert_eq!(buffer.foot(Node(16)), 40);
        assert_eq!(buffer.get(40), 16);
        assert_eq!(buffer.next(Node(16)), Node(44));
        assert_eq!(buffer.next(Node(44)), Node(76));
        assert_eq!(buffer.next(Node(76)), Node(104));
        assert_eq!(buffer.prev(Node(76)), Node(44));
        assert_eq!(buffer.prev(Node(44)), Node(16));
        assert!(!buffer.used(Node(44)));
        assert!(buffer.used(Node(76)));
    }

    #[test]
    fn directions() {
        assert_eq!(Dir::Left.opposite(), Dir::Right);
        assert_eq!(Dir::Right.opposite(), Dir::Left);
        assert_eq!(Dir::Left.sign(), -1);
        assert_eq!(Dir::Right.sign(), 1);
    }
}
