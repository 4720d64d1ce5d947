//! The free-tree: an AVL tree with parent pointers, living in the buffer.
//!
//! Nodes are blocks, links are byte offsets and the root is a header word, so
//! the tree survives being written to disk and mapped back at a different
//! address. Insertion and deletion follow the classic parent-pointer AVL
//! algorithms (as in Ben Pfaff's libavl): insertion rebalances with at most one
//! rotation, deletion walks up until a subtree keeps its height.
//!
//! Neither operation searches for its node. [`add_at()`](Buffer::add_at) is
//! handed a block that is not yet in the tree, [`remove_at()`](Buffer::remove_at)
//! one that is known to be in it.
use super::buffer::Buffer;
use super::node::{Dir, Node};
use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::word::Word;

/// The place a subtree hangs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The root word of the header.
    Root,
    /// A child link of a node.
    Child(Node, Dir),
}

impl<S: Storage, W: Word> Buffer<S, W> {
    /// The node hanging from `slot`.
    fn slot(&self, slot: Slot) -> Node {
        match slot {
            Slot::Root => self.root(),
            Slot::Child(parent, dir) => self.link(parent, dir),
        }
    }

    fn set_slot(&mut self, slot: Slot, node: Node) {
        match slot {
            Slot::Root => self.set_root(node),
            Slot::Child(parent, dir) => self.set_link(parent, dir, node),
        }
    }

    /// The slot `node` hangs from, judged by its parent link.
    fn slot_of(&self, node: Node) -> Slot {
        let parent = self.parent(node);
        if parent.is_nil() {
            Slot::Root
        } else if self.link(parent, Dir::Left) == node {
            Slot::Child(parent, Dir::Left)
        } else {
            Slot::Child(parent, Dir::Right)
        }
    }

    /// Insert the block at `node` with the given key.
    ///
    /// The block's tree words are overwritten; nothing else about it is
    /// touched. Keys equal to an existing key are placed to its right.
    pub fn add_at(&mut self, node: Node, key: usize) {
        // find the insertion point, remembering the deepest unbalanced node on
        // the way: no balance above it can change
        let mut top = self.root();
        let mut parent = Node::NIL;
        let mut dir = Dir::Left;
        let mut cursor = self.root();
        while !cursor.is_nil() {
            dir = if key >= self.key(cursor) {
                Dir::Right
            } else {
                Dir::Left
            };
            if self.balance(cursor) != 0 {
                top = cursor;
            }
            parent = cursor;
            cursor = self.link(cursor, dir);
        }

        self.set_link(node, Dir::Left, Node::NIL);
        self.set_link(node, Dir::Right, Node::NIL);
        self.set_parent(node, parent);
        self.set_key(node, key);
        self.set_balance(node, 0);
        if parent.is_nil() {
            self.set_root(node);
            return;
        }
        self.set_link(parent, dir, node);

        // the subtree below `top` grew by one level: fix the balances on the
        // path up to it
        let mut cursor = node;
        while cursor != top {
            let parent = self.parent(cursor);
            let side = if self.link(parent, Dir::Left) == cursor {
                Dir::Left
            } else {
                Dir::Right
            };
            let balance = self.balance(parent) + side.sign();
            self.set_balance(parent, balance);
            cursor = parent;
        }

        let heavy = match self.balance(top) {
            -2 => Dir::Left,
            2 => Dir::Right,
            _ => return,
        };
        let slot = self.slot_of(top);
        let child = self.link(top, heavy);
        let subtree = if self.balance(child) == heavy.sign() {
            let subtree = self.rotate_single(top, child, heavy);
            self.set_balance(child, 0);
            self.set_balance(top, 0);
            subtree
        } else {
            self.rotate_double(top, child, heavy)
        };
        self.set_slot(slot, subtree);
    }

    /// Remove the block at `node` from the tree.
    ///
    /// The block's tree words are left stale.
    ///
    /// # Errors
    /// [`Error::NotFound`] if the tree is empty.
    pub fn remove_at(&mut self, node: Node) -> Result<()> {
        if self.root().is_nil() {
            return Err(Error::NotFound { address: node.0 });
        }

        let slot = self.slot_of(node);
        let parent = self.parent(node);
        let left = self.link(node, Dir::Left);
        let right = self.link(node, Dir::Right);

        // `(start, side)`: the lowest node whose `side` subtree got shorter,
        // `None` if the removed node was the root without a right subtree
        let start = if right.is_nil() {
            self.set_slot(slot, left);
            if !left.is_nil() {
                self.set_parent(left, parent);
            }
            match slot {
                Slot::Root => None,
                Slot::Child(parent, side) => Some((parent, side)),
            }
        } else if self.link(right, Dir::Left).is_nil() {
            // the right child is the successor: lift it
            self.set_link(right, Dir::Left, left);
            self.set_slot(slot, right);
            self.set_parent(right, parent);
            if !left.is_nil() {
                self.set_parent(left, right);
            }
            self.set_balance(right, self.balance(node));
            Some((right, Dir::Right))
        } else {
            // the successor is the leftmost node of the right subtree
            let mut successor = self.link(right, Dir::Left);
            loop {
                let next = self.link(successor, Dir::Left);
                if next.is_nil() {
                    break;
                }
                successor = next;
            }
            let above = self.parent(successor);
            let rest = self.link(successor, Dir::Right);
            self.set_link(above, Dir::Left, rest);
            if !rest.is_nil() {
                self.set_parent(rest, above);
            }

            self.set_link(successor, Dir::Left, left);
            self.set_link(successor, Dir::Right, right);
            self.set_slot(slot, successor);
            if !left.is_nil() {
                self.set_parent(left, successor);
            }
            self.set_parent(right, successor);
            self.set_parent(successor, parent);
            self.set_balance(successor, self.balance(node));
            Some((above, Dir::Left))
        };

        if let Some((start, side)) = start {
            self.rebalance_after_removal(start, side);
        }
        Ok(())
    }

    /// Walk up from `node`, whose `side` subtree just lost one level.
    fn rebalance_after_removal(&mut self, mut node: Node, mut side: Dir) {
        loop {
            let slot = self.slot_of(node);
            // growing the other side is the same as shrinking this one
            let balance = self.balance(node) - side.sign();
            self.set_balance(node, balance);

            if balance == -side.sign() {
                // was even: the height did not change
                return;
            }
            if balance == -2 * side.sign() {
                let heavy = side.opposite();
                let child = self.link(node, heavy);
                let child_balance = self.balance(child);
                if child_balance == -heavy.sign() {
                    let subtree = self.rotate_double(node, child, heavy);
                    self.set_slot(slot, subtree);
                } else {
                    let subtree = self.rotate_single(node, child, heavy);
                    self.set_slot(slot, subtree);
                    if child_balance == 0 {
                        // height unchanged by the rotation
                        self.set_balance(child, -heavy.sign());
                        self.set_balance(node, heavy.sign());
                        return;
                    }
                    self.set_balance(child, 0);
                    self.set_balance(node, 0);
                }
            }

            match slot {
                Slot::Root => return,
                Slot::Child(parent, parent_side) => {
                    node = parent;
                    side = parent_side;
                }
            }
        }
    }

    /// Rotate `child`, the `heavy` child of `top`, into the place of `top`.
    ///
    /// Balances are left to the caller; the parent link of `child` is set, but
    /// the slot `top` hung from still points at `top`.
    fn rotate_single(&mut self, top: Node, child: Node, heavy: Dir) -> Node {
        let light = heavy.opposite();
        let inner = self.link(child, light);
        self.set_link(top, heavy, inner);
        self.set_link(child, light, top);
        self.set_parent(child, self.parent(top));
        self.set_parent(top, child);
        if !inner.is_nil() {
            self.set_parent(inner, top);
        }
        child
    }

    /// Rotate the inner grandchild of `top` (below its `heavy` child `child`)
    /// into the place of `top`, fixing all three balances.
    ///
    /// As with [`rotate_single()`](Self::rotate_single) the caller relinks the
    /// returned subtree root into the slot of `top`.
    fn rotate_double(&mut self, top: Node, child: Node, heavy: Dir) -> Node {
        let light = heavy.opposite();
        let pivot = self.link(child, light);

        let pivot_heavy = self.link(pivot, heavy);
        let pivot_light = self.link(pivot, light);
        self.set_link(child, light, pivot_heavy);
        self.set_link(pivot, heavy, child);
        self.set_link(top, heavy, pivot_light);
        self.set_link(pivot, light, top);

        let sign = heavy.sign();
        let pivot_balance = self.balance(pivot);
        let (child_balance, top_balance) = if pivot_balance == sign {
            (0, -sign)
        } else if pivot_balance == 0 {
            (0, 0)
        } else {
            (sign, 0)
        };
        self.set_balance(child, child_balance);
        self.set_balance(top, top_balance);
        self.set_balance(pivot, 0);

        self.set_parent(pivot, self.parent(top));
        self.set_parent(child, pivot);
        self.set_parent(top, pivot);
        if !pivot_heavy.is_nil() {
            self.set_parent(pivot_heavy, child);
        }
        if !pivot_light.is_nil() {
            self.set_parent(pivot_light, top);
        }
        pivot
    }

    /// The smallest node with a key of at least `size`.
    ///
    /// An exact match ends the search right away, so among equal keys any one
    /// may be returned.
    pub fn smallest_fit(&self, size: usize) -> Option<Node> {
        let mut best: Option<(Node, usize)> = None;
        let mut cursor = self.root();
        while !cursor.is_nil() {
            let key = self.key(cursor);
            if key == size {
                return Some(cursor);
            }
            if key > size {
                if best.map_or(true, |(_, best_key)| key < best_key) {
                    best = Some((cursor, key));
                }
                cursor = self.link(cursor, Dir::Left);
            } else {
                cursor = self.link(cursor, Dir::Right);
            }
        }
        best.map(|(node, _)| node)
    }

    /// All keys in tree order.
    pub fn in_order(&self) -> Vec<usize> {
        let mut keys = Vec::new();
        let mut stack = Vec::new();
        let mut cursor = self.root();
        while !cursor.is_nil() || !stack.is_empty() {
            while !cursor.is_nil() {
                stack.push(cursor);
                cursor = self.link(cursor, Dir::Left);
            }
            if let Some(node) = stack.pop() {
                keys.push(self.key(node));
                cursor = self.link(node, Dir::Right);
            }
        }
        keys
    }
}
