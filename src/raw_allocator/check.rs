//! Full integrity check of a heap buffer.
//!
//! Nothing here is needed for allocating or freeing. The checker recomputes
//! every invariant from scratch (subtree heights, parent links, key order,
//! block coverage and coalescing) and is meant for tests, for verifying a
//! buffer after a crash and for debugging. It reads with bounds checks only,
//! so a corrupt buffer results in a [`Corruption`] rather than a panic.
use super::buffer::Buffer;
use super::node::{Dir, Node, MIN_KEY_WORDS, OVERHEAD_WORDS};
use crate::error::Corruption;
use crate::storage::Storage;
use crate::word::Word;

use std::collections::HashSet;

/// Usage figures gathered by a successful check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of blocks in the allocatable region.
    pub blocks: usize,
    /// Number of allocated blocks.
    pub used_blocks: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Payload bytes of all allocated blocks.
    pub used_bytes: usize,
    /// Usable bytes of all free blocks.
    pub free_bytes: usize,
    /// Size of the largest free block, i.e. the largest possible allocation.
    pub largest_free: usize,
    /// Height of the free-tree.
    pub tree_height: usize,
}

/// Shape of a valid free-tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeShape {
    pub nodes: usize,
    pub height: usize,
}

/// Depth limit of the tree walk.
///
/// An AVL tree of `n` nodes is at most `1.44 log2(n + 2)` levels high, so no
/// valid tree addressable with a `usize` comes close. Deeper chains are
/// reported instead of exhausting the stack.
const MAX_DEPTH: usize = 2 * usize::BITS as usize;

struct TreeWalk<'free> {
    free: Option<&'free HashSet<usize>>,
    seen: HashSet<usize>,
    previous: Option<usize>,
    max: usize,
}

impl<S: Storage, W: Word> Buffer<S, W> {
    /// Check every invariant of the heap.
    ///
    /// # Errors
    /// The first violated invariant found.
    pub fn check(&self) -> Result<HeapStats, Corruption> {
        let max = self.check_header()?;
        let (mut stats, free) = self.check_blocks(max)?;
        let shape = self.walk_tree(max, Some(&free))?;
        if shape.nodes != free.len() {
            return Err(Corruption::Untracked {
                free_blocks: free.len(),
                tree_nodes: shape.nodes,
            });
        }
        stats.tree_height = shape.height;
        Ok(stats)
    }

    /// Check the free-tree alone: links, balances and key order.
    ///
    /// Unlike [`check()`](Self::check) this does not require the nodes to be
    /// well-formed blocks, so it also works on a buffer that was only
    /// formatted and filled by hand.
    ///
    /// # Errors
    /// The first violated invariant found.
    pub fn check_tree(&self) -> Result<TreeShape, Corruption> {
        let max = self.check_header()?;
        self.walk_tree(max, None)
    }

    /// Validate the header, returning the capacity.
    fn check_header(&self) -> Result<usize, Corruption> {
        let start = Self::region_start();
        if self.load(0)? != 0 {
            return Err(Corruption::Header("nil word is not zero"));
        }
        let max = self.load(W::SIZE)?;
        if max % W::SIZE != 0 || max < start || max > self.len() {
            return Err(Corruption::Header("capacity does not match the storage"));
        }
        let root = self.load(3 * W::SIZE)?;
        if root != 0 && (root < start || root >= max) {
            return Err(Corruption::Header("free-tree root is outside the heap"));
        }
        Ok(max)
    }

    /// Walk all blocks in address order, collecting the free ones.
    fn check_blocks(&self, max: usize) -> Result<(HeapStats, HashSet<usize>), Corruption> {
        let mut stats = HeapStats::default();
        let mut free = HashSet::new();
        let mut previous: Option<(usize, bool)> = None;
        let mut block = Self::region_start();
        while block < max {
            let used = self.load(block)?;
            if used > 1 {
                return Err(Corruption::BadUsedFlag { block, value: used });
            }
            let used = used == 1;
            let key = self.load(block + W::SIZE)?;
            let end = block
                .checked_add(key)
                .and_then(|end| end.checked_add(OVERHEAD_WORDS * W::SIZE))
                .filter(|&end| end <= max)
                .ok_or(Corruption::Overrun {
                    block,
                    end: block.saturating_add(key).saturating_add(OVERHEAD_WORDS * W::SIZE),
                })?;
            let footer = self.load(end - W::SIZE)?;
            if footer != block {
                return Err(Corruption::FooterMismatch { block, footer });
            }
            if let Some((first, previous_used)) = previous {
                if !used && !previous_used {
                    return Err(Corruption::AdjacentFree {
                        first,
                        second: block,
                    });
                }
            }

            stats.blocks += 1;
            if used {
                stats.used_blocks += 1;
                stats.used_bytes += key;
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += key;
                stats.largest_free = stats.largest_free.max(key);
                free.insert(block);
            }
            previous = Some((block, used));
            block = end;
        }
        Ok((stats, free))
    }

    fn walk_tree(
        &self,
        max: usize,
        free: Option<&HashSet<usize>>,
    ) -> Result<TreeShape, Corruption> {
        let mut walk = TreeWalk {
            free,
            seen: HashSet::new(),
            previous: None,
            max,
        };
        let root = Node(self.load(3 * W::SIZE)?);
        let height = self.subtree(root, Node::NIL, 1, &mut walk)?;
        Ok(TreeShape {
            nodes: walk.seen.len(),
            height: height.unsigned_abs(),
        })
    }

    /// Validate the subtree at `node`, which is `depth` levels below the
    /// root slot, and return its height.
    fn subtree(
        &self,
        node: Node,
        parent: Node,
        depth: usize,
        walk: &mut TreeWalk<'_>,
    ) -> Result<isize, Corruption> {
        if node.is_nil() {
            return Ok(0);
        }
        if depth > MAX_DEPTH {
            return Err(Corruption::TooDeep {
                node: node.0,
                depth: MAX_DEPTH,
            });
        }
        if node.0 < Self::region_start() || node.0 >= walk.max {
            return Err(Corruption::OutOfBounds { offset: node.0 });
        }
        if !walk.seen.insert(node.0) {
            return Err(Corruption::Cycle { node: node.0 });
        }
        if walk.free.map_or(false, |free| !free.contains(&node.0)) {
            return Err(Corruption::NotAFreeBlock { node: node.0 });
        }

        let stored_parent = self.load(node.parent_offset::<W>())?;
        if stored_parent != parent.0 {
            return Err(Corruption::ParentMismatch {
                node: node.0,
                parent: stored_parent,
                expected: parent.0,
            });
        }
        let key = self.load(node.key_offset::<W>())?;
        if key < MIN_KEY_WORDS * W::SIZE {
            return Err(Corruption::KeyTooSmall { node: node.0, key });
        }

        let left = Node(self.load(node.link_offset::<W>(Dir::Left))?);
        let right = Node(self.load(node.link_offset::<W>(Dir::Right))?);

        let left_height = self.subtree(left, node, depth + 1, walk)?;
        if let Some(previous) = walk.previous {
            if key < previous {
                return Err(Corruption::OutOfOrder {
                    node: node.0,
                    key,
                    previous,
                });
            }
        }
        walk.previous = Some(key);
        let right_height = self.subtree(right, node, depth + 1, walk)?;

        let stored = self.load_signed(node.balance_offset::<W>())?;
        let computed = right_height - left_height;
        if stored != computed || !(-1..=1).contains(&computed) {
            return Err(Corruption::BalanceMismatch {
                node: node.0,
                stored,
                computed,
            });
        }
        Ok(1 + left_height.max(right_height))
    }
}

#[cfg(test)]
mod tests {
    use super::super::node::{Dir, Node};
    use super::super::RawAllocator;
    use super::HeapStats;
    use crate::error::Corruption;

    type Allocator = RawAllocator<Vec<u8>, u32>;

    /// A heap with blocks `[used 16][free 16][used 16][free rest]`.
    fn fragmented() -> (Allocator, [usize; 3]) {
        let mut allocator = Allocator::create(vec![0; 256]).unwrap();
        let a = allocator.alloc(16).unwrap();
        let b = allocator.alloc(16).unwrap();
        let c = allocator.alloc(16).unwrap();
        allocator.free(b).unwrap();
        (allocator, [a, b, c])
    }

    #[test]
    fn statistics() {
        let (allocator, _) = fragmented();
        let stats = allocator.buffer().check().unwrap();
        assert_eq!(
            stats,
            HeapStats {
                blocks: 4,
                used_blocks: 2,
                free_blocks: 2,
                used_bytes: 32,
                free_bytes: 16 + 256 - 16 - 3 * 28 - 12,
                largest_free: 256 - 16 - 3 * 28 - 12,
                tree_height: 2,
            }
        );
        let shape = allocator.buffer().check_tree().unwrap();
        assert_eq!(shape.nodes, 2);
    }

    #[test]
    fn detects_a_bad_footer() {
        let (mut allocator, [a, ..]) = fragmented();
        let foot = allocator.buffer().foot(Node(a - 8));
        allocator.buffer_mut().set(foot, 4);
        assert_eq!(
            allocator.buffer().check(),
            Err(Corruption::FooterMismatch { block: 16, footer: 4 })
        );
    }

    #[test]
    fn detects_adjacent_free_blocks() {
        let (mut allocator, [_, b, c]) = fragmented();
        // mark `c` free without merging it
        allocator.buffer_mut().set_used(Node(c - 8), false);
        assert_eq!(
            allocator.buffer().check(),
            Err(Corruption::AdjacentFree {
                first: b - 8,
                second: c - 8
            })
        );
    }

    #[test]
    fn detects_untracked_free_blocks() {
        let (mut allocator, _) = fragmented();
        allocator.buffer_mut().set_root(Node::NIL);
        assert_eq!(
            allocator.buffer().check(),
            Err(Corruption::Untracked {
                free_blocks: 2,
                tree_nodes: 0
            })
        );
    }

    #[test]
    fn detects_a_wrong_balance() {
        let (mut allocator, _) = fragmented();
        let root = allocator.buffer().root();
        let balance = allocator.buffer().balance(root);
        allocator.buffer_mut().set_balance(root, balance + 1);
        assert!(matches!(
            allocator.buffer().check(),
            Err(Corruption::BalanceMismatch { .. })
        ));
    }

    #[test]
    fn detects_a_wrong_parent() {
        let (mut allocator, _) = fragmented();
        let root = allocator.buffer().root();
        let child = [Dir::Left, Dir::Right]
            .into_iter()
            .map(|dir| allocator.buffer().link(root, dir))
            .find(|child| !child.is_nil())
            .unwrap();
        allocator.buffer_mut().set_parent(child, Node(16));
        assert!(matches!(
            allocator.buffer().check(),
            Err(Corruption::ParentMismatch { .. })
        ));
    }

    #[test]
    fn detects_a_cycle() {
        let (mut allocator, _) = fragmented();
        let root = allocator.buffer().root();
        let dir = if allocator.buffer().link(root, Dir::Left).is_nil() {
            Dir::Left
        } else {
            Dir::Right
        };
        allocator.buffer_mut().set_link(root, dir, root);
        assert_eq!(
            allocator.buffer().check(),
            Err(Corruption::Cycle { node: root.0 })
        );
    }

    #[test]
    fn deep_chains_are_reported() {
        const NODES: usize = 100_000;
        const STRIDE: usize = 24;
        let mut allocator = Allocator::format(vec![0; 16 + NODES * STRIDE]).unwrap();
        let buffer = allocator.buffer_mut();
        // a right-only chain with increasing keys
        let mut parent = Node::NIL;
        for i in 0..NODES {
            let node = Node(16 + i * STRIDE);
            buffer.set_key(node, 16 + i);
            buffer.set_link(node, Dir::Left, Node::NIL);
            buffer.set_link(node, Dir::Right, Node::NIL);
            buffer.set_parent(node, parent);
            buffer.set_balance(node, 1);
            if parent.is_nil() {
                buffer.set_root(node);
            } else {
                buffer.set_link(parent, Dir::Right, node);
            }
            parent = node;
        }

        let limit = 2 * usize::BITS as usize;
        assert_eq!(
            allocator.buffer().check_tree(),
            Err(Corruption::TooDeep {
                node: 16 + limit * STRIDE,
                depth: limit
            })
        );
    }

    #[test]
    fn detects_overruns_without_panicking() {
        let (mut allocator, [_, _, c]) = fragmented();
        allocator.buffer_mut().set_key(Node(c - 8), 10_000);
        assert!(matches!(
            allocator.buffer().check(),
            Err(Corruption::Overrun { block, .. }) if block == c - 8
        ));
    }

    #[test]
    fn detects_a_broken_header() {
        let (mut allocator, _) = fragmented();
        allocator.buffer_mut().set(3 * 4, 8);
        assert_eq!(
            allocator.buffer().check(),
            Err(Corruption::Header("free-tree root is outside the heap"))
        );
        allocator.buffer_mut().set(0, 1);
        assert_eq!(
            allocator.buffer().check(),
            Err(Corruption::Header("nil word is not zero"))
        );
    }
}
