//! Traversal over tree topology.
//!
//! All iterators are defined once, over the [`Traverse`] trait, and therefore
//! work identically on [`Tree`](crate::Tree) and
//! [`ConcurrentTree`](crate::ConcurrentTree). They are pull-based state
//! machines yielding [`NodeId`]s: advancing resolves the next node from
//! handles captured earlier, never by re-reading the slot just yielded, and
//! nothing here mutates the tree.
//!
//! Children are linked newest-to-oldest, so every iterator that walks a
//! node's children sees the most recently inserted child first.

use std::collections::VecDeque;

use smallvec::SmallVec;

use crate::id::NodeId;

/// Inline capacity of traversal stacks before they spill to the heap.
const STACK_INLINE: usize = 32;

/// Read access to tree topology, and every traversal built on it.
///
/// The five required methods are total: an id that names no slot simply has
/// no links and no children. Everything else is provided.
pub trait Traverse {
    /// Parent of `id`; invalid for the root and for unknown ids.
    fn parent(&self, id: NodeId) -> NodeId;

    /// Next older sibling of `id`; invalid at the end of the sibling list.
    fn prev_sibling(&self, id: NodeId) -> NodeId;

    /// Most recently inserted child of `id`; invalid for leaves.
    fn last_child(&self, id: NodeId) -> NodeId;

    /// Number of direct children of `id`; 0 for unknown ids.
    fn child_count(&self, id: NodeId) -> u32;

    /// Number of arena slots issued, sentinel included.
    fn slot_count(&self) -> usize;

    /// Whether `id` names an issued slot (the sentinel does not count).
    #[inline]
    fn contains(&self, id: NodeId) -> bool {
        id.is_valid() && id.index() < self.slot_count()
    }

    /// Iterate the children of `parent`, newest first.
    fn children(&self, parent: NodeId) -> Children<'_, Self>
    where
        Self: Sized,
    {
        Children::new(self, parent)
    }

    /// Iterate `from` and then its ancestors up to and including the root.
    fn ancestors(&self, from: NodeId) -> Ancestors<'_, Self>
    where
        Self: Sized,
    {
        Ancestors::new(self, from)
    }

    /// Pre-order depth-first walk from the root.
    fn depth_first(&self) -> DepthFirst<'_, Self>
    where
        Self: Sized,
    {
        self.depth_first_from(NodeId::ROOT)
    }

    /// Pre-order depth-first walk of `start`'s subtree, `start` included.
    fn depth_first_from(&self, start: NodeId) -> DepthFirst<'_, Self>
    where
        Self: Sized,
    {
        DepthFirst::new(self, start)
    }

    /// The leaves of the whole tree, in depth-first order.
    fn leaves(&self) -> Leaves<'_, Self>
    where
        Self: Sized,
    {
        self.leaves_from(NodeId::ROOT)
    }

    /// The leaves below `start`, in depth-first order. `start` itself is
    /// never yielded; a leaf start is immediately exhausted.
    fn leaves_from(&self, start: NodeId) -> Leaves<'_, Self>
    where
        Self: Sized,
    {
        Leaves::new(self, start)
    }

    /// The interior (non-leaf) nodes of the whole tree, depth-first.
    fn interior(&self) -> Interior<'_, Self>
    where
        Self: Sized,
    {
        self.interior_from(NodeId::ROOT)
    }

    /// The interior nodes of `start`'s subtree, `start` included when it has
    /// children; a leaf start is immediately exhausted.
    fn interior_from(&self, start: NodeId) -> Interior<'_, Self>
    where
        Self: Sized,
    {
        Interior::new(self, start)
    }

    /// Level-order (breadth-first) walk from the root.
    fn level_order(&self) -> LevelOrder<'_, Self>
    where
        Self: Sized,
    {
        self.level_order_from(NodeId::ROOT)
    }

    /// Level-order walk of `start`'s subtree.
    fn level_order_from(&self, start: NodeId) -> LevelOrder<'_, Self>
    where
        Self: Sized,
    {
        LevelOrder::new(self, start, None)
    }

    /// Level-order walk stopping after layer `max_depth` (1-based; 0 yields
    /// nothing).
    fn level_order_capped(&self, start: NodeId, max_depth: usize) -> LevelOrder<'_, Self>
    where
        Self: Sized,
    {
        LevelOrder::new(self, start, Some(max_depth))
    }

    /// Height of the tree: layers from the root down to the deepest leaf.
    fn height(&self) -> usize {
        self.height_from(NodeId::ROOT)
    }

    /// Height of `start`'s subtree; a lone leaf has height 1, an unknown
    /// start height 0.
    fn height_from(&self, start: NodeId) -> usize {
        self.height_and_width_from(start).0
    }

    /// Height of `start`'s subtree together with the width of its widest
    /// layer, computed in one level-order pass.
    fn height_and_width_from(&self, start: NodeId) -> (usize, usize) {
        if !self.contains(start) {
            return (0, 0);
        }
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        queue.push_back(start);
        let mut depth = 0;
        let mut width = 0;
        while !queue.is_empty() {
            let layer = queue.len();
            width = width.max(layer);
            depth += 1;
            for _ in 0..layer {
                if let Some(node) = queue.pop_front() {
                    let mut c = self.last_child(node);
                    while c.is_valid() {
                        queue.push_back(c);
                        c = self.prev_sibling(c);
                    }
                }
            }
        }
        (depth, width)
    }
}

/// Children of one node, newest first. See [`Traverse::children`].
pub struct Children<'a, L: Traverse> {
    links: &'a L,
    node: NodeId,
}

impl<'a, L: Traverse> Children<'a, L> {
    fn new(links: &'a L, parent: NodeId) -> Self {
        let node = if links.contains(parent) {
            links.last_child(parent)
        } else {
            NodeId::NONE
        };
        Children { links, node }
    }
}

impl<L: Traverse> Iterator for Children<'_, L> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if !self.node.is_valid() {
            return None;
        }
        let cur = self.node;
        self.node = self.links.prev_sibling(cur);
        Some(cur)
    }
}

/// A node and its chain of ancestors. See [`Traverse::ancestors`].
pub struct Ancestors<'a, L: Traverse> {
    links: &'a L,
    node: NodeId,
}

impl<'a, L: Traverse> Ancestors<'a, L> {
    fn new(links: &'a L, from: NodeId) -> Self {
        let node = if links.contains(from) {
            from
        } else {
            NodeId::NONE
        };
        Ancestors { links, node }
    }
}

impl<L: Traverse> Iterator for Ancestors<'_, L> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if !self.node.is_valid() {
            return None;
        }
        let cur = self.node;
        self.node = self.links.parent(cur);
        Some(cur)
    }
}

/// Pre-order depth-first walk. See [`Traverse::depth_first_from`].
pub struct DepthFirst<'a, L: Traverse> {
    links: &'a L,
    stack: SmallVec<[NodeId; STACK_INLINE]>,
}

impl<'a, L: Traverse> DepthFirst<'a, L> {
    fn new(links: &'a L, start: NodeId) -> Self {
        let mut stack = SmallVec::new();
        if links.contains(start) {
            stack.push(start);
        }
        DepthFirst { links, stack }
    }
}

impl<L: Traverse> Iterator for DepthFirst<'_, L> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let node = self.stack.pop()?;
        // Newest child pushed first, so the oldest subtree is walked first.
        let mut c = self.links.last_child(node);
        while c.is_valid() {
            self.stack.push(c);
            c = self.links.prev_sibling(c);
        }
        Some(node)
    }
}

/// Leaves of a subtree, depth-first. See [`Traverse::leaves_from`].
pub struct Leaves<'a, L: Traverse> {
    links: &'a L,
    stack: SmallVec<[NodeId; STACK_INLINE]>,
}

impl<'a, L: Traverse> Leaves<'a, L> {
    fn new(links: &'a L, start: NodeId) -> Self {
        let mut stack = SmallVec::new();
        if links.contains(start) {
            let mut c = links.last_child(start);
            while c.is_valid() {
                stack.push(c);
                c = links.prev_sibling(c);
            }
        }
        Leaves { links, stack }
    }
}

impl<L: Traverse> Iterator for Leaves<'_, L> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        loop {
            let node = self.stack.pop()?;
            if self.links.child_count(node) == 0 {
                return Some(node);
            }
            let mut c = self.links.last_child(node);
            while c.is_valid() {
                self.stack.push(c);
                c = self.links.prev_sibling(c);
            }
        }
    }
}

/// Interior nodes of a subtree, depth-first; leaf branches are pruned at
/// push. See [`Traverse::interior_from`].
pub struct Interior<'a, L: Traverse> {
    links: &'a L,
    stack: SmallVec<[NodeId; STACK_INLINE]>,
}

impl<'a, L: Traverse> Interior<'a, L> {
    fn new(links: &'a L, start: NodeId) -> Self {
        let mut stack = SmallVec::new();
        if links.contains(start) && links.child_count(start) > 0 {
            stack.push(start);
        }
        Interior { links, stack }
    }
}

impl<L: Traverse> Iterator for Interior<'_, L> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let node = self.stack.pop()?;
        let mut c = self.links.last_child(node);
        while c.is_valid() {
            if self.links.child_count(c) > 0 {
                self.stack.push(c);
            }
            c = self.links.prev_sibling(c);
        }
        Some(node)
    }
}

/// Level-order walk with layer tracking. See [`Traverse::level_order_from`].
pub struct LevelOrder<'a, L: Traverse> {
    links: &'a L,
    queue: VecDeque<NodeId>,
    in_layer: usize,
    depth: usize,
    max_depth: Option<usize>,
}

impl<'a, L: Traverse> LevelOrder<'a, L> {
    fn new(links: &'a L, start: NodeId, max_depth: Option<usize>) -> Self {
        let mut queue = VecDeque::new();
        if links.contains(start) && max_depth != Some(0) {
            queue.push_back(start);
        }
        LevelOrder {
            links,
            queue,
            in_layer: 0,
            depth: 0,
            max_depth,
        }
    }

    /// 1-based depth of the node most recently yielded; 0 before iteration
    /// begins. The start node is at depth 1.
    #[inline]
    pub fn height(&self) -> usize {
        self.depth
    }
}

impl<L: Traverse> Iterator for LevelOrder<'_, L> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.in_layer == 0 {
            // Layer boundary: everything queued now is the next layer down.
            if self.queue.is_empty() {
                return None;
            }
            self.in_layer = self.queue.len();
            self.depth += 1;
        }
        let node = self.queue.pop_front()?;
        self.in_layer -= 1;
        if self.max_depth.map_or(true, |m| self.depth < m) {
            let mut c = self.links.last_child(node);
            while c.is_valid() {
                self.queue.push_back(c);
                c = self.links.prev_sibling(c);
            }
        }
        Some(node)
    }
}
