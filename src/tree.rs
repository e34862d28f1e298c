//! Sequential rooted tree.
//!
//! Nodes live in a [`VmVec`] and reference each other by [`NodeId`]. Each
//! record composes the link metadata (`up`, `prev`, `tail`, `fan`) with the
//! caller's payload; links always express the children of a node as a
//! newest-to-oldest singly linked list, which is what makes insertion O(1):
//! linking only ever rewrites the parent's `tail` and the new child's `prev`.
//!
//! Slot 0 is a permanent sentinel and never a real node. Creating the root is
//! an ordinary insert with the invalid handle as parent: the sentinel absorbs
//! the linkage, so afterwards `sentinel.tail` names the root and a second
//! root-insert trips the double-root assertion.

use std::collections::VecDeque;
use std::mem;
use std::ops::{Index, IndexMut};

use smallvec::SmallVec;

use crate::arena::VmVec;
use crate::id::NodeId;
use crate::iter::Traverse;
use crate::{Config, MemoryUsage};

/// Link metadata of one node.
#[derive(Clone, Copy, Default, Debug)]
pub(crate) struct Hook {
    pub(crate) up: NodeId,
    pub(crate) prev: NodeId,
    pub(crate) tail: NodeId,
    pub(crate) fan: u32,
}

/// One tree record: link metadata composed with the payload.
#[derive(Debug)]
pub struct Node<T> {
    hook: Hook,
    /// The payload. Freely mutable; the links are maintained by the tree.
    pub value: T,
}

impl<T> Node<T> {
    #[inline]
    pub(crate) fn new(value: T) -> Self {
        Node {
            hook: Hook::default(),
            value,
        }
    }

    /// Parent handle; invalid for the root.
    #[inline]
    pub fn parent(&self) -> NodeId {
        self.hook.up
    }

    /// Next older sibling; invalid for the oldest child.
    #[inline]
    pub fn prev_sibling(&self) -> NodeId {
        self.hook.prev
    }

    /// Most recently inserted child; invalid for a leaf.
    #[inline]
    pub fn last_child(&self) -> NodeId {
        self.hook.tail
    }

    /// Number of direct children.
    #[inline]
    pub fn child_count(&self) -> u32 {
        self.hook.fan
    }
}

/// A rooted tree for a single writer.
///
/// Mutation goes through `&mut self`, so no locking is involved; the
/// concurrent sibling of this type is
/// [`ConcurrentTree`](crate::ConcurrentTree). Constructors require
/// `T: Default` for the sentinel slot's placeholder payload.
///
/// Handles returned by [`Tree::insert`] stay valid until [`Tree::reroot`],
/// [`Tree::flatten`] or [`Tree::clear`] rebuild the arena.
pub struct Tree<T> {
    arena: VmVec<Node<T>>,
    config: Config,
}

impl<T: Default> Tree<T> {
    /// Create an empty tree with the default [`Config`].
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create an empty tree able to hold at most `capacity` slots
    /// (including the sentinel).
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_config(Config {
            capacity,
            ..Config::default()
        })
    }

    /// Create an empty tree with an explicit [`Config`].
    ///
    /// # Panics
    /// Panics if the capacity cannot seat a sentinel and a root, exceeds the
    /// handle range, or the address range cannot be reserved.
    pub fn with_config(config: Config) -> Self {
        assert!(config.capacity >= 2, "capacity must seat sentinel and root");
        assert!(
            config.capacity <= i32::MAX as usize,
            "capacity exceeds the node handle range"
        );
        let mut arena = VmVec::with_capacity(config.capacity, config.commit_chunk);
        arena.push(Node::new(T::default()));
        Tree { arena, config }
    }

    /// Create a tree with `value` as its root payload.
    pub fn with_root(value: T) -> Self {
        let mut tree = Self::new();
        tree.insert(NodeId::NONE, value);
        tree
    }

    /// Drop every node and return to the empty state, retaining the
    /// reservation and already committed memory.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.arena.push(Node::new(T::default()));
    }
}

impl<T: Default> Default for Tree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Tree<T> {
    /// Insert `value` as a new child of `parent`, returning its handle.
    ///
    /// The new child becomes the parent's `last_child`; earlier children are
    /// reached through `prev_sibling`. Passing [`NodeId::NONE`] as the parent
    /// is permitted exactly once, to create the root.
    ///
    /// # Panics
    /// Panics on capacity exhaustion, on a parent handle that names no slot,
    /// and on a second root insert.
    pub fn insert(&mut self, parent: NodeId, value: T) -> NodeId {
        assert!(
            parent.index() < self.arena.len(),
            "parent {parent} is not a node of this tree"
        );
        assert!(
            parent.is_valid() || !self.hook(NodeId::NONE).tail.is_valid(),
            "tree already has a root"
        );
        let child = NodeId::from_index(self.arena.push(Node::new(value)));
        let prev = {
            let p = self.hook_mut(parent);
            p.fan += 1;
            mem::replace(&mut p.tail, child)
        };
        let c = self.hook_mut(child);
        c.up = parent;
        c.prev = prev;
        child
    }

    /// Number of arena slots in use, including the sentinel.
    #[inline]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Whether the tree has no root yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.arena.len() <= 1
    }

    /// The declared maximum slot count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// The root handle, or the invalid handle for an empty tree.
    #[inline]
    pub fn root(&self) -> NodeId {
        if self.is_empty() {
            NodeId::NONE
        } else {
            NodeId::ROOT
        }
    }

    /// Checked access; `None` for the invalid handle and out-of-range ids.
    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node<T>> {
        if id.is_valid() {
            self.arena.get(id.index())
        } else {
            None
        }
    }

    /// Checked mutable access.
    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        if id.is_valid() {
            self.arena.get_mut(id.index())
        } else {
            None
        }
    }

    /// Unchecked access for hot paths.
    ///
    /// # Safety
    /// `id` must have been returned by [`Tree::insert`] on this tree since
    /// the last arena rebuild.
    #[inline]
    pub unsafe fn get_unchecked(&self, id: NodeId) -> &Node<T> {
        // SAFETY: caller promises a live handle.
        unsafe { self.arena.get_unchecked(id.index()) }
    }

    /// The raw record sequence, sentinel included; together with
    /// [`Tree::len`] this is the whole serialization surface.
    #[inline]
    pub fn nodes(&self) -> &[Node<T>] {
        self.arena.as_slice()
    }

    /// Footprint of the backing arena.
    pub fn memory_usage(&self) -> MemoryUsage {
        self.arena.memory_usage()
    }

    #[inline]
    fn hook(&self, id: NodeId) -> &Hook {
        debug_assert!(id.index() < self.arena.len());
        // SAFETY: internal callers only pass verified or linked ids.
        unsafe { &self.arena.get_unchecked(id.index()).hook }
    }

    #[inline]
    fn hook_mut(&mut self, id: NodeId) -> &mut Hook {
        debug_assert!(id.index() < self.arena.len());
        // SAFETY: internal callers only pass verified or linked ids.
        unsafe { &mut self.arena.get_unchecked_mut(id.index()).hook }
    }
}

// ============================================================================
// Structural rewrites
// ============================================================================

impl<T: Clone> Tree<T> {
    /// Make `new_root` the root, discarding every node outside its subtree.
    ///
    /// The retained nodes are copied breadth-first into a fresh arena (their
    /// ids are renumbered compactly; child order under every retained parent
    /// is preserved) which then replaces the old one. Every previously held
    /// handle is invalidated. O(retained subtree).
    ///
    /// # Panics
    /// Panics if `new_root` names no node.
    pub fn reroot(&mut self, new_root: NodeId) {
        assert!(
            self.get(new_root).is_some(),
            "reroot target {new_root} is not a node of this tree"
        );
        let mut fresh = self.fresh_like();
        let mut map = vec![NodeId::NONE; self.arena.len()];
        map[new_root.index()] = fresh.insert(NodeId::NONE, self[new_root].value.clone());

        let mut queue = VecDeque::new();
        queue.push_back(new_root);
        let mut kids: SmallVec<[NodeId; 16]> = SmallVec::new();
        while let Some(old) = queue.pop_front() {
            kids.clear();
            kids.extend(self.children(old));
            // Children iterate newest first; insert oldest first to keep the
            // original order in the rebuilt list.
            for &c in kids.iter().rev() {
                map[c.index()] = fresh.insert(map[old.index()], self[c].value.clone());
                queue.push_back(c);
            }
        }
        *self = fresh;
    }

    /// Discard everything below the root's direct children.
    ///
    /// Afterwards the root's children are exactly its pre-call children, in
    /// the same order, and all of them are leaves. Every previously held
    /// handle is invalidated. No-op on an empty tree.
    pub fn flatten(&mut self) {
        if self.is_empty() {
            return;
        }
        let mut fresh = self.fresh_like();
        let root = fresh.insert(NodeId::NONE, self[NodeId::ROOT].value.clone());
        let mut kids: SmallVec<[NodeId; 16]> = SmallVec::new();
        kids.extend(self.children(NodeId::ROOT));
        for &c in kids.iter().rev() {
            fresh.insert(root, self[c].value.clone());
        }
        *self = fresh;
    }

    /// An empty tree with this tree's config, its sentinel payload cloned
    /// from ours (sidestepping a `T: Default` bound on the rewrites).
    fn fresh_like(&self) -> Tree<T> {
        let mut arena = VmVec::with_capacity(self.config.capacity, self.config.commit_chunk);
        let sentinel = match self.arena.get(0) {
            Some(s) => s.value.clone(),
            None => unreachable!("arena always holds the sentinel"),
        };
        arena.push(Node::new(sentinel));
        Tree {
            arena,
            config: self.config.clone(),
        }
    }
}

// ============================================================================
// Indexed access and traversal
// ============================================================================

impl<T> Index<NodeId> for Tree<T> {
    type Output = Node<T>;

    fn index(&self, id: NodeId) -> &Node<T> {
        match self.get(id) {
            Some(node) => node,
            None => panic!("invalid node id {id}"),
        }
    }
}

impl<T> IndexMut<NodeId> for Tree<T> {
    fn index_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match self.get_mut(id) {
            Some(node) => node,
            None => panic!("invalid node id {id}"),
        }
    }
}

impl<T> Traverse for Tree<T> {
    #[inline]
    fn parent(&self, id: NodeId) -> NodeId {
        if id.index() < self.arena.len() {
            self.hook(id).up
        } else {
            NodeId::NONE
        }
    }

    #[inline]
    fn prev_sibling(&self, id: NodeId) -> NodeId {
        if id.index() < self.arena.len() {
            self.hook(id).prev
        } else {
            NodeId::NONE
        }
    }

    #[inline]
    fn last_child(&self, id: NodeId) -> NodeId {
        if id.index() < self.arena.len() {
            self.hook(id).tail
        } else {
            NodeId::NONE
        }
    }

    #[inline]
    fn child_count(&self, id: NodeId) -> u32 {
        if id.index() < self.arena.len() {
            self.hook(id).fan
        } else {
            0
        }
    }

    #[inline]
    fn slot_count(&self) -> usize {
        self.arena.len()
    }
}
