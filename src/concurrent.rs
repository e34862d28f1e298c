//! Concurrently appendable rooted tree.
//!
//! Many threads insert through `&self` at once. Appending a record is handled
//! by the [`ConcurrentVmVec`] batch allocator; splicing it into the sibling
//! list is serialized per parent by a spin lock, so threads inserting under
//! different parents never contend with each other.
//!
//! The insert protocol orders its stores so that lock-free readers stay
//! consistent: a record is fully written before its slot's constructed marker
//! is set, and the parent's `tail` is rewritten (release) only after the
//! child's `up` and `prev` links are in place. A reader that discovers a node
//! through an acquire load of `tail` therefore sees its record and links
//! complete. Links of nodes still being inserted elsewhere read as their old
//! values, never as torn ones.
//!
//! Two orderings are guaranteed: children of one parent are linked in some
//! serial order (the lock), and inserts made by one thread under one parent
//! appear in that thread's insertion order. Interleaving across threads is
//! otherwise unspecified.
//!
//! The structural rewrites ([`ConcurrentTree::reroot`],
//! [`ConcurrentTree::flatten`]) take `&mut self`: the borrow checker excludes
//! concurrent insertion during a rebuild, so they need no locking at all.

use std::collections::VecDeque;
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use smallvec::SmallVec;

use crate::arena::ConcurrentVmVec;
use crate::id::NodeId;
use crate::iter::Traverse;
use crate::sync::SpinLock;
use crate::{Config, MemoryUsage};

/// Link metadata of one node, shared between appender threads.
struct AtomicHook {
    /// Serializes splices into this node's child list.
    lock: SpinLock,
    up: AtomicI32,
    prev: AtomicI32,
    tail: AtomicI32,
    fan: AtomicU32,
}

impl AtomicHook {
    fn new() -> Self {
        AtomicHook {
            lock: SpinLock::new(),
            up: AtomicI32::new(NodeId::NONE.raw()),
            prev: AtomicI32::new(NodeId::NONE.raw()),
            tail: AtomicI32::new(NodeId::NONE.raw()),
            fan: AtomicU32::new(0),
        }
    }
}

/// One tree record: link metadata composed with the payload.
pub struct ConcurrentNode<T> {
    hook: AtomicHook,
    /// The payload. Written once before the node becomes visible to other
    /// threads; mutation afterwards requires `&mut` access to the tree.
    pub value: T,
}

impl<T> ConcurrentNode<T> {
    fn new(value: T) -> Self {
        ConcurrentNode {
            hook: AtomicHook::new(),
            value,
        }
    }

    /// Parent handle; invalid for the root.
    #[inline]
    pub fn parent(&self) -> NodeId {
        NodeId::from_raw(self.hook.up.load(Ordering::Relaxed))
    }

    /// Next older sibling; invalid for the oldest child.
    #[inline]
    pub fn prev_sibling(&self) -> NodeId {
        NodeId::from_raw(self.hook.prev.load(Ordering::Relaxed))
    }

    /// Most recently linked child; invalid for a leaf.
    #[inline]
    pub fn last_child(&self) -> NodeId {
        // Pairs with the release store in `link`; seeing a child here means
        // seeing its record and links too.
        NodeId::from_raw(self.hook.tail.load(Ordering::Acquire))
    }

    /// Number of direct children linked so far.
    #[inline]
    pub fn child_count(&self) -> u32 {
        self.hook.fan.load(Ordering::Relaxed)
    }
}

/// A rooted tree that accepts insertions from many threads at once.
///
/// Reads are lock-free; insertion takes only the parent's spin lock.
/// Constructors require `T: Default` for the sentinel slot's placeholder
/// payload, and take the root payload up front: a concurrent tree is never
/// empty, which keeps the root's handle fixed no matter which thread inserts
/// first.
///
/// # Example
/// ```
/// use std::thread;
/// use vmtree::{ConcurrentTree, NodeId, Traverse};
///
/// let tree = ConcurrentTree::with_root(0);
/// thread::scope(|s| {
///     for t in 1..=4 {
///         let tree = &tree;
///         s.spawn(move || {
///             let mut parent = NodeId::ROOT;
///             for i in 0..100 {
///                 parent = tree.insert(parent, t * 1000 + i);
///             }
///         });
///     }
/// });
/// assert_eq!(tree.depth_first().count(), 401);
/// assert_eq!(tree.height(), 101);
/// ```
pub struct ConcurrentTree<T> {
    arena: ConcurrentVmVec<ConcurrentNode<T>>,
    config: Config,
}

impl<T: Default> ConcurrentTree<T> {
    /// Create a tree with `value` as its root payload and the default
    /// [`Config`].
    pub fn with_root(value: T) -> Self {
        Self::with_config(value, Config::default())
    }

    /// Create a tree with `value` as its root payload, able to hold at most
    /// `capacity` slots (including the sentinel).
    pub fn with_capacity_and_root(capacity: usize, value: T) -> Self {
        Self::with_config(
            value,
            Config {
                capacity,
                ..Config::default()
            },
        )
    }

    /// Create a tree with `value` as its root payload and an explicit
    /// [`Config`].
    ///
    /// # Panics
    /// Panics if the capacity cannot seat a sentinel and a root, exceeds the
    /// handle range, or the address range cannot be reserved.
    pub fn with_config(value: T, config: Config) -> Self {
        assert!(config.capacity >= 2, "capacity must seat sentinel and root");
        assert!(
            config.capacity <= i32::MAX as usize,
            "capacity exceeds the node handle range"
        );
        let arena =
            ConcurrentVmVec::with_capacity(config.capacity, config.commit_chunk, config.batch);
        let tree = ConcurrentTree { arena, config };
        // The constructing thread holds the arena exclusively, so the
        // sentinel and root land in slots 0 and 1.
        let sentinel = tree.arena.push(ConcurrentNode::new(T::default()));
        debug_assert_eq!(sentinel, NodeId::NONE.index());
        let root = tree.arena.push(ConcurrentNode::new(value));
        debug_assert_eq!(root, NodeId::ROOT.index());
        tree.link(NodeId::ROOT, NodeId::NONE);
        tree
    }
}

impl<T> ConcurrentTree<T> {
    /// Insert `value` as a new child of `parent`, returning its handle.
    ///
    /// Callable from any number of threads at once. When the call returns,
    /// the node is fully linked; the handle may be shared freely. The parent
    /// may even be a node another thread is inserting right now: its handle
    /// is enough, construction is awaited here.
    ///
    /// # Panics
    /// Panics on capacity exhaustion, on a parent handle that names no slot,
    /// and on the invalid handle (the root already exists).
    pub fn insert(&self, parent: NodeId, value: T) -> NodeId {
        assert!(parent.is_valid(), "tree already has a root");
        assert!(
            parent.index() < self.arena.len(),
            "parent {parent} is not a node of this tree"
        );
        let child = NodeId::from_index(self.arena.push(ConcurrentNode::new(value)));
        self.link(child, parent);
        child
    }

    /// Splice `child` under `parent`. The child must already be constructed
    /// by the calling thread.
    fn link(&self, child: NodeId, parent: NodeId) {
        // SAFETY: callers link only nodes they just appended.
        let child_hook = unsafe { &self.arena.get_unchecked(child.index()).hook };
        child_hook.up.store(parent.raw(), Ordering::Relaxed);
        // The parent may still be mid-construction on its appender thread;
        // its slot is committed and its marker flips exactly once.
        let parent_hook = &self.arena.wait_get(parent.index()).hook;
        let _guard = parent_hook.lock.lock();
        let old_tail = parent_hook.tail.load(Ordering::Relaxed);
        child_hook.prev.store(old_tail, Ordering::Relaxed);
        // Release publishes the child's record, `up` and `prev` along with
        // the new tail.
        parent_hook.tail.store(child.raw(), Ordering::Release);
        parent_hook.fan.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of arena slots granted so far, sentinel included.
    ///
    /// This is the allocator watermark: while appenders are running it
    /// includes batch slots whose records are not written yet. Use
    /// [`ConcurrentTree::is_built`] or [`ConcurrentTree::get`] to tell them
    /// apart.
    #[inline]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Always false: the root is created with the tree.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// The declared maximum slot count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// The root handle. A concurrent tree always has a root.
    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Whether `id` names a fully constructed node.
    #[inline]
    pub fn is_built(&self, id: NodeId) -> bool {
        id.is_valid() && self.arena.is_built(id.index())
    }

    /// Non-blocking checked access: `None` for the invalid handle,
    /// out-of-range ids and slots still under construction.
    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&ConcurrentNode<T>> {
        if id.is_valid() {
            self.arena.get(id.index())
        } else {
            None
        }
    }

    /// Checked access that waits for a node another thread is constructing
    /// right now. Equivalent to indexing.
    ///
    /// # Panics
    /// Panics if `id` names no slot.
    #[inline]
    pub fn wait_get(&self, id: NodeId) -> &ConcurrentNode<T> {
        assert!(
            id.is_valid() && id.index() < self.arena.len(),
            "invalid node id {id}"
        );
        self.arena.wait_get(id.index())
    }

    /// Checked mutable access; exclusivity makes waiting unnecessary.
    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut ConcurrentNode<T>> {
        if id.is_valid() {
            self.arena.get_mut(id.index())
        } else {
            None
        }
    }

    /// Unchecked access for hot paths.
    ///
    /// # Safety
    /// `id` must have been returned by [`ConcurrentTree::insert`] on this
    /// tree since the last arena rebuild.
    #[inline]
    pub unsafe fn get_unchecked(&self, id: NodeId) -> &ConcurrentNode<T> {
        // SAFETY: caller promises a live handle, which implies a constructed
        // record.
        unsafe { self.arena.get_unchecked(id.index()) }
    }

    /// Footprint of the backing arena.
    pub fn memory_usage(&self) -> MemoryUsage {
        self.arena.memory_usage()
    }
}

// ============================================================================
// Structural rewrites
// ============================================================================

impl<T: Clone> ConcurrentTree<T> {
    /// Make `new_root` the root, discarding every node outside its subtree.
    ///
    /// The retained nodes are copied breadth-first into a fresh arena (their
    /// ids are renumbered compactly; child order under every retained parent
    /// is preserved) which then replaces the old one. Every previously held
    /// handle is invalidated. Taking `&mut self` excludes concurrent
    /// insertion for the duration.
    ///
    /// # Panics
    /// Panics if `new_root` names no constructed node.
    pub fn reroot(&mut self, new_root: NodeId) {
        assert!(
            self.get(new_root).is_some(),
            "reroot target {new_root} is not a node of this tree"
        );
        let fresh = self.fresh_like(self[new_root].value.clone());
        let mut map = vec![NodeId::NONE; self.arena.len()];
        map[new_root.index()] = NodeId::ROOT;

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
    /// handle is invalidated. Taking `&mut self` excludes concurrent
    /// insertion for the duration.
    pub fn flatten(&mut self) {
        let fresh = self.fresh_like(self[NodeId::ROOT].value.clone());
        let mut kids: SmallVec<[NodeId; 16]> = SmallVec::new();
        kids.extend(self.children(NodeId::ROOT));
        for &c in kids.iter().rev() {
            fresh.insert(NodeId::ROOT, self[c].value.clone());
        }
        *self = fresh;
    }

    /// A tree holding only `root`, with this tree's config, its sentinel
    /// payload cloned from ours (sidestepping a `T: Default` bound on the
    /// rewrites).
    fn fresh_like(&self, root: T) -> ConcurrentTree<T> {
        let arena = ConcurrentVmVec::with_capacity(
            self.config.capacity,
            self.config.commit_chunk,
            self.config.batch,
        );
        let sentinel = match self.arena.get(0) {
            Some(s) => s.value.clone(),
            None => unreachable!("arena always holds the sentinel"),
        };
        arena.push(ConcurrentNode::new(sentinel));
        let idx = arena.push(ConcurrentNode::new(root));
        debug_assert_eq!(idx, NodeId::ROOT.index());
        let tree = ConcurrentTree {
            arena,
            config: self.config.clone(),
        };
        tree.link(NodeId::ROOT, NodeId::NONE);
        tree
    }
}

// ============================================================================
// Indexed access and traversal
// ============================================================================

impl<T> Index<NodeId> for ConcurrentTree<T> {
    type Output = ConcurrentNode<T>;

    fn index(&self, id: NodeId) -> &ConcurrentNode<T> {
        self.wait_get(id)
    }
}

impl<T> IndexMut<NodeId> for ConcurrentTree<T> {
    fn index_mut(&mut self, id: NodeId) -> &mut ConcurrentNode<T> {
        match self.get_mut(id) {
            Some(node) => node,
            None => panic!("invalid node id {id}"),
        }
    }
}

impl<T> Traverse for ConcurrentTree<T> {
    #[inline]
    fn parent(&self, id: NodeId) -> NodeId {
        match self.arena.get(id.index()) {
            Some(n) => n.parent(),
            None => NodeId::NONE,
        }
    }

    #[inline]
    fn prev_sibling(&self, id: NodeId) -> NodeId {
        match self.arena.get(id.index()) {
            Some(n) => n.prev_sibling(),
            None => NodeId::NONE,
        }
    }

    #[inline]
    fn last_child(&self, id: NodeId) -> NodeId {
        match self.arena.get(id.index()) {
            Some(n) => n.last_child(),
            None => NodeId::NONE,
        }
    }

    #[inline]
    fn child_count(&self, id: NodeId) -> u32 {
        match self.arena.get(id.index()) {
            Some(n) => n.child_count(),
            None => 0,
        }
    }

    #[inline]
    fn slot_count(&self) -> usize {
        self.arena.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Config {
        Config {
            capacity: 1 << 16,
            ..Config::default()
        }
    }

    /// Root 1 with children 2, 3, 4; 5, 6 under 2; 7 under 3; 8 under 4.
    fn demo_tree() -> ConcurrentTree<i32> {
        let t = ConcurrentTree::with_config(10, small());
        let n2 = t.insert(NodeId::ROOT, 20);
        let n3 = t.insert(NodeId::ROOT, 30);
        let n4 = t.insert(NodeId::ROOT, 40);
        t.insert(n2, 50);
        t.insert(n2, 60);
        t.insert(n3, 70);
        t.insert(n4, 80);
        t
    }

    #[test]
    fn test_construction() {
        let t: ConcurrentTree<u32> = ConcurrentTree::with_root(7);
        assert_eq!(t.root(), NodeId::ROOT);
        assert_eq!(t[NodeId::ROOT].value, 7);
        assert_eq!(t[NodeId::ROOT].parent(), NodeId::NONE);
        assert!(t.get(NodeId::NONE).is_none());
        assert!(!t.is_empty());
        assert!(t.len() >= 2);
    }

    #[test]
    fn test_single_thread_inserts() {
        let t = ConcurrentTree::with_config(0, small());
        let a = t.insert(NodeId::ROOT, 1);
        let b = t.insert(NodeId::ROOT, 2);
        assert_eq!(t[NodeId::ROOT].child_count(), 2);
        assert_eq!(t[NodeId::ROOT].last_child(), b);
        assert_eq!(t[b].prev_sibling(), a);
        assert_eq!(t[a].prev_sibling(), NodeId::NONE);
        assert_eq!(t[b].parent(), NodeId::ROOT);
    }

    #[test]
    fn test_demo_scenario() {
        let t = demo_tree();
        // Ids are dense when built from one thread.
        let id = NodeId::from_index;
        assert_eq!(t[id(5)].value, 50);
        let kids: Vec<_> = t.children(id(2)).collect();
        assert_eq!(kids, vec![id(6), id(5)]);
        assert_eq!(t.height_and_width_from(NodeId::ROOT), (3, 4));
    }

    #[test]
    #[should_panic(expected = "already has a root")]
    fn test_double_root_panics() {
        let t = ConcurrentTree::with_config(0, small());
        t.insert(NodeId::NONE, 1);
    }

    #[test]
    #[should_panic(expected = "is not a node of this tree")]
    fn test_unknown_parent_panics() {
        let t = ConcurrentTree::with_config(0, small());
        t.insert(NodeId::from_index(1_000_000), 1);
    }

    #[test]
    fn test_indexing_and_mutation() {
        let mut t = demo_tree();
        let id = NodeId::from_index(5);
        assert_eq!(t[id].value, 50);
        t[id].value = 55;
        assert_eq!(t[id].value, 55);
        assert!(t.get_mut(NodeId::NONE).is_none());
    }

    #[test]
    #[should_panic(expected = "invalid node id *")]
    fn test_index_invalid_panics() {
        let t = demo_tree();
        let _ = &t[NodeId::NONE];
    }

    #[test]
    fn test_deep_chain() {
        let t = ConcurrentTree::with_config(0u32, small());
        let mut parent = NodeId::ROOT;
        for i in 0..1_000 {
            parent = t.insert(parent, i);
        }
        assert_eq!(t.ancestors(parent).count(), 1_001);
        assert_eq!(t.height(), 1_001);
    }

    #[test]
    fn test_reroot() {
        let mut t = demo_tree();
        let before: Vec<i32> = t
            .depth_first_from(NodeId::from_index(2))
            .map(|n| t[n].value)
            .collect();
        t.reroot(NodeId::from_index(2));
        assert_eq!(t[NodeId::ROOT].value, 20);
        let after: Vec<i32> = t.depth_first().map(|n| t[n].value).collect();
        assert_eq!(after, before);
        let kids: Vec<i32> = t.children(NodeId::ROOT).map(|n| t[n].value).collect();
        assert_eq!(kids, vec![60, 50]);
        // Ids are renumbered compactly; the old id range is gone.
        assert!(t.get(NodeId::from_index(8)).is_none());
    }

    #[test]
    fn test_flatten() {
        let mut t = demo_tree();
        t.flatten();
        assert_eq!(t.depth_first().count(), 4);
        let kids: Vec<i32> = t.children(NodeId::ROOT).map(|n| t[n].value).collect();
        assert_eq!(kids, vec![40, 30, 20]);
        assert_eq!(t.height(), 2);
    }

    #[test]
    fn test_memory_usage() {
        let t = demo_tree();
        let usage = t.memory_usage();
        assert!(usage.committed_bytes > 0);
        assert!(usage.reserved_bytes >= usage.committed_bytes);
        assert_eq!(usage.capacity, 1 << 16);
    }
}
