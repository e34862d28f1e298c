//! # vmtree - Concurrently Growable Trees over Reserved Virtual Memory
//!
//! A Rust library for building large rooted trees of fixed-size records,
//! appendable from many threads at once, addressed by 4-byte integer handles.
//!
//! ## Features
//!
//! - **Stable handles**: address space for the whole capacity is reserved up
//!   front and committed chunk by chunk, so records never move and a handle,
//!   once issued, stays valid
//! - **O(1) insertion**: children form a newest-to-oldest linked list; an
//!   insert rewrites one `tail` and one `prev` link
//! - **Concurrent appends**: threads bump-allocate out of private slot
//!   batches and serialize only on the parent being inserted under
//! - **One traversal suite**: children, ancestors, depth-first, leaves,
//!   interior and level-order iterators plus height/width, shared by the
//!   sequential and concurrent trees through the [`Traverse`] trait
//!
//! ## Architecture
//!
//! 1. **Arena layer** ([`arena`]): append-only slot storage over a reserved
//!    virtual memory range. [`arena::VmVec`] serves a single writer;
//!    [`arena::ConcurrentVmVec`] adds batched grants and per-slot
//!    constructed markers for many writers.
//!
//! 2. **Tree layer** ([`tree`], [`concurrent`]): each record composes the
//!    caller's payload with four links (`up`, `prev`, `tail`, `fan`).
//!    Slot 0 is a permanent sentinel doubling as "no node"; slot 1 is
//!    always the root.
//!
//! 3. **Traversal layer** ([`iter`]): pull-based iterators over the link
//!    structure, defined once for both tree types.
//!
//! Targets Unix platforms; the arena is built on `mmap`.
//!
//! ## Example
//!
//! ```rust
//! use vmtree::{NodeId, Traverse, Tree};
//!
//! let mut tree = Tree::with_root("fs");
//! let home = tree.insert(NodeId::ROOT, "home");
//! let etc = tree.insert(NodeId::ROOT, "etc");
//! tree.insert(home, "alice");
//! tree.insert(home, "bob");
//! tree.insert(etc, "hosts");
//!
//! // Children iterate newest first.
//! let top: Vec<_> = tree.children(NodeId::ROOT).map(|n| tree[n].value).collect();
//! assert_eq!(top, vec!["etc", "home"]);
//! assert_eq!(tree.height(), 3);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod concurrent;
pub mod iter;
pub mod tree;

mod id;
mod sync;
mod vm;

pub use concurrent::{ConcurrentNode, ConcurrentTree};
pub use id::NodeId;
pub use iter::Traverse;
pub use tree::{Node, Tree};

/// Configuration for a tree's backing arena.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of node slots, sentinel included. Address space for
    /// the whole capacity is reserved at construction; it cannot grow later
    /// without invalidating issued handles.
    pub capacity: usize,
    /// Bytes of physical memory committed per growth step (page-rounded).
    pub commit_chunk: usize,
    /// Consecutive slots granted per refill of a thread's private batch.
    /// Only the concurrent tree allocates in batches.
    pub batch: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: 1 << 22,
            commit_chunk: 8 << 20,
            batch: 32,
        }
    }
}

/// Footprint of one arena: the reservation and its committed prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryUsage {
    /// Bytes of address space reserved for the whole capacity.
    pub reserved_bytes: usize,
    /// Bytes of physical memory committed so far.
    pub committed_bytes: usize,
    /// Slots issued so far.
    pub slots: usize,
    /// The declared maximum slot count.
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert!(cfg.capacity <= i32::MAX as usize);
        assert!(cfg.batch > 0);
        let t: Tree<u64> = Tree::with_root(1);
        assert_eq!(t.capacity(), cfg.capacity);
        assert!(t.memory_usage().reserved_bytes > 0);
    }
}

#[cfg(test)]
mod proptests;
