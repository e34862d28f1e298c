//! Integer node handles.
//!
//! Nodes are named by slot index into the backing arena rather than by
//! pointer. This is crucial for the growth strategy:
//! - Handles stay valid as the arena commits more memory
//! - 4-byte links halve the metadata footprint of 8-byte pointers
//! - Index `0` doubles as "no node" and names the permanent sentinel slot
//! - Index `1` is always the tree root

use std::fmt;

/// Handle naming one slot of a tree's arena.
///
/// Only equality and validity are meaningful; handles carry no ordering
/// semantics. The zero handle is invalid and also names the sentinel slot,
/// which is never a real node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[repr(transparent)]
pub struct NodeId(i32);

impl NodeId {
    /// The invalid handle; also the index of the sentinel slot.
    pub const NONE: NodeId = NodeId(0);

    /// The root. A non-empty tree always has its root in slot 1.
    pub const ROOT: NodeId = NodeId(1);

    /// Construct a handle from an arena slot index.
    ///
    /// # Panics
    /// Panics if `index` exceeds `i32::MAX`.
    #[inline]
    pub fn from_index(index: usize) -> Self {
        assert!(index <= i32::MAX as usize, "node index too large");
        NodeId(index as i32)
    }

    /// The arena slot index this handle names.
    #[inline]
    pub fn index(self) -> usize {
        debug_assert!(self.0 >= 0);
        self.0 as usize
    }

    /// Whether this handle names a node (nonzero).
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Rebuild a handle from its raw representation (atomic link storage).
    #[inline]
    pub(crate) fn from_raw(raw: i32) -> Self {
        NodeId(raw)
    }

    /// Raw representation for atomic link storage.
    #[inline]
    pub(crate) fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("*")
        }
    }
}
