use particle_index_core::prelude::*;

use serde::{Deserialize, Serialize};

/// A stable handle to a node in an `Octree`'s arena.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The `child_index`-th member of an octet starting at `self`.
    #[inline]
    pub(crate) fn offset(self, child_index: u8) -> Self {
        Self(self.0 + u32::from(child_index))
    }
}

/// How a tree's leaves account for the codes inserted into them. Chosen once per tree from `n_ref`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum LeafMode {
    /// Leaves count the codes they hold; a leaf splits once it would exceed `n_ref`.
    Counting,
    /// `n_ref == 1`: every leaf holds at most one distinct code and remembers it, which makes the tree an exact spatial lookup
    /// structure.
    Index,
}

impl LeafMode {
    #[inline]
    pub fn from_n_ref(n_ref: u64) -> Self {
        if n_ref == 1 {
            LeafMode::Index
        } else {
            LeafMode::Counting
        }
    }
}

/// What a node holds.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Occupancy {
    /// A counting-mode leaf holding this many codes.
    Count(u64),
    /// An index-mode leaf and the code it holds, if any.
    Code(Option<Morton3>),
    /// The node has been split into eight children.
    Refined,
}

impl Occupancy {
    #[inline]
    pub fn empty(mode: LeafMode) -> Self {
        match mode {
            LeafMode::Counting => Occupancy::Count(0),
            LeafMode::Index => Occupancy::Code(None),
        }
    }

    /// The number of codes this node is considered to hold when deciding whether it must split. Refined nodes are always "over
    /// capacity" so that insertion descends through them.
    #[inline]
    pub(crate) fn held(&self, n_ref: u64) -> u64 {
        match *self {
            Occupancy::Count(n) => n,
            Occupancy::Code(Some(_)) => 1,
            Occupancy::Code(None) => 0,
            Occupancy::Refined => n_ref + 1,
        }
    }

    /// The single integer view of this node: a count, a stored code, or the `n_ref + 1` sentinel for refined nodes.
    #[inline]
    pub fn counter(&self, n_ref: u64) -> u64 {
        match *self {
            Occupancy::Count(n) => n,
            Occupancy::Code(Some(code)) => code.0,
            Occupancy::Code(None) => 0,
            Occupancy::Refined => n_ref + 1,
        }
    }

    #[inline]
    pub fn is_refined(&self) -> bool {
        matches!(self, Occupancy::Refined)
    }
}

/// One cubic region of an `Octree`. A node is either a leaf or owns exactly eight children, which live in eight consecutive
/// arena slots.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) first_child: Option<NodeId>,
    pub(crate) file: Option<FileId>,
    pub(crate) domain: i64,
    pub(crate) domain_ind: Option<usize>,
    pub(crate) occupancy: Occupancy,
    pub(crate) level: u8,
}

impl Node {
    pub(crate) fn new(level: u8, domain: i64, file: Option<FileId>, mode: LeafMode) -> Self {
        Self {
            first_child: None,
            file,
            domain,
            domain_ind: None,
            occupancy: Occupancy::empty(mode),
            level,
        }
    }

    /// All eight children, in `CHILD_VISIT_ORDER`, or `None` for a leaf.
    #[inline]
    pub fn children(&self) -> Option<[NodeId; 8]> {
        self.first_child.map(|first| {
            let mut children = [first; 8];
            for (slot, &child_index) in children.iter_mut().zip(CHILD_VISIT_ORDER.iter()) {
                *slot = first.offset(child_index);
            }

            children
        })
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.first_child.is_none()
    }

    #[inline]
    pub fn occupancy(&self) -> Occupancy {
        self.occupancy
    }

    #[inline]
    pub fn file(&self) -> Option<FileId> {
        self.file
    }

    #[inline]
    pub fn domain(&self) -> i64 {
        self.domain
    }

    /// Position in the linearized node list. Only set once the tree is finalized.
    #[inline]
    pub fn domain_ind(&self) -> Option<usize> {
        self.domain_ind
    }

    /// Depth below the root that owns this node; roots are level 0.
    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }
}
