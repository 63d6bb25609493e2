use super::node::{LeafMode, Node, NodeId, Occupancy};
use crate::SmallKeyHashMap;

use particle_index_core::{check_sorted, prelude::*, Error, Result};

use itertools::Itertools;
use std::convert::TryFrom;

/// Where the roots of an `Octree` come from.
#[derive(Clone, Debug)]
pub enum RootLayout {
    /// A regular `dims` grid of roots, flattened x-major. Any subset may be allocated.
    Dense {
        dims: [u32; 3],
        roots: Vec<Option<NodeId>>,
    },
    /// A sparse set of roots named by caller-chosen keys, kept in allocation order.
    Forest {
        roots: Vec<(u64, NodeId)>,
        lookup: SmallKeyHashMap<u64, NodeId>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TreeState {
    Building,
    Finalized,
    Released,
}

/// An adaptive octree over Morton-sorted codes, stored as an arena of `Node`s.
///
/// Nodes are appended to the arena and never moved or freed individually, so a `NodeId` stays valid for the lifetime of the tree.
/// Refining a node appends its eight children as one contiguous octet. The tree is populated with `insert_sorted` (or
/// `insert_sorted_into_root` for forests), then `finalize`d, which assigns every node a position in a fixed traversal order.
/// After that the tree is read-only until `teardown`.
///
/// When `n_ref == 1` the tree runs in `LeafMode::Index` and each leaf remembers the one code it holds. Otherwise leaves count
/// codes and split once a leaf would exceed `n_ref`.
#[derive(Clone, Debug)]
pub struct Octree {
    nodes: Vec<Node>,
    layout: RootLayout,
    n_ref: u64,
    mode: LeafMode,
    file_tag: Option<FileId>,
    max_level: u8,
    domain_id: Option<i64>,
    linear: Vec<NodeId>,
    state: TreeState,
}

/// Domain tag of nodes that have not been finalized yet.
pub const UNASSIGNED_DOMAIN: i64 = -1;

impl Octree {
    /// A tree with a `dims` grid of roots, none of which are allocated yet.
    pub fn new_dense(dims: [u32; 3], n_ref: u64) -> Result<Self> {
        if dims.iter().any(|&d| d == 0) {
            return Err(Error::InvalidConfig(format!(
                "root grid dims must be non-zero, got {:?}",
                dims
            )));
        }
        let num_roots = dims.iter().map(|&d| d as usize).product();

        Self::new(
            RootLayout::Dense {
                dims,
                roots: vec![None; num_roots],
            },
            n_ref,
        )
    }

    /// A tree with no roots. Roots are added one at a time with `allocate_forest_root`.
    pub fn new_forest(n_ref: u64) -> Result<Self> {
        Self::new(
            RootLayout::Forest {
                roots: Vec::new(),
                lookup: SmallKeyHashMap::default(),
            },
            n_ref,
        )
    }

    fn new(layout: RootLayout, n_ref: u64) -> Result<Self> {
        if n_ref == 0 {
            return Err(Error::InvalidConfig("n_ref must be at least 1".into()));
        }

        Ok(Self {
            nodes: Vec::new(),
            layout,
            n_ref,
            mode: LeafMode::from_n_ref(n_ref),
            file_tag: None,
            max_level: 0,
            domain_id: None,
            linear: Vec::new(),
            state: TreeState::Building,
        })
    }

    /// Every node allocated from now on is associated with `file`.
    pub fn with_file_tag(mut self, file: FileId) -> Self {
        self.file_tag = Some(file);

        self
    }

    #[inline]
    pub fn n_ref(&self) -> u64 {
        self.n_ref
    }

    #[inline]
    pub fn leaf_mode(&self) -> LeafMode {
        self.mode
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// The deepest level any node reaches. Exact after `finalize`.
    #[inline]
    pub fn max_level(&self) -> u8 {
        self.max_level
    }

    #[inline]
    pub fn domain_id(&self) -> Option<i64> {
        self.domain_id
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.state == TreeState::Finalized
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.state == TreeState::Released
    }

    #[inline]
    pub fn layout(&self) -> &RootLayout {
        &self.layout
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Root grid dimensions, or `None` for a forest.
    pub fn dims(&self) -> Option<[u32; 3]> {
        match &self.layout {
            RootLayout::Dense { dims, .. } => Some(*dims),
            RootLayout::Forest { .. } => None,
        }
    }

    /// Forest root keys in allocation order. Empty for a dense tree.
    pub fn forest_keys(&self) -> Vec<u64> {
        match &self.layout {
            RootLayout::Dense { .. } => Vec::new(),
            RootLayout::Forest { roots, .. } => roots.iter().map(|(key, _)| *key).collect(),
        }
    }

    /// The allocated roots in traversal order: x-major for a dense grid, allocation order for a forest.
    pub fn roots(&self) -> Vec<NodeId> {
        match &self.layout {
            RootLayout::Dense { roots, .. } => roots.iter().flatten().cloned().collect(),
            RootLayout::Forest { roots, .. } => roots.iter().map(|(_, id)| *id).collect(),
        }
    }

    /// Allocates every root of a dense grid that is not already allocated.
    pub fn allocate_roots(&mut self) -> Result<()> {
        let dims = self.dense_dims("allocate_roots")?;
        for ijk in iter_cells(dims) {
            self.allocate_root(ijk)?;
        }

        Ok(())
    }

    /// Allocates the dense root at `ijk`, or returns the existing one.
    pub fn allocate_root(&mut self, ijk: [u32; 3]) -> Result<NodeId> {
        self.check_building("allocate_root")?;
        let dims = self.dense_dims("allocate_root")?;
        if (0..3).any(|a| ijk[a] >= dims[a]) {
            return Err(Error::InvalidState(format!(
                "root {:?} is outside of the {:?} root grid",
                ijk, dims
            )));
        }

        if let Some(existing) = self.dense_root(ijk) {
            return Ok(existing);
        }
        let id = self.push_root()?;
        if let RootLayout::Dense { roots, .. } = &mut self.layout {
            roots[flat_index(ijk, dims)] = Some(id);
        }

        Ok(id)
    }

    /// Allocates a forest root named by `key`, or returns the existing root with that key.
    pub fn allocate_forest_root(&mut self, key: u64) -> Result<NodeId> {
        self.check_building("allocate_forest_root")?;
        match &self.layout {
            RootLayout::Forest { lookup, .. } => {
                if let Some(&existing) = lookup.get(&key) {
                    return Ok(existing);
                }
            }
            RootLayout::Dense { .. } => {
                return Err(Error::InvalidState(
                    "allocate_forest_root called on a dense tree".into(),
                ))
            }
        }

        let id = self.push_root()?;
        if let RootLayout::Forest { roots, lookup } = &mut self.layout {
            roots.push((key, id));
            lookup.insert(key, id);
        }

        Ok(id)
    }

    /// Bulk inserts Morton `codes` at `order` into a dense tree. The bits of each code above `3 * order` select its root, which
    /// must already be allocated and still be empty: every root takes exactly one bulk insert.
    pub fn insert_sorted(&mut self, codes: &[u64], order: u8) -> Result<()> {
        let dims = self.dense_dims("insert_sorted")?;

        self.insert_codes(codes, order, |tree, code| {
            let ijk = Morton3(code.root_bits(order)).grid();
            if (0..3).any(|a| ijk[a] >= dims[a]) {
                return Err(Error::UnallocatedRoot(ijk));
            }

            tree.dense_root(ijk).ok_or(Error::UnallocatedRoot(ijk))
        })
    }

    /// Bulk inserts Morton `codes` at `order` into the forest root named by `key`, which must still be empty.
    pub fn insert_sorted_into_root(&mut self, key: u64, codes: &[u64], order: u8) -> Result<()> {
        let root = match &self.layout {
            RootLayout::Forest { lookup, .. } => {
                *lookup.get(&key).ok_or(Error::UnknownRoot(key))?
            }
            RootLayout::Dense { .. } => {
                return Err(Error::InvalidState(
                    "insert_sorted_into_root called on a dense tree".into(),
                ))
            }
        };

        self.insert_codes(codes, order, |_, _| Ok(root))
    }

    fn insert_codes(
        &mut self,
        codes: &[u64],
        order: u8,
        root_of: impl Fn(&Self, Morton3) -> Result<NodeId>,
    ) -> Result<()> {
        self.check_building("insert")?;
        validate_order(order)?;
        check_sorted(codes, "octree bulk insert")?;

        // Refinement reseeds from this pass only, so codes already under a root could not be carried into its children.
        let roots = codes
            .iter()
            .map(|&raw| root_of(self, Morton3(raw)))
            .collect::<Result<Vec<_>>>()?;
        for &root in roots.iter().dedup() {
            let node = &self.nodes[root.index()];
            if !node.is_leaf() || node.occupancy != Occupancy::empty(self.mode) {
                return Err(Error::InvalidState(format!(
                    "{:?} already holds codes from an earlier bulk insert",
                    root
                )));
            }
        }

        let n_ref = self.n_ref;
        for (p, (&raw, &root)) in codes.iter().zip(&roots).enumerate() {
            let code = Morton3(raw);
            let mut current = root;
            let mut level = 0;
            while self.nodes[current.index()].occupancy.held(n_ref) + 1 > n_ref {
                if level >= order {
                    // Maximum depth: the code is dumped here even though the leaf is over capacity.
                    break;
                }
                level += 1;
                let first_child = match self.nodes[current.index()].first_child {
                    Some(first) => first,
                    None => self.refine(current, codes, p, level, order)?,
                };
                current = first_child.offset(code.child_index(level, order));
            }
            self.max_level = self.max_level.max(level);

            let node = &mut self.nodes[current.index()];
            node.occupancy = match (self.mode, node.occupancy) {
                (LeafMode::Index, _) => Occupancy::Code(Some(code)),
                (LeafMode::Counting, Occupancy::Count(n)) => Occupancy::Count(n + 1),
                (LeafMode::Counting, other) => {
                    return Err(Error::InvalidState(format!(
                        "counting-mode leaf holds {:?}",
                        other
                    )))
                }
            };
        }

        Ok(())
    }

    /// Splits the leaf `parent` (which sits at `child_level - 1`) and reseeds its new children from the codes placed just before
    /// `codes[p]`. Because the input is sorted, every code the parent held is among the last `n_ref` codes.
    fn refine(
        &mut self,
        parent: NodeId,
        codes: &[u64],
        p: usize,
        child_level: u8,
        order: u8,
    ) -> Result<NodeId> {
        let (domain, file) = {
            let node = &self.nodes[parent.index()];
            (node.domain, node.file)
        };
        let first = next_node_id(self.nodes.len(), 8)?;
        for _ in 0..8 {
            self.nodes
                .push(Node::new(child_level, domain, file, self.mode));
        }
        let parent_node = &mut self.nodes[parent.index()];
        parent_node.first_child = Some(first);
        parent_node.occupancy = Occupancy::Refined;

        let window = p.min(self.n_ref as usize);
        let parent_prefix = Morton3(codes[p]).prefix(child_level - 1, order);
        for &previous in &codes[p - window..p] {
            let previous = Morton3(previous);
            if previous.prefix(child_level - 1, order) != parent_prefix {
                continue;
            }
            let child = &mut self.nodes[first.offset(previous.child_index(child_level, order)).index()];
            child.occupancy = match child.occupancy {
                Occupancy::Count(n) => Occupancy::Count(n + 1),
                _ => Occupancy::Code(Some(previous)),
            };
        }
        tracing::trace!(?parent, child_level, "refined node");

        Ok(first)
    }

    /// Visits every allocated node in traversal order: roots in `roots()` order, each subtree in preorder with children in
    /// `CHILD_VISIT_ORDER`. This is the order that `finalize` linearizes and that serialization writes.
    pub fn visit_preorder(&self, mut visitor: impl FnMut(NodeId, &Node)) {
        let mut stack: Vec<NodeId> = self.roots();
        stack.reverse();
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.index()];
            visitor(id, node);
            if let Some(children) = node.children() {
                stack.extend(children.iter().rev());
            }
        }
    }

    /// Linearizes the tree: every node gets a `domain_ind` equal to its position in traversal order and the domain tag
    /// `domain_id`. No further inserts are allowed afterwards.
    pub fn finalize(&mut self, domain_id: i64) -> Result<()> {
        self.check_building("finalize")?;

        let mut linear = Vec::with_capacity(self.nodes.len());
        let mut max_level = 0;
        self.visit_preorder(|id, node| {
            linear.push(id);
            max_level = max_level.max(node.level);
        });
        if linear.len() != self.nodes.len() {
            return Err(Error::NodeCountMismatch {
                visited: linear.len(),
                expected: self.nodes.len(),
            });
        }

        for (domain_ind, id) in linear.iter().enumerate() {
            let node = &mut self.nodes[id.index()];
            node.domain_ind = Some(domain_ind);
            node.domain = domain_id;
        }
        self.linear = linear;
        self.max_level = max_level;
        self.domain_id = Some(domain_id);
        self.state = TreeState::Finalized;
        tracing::debug!(
            num_nodes = self.nodes.len(),
            max_level,
            domain_id,
            "finalized octree"
        );

        Ok(())
    }

    /// Releases all nodes. Calling this more than once is a no-op. Returns whether anything was released.
    pub fn teardown(&mut self) -> bool {
        if self.state == TreeState::Released {
            return false;
        }

        let num_nodes = self.nodes.len();
        self.nodes = Vec::new();
        self.linear = Vec::new();
        match &mut self.layout {
            RootLayout::Dense { roots, .. } => roots.iter_mut().for_each(|r| *r = None),
            RootLayout::Forest { roots, lookup } => {
                roots.clear();
                lookup.clear();
            }
        }
        self.state = TreeState::Released;
        tracing::trace!(num_nodes, "released octree");

        true
    }

    /// Iterates a summary of every node in linearized order. The returned iterator is independent of any previous one, so
    /// iteration can be restarted by calling this again.
    pub fn iter(&self) -> Result<NodeIter<'_>> {
        if self.state != TreeState::Finalized {
            return Err(Error::InvalidState(
                "octree must be finalized before iteration".into(),
            ));
        }

        Ok(NodeIter {
            tree: self,
            linear: self.linear.iter(),
        })
    }

    /// The leaf containing `code` (at `order`), descending from the dense root selected by the code's high bits.
    pub fn find_leaf(&self, code: u64, order: u8) -> Option<NodeId> {
        let code = Morton3(code);
        let root = self.dense_root(Morton3(code.root_bits(order)).grid())?;

        Some(self.descend(root, code, order))
    }

    /// The leaf containing `code` (at `order`) below the forest root named by `key`.
    pub fn find_leaf_in_root(&self, key: u64, code: u64, order: u8) -> Option<NodeId> {
        match &self.layout {
            RootLayout::Forest { lookup, .. } => lookup
                .get(&key)
                .map(|&root| self.descend(root, Morton3(code), order)),
            RootLayout::Dense { .. } => None,
        }
    }

    fn descend(&self, root: NodeId, code: Morton3, order: u8) -> NodeId {
        let mut current = root;
        let mut level = 0;
        while let Some(first) = self.nodes[current.index()].first_child {
            if level >= order {
                break;
            }
            level += 1;
            current = first.offset(code.child_index(level, order));
        }

        current
    }

    /// One entry per node in traversal order: `true` iff the node has children.
    pub fn children_present_bits(&self) -> Vec<bool> {
        let mut bits = Vec::with_capacity(self.nodes.len());
        self.visit_preorder(|_, node| bits.push(!node.is_leaf()));

        bits
    }

    /// The level of every leaf in traversal order.
    pub fn leaf_depths(&self) -> Vec<u8> {
        let mut depths = Vec::new();
        self.visit_preorder(|_, node| {
            if node.is_leaf() {
                depths.push(node.level);
            }
        });

        depths
    }

    /// Splits a leaf without any particle data, as done when replaying a serialized topology.
    pub(crate) fn split_leaf(&mut self, id: NodeId) -> Result<NodeId> {
        self.check_building("split_leaf")?;
        let node = &self.nodes[id.index()];
        if !node.is_leaf() {
            return Err(Error::InvalidState(format!("{:?} is already split", id)));
        }
        let (level, domain, file) = (node.level + 1, node.domain, node.file);

        let first = next_node_id(self.nodes.len(), 8)?;
        for _ in 0..8 {
            self.nodes.push(Node::new(level, domain, file, self.mode));
        }
        let node = &mut self.nodes[id.index()];
        node.first_child = Some(first);
        node.occupancy = Occupancy::Refined;

        Ok(first)
    }

    fn push_root(&mut self) -> Result<NodeId> {
        let id = next_node_id(self.nodes.len(), 1)?;
        self.nodes
            .push(Node::new(0, UNASSIGNED_DOMAIN, self.file_tag, self.mode));

        Ok(id)
    }

    fn dense_root(&self, ijk: [u32; 3]) -> Option<NodeId> {
        match &self.layout {
            RootLayout::Dense { dims, roots } => {
                if (0..3).any(|a| ijk[a] >= dims[a]) {
                    return None;
                }

                roots[flat_index(ijk, *dims)]
            }
            RootLayout::Forest { .. } => None,
        }
    }

    fn dense_dims(&self, op: &str) -> Result<[u32; 3]> {
        self.dims()
            .ok_or_else(|| Error::InvalidState(format!("{} requires a dense root grid", op)))
    }

    fn check_building(&self, op: &str) -> Result<()> {
        match self.state {
            TreeState::Building => Ok(()),
            TreeState::Finalized => Err(Error::InvalidState(format!(
                "{} called on a finalized octree",
                op
            ))),
            TreeState::Released => Err(Error::InvalidState(format!(
                "{} called on a released octree",
                op
            ))),
        }
    }
}

/// The id of the first of `count` nodes about to be pushed onto an arena of `len` nodes. Fails if the last of them would not be
/// addressable by a `NodeId`.
fn next_node_id(len: usize, count: usize) -> Result<NodeId> {
    let full = |_| Error::CapacityExceeded(len);
    u32::try_from(len + count - 1).map_err(full)?;

    u32::try_from(len).map(NodeId).map_err(full)
}

/// What `Octree::iter` yields for each node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodeSummary {
    pub id: NodeId,
    pub counter: u64,
    pub domain: i64,
    pub file: Option<FileId>,
    pub level: u8,
}

pub struct NodeIter<'a> {
    tree: &'a Octree,
    linear: std::slice::Iter<'a, NodeId>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = NodeSummary;

    fn next(&mut self) -> Option<NodeSummary> {
        let &id = self.linear.next()?;
        let node = &self.tree.nodes[id.index()];

        Some(NodeSummary {
            id,
            counter: node.occupancy.counter(self.tree.n_ref),
            domain: node.domain,
            file: node.file,
            level: node.level,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.linear.size_hint()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
