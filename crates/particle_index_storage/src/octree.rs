//! Adaptive octrees over Morton-sorted codes.
//!
//! An `Octree` either has a dense grid of roots (one per cell of a regular lattice, used for whole-domain indices) or is a
//! forest of roots named by key (used for per-query trees, where each root is one coarse cell). Both are built the same way:
//!
//! ```
//! use particle_index_storage::prelude::*;
//!
//! let mut tree = Octree::new_dense([1, 1, 1], 1)?;
//! tree.allocate_roots()?;
//! tree.insert_sorted(&[2, 2, 2, 9, 9, 20], 3)?;
//! tree.finalize(0)?;
//!
//! let leaf = tree.find_leaf(9, 3).unwrap();
//! assert_eq!(tree.node(leaf).unwrap().occupancy().counter(1), 9);
//! # Ok::<(), particle_index_core::Error>(())
//! ```

mod node;
mod tree;

pub mod serialization;

pub use node::{LeafMode, Node, NodeId, Occupancy};
pub use serialization::{ForestMeta, ForestRecord};
pub use tree::{NodeIter, NodeSummary, Octree, RootLayout, UNASSIGNED_DOMAIN};
