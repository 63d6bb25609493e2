//! The persisted form of a finalized forest.
//!
//! Only the topology is kept: one bit per node in traversal order, set if the node has children. Bits are packed
//! least-significant first within a byte and bytes follow the traversal. Loading allocates the roots by key and replays the bits
//! through the same traversal, which yields an isomorphic tree without any of the particle data that built it.

use super::Octree;
use crate::bitset::Bitset8;

use particle_index_core::{Bounds3, Error, Result};

use serde::{Deserialize, Serialize};

/// The geometric context a forest was built in.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct ForestMeta {
    /// Dimensions of the coarse grid the root keys are drawn from.
    pub dims: [u32; 3],
    pub bounds: Bounds3,
    pub over_refine: u32,
}

impl ForestMeta {
    /// How many cells of the finest tree level span one coarse cell along each axis.
    pub fn zones_per_dim(&self, max_level: u8) -> u64 {
        u64::from(self.over_refine) << max_level
    }
}

/// The cache record of a finalized forest.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ForestRecord {
    pub dims: (i32, i32, i32),
    pub left_edge: (f64, f64, f64),
    pub right_edge: (f64, f64, f64),
    pub over_refine: i32,
    pub num_root: i32,
    pub octree: Vec<u8>,
    pub nocts: i64,
    pub keys: Vec<u64>,
    pub domain_id: i64,
}

impl ForestRecord {
    /// Captures the topology of the finalized forest `tree`.
    pub fn save(tree: &Octree, meta: &ForestMeta) -> Result<Self> {
        if !tree.is_finalized() {
            return Err(Error::InvalidState(
                "only a finalized octree can be saved".into(),
            ));
        }
        let domain_id = tree.domain_id().unwrap_or_default();
        let keys = tree.forest_keys();
        if tree.dims().is_some() {
            return Err(Error::InvalidState(
                "only forests can be saved as forest records".into(),
            ));
        }

        let bits = tree.children_present_bits();
        let octree = pack_bits(&bits);
        let [x, y, z] = meta.dims;
        let [lx, ly, lz] = meta.bounds.left_edge;
        let [rx, ry, rz] = meta.bounds.right_edge;

        tracing::trace!(nocts = bits.len(), num_root = keys.len(), "saved forest record");

        Ok(Self {
            dims: (x as i32, y as i32, z as i32),
            left_edge: (lx, ly, lz),
            right_edge: (rx, ry, rz),
            over_refine: meta.over_refine as i32,
            num_root: keys.len() as i32,
            octree,
            nocts: bits.len() as i64,
            keys,
            domain_id,
        })
    }

    /// Rebuilds the forest's topology. Node counters and file tags are not part of the record, so every leaf comes back empty.
    pub fn load(&self, n_ref: u64) -> Result<Octree> {
        if self.num_root < 0 || self.num_root as usize != self.keys.len() {
            return Err(Error::Integrity(format!(
                "record claims {} roots but lists {} keys",
                self.num_root,
                self.keys.len()
            )));
        }

        let mut tree = Octree::new_forest(n_ref)?;
        let mut stack = Vec::with_capacity(self.keys.len());
        for &key in &self.keys {
            stack.push(tree.allocate_forest_root(key)?);
        }
        // A repeated key hands back the root it already allocated.
        if tree.num_nodes() != self.keys.len() {
            return Err(Error::Integrity(format!(
                "record lists {} keys but only {} are distinct",
                self.keys.len(),
                tree.num_nodes()
            )));
        }
        stack.reverse();

        let total_bits = self.octree.len() * 8;
        let mut consumed = 0;
        while let Some(id) = stack.pop() {
            if consumed >= total_bits {
                return Err(Error::Integrity(format!(
                    "ran out of topology bits after {} nodes",
                    consumed
                )));
            }
            if bit_at(&self.octree, consumed) {
                let first = tree.split_leaf(id)?;
                stack.extend((0..8u8).rev().map(|i| first.offset(i)));
            }
            consumed += 1;
        }

        if consumed as i64 != self.nocts {
            return Err(Error::Integrity(format!(
                "replayed {} nodes but record claims {}",
                consumed, self.nocts
            )));
        }
        tree.finalize(self.domain_id)?;

        Ok(tree)
    }

    pub fn meta(&self) -> Result<ForestMeta> {
        let (x, y, z) = self.dims;
        if x < 0 || y < 0 || z < 0 || self.over_refine < 0 {
            return Err(Error::Integrity(format!(
                "negative dims {:?} or over-refine factor {}",
                self.dims, self.over_refine
            )));
        }
        let (lx, ly, lz) = self.left_edge;
        let (rx, ry, rz) = self.right_edge;
        let bounds = Bounds3::new([lx, ly, lz], [rx, ry, rz])
            .map_err(|e| Error::Integrity(e.to_string()))?;

        Ok(ForestMeta {
            dims: [x as u32, y as u32, z as u32],
            bounds,
            over_refine: self.over_refine as u32,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            let mut byte = Bitset8::default();
            for (i, &set) in chunk.iter().enumerate() {
                if set {
                    byte.set_bit(i as u8);
                }
            }

            byte.bits
        })
        .collect()
}

#[inline]
fn bit_at(bytes: &[u8], i: usize) -> bool {
    Bitset8 { bits: bytes[i / 8] }.bit_is_set((i % 8) as u8)
}

/// Used by tests in sibling modules to compare trees structurally.
#[cfg(test)]
pub(crate) fn topology(tree: &Octree) -> (Vec<u64>, Vec<bool>) {
    (tree.forest_keys(), tree.children_present_bits())
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
