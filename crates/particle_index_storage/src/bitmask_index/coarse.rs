use crate::{bitset::SparseBitset, SmallKeyHashMap};

use particle_index_core::prelude::*;

use std::collections::{btree_map, BTreeMap};

/// What the coarse grid knows about one cell.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CoarseCell {
    /// The first file that registered a particle in this cell. Never changes once set.
    pub owner: Option<FileId>,
    /// Particles registered in this cell, over all files.
    pub count: u64,
}

/// The `2^order`-per-axis grid over the whole domain, recording which files touch which cells.
///
/// Cells are addressed by their Morton code. Only touched cells are stored.
#[derive(Clone, Debug)]
pub struct CoarseGrid {
    order: u8,
    cells: SmallKeyHashMap<u64, CoarseCell>,
    file_masks: BTreeMap<FileId, SparseBitset>,
    touched: SparseBitset,
}

impl CoarseGrid {
    pub fn new(order: u8) -> Self {
        Self {
            order,
            cells: SmallKeyHashMap::default(),
            file_masks: BTreeMap::new(),
            touched: SparseBitset::new(),
        }
    }

    #[inline]
    pub fn order(&self) -> u8 {
        self.order
    }

    #[inline]
    pub fn dims(&self) -> [u32; 3] {
        [1 << self.order; 3]
    }

    /// Records one particle of `file` in cell `code`.
    pub fn register(&mut self, file: FileId, code: Morton3) {
        let cell = self.cells.entry(code.0).or_default();
        cell.count += 1;
        if cell.owner.is_none() {
            cell.owner = Some(file);
        }
        self.file_masks.entry(file).or_default().set(code.0);
        self.touched.set(code.0);
    }

    #[inline]
    pub fn cell(&self, code: Morton3) -> Option<&CoarseCell> {
        self.cells.get(&code.0)
    }

    #[inline]
    pub fn owner(&self, code: Morton3) -> Option<FileId> {
        self.cell(code).and_then(|c| c.owner)
    }

    #[inline]
    pub fn count(&self, code: Morton3) -> u64 {
        self.cell(code).map_or(0, |c| c.count)
    }

    /// The cells `file` has registered particles in.
    #[inline]
    pub fn file_mask(&self, file: FileId) -> Option<&SparseBitset> {
        self.file_masks.get(&file)
    }

    /// Every file's mask, in increasing file order.
    #[inline]
    pub fn file_masks(&self) -> btree_map::Iter<'_, FileId, SparseBitset> {
        self.file_masks.iter()
    }

    /// The union of all file masks.
    #[inline]
    pub fn touched(&self) -> &SparseBitset {
        &self.touched
    }

    /// Cells touched by more than one file.
    pub fn collision_mask(&self) -> SparseBitset {
        let mut seen = SparseBitset::new();
        let mut shared = SparseBitset::new();
        for mask in self.file_masks.values() {
            shared.union_with(&seen.logical_and(mask));
            seen.union_with(mask);
        }

        shared
    }

    /// Files touching any cell of `mask`.
    pub fn files_touching(&self, mask: &SparseBitset) -> Vec<FileId> {
        self.file_masks
            .iter()
            .filter(|(_, file_mask)| file_mask.intersects(mask))
            .map(|(&file, _)| file)
            .collect()
    }
}
