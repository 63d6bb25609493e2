//! Spatial predicates that queries are expressed with.
//!
//! The index never looks inside a `Selector`; it only consumes the bitsets of Morton codes that the selector produces, first over
//! the coarse grid and then, for a single coarse cell, over that cell's fine grid.

use crate::bitset::SparseBitset;

use particle_index_core::prelude::*;

use auto_impl::auto_impl;

#[auto_impl(&, Box)]
pub trait Selector {
    /// The coarse Morton codes (at `coarse_order` over `geometry`) of every coarse cell the selection may touch, padded by
    /// `ghost_zone` cells in every direction.
    fn recursive_morton_mask(
        &self,
        geometry: &Bounds3,
        coarse_order: u8,
        ghost_zone: u32,
    ) -> SparseBitset;

    /// The fine Morton codes (at `fine_order` within the coarse cell `coarse_code`) that the selection may touch. `None` means
    /// the whole coarse cell is selected.
    fn fine_mask(
        &self,
        geometry: &Bounds3,
        coarse_order: u8,
        coarse_code: u64,
        fine_order: u8,
    ) -> Option<SparseBitset>;
}

/// Selects everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllSelector;

impl Selector for AllSelector {
    fn recursive_morton_mask(&self, _geometry: &Bounds3, coarse_order: u8, _ghost_zone: u32) -> SparseBitset {
        iter_cells([1 << coarse_order; 3])
            .map(|ijk| Morton3::from_grid(ijk).0)
            .collect()
    }

    fn fine_mask(&self, _: &Bounds3, _: u8, _: u64, _: u8) -> Option<SparseBitset> {
        None
    }
}

/// Selects every cell that overlaps an axis-aligned box. Cells that only touch the box's boundary are included.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxSelector {
    pub region: Bounds3,
}

impl BoxSelector {
    pub fn new(region: Bounds3) -> Self {
        Self { region }
    }
}

impl Selector for BoxSelector {
    fn recursive_morton_mask(&self, geometry: &Bounds3, coarse_order: u8, ghost_zone: u32) -> SparseBitset {
        let n = 1u32 << coarse_order;
        let (mut lo, mut hi) = match geometry.cell_range(&self.region, [n; 3]) {
            Some(range) => range,
            None => return SparseBitset::new(),
        };
        for a in 0..3 {
            lo[a] = lo[a].saturating_sub(ghost_zone);
            hi[a] = hi[a].saturating_add(ghost_zone).min(n - 1);
        }

        iter_cell_range(lo, hi)
            .map(|ijk| Morton3::from_grid(ijk).0)
            .collect()
    }

    fn fine_mask(
        &self,
        geometry: &Bounds3,
        coarse_order: u8,
        coarse_code: u64,
        fine_order: u8,
    ) -> Option<SparseBitset> {
        // Work on the full lattice at `coarse_order + fine_order`, which is how positions are quantized, and only then
        // restrict to this coarse cell's block of fine cells.
        let n = 1u32 << (coarse_order + fine_order);
        let (lo, hi) = match geometry.cell_range(&self.region, [n; 3]) {
            Some(range) => range,
            None => return Some(SparseBitset::new()),
        };
        let cell = Morton3(coarse_code).grid();
        let last = (1u32 << fine_order) - 1;

        let mut fine_lo = [0; 3];
        let mut fine_hi = [0; 3];
        for a in 0..3 {
            let block_lo = cell[a] << fine_order;
            let block_hi = block_lo + last;
            if hi[a] < block_lo || lo[a] > block_hi {
                return Some(SparseBitset::new());
            }
            fine_lo[a] = lo[a].max(block_lo) - block_lo;
            fine_hi[a] = hi[a].min(block_hi) - block_lo;
        }
        if fine_lo == [0; 3] && fine_hi == [last; 3] {
            return None;
        }

        Some(
            iter_cell_range(fine_lo, fine_hi)
                .map(|ijk| Morton3::from_grid(ijk).0)
                .collect(),
        )
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
