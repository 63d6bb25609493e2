use crate::{Error, Result};

use itertools::iproduct;
use serde::{Deserialize, Serialize};

/// An axis-aligned, half-open box `[left_edge, right_edge)` in continuous 3D space. This is the domain that particle positions
/// are quantized against, and also the shape of every coarse cell.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Bounds3 {
    pub left_edge: [f64; 3],
    pub right_edge: [f64; 3],
}

impl Bounds3 {
    /// Fails unless every edge is finite and `left_edge < right_edge` on every axis.
    pub fn new(left_edge: [f64; 3], right_edge: [f64; 3]) -> Result<Self> {
        for axis in 0..3 {
            let (l, r) = (left_edge[axis], right_edge[axis]);
            if !(l.is_finite() && r.is_finite() && l < r) {
                return Err(Error::InvalidConfig(format!(
                    "degenerate bounds on axis {}: [{}, {})",
                    axis, l, r
                )));
            }
        }

        Ok(Self {
            left_edge,
            right_edge,
        })
    }

    /// The unit cube `[0, 1)^3`.
    pub fn unit() -> Self {
        Self {
            left_edge: [0.0; 3],
            right_edge: [1.0; 3],
        }
    }

    #[inline]
    pub fn width(&self) -> [f64; 3] {
        [
            self.right_edge[0] - self.left_edge[0],
            self.right_edge[1] - self.left_edge[1],
            self.right_edge[2] - self.left_edge[2],
        ]
    }

    #[inline]
    pub fn contains(&self, p: [f64; 3]) -> bool {
        (0..3).all(|a| p[a] >= self.left_edge[a] && p[a] < self.right_edge[a])
    }

    /// `true` iff the closed boxes share any point.
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        (0..3).all(|a| {
            self.left_edge[a] <= other.right_edge[a] && other.left_edge[a] <= self.right_edge[a]
        })
    }

    /// Maps `p` into the box as if the domain were periodic on every axis.
    #[inline]
    pub fn wrap_periodic(&self, p: [f64; 3]) -> [f64; 3] {
        let w = self.width();
        let mut out = p;
        for a in 0..3 {
            out[a] = (p[a] - self.left_edge[a]).rem_euclid(w[a]) + self.left_edge[a];
            // rem_euclid can round up to exactly the width.
            if out[a] >= self.right_edge[a] {
                out[a] = self.left_edge[a];
            }
        }

        out
    }

    /// The lattice cell containing `p` when this box is divided into `dims` cells, or `None` if `p` is outside.
    #[inline]
    pub fn cell_of(&self, p: [f64; 3], dims: [u32; 3]) -> Option<[u32; 3]> {
        if !self.contains(p) {
            return None;
        }

        let w = self.width();
        let mut ijk = [0; 3];
        for a in 0..3 {
            let n = dims[a];
            let i = ((p[a] - self.left_edge[a]) / w[a] * f64::from(n)).floor() as u32;
            ijk[a] = i.min(n - 1);
        }

        Some(ijk)
    }

    /// Quantizes `p` to the `2^order` lattice spanning this box.
    #[inline]
    pub fn quantize(&self, p: [f64; 3], order: u8) -> Option<[u32; 3]> {
        let n = 1u32 << order;

        self.cell_of(p, [n; 3])
    }

    /// The inclusive range of lattice cells (of a `dims` lattice) that overlap `other`, clamped to the lattice. `None` if
    /// `other` does not overlap this box at all.
    pub fn cell_range(&self, other: &Self, dims: [u32; 3]) -> Option<([u32; 3], [u32; 3])> {
        if !self.overlaps(other) {
            return None;
        }

        let w = self.width();
        let mut lo = [0; 3];
        let mut hi = [0; 3];
        for a in 0..3 {
            let n = f64::from(dims[a]);
            let to_cell = |x: f64| ((x - self.left_edge[a]) / w[a] * n).floor();
            lo[a] = to_cell(other.left_edge[a]).min(n - 1.0).max(0.0) as u32;
            hi[a] = to_cell(other.right_edge[a]).min(n - 1.0).max(0.0) as u32;
        }

        Some((lo, hi))
    }
}

/// Flattens lattice coordinates in x-major order (x slowest, z fastest).
#[inline]
pub fn flat_index(ijk: [u32; 3], dims: [u32; 3]) -> usize {
    (ijk[0] as usize * dims[1] as usize + ijk[1] as usize) * dims[2] as usize + ijk[2] as usize
}

/// Iterates every cell of a `dims` lattice in x-major order, matching `flat_index`.
pub fn iter_cells(dims: [u32; 3]) -> impl Iterator<Item = [u32; 3]> {
    iproduct!(0..dims[0], 0..dims[1], 0..dims[2]).map(|(i, j, k)| [i, j, k])
}

/// Iterates the cells in the inclusive range `[lo, hi]` in x-major order.
pub fn iter_cell_range(lo: [u32; 3], hi: [u32; 3]) -> impl Iterator<Item = [u32; 3]> {
    iproduct!(lo[0]..=hi[0], lo[1]..=hi[1], lo[2]..=hi[2]).map(|(i, j, k)| [i, j, k])
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn degenerate_bounds_are_rejected() {
        assert!(Bounds3::new([0.0; 3], [1.0; 3]).is_ok());
        assert!(Bounds3::new([0.0; 3], [1.0, 0.0, 1.0]).is_err());
        assert!(Bounds3::new([0.0; 3], [1.0, f64::INFINITY, 1.0]).is_err());
    }

    #[test]
    fn cell_of_uses_half_open_cells() {
        let b = Bounds3::new([-1.0; 3], [1.0; 3]).unwrap();

        assert_eq!(b.cell_of([-1.0, -1.0, -1.0], [4; 3]), Some([0, 0, 0]));
        assert_eq!(b.cell_of([-0.5, 0.0, 0.99], [4; 3]), Some([1, 2, 3]));
        assert_eq!(b.cell_of([1.0, 0.0, 0.0], [4; 3]), None);
    }

    #[test]
    fn periodic_wrap_lands_inside() {
        let b = Bounds3::new([0.0; 3], [10.0; 3]).unwrap();

        assert_eq!(b.wrap_periodic([-1.0, 12.5, 10.0]), [9.0, 2.5, 0.0]);
        assert!(b.contains(b.wrap_periodic([-1e-17, 5.0, 5.0])));
    }

    #[test]
    fn cell_range_clamps_to_the_lattice() {
        let b = Bounds3::unit();
        let query = Bounds3::new([0.3, -1.0, 0.9], [0.6, 0.1, 3.0]).unwrap();

        assert_eq!(b.cell_range(&query, [4; 3]), Some(([1, 0, 3], [2, 0, 3])));

        let far = Bounds3::new([2.0; 3], [3.0; 3]).unwrap();
        assert_eq!(b.cell_range(&far, [4; 3]), None);
    }

    #[test]
    fn cell_range_starts_in_the_cell_of_its_left_edge() {
        let b = Bounds3::new([1.987_654_321; 3], [7.005_131_7; 3]).unwrap();
        let dims = [1 << 8; 3];
        for i in 0..5000 {
            let t = f64::from(i) / 5000.0;
            let p = [
                b.left_edge[0] + t * 5.017_477_379,
                b.left_edge[1] + (1.0 - t) * 5.017_477_379,
                b.left_edge[2] + (t * 7.0).fract() * 5.017_477_379,
            ];
            if !b.contains(p) {
                continue;
            }
            let region = Bounds3::new(p, b.right_edge).unwrap();

            assert_eq!(
                b.cell_range(&region, dims).map(|(lo, _)| lo),
                b.cell_of(p, dims),
                "{:?}",
                p
            );
        }
    }

    #[test]
    fn cells_iterate_x_major() {
        let dims = [2, 3, 2];
        let cells: Vec<_> = iter_cells(dims).collect();

        assert_eq!(cells.len(), 12);
        assert_eq!(cells[1], [0, 0, 1]);
        for (i, &c) in cells.iter().enumerate() {
            assert_eq!(flat_index(c, dims), i);
        }
    }
}
