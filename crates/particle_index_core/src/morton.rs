use crate::{bounds::Bounds3, Error, Result};

use morton_encoding::{morton_decode, morton_encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The finest supported resolution order. Three interleaved 21-bit coordinates fill 63 bits of a `u64`.
pub const MAX_ORDER: u8 = 21;

/// The order in which the eight children of a node are visited by insertion, finalization, save and
/// load. A child's index is `x << 2 | y << 1 | z`, so x is the most significant bit of each octet;
/// visiting indices in increasing order is therefore x-major, then y, then z. Serialized trees are
/// only portable between implementations that agree on this constant.
pub const CHILD_VISIT_ORDER: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

/// The offset (in units of the child edge length) of the child with the given index.
#[inline]
pub fn child_offset(child_index: u8) -> [u32; 3] {
    [
        u32::from((child_index >> 2) & 1),
        u32::from((child_index >> 1) & 1),
        u32::from(child_index & 1),
    ]
}

/// Returns `order` if it is a usable resolution order, i.e. `1 <= order <= MAX_ORDER`.
pub fn validate_order(order: u8) -> Result<u8> {
    if order == 0 || order > MAX_ORDER {
        return Err(Error::InvalidConfig(format!(
            "resolution order must be in 1..={}, got {}",
            MAX_ORDER, order
        )));
    }

    Ok(order)
}

/// A Morton-encoded 3D lattice coordinate at some resolution `order`, using `3 * order` bits.
///
/// Bits are interleaved as `...x1y1z1x0y0z0`, so numeric order of codes is the Z-order curve with x
/// varying slowest within each octet.
///
/// <https://en.wikipedia.org/wiki/Z-order_curve>
#[derive(Clone, Copy, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Morton3(pub u64);

impl fmt::Debug for Morton3 {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {:b}", self.0, self.0)
    }
}

impl Morton3 {
    /// Interleaves the lattice coordinate `ijk`. Every component must fit in `MAX_ORDER` bits.
    #[inline]
    pub fn from_grid(ijk: [u32; 3]) -> Self {
        debug_assert!(ijk.iter().all(|&c| c < (1 << MAX_ORDER)));
        let wide: u128 = morton_encode(ijk);

        Self(wide as u64)
    }

    /// The inverse of `from_grid`.
    #[inline]
    pub fn grid(self) -> [u32; 3] {
        morton_decode(u128::from(self.0))
    }

    /// Encodes `position` within `bounds` at `order`. Returns `None` for positions outside of `bounds`.
    #[inline]
    pub fn encode_position(position: [f64; 3], bounds: &Bounds3, order: u8) -> Option<Self> {
        bounds.quantize(position, order).map(Self::from_grid)
    }

    /// The 3-bit child index selected by this code when descending into `level` (`1 <= level <= order`).
    #[inline]
    pub fn child_index(self, level: u8, order: u8) -> u8 {
        debug_assert!(level >= 1 && level <= order);

        ((self.0 >> (3 * u32::from(order - level))) & 0b111) as u8
    }

    /// The address of the node containing this code at `level`. Two codes share an ancestor at `level`
    /// iff their prefixes at `level` are equal.
    #[inline]
    pub fn prefix(self, level: u8, order: u8) -> u64 {
        self.0 >> (3 * u32::from(order - level))
    }

    /// The bits above the `3 * order` bits of resolution; these select a root in a dense root grid.
    #[inline]
    pub fn root_bits(self, order: u8) -> u64 {
        let shift = 3 * u32::from(order);
        if shift >= 64 {
            0
        } else {
            self.0 >> shift
        }
    }

    /// Appends a fine code of `fine_order` below this code.
    #[inline]
    pub fn concat(self, fine: Morton3, fine_order: u8) -> Self {
        Self((self.0 << (3 * u32::from(fine_order))) | fine.0)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
