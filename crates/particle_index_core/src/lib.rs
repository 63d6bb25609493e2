//! The core data types for spatially indexing particle datasets:
//! - `Morton3`: a Z-order code for a 3D lattice coordinate at some resolution order
//! - `Bounds3`: a continuous, axis-aligned domain box that positions are quantized against
//! - `Error`: the error type shared by the whole workspace

pub mod bounds;
pub mod error;
pub mod morton;

pub use bounds::{flat_index, iter_cell_range, iter_cells, Bounds3};
pub use error::{check_sorted, Error, Result};
pub use morton::{child_offset, validate_order, Morton3, CHILD_VISIT_ORDER, MAX_ORDER};

/// Identifies one data file of a multi-file dataset.
pub type FileId = u32;

pub mod prelude {
    pub use super::{
        child_offset, flat_index, iter_cell_range, iter_cells, validate_order, Bounds3, FileId,
        Morton3, CHILD_VISIT_ORDER, MAX_ORDER,
    };
}
