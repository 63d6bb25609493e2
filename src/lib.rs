//! Spatial indexing for large, multi-file particle datasets.
//!
//! This library is organized into two crates:
//! - **core**: Morton codes, domain bounds, and the shared error type
//! - **storage**: adaptive octrees, the coarse/fine bitmask index, selectors, particle sources, and the per-query forest
//!   builder with its compressed tree cache
//!
//! A typical session registers every file of a dataset with a `BitmapIndex` (a coarse pass, then a fine pass over the
//! coarse cells that more than one file touches), and then asks a `ForestBuilder` to plan the forests a `Selector` needs.

pub use particle_index_core as core;
pub use particle_index_storage as storage;

pub mod prelude {
    pub use super::core::prelude::*;
    pub use super::storage::prelude::*;
}
