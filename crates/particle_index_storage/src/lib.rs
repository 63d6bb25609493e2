#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! Spatial indexing for large, multi-file particle datasets.
//!
//! The main types are:
//!   - `Octree`: an adaptive octree over Morton-sorted codes, with either a dense grid of roots or a forest of keyed roots
//!   - `BitmapIndex`: a coarse/fine bitmask index recording which files have particles where
//!   - `ForestBuilder`: builds (and caches) the forest a query needs from each file
//!
//! Queries are expressed with a `Selector`, and particles are read through a `ParticleSource`.

pub mod bitmask_index;
pub mod bitset;
pub mod caching;
pub mod compression;
pub mod config;
pub mod forest;
pub mod io;
pub mod octree;
pub mod selector;

pub use bitmask_index::*;
pub use bitset::*;
pub use caching::*;
pub use compression::*;
pub use config::*;
pub use forest::*;
pub use io::*;
pub use octree::*;
pub use selector::*;

// Hash types to use for small keys like Morton codes and file IDs.
pub type SmallKeyHashMap<K, V> = ahash::AHashMap<K, V>;
pub type SmallKeyBuildHasher = ahash::RandomState;

pub mod prelude {
    pub use super::{
        AllSelector, BitmapIndex, BoxSelector, CacheKeyPolicy, Forest, ForestBuilder,
        ForestConfig, ForestMeta, ForestRecord, InMemoryParticleSource, IndexConfig, LeafMode,
        Occupancy, Octree, ParticleSource, PositionBatch, ScalarType, Selector, SparseBitset,
    };

    pub use particle_index_core::prelude::*;
}
