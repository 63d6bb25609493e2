//! Configuration of the bitmask index and of forest construction.
//!
//! Both structs are plain serde data with sensible defaults, so they can be embedded in whatever configuration format an
//! application uses. `validate` is called by the constructors that consume them.

use particle_index_core::{prelude::*, Error, Result};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct IndexConfig {
    /// The whole dataset's domain.
    pub bounds: Bounds3,
    /// The coarse grid has `2^coarse_order` cells per axis.
    pub coarse_order: u8,
    /// Each coarse cell is divided into `2^fine_order` fine cells per axis.
    pub fine_order: u8,
    /// Wrap out-of-domain positions back into the domain instead of dropping them.
    pub periodic: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            bounds: Bounds3::unit(),
            coarse_order: 5,
            fine_order: 5,
            periodic: false,
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<()> {
        Bounds3::new(self.bounds.left_edge, self.bounds.right_edge)?;
        validate_order(self.coarse_order)?;
        validate_order(self.fine_order)?;
        if self.coarse_order + self.fine_order > MAX_ORDER {
            return Err(Error::InvalidConfig(format!(
                "coarse order {} plus fine order {} exceeds {}",
                self.coarse_order, self.fine_order, MAX_ORDER
            )));
        }

        Ok(())
    }

    #[inline]
    pub fn coarse_dims(&self) -> [u32; 3] {
        [1 << self.coarse_order; 3]
    }
}

/// What identifies a cached forest.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum CacheKeyPolicy {
    /// One cached forest per file. A second query for the same file reuses the forest built for the first, even if the queries
    /// cover different regions.
    FileOnly,
    /// One cached forest per (file, query region) pair.
    FileAndQuery,
}

impl Default for CacheKeyPolicy {
    fn default() -> Self {
        CacheKeyPolicy::FileAndQuery
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Leaf capacity. 1 selects index mode.
    pub n_ref: u64,
    /// Multiplier on how many fine sub-cells one tree level spans. Carried through to the persisted record.
    pub over_refine: u32,
    /// Resolution at which positions are encoded relative to their coarse cell.
    pub forest_order: u8,
    /// Coarse cells of padding around a query region.
    pub ghost_zone: u32,
    /// How many compressed forests the builder keeps.
    pub cache_capacity: usize,
    pub cache_key_policy: CacheKeyPolicy,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_ref: 64,
            over_refine: 1,
            forest_order: 20,
            ghost_zone: 0,
            cache_capacity: 1,
            cache_key_policy: CacheKeyPolicy::default(),
        }
    }
}

impl ForestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_ref == 0 {
            return Err(Error::InvalidConfig("n_ref must be at least 1".into()));
        }
        if self.over_refine == 0 {
            return Err(Error::InvalidConfig(
                "over_refine must be at least 1".into(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(Error::InvalidConfig(
                "cache_capacity must be at least 1".into(),
            ));
        }
        validate_order(self.forest_order)?;

        Ok(())
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(IndexConfig::default().validate().is_ok());
        assert!(ForestConfig::default().validate().is_ok());
        assert_eq!(IndexConfig::default().coarse_dims(), [32; 3]);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let config = IndexConfig {
            coarse_order: 12,
            fine_order: 10,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = IndexConfig {
            coarse_order: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ForestConfig {
            n_ref: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ForestConfig {
            forest_order: 22,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_bincode() {
        let bytes = bincode::serialize(&ForestConfig {
            n_ref: 8,
            ..Default::default()
        })
        .unwrap();
        let config: ForestConfig = bincode::deserialize(&bytes).unwrap();

        assert_eq!(config.n_ref, 8);
        assert_eq!(config.cache_key_policy, CacheKeyPolicy::FileAndQuery);
    }
}
