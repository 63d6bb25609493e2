//! Per-query forests.
//!
//! A query against a `BitmapIndex` is answered one file at a time. The forest for a file has one root per coarse cell that the
//! file owns and the query selects, and holds every particle in those cells, whichever file it came from. Each cell's
//! particles are Morton-encoded relative to the cell and bulk inserted into that cell's root.
//!
//! Built forests are kept compressed in a bounded LRU cache, keyed by file and (by default) by a fingerprint of the query, so
//! repeating a query only replays the cached topology. A replayed forest has the same shape as the one that was built, but
//! its leaves are empty: counters and file tags are not part of the cache record.
//!
//! ```
//! use particle_index_storage::prelude::*;
//!
//! let files = vec![vec![[0.1, 0.1, 0.1], [0.12, 0.1, 0.1]], vec![[0.8, 0.8, 0.8]]];
//! let mut source = InMemoryParticleSource::default();
//! let mut index = BitmapIndex::new(IndexConfig::default())?;
//! for (file, positions) in files.iter().enumerate() {
//!     source.insert(file as FileId, PositionBatch::from_f64(positions));
//!     index.register_coarse(file as FileId, positions);
//! }
//!
//! let mut builder = ForestBuilder::new(ForestConfig::default())?;
//! let forests = builder.plan(&index, &source, &AllSelector)?;
//! assert_eq!(forests.len(), 2);
//! assert_eq!(forests[0].octree.forest_keys().len(), 1);
//! # Ok::<(), particle_index_core::Error>(())
//! ```

use crate::{
    bitmask_index::BitmapIndex,
    bitset::SparseBitset,
    caching::SmallKeyLruCache,
    compression::{BincodeCompression, Compressed, Compression, Lz4},
    config::{CacheKeyPolicy, ForestConfig},
    io::ParticleSource,
    octree::{ForestMeta, ForestRecord, Octree},
    selector::Selector,
    SmallKeyHashMap,
};

use particle_index_core::{prelude::*, Result};

use std::collections::BTreeSet;

/// Identifies a query by the coarse cells it selects and its ghost zone.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct QueryFingerprint(pub [u8; 32]);

impl QueryFingerprint {
    pub fn new(coarse_mask: &SparseBitset, ghost_zone: u32) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&ghost_zone.to_le_bytes());
        for (index, word) in coarse_mask.words() {
            hasher.update(&index.to_le_bytes());
            hasher.update(&word.to_le_bytes());
        }

        Self(*hasher.finalize().as_bytes())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CacheKey {
    pub file: FileId,
    /// `None` under `CacheKeyPolicy::FileOnly`.
    pub query: Option<QueryFingerprint>,
}

pub type ForestCompression = BincodeCompression<ForestRecord, Lz4>;

/// Compressed forest records, by key.
pub type TreeCache = SmallKeyLruCache<CacheKey, Compressed<ForestCompression>>;

/// A finalized forest, along with the context needed to interpret its root keys.
#[derive(Clone, Debug)]
pub struct Forest {
    pub file: FileId,
    pub octree: Octree,
    pub meta: ForestMeta,
    /// Whether this forest was replayed from the cache rather than built from particles.
    pub from_cache: bool,
}

pub struct ForestBuilder {
    config: ForestConfig,
    cache: TreeCache,
    compression: ForestCompression,
}

impl ForestBuilder {
    pub fn new(config: ForestConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            cache: TreeCache::with_capacity(config.cache_capacity),
            compression: BincodeCompression::new(Lz4::default()),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    #[inline]
    pub fn cache(&self) -> &TreeCache {
        &self.cache
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Builds forests for `selector` over every file that needs one: each file owning a selected coarse cell that some
    /// candidate file touches. Forests are returned in increasing file order.
    pub fn plan(
        &mut self,
        index: &BitmapIndex,
        source: &impl ParticleSource,
        selector: &impl Selector,
    ) -> Result<Vec<Forest>> {
        let ghost_zone = self.config.ghost_zone;
        let icfg = index.config();
        let mask = selector.recursive_morton_mask(&icfg.bounds, icfg.coarse_order, ghost_zone);

        let mut owners = BTreeSet::new();
        for file in index.identify_candidate_files(selector, ghost_zone) {
            if let Some(file_mask) = index.file_coarse_mask(file) {
                for coarse in file_mask.logical_and(&mask).iter_ones() {
                    owners.extend(index.coarse().owner(Morton3(coarse)));
                }
            }
        }
        tracing::info!(files = owners.len(), "planning forests");

        owners
            .into_iter()
            .map(|file| self.build_with_mask(index, source, file, &mask))
            .collect()
    }

    /// The forest of `file` for the cells `selector` selects.
    pub fn build(
        &mut self,
        index: &BitmapIndex,
        source: &impl ParticleSource,
        file: FileId,
        selector: &impl Selector,
    ) -> Result<Forest> {
        let icfg = index.config();
        let mask = selector.recursive_morton_mask(&icfg.bounds, icfg.coarse_order, self.config.ghost_zone);

        self.build_with_mask(index, source, file, &mask)
    }

    /// The forest of `file` for the coarse cells in `coarse_mask`.
    pub fn build_with_mask(
        &mut self,
        index: &BitmapIndex,
        source: &impl ParticleSource,
        file: FileId,
        coarse_mask: &SparseBitset,
    ) -> Result<Forest> {
        let key = self.cache_key(file, coarse_mask);
        if let Some(forest) = self.load_cached(&key, file) {
            return Ok(forest);
        }

        let (octree, meta) = self.build_uncached(index, source, file, coarse_mask)?;
        let record = ForestRecord::save(&octree, &meta)?;
        let compressed = self.compression.compress(&record)?;
        tracing::debug!(
            file,
            nocts = record.nocts,
            compressed_bytes = compressed.num_bytes(),
            "caching forest"
        );
        if let Some((evicted, _)) = self.cache.insert(key, compressed) {
            if evicted != key {
                tracing::debug!(file = evicted.file, "evicted cached forest");
            }
        }

        Ok(Forest {
            file,
            octree,
            meta,
            from_cache: false,
        })
    }

    fn cache_key(&self, file: FileId, coarse_mask: &SparseBitset) -> CacheKey {
        let query = match self.config.cache_key_policy {
            CacheKeyPolicy::FileOnly => None,
            CacheKeyPolicy::FileAndQuery => {
                Some(QueryFingerprint::new(coarse_mask, self.config.ghost_zone))
            }
        };

        CacheKey { file, query }
    }

    /// Replays a cached forest. A record that fails to decode or replay is dropped from the cache so that it gets rebuilt.
    fn load_cached(&mut self, key: &CacheKey, file: FileId) -> Option<Forest> {
        let n_ref = self.config.n_ref;
        let replayed = self.cache.get(key)?.decompress().and_then(|record| {
            let meta = record.meta()?;
            let octree = record.load(n_ref)?;

            Ok((octree, meta))
        });

        match replayed {
            Ok((octree, meta)) => {
                tracing::debug!(file, "forest cache hit");

                Some(Forest {
                    file,
                    octree,
                    meta,
                    from_cache: true,
                })
            }
            Err(e) => {
                tracing::warn!(file, error = %e, "dropping unusable cached forest");
                self.cache.remove(key);

                None
            }
        }
    }

    fn build_uncached(
        &self,
        index: &BitmapIndex,
        source: &impl ParticleSource,
        file: FileId,
        coarse_mask: &SparseBitset,
    ) -> Result<(Octree, ForestMeta)> {
        let icfg = *index.config();
        let dims = icfg.coarse_dims();
        let order = self.config.forest_order;

        // Cells this file owns, that the query selects, and that the file actually has particles in.
        let qualifying: Vec<u64> = match index.file_coarse_mask(file) {
            Some(file_mask) => file_mask
                .logical_and(coarse_mask)
                .iter_ones()
                .filter(|&coarse| index.coarse().owner(Morton3(coarse)) == Some(file))
                .collect(),
            None => Vec::new(),
        };
        let qualifying_mask: SparseBitset = qualifying.iter().cloned().collect();

        let mut octree = Octree::new_forest(self.config.n_ref)?.with_file_tag(file);
        for &coarse in &qualifying {
            octree.allocate_forest_root(coarse)?;
        }

        let mut buckets: SmallKeyHashMap<u64, Vec<u64>> = SmallKeyHashMap::default();
        let contributors = index.coarse().files_touching(&qualifying_mask);
        let mut num_positions = 0;
        for &contributor in &contributors {
            for batch in source.stream_positions(contributor)? {
                for p in batch.decode()? {
                    let p = if icfg.periodic {
                        icfg.bounds.wrap_periodic(p)
                    } else {
                        p
                    };
                    let ijk = match icfg.bounds.cell_of(p, dims) {
                        Some(ijk) => ijk,
                        None => continue,
                    };
                    let coarse = Morton3::from_grid(ijk).0;
                    if !qualifying_mask.get(coarse) {
                        continue;
                    }
                    let code = encode_in_cell(&icfg.bounds, dims, ijk, p, order);
                    buckets.entry(coarse).or_default().push(code.0);
                    num_positions += 1;
                }
            }
        }

        for &coarse in &qualifying {
            if let Some(codes) = buckets.get_mut(&coarse) {
                codes.sort_unstable();
                octree.insert_sorted_into_root(coarse, codes, order)?;
            }
        }
        octree.finalize(i64::from(file))?;
        tracing::debug!(
            file,
            roots = qualifying.len(),
            contributors = contributors.len(),
            num_positions,
            num_nodes = octree.num_nodes(),
            "built forest"
        );

        let meta = ForestMeta {
            dims,
            bounds: icfg.bounds,
            over_refine: self.config.over_refine,
        };

        Ok((octree, meta))
    }
}

/// Morton-encodes `p`, which lies in coarse cell `ijk` of a `dims` grid over `bounds`, relative to that cell at `order`.
/// Rounding at the cell's faces is clamped into the cell.
fn encode_in_cell(bounds: &Bounds3, dims: [u32; 3], ijk: [u32; 3], p: [f64; 3], order: u8) -> Morton3 {
    let w = bounds.width();
    let n = 1u32 << order;
    let mut q = [0; 3];
    for a in 0..3 {
        let t = (p[a] - bounds.left_edge[a]) / w[a] * f64::from(dims[a]) - f64::from(ijk[a]);
        q[a] = ((t * f64::from(n)).floor().max(0.0) as u32).min(n - 1);
    }

    Morton3::from_grid(q)
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
    use crate::{
        config::IndexConfig,
        io::{InMemoryParticleSource, PositionBatch, ScalarType},
        octree::{serialization::topology, Occupancy},
        selector::{AllSelector, BoxSelector},
    };

    use particle_index_core::Error;

    use pretty_assertions::assert_eq;
    use utilities::data_sets::{clustered_files, slab_files};

    fn setup(files: &[Vec<[f64; 3]>]) -> (BitmapIndex, InMemoryParticleSource) {
        let mut index = BitmapIndex::new(IndexConfig {
            bounds: Bounds3::unit(),
            coarse_order: 2,
            fine_order: 3,
            periodic: false,
        })
        .unwrap();
        let mut source = InMemoryParticleSource::new(64);
        for (file, positions) in files.iter().enumerate() {
            index.register_coarse(file as FileId, positions);
            source.insert(file as FileId, PositionBatch::from_f64(positions));
        }

        (index, source)
    }

    fn config(n_ref: u64) -> ForestConfig {
        ForestConfig {
            n_ref,
            forest_order: 8,
            ..Default::default()
        }
    }

    fn leaf_count_total(octree: &Octree) -> u64 {
        let mut total = 0;
        octree.visit_preorder(|_, node| {
            if let Occupancy::Count(n) = node.occupancy() {
                total += n;
            }
        });

        total
    }

    #[test]
    fn plan_covers_every_particle_exactly_once() {
        let files = clustered_files(5, 300, 0.15, 21);
        let (index, source) = setup(&files);
        let mut builder = ForestBuilder::new(config(16)).unwrap();

        let forests = builder.plan(&index, &source, &AllSelector).unwrap();

        let mut keys = BTreeSet::new();
        let mut total = 0;
        for forest in &forests {
            for key in forest.octree.forest_keys() {
                assert!(keys.insert(key), "cell {} is in two forests", key);
                assert_eq!(index.coarse().owner(Morton3(key)), Some(forest.file));
            }
            assert!(forest
                .octree
                .iter()
                .unwrap()
                .all(|s| s.file == Some(forest.file) && s.domain == i64::from(forest.file)));
            total += leaf_count_total(&forest.octree);
        }

        assert_eq!(keys.len() as u64, index.coarse().touched().number_of_ones());
        assert_eq!(total, files.iter().map(|f| f.len() as u64).sum::<u64>());
    }

    #[test]
    fn forests_only_hold_selected_cells() {
        let files = slab_files(4, 200, 2);
        let (index, source) = setup(&files);
        let mut builder = ForestBuilder::new(config(8)).unwrap();

        // Only the first coarse column along x: slab 0.
        let selector = BoxSelector::new(Bounds3::new([0.0; 3], [0.2, 1.0, 1.0]).unwrap());
        let forests = builder.plan(&index, &source, &selector).unwrap();

        assert_eq!(forests.iter().map(|f| f.file).collect::<Vec<_>>(), vec![0]);
        for key in forests[0].octree.forest_keys() {
            assert_eq!(Morton3(key).grid()[0], 0);
        }
        assert_eq!(leaf_count_total(&forests[0].octree), 200);
    }

    #[test]
    fn repeated_queries_replay_the_cache() {
        let files = clustered_files(3, 200, 0.2, 5);
        let (index, source) = setup(&files);
        let mut builder = ForestBuilder::new(config(4)).unwrap();

        let built = builder.build(&index, &source, 0, &AllSelector).unwrap();
        let replayed = builder.build(&index, &source, 0, &AllSelector).unwrap();

        assert!(!built.from_cache);
        assert!(replayed.from_cache);
        assert_eq!(topology(&replayed.octree), topology(&built.octree));
        assert_eq!(replayed.meta, built.meta);
        assert_eq!(replayed.octree.domain_id(), Some(0));
    }

    #[test]
    fn cache_key_policy_decides_reuse_across_queries() {
        let files = slab_files(2, 100, 9);
        let (index, source) = setup(&files);
        let narrow = BoxSelector::new(Bounds3::new([0.0; 3], [0.2; 3]).unwrap());

        let mut by_query = ForestBuilder::new(ForestConfig {
            cache_capacity: 4,
            ..config(4)
        })
        .unwrap();
        by_query.build(&index, &source, 0, &AllSelector).unwrap();
        assert!(!by_query.build(&index, &source, 0, &narrow).unwrap().from_cache);
        assert_eq!(by_query.cache().len(), 2);

        let mut by_file = ForestBuilder::new(ForestConfig {
            cache_key_policy: CacheKeyPolicy::FileOnly,
            ..config(4)
        })
        .unwrap();
        let wide = by_file.build(&index, &source, 0, &AllSelector).unwrap();
        let reused = by_file.build(&index, &source, 0, &narrow).unwrap();
        assert!(reused.from_cache);
        assert_eq!(
            reused.octree.forest_keys(),
            wide.octree.forest_keys()
        );
    }

    #[test]
    fn cache_is_bounded() {
        let files = slab_files(2, 50, 1);
        let (index, source) = setup(&files);
        let mut builder = ForestBuilder::new(config(4)).unwrap();

        builder.build(&index, &source, 0, &AllSelector).unwrap();
        builder.build(&index, &source, 1, &AllSelector).unwrap();
        assert_eq!(builder.cache().len(), 1);
        assert!(!builder.build(&index, &source, 0, &AllSelector).unwrap().from_cache);
    }

    #[test]
    fn corrupt_cache_entries_are_rebuilt() {
        let files = slab_files(2, 50, 4);
        let (index, source) = setup(&files);
        let mut builder = ForestBuilder::new(config(4)).unwrap();
        let built = builder.build(&index, &source, 1, &AllSelector).unwrap();

        let mask = AllSelector.recursive_morton_mask(&Bounds3::unit(), 2, 0);
        let key = builder.cache_key(1, &mask);
        let mut record = builder
            .cache
            .peek(&key)
            .unwrap()
            .decompress()
            .unwrap();
        record.nocts += 8;
        let corrupt = builder.compression.compress(&record).unwrap();
        builder.cache.insert(key, corrupt);

        let rebuilt = builder.build(&index, &source, 1, &AllSelector).unwrap();
        assert!(!rebuilt.from_cache);
        assert_eq!(topology(&rebuilt.octree), topology(&built.octree));
        assert!(builder.build(&index, &source, 1, &AllSelector).unwrap().from_cache);
    }

    #[test]
    fn unsupported_coordinates_fail_the_build() {
        let files = vec![vec![[0.1; 3]]];
        let (index, _) = setup(&files);
        let mut source = InMemoryParticleSource::default();
        source.insert(
            0,
            PositionBatch {
                scalar_type: ScalarType::I64,
                bytes: vec![0; 24],
            },
        );
        let mut builder = ForestBuilder::new(config(4)).unwrap();

        assert!(matches!(
            builder.build(&index, &source, 0, &AllSelector),
            Err(Error::DataType(_))
        ));
    }

    #[test]
    fn positions_on_cell_faces_stay_in_their_cell() {
        let dims = [4; 3];
        let bounds = Bounds3::unit();
        let code = encode_in_cell(&bounds, dims, [1, 0, 3], [0.25, 0.0, 0.999_999_999], 4);

        assert_eq!(code.grid(), [0, 0, 15]);
    }
}
