//! A two-level spatial index over the files of a particle dataset.
//!
//! The domain is divided into a coarse grid of `2^coarse_order` cells per axis. The coarse pass records, for every file, which
//! coarse cells it has particles in, and which file owns each cell. An optional fine pass then divides selected coarse cells
//! (typically the ones several files share) into `2^fine_order` fine cells per axis and records which fine cells each file
//! occupies.
//!
//! A query first intersects its coarse mask with each file's coarse mask, then checks the files that survive against its fine
//! mask wherever fine data exists. The answer is conservative: it may include a file that has no particle in the query region,
//! but never omits one that does.
//!
//! ```
//! use particle_index_storage::prelude::*;
//!
//! let mut index = BitmapIndex::new(IndexConfig::default())?;
//! index.register_coarse(0, &[[0.1, 0.1, 0.1]]);
//! index.register_coarse(1, &[[0.9, 0.9, 0.9]]);
//!
//! let query = BoxSelector::new(Bounds3::new([0.0; 3], [0.2; 3])?);
//! assert_eq!(index.identify_candidate_files(&query, 0), vec![0]);
//! # Ok::<(), particle_index_core::Error>(())
//! ```

mod coarse;
mod fine;

pub use coarse::{CoarseCell, CoarseGrid};
pub use fine::{FineBitmaskMap, FineEntry};

use crate::{
    bitset::SparseBitset, config::IndexConfig, io::ParticleSource, octree::Octree,
    selector::Selector, SmallKeyHashMap,
};

use particle_index_core::{prelude::*, Result};

use itertools::Itertools;

pub struct BitmapIndex {
    config: IndexConfig,
    coarse: CoarseGrid,
    fine: FineBitmaskMap,
}

/// Where a position lands in the index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Location {
    coarse: Morton3,
    fine: Morton3,
}

impl BitmapIndex {
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            coarse: CoarseGrid::new(config.coarse_order),
            fine: FineBitmaskMap::new(),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    #[inline]
    pub fn coarse(&self) -> &CoarseGrid {
        &self.coarse
    }

    #[inline]
    pub fn fine(&self) -> &FineBitmaskMap {
        &self.fine
    }

    /// Files with at least one registered particle, in increasing order.
    pub fn files(&self) -> Vec<FileId> {
        self.coarse.file_masks().map(|(&file, _)| file).collect()
    }

    #[inline]
    pub fn owner(&self, ijk: [u32; 3]) -> Option<FileId> {
        self.coarse.owner(Morton3::from_grid(ijk))
    }

    #[inline]
    pub fn file_coarse_mask(&self, file: FileId) -> Option<&SparseBitset> {
        self.coarse.file_mask(file)
    }

    fn locate(&self, p: [f64; 3]) -> Option<Location> {
        let IndexConfig {
            bounds,
            coarse_order,
            fine_order,
            periodic,
        } = self.config;
        let p = if periodic { bounds.wrap_periodic(p) } else { p };
        let q = bounds.quantize(p, coarse_order + fine_order)?;
        let fine_mask = (1 << fine_order) - 1;

        Some(Location {
            coarse: Morton3::from_grid([q[0] >> fine_order, q[1] >> fine_order, q[2] >> fine_order]),
            fine: Morton3::from_grid([q[0] & fine_mask, q[1] & fine_mask, q[2] & fine_mask]),
        })
    }

    /// The coarse pass. Positions outside of the domain are dropped. Returns the number of positions registered.
    pub fn register_coarse(&mut self, file: FileId, positions: &[[f64; 3]]) -> usize {
        let mut registered = 0;
        for &p in positions {
            if let Some(loc) = self.locate(p) {
                self.coarse.register(file, loc.coarse);
                registered += 1;
            }
        }
        tracing::debug!(
            file,
            registered,
            dropped = positions.len() - registered,
            "coarse pass"
        );

        registered
    }

    /// The coarse pass over every position `source` streams for `file`.
    pub fn register_coarse_from_source(&mut self, source: &impl ParticleSource, file: FileId) -> Result<usize> {
        let mut registered = 0;
        for batch in source.stream_positions(file)? {
            registered += self.register_coarse(file, &batch.decode()?);
        }

        Ok(registered)
    }

    /// The fine pass, restricted to positions whose coarse cell is set in `coarse_mask`. Returns the number of positions that
    /// passed the filter.
    pub fn register_fine(
        &mut self,
        file: FileId,
        positions: &[[f64; 3]],
        coarse_mask: &SparseBitset,
    ) -> Result<usize> {
        let mut pairs: Vec<(u64, u64)> = positions
            .iter()
            .filter_map(|&p| self.locate(p))
            .filter(|loc| coarse_mask.get(loc.coarse.0))
            .map(|loc| (loc.coarse.0, loc.fine.0))
            .collect();
        pairs.sort_unstable();

        for (coarse, group) in &pairs.iter().group_by(|(coarse, _)| *coarse) {
            let fine_codes: Vec<u64> = group.map(|(_, fine)| *fine).collect();
            self.fine.insert_sorted(coarse, file, &fine_codes)?;
        }
        tracing::debug!(file, registered = pairs.len(), "fine pass");

        Ok(pairs.len())
    }

    /// The fine pass over every position `source` streams for `file`. All batches are gathered first so that each
    /// (coarse cell, file) entry is appended to in sorted order.
    pub fn register_fine_from_source(
        &mut self,
        source: &impl ParticleSource,
        file: FileId,
        coarse_mask: &SparseBitset,
    ) -> Result<usize> {
        let mut positions = Vec::new();
        for batch in source.stream_positions(file)? {
            positions.extend(batch.decode()?);
        }

        self.register_fine(file, &positions, coarse_mask)
    }

    /// The files that may hold particles selected by `selector`, in increasing order. Never omits a file that holds a selected
    /// particle.
    ///
    /// Cells only reached through the `ghost_zone` padding are not refined with fine data, since the selection itself does
    /// not reach into them.
    pub fn identify_candidate_files(&self, selector: &impl Selector, ghost_zone: u32) -> Vec<FileId> {
        let IndexConfig {
            bounds,
            coarse_order,
            fine_order,
            ..
        } = self.config;
        let mask = selector.recursive_morton_mask(&bounds, coarse_order, ghost_zone);
        let unpadded = if ghost_zone > 0 {
            Some(selector.recursive_morton_mask(&bounds, coarse_order, 0))
        } else {
            None
        };

        let mut fine_masks: SmallKeyHashMap<u64, Option<SparseBitset>> = SmallKeyHashMap::default();
        let mut candidates = Vec::new();
        for (&file, file_mask) in self.coarse.file_masks() {
            let hits = file_mask.logical_and(&mask);
            let relevant = hits.iter_ones().any(|coarse| {
                if let Some(unpadded) = &unpadded {
                    if !unpadded.get(coarse) {
                        return true;
                    }
                }
                let entry = match self.fine.get(coarse, file) {
                    Some(entry) => entry,
                    // No fine data for this cell, so the coarse hit is all we know.
                    None => return true,
                };
                let fine_mask = fine_masks.entry(coarse).or_insert_with(|| {
                    selector.fine_mask(&bounds, coarse_order, coarse, fine_order)
                });

                match fine_mask {
                    Some(fine_mask) => entry.bits().intersects(fine_mask),
                    None => true,
                }
            });
            if relevant {
                candidates.push(file);
            }
        }
        tracing::debug!(
            query_cells = mask.number_of_ones(),
            candidates = candidates.len(),
            "identified candidate files"
        );

        candidates
    }

    /// How much the files' fine data overlaps.
    pub fn collision_report(&self) -> CollisionReport {
        let mut report = CollisionReport::default();
        for coarse in self.fine.coarse_codes() {
            let files = match self.fine.cell(coarse) {
                Some(files) => files,
                None => continue,
            };
            let mut claimed = SparseBitset::new();
            let mut duplicated = SparseBitset::new();
            for entry in files.values() {
                duplicated.union_with(&claimed.logical_and(entry.bits()));
                claimed.union_with(entry.bits());
            }

            report.coarse_cells += 1;
            report.total_bits += claimed.number_of_ones();
            report.duplicated_bits += duplicated.number_of_ones();
            if !duplicated.is_empty() {
                report.colliding_cells += 1;
            }
        }
        tracing::info!(
            cells = report.coarse_cells,
            colliding = report.colliding_cells,
            percent = report.percent(),
            "fine bitmask collisions"
        );

        report
    }

    /// Coarse cells touched by more than one file. This is the usual `coarse_mask` for the fine pass.
    pub fn collision_mask(&self) -> SparseBitset {
        self.coarse.collision_mask()
    }

    /// An index-mode octree over every touched coarse cell, so that each touched cell is one leaf.
    pub fn coarse_index_tree(&self) -> Result<Octree> {
        let codes: Vec<u64> = self.coarse.touched().iter_ones().collect();
        let mut tree = Octree::new_dense([1, 1, 1], 1)?;
        tree.allocate_roots()?;
        tree.insert_sorted(&codes, self.config.coarse_order)?;
        tree.finalize(0)?;

        Ok(tree)
    }
}

/// Overlap of fine bitsets between files, accumulated over every coarse cell with fine data.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CollisionReport {
    pub coarse_cells: usize,
    pub colliding_cells: usize,
    /// Fine cells occupied by any file.
    pub total_bits: u64,
    /// Fine cells occupied by two or more files.
    pub duplicated_bits: u64,
}

impl CollisionReport {
    /// Share of occupied fine cells that more than one file occupies, as a percentage.
    pub fn percent(&self) -> f64 {
        if self.total_bits == 0 {
            0.0
        } else {
            100.0 * self.duplicated_bits as f64 / self.total_bits as f64
        }
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
    use crate::{
        io::{InMemoryParticleSource, PositionBatch},
        octree::Occupancy,
        selector::{AllSelector, BoxSelector},
    };

    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use utilities::{
        data_sets::{clustered_files, contains_any, slab_files},
        test::test_print,
    };

    fn config(coarse_order: u8, fine_order: u8) -> IndexConfig {
        IndexConfig {
            bounds: Bounds3::unit(),
            coarse_order,
            fine_order,
            periodic: false,
        }
    }

    fn indexed(config: IndexConfig, files: &[Vec<[f64; 3]>], fine_pass: bool) -> BitmapIndex {
        let mut index = BitmapIndex::new(config).unwrap();
        for (file, positions) in files.iter().enumerate() {
            index.register_coarse(file as FileId, positions);
        }
        if fine_pass {
            let mask = index.collision_mask();
            for (file, positions) in files.iter().enumerate() {
                index.register_fine(file as FileId, positions, &mask).unwrap();
            }
        }

        index
    }

    #[test]
    fn first_registering_file_owns_a_cell() {
        let mut index = BitmapIndex::new(config(1, 1)).unwrap();
        index.register_coarse(3, &[[0.1, 0.1, 0.1]]);
        index.register_coarse(1, &[[0.2, 0.2, 0.2], [0.7, 0.2, 0.2]]);

        assert_eq!(index.owner([0, 0, 0]), Some(3));
        assert_eq!(index.owner([1, 0, 0]), Some(1));
        assert_eq!(index.owner([1, 1, 1]), None);
        assert_eq!(index.coarse().count(Morton3::from_grid([0, 0, 0])), 2);
        assert_eq!(index.files(), vec![1, 3]);
    }

    #[test]
    fn out_of_domain_positions_are_dropped_unless_periodic() {
        let positions = [[0.5, 0.5, 0.5], [1.5, 0.5, 0.5], [-0.25, 0.5, 0.5]];

        let mut index = BitmapIndex::new(config(2, 1)).unwrap();
        assert_eq!(index.register_coarse(0, &positions), 1);

        let mut periodic = BitmapIndex::new(IndexConfig {
            periodic: true,
            ..config(2, 1)
        })
        .unwrap();
        assert_eq!(periodic.register_coarse(0, &positions), 3);
        assert!(periodic.file_coarse_mask(0).unwrap().get(Morton3::from_grid([3, 2, 2]).0));
    }

    #[test]
    fn candidate_selection_is_conservative() {
        let files = clustered_files(6, 200, 0.08, 7);
        for &fine_pass in &[false, true] {
            let index = indexed(config(3, 4), &files, fine_pass);
            for region in &[
                ([0.0, 0.0, 0.0], [0.3, 0.3, 0.3]),
                ([0.4, 0.1, 0.6], [0.55, 0.9, 0.7]),
                ([0.7, 0.7, 0.7], [1.0, 1.0, 1.0]),
            ] {
                let region = Bounds3::new(region.0, region.1).unwrap();
                let candidates = index.identify_candidate_files(&BoxSelector::new(region), 0);
                for (file, positions) in files.iter().enumerate() {
                    if contains_any(&region, positions) {
                        assert!(
                            candidates.contains(&(file as FileId)),
                            "file {} omitted for {:?}",
                            file,
                            region
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn selection_keeps_a_particle_on_the_query_edge_in_any_domain() {
        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..2000 {
            let l: f64 = rng.gen_range(-10.0..10.0);
            let w: f64 = rng.gen_range(0.1..20.0);
            let bounds = Bounds3::new([l; 3], [l + w; 3]).unwrap();
            let p = [
                l + rng.gen::<f64>() * w,
                l + rng.gen::<f64>() * w,
                l + rng.gen::<f64>() * w,
            ];
            if !bounds.contains(p) {
                continue;
            }

            // Two files on the same particle, so the fine pass covers its cell.
            let config = IndexConfig {
                bounds,
                coarse_order: 3,
                fine_order: 5,
                periodic: false,
            };
            let index = indexed(config, &[vec![p], vec![p]], true);
            assert!(index.fine().get(index.locate(p).unwrap().coarse.0, 0).is_some());

            let region = Bounds3::new(p, bounds.right_edge).unwrap();
            assert_eq!(
                index.identify_candidate_files(&BoxSelector::new(region), 0),
                vec![0, 1],
                "{:?} in {:?}",
                p,
                bounds
            );
        }
    }

    #[test]
    fn fine_data_prunes_files_sharing_a_coarse_cell() {
        // Both files share coarse cell (0, 0, 0) but occupy opposite corners of it.
        let files = vec![vec![[0.01, 0.01, 0.01]], vec![[0.49, 0.49, 0.49]]];
        let region = Bounds3::new([0.0; 3], [0.1; 3]).unwrap();
        let selector = BoxSelector::new(region);

        let coarse_only = indexed(config(1, 3), &files, false);
        assert_eq!(coarse_only.identify_candidate_files(&selector, 0), vec![0, 1]);

        let refined = indexed(config(1, 3), &files, true);
        assert_eq!(refined.identify_candidate_files(&selector, 0), vec![0]);
        // Selecting everything cannot prune anything.
        assert_eq!(refined.identify_candidate_files(&AllSelector, 0), vec![0, 1]);
    }

    #[test]
    fn disjoint_fine_data_reports_no_collisions() {
        // Eight slabs over four coarse columns, so neighbouring slabs share coarse cells but never fine ones.
        let files = slab_files(8, 100, 11);
        let index = indexed(config(2, 3), &files, true);
        let report = index.collision_report();

        assert!(report.coarse_cells > 0);
        assert_eq!(report.duplicated_bits, 0);
        assert_eq!(report.percent(), 0.0);

        // Same coarse cell, different fine cells.
        let files = vec![vec![[0.01; 3]], vec![[0.2; 3]]];
        let index = indexed(config(1, 3), &files, true);
        let report = index.collision_report();
        assert_eq!(report.coarse_cells, 1);
        assert_eq!(report.total_bits, 2);
        assert_eq!(report.percent(), 0.0);
    }

    #[test]
    fn shared_fine_cells_are_reported() {
        let files = vec![vec![[0.01; 3], [0.2; 3]], vec![[0.01; 3]]];
        let index = indexed(config(1, 3), &files, true);
        let report = index.collision_report();

        assert_eq!(report.total_bits, 2);
        assert_eq!(report.duplicated_bits, 1);
        assert_eq!(report.colliding_cells, 1);
        assert_eq!(report.percent(), 50.0);
    }

    #[test]
    fn overlapping_clusters_duplicate_at_most_every_bit() {
        let files = clustered_files(6, 400, 0.15, 8);
        let index = indexed(config(3, 3), &files, true);
        let report = index.collision_report();
        test_print(&format!("{:?}, {:.1}% duplicated\n", report, report.percent()));

        assert!(report.colliding_cells <= report.coarse_cells);
        assert!(report.duplicated_bits <= report.total_bits);
        assert!(report.percent() <= 100.0);
    }

    #[test]
    fn coarse_tree_has_a_leaf_per_touched_cell() {
        let files = clustered_files(3, 50, 0.1, 3);
        let index = indexed(config(3, 2), &files, false);
        let tree = index.coarse_index_tree().unwrap();

        for code in index.coarse().touched().iter_ones() {
            let leaf = tree.find_leaf(code, 3).unwrap();
            assert_eq!(
                tree.node(leaf).unwrap().occupancy(),
                Occupancy::Code(Some(Morton3(code)))
            );
        }
    }

    #[test]
    fn passes_can_stream_from_a_source() {
        let files = slab_files(2, 30, 5);
        let mut source = InMemoryParticleSource::new(7);
        for (file, positions) in files.iter().enumerate() {
            source.insert(file as FileId, PositionBatch::from_f64(positions));
        }

        let mut index = BitmapIndex::new(config(2, 2)).unwrap();
        for file in source.files() {
            assert_eq!(index.register_coarse_from_source(&source, file).unwrap(), 30);
        }
        let everything = index.coarse().touched().clone();
        for file in source.files() {
            assert_eq!(
                index.register_fine_from_source(&source, file, &everything).unwrap(),
                30
            );
        }
        assert!(!index.fine().is_empty());
    }
}
