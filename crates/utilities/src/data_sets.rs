//! Synthetic multi-file particle datasets over the unit cube, with known placement per file.

use particle_index_core::Bounds3;

use rand::{rngs::StdRng, Rng, SeedableRng};

/// `num_files` files, each filling its own slab `[i / n, (i + 1) / n)` along x with `per_file` uniform positions.
pub fn slab_files(num_files: usize, per_file: usize, seed: u64) -> Vec<Vec<[f64; 3]>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = num_files as f64;

    (0..num_files)
        .map(|i| {
            let lo = i as f64 / n;
            let hi = (i + 1) as f64 / n;

            (0..per_file)
                .map(|_| [rng.gen_range(lo..hi), rng.gen(), rng.gen()])
                .collect()
        })
        .collect()
}

/// `num_files` files, each a cube of side `2 * radius` around a random center, holding `per_file` uniform positions. Clusters
/// may overlap.
pub fn clustered_files(
    num_files: usize,
    per_file: usize,
    radius: f64,
    seed: u64,
) -> Vec<Vec<[f64; 3]>> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..num_files)
        .map(|_| {
            let center: [f64; 3] = [
                rng.gen_range(radius..1.0 - radius),
                rng.gen_range(radius..1.0 - radius),
                rng.gen_range(radius..1.0 - radius),
            ];

            (0..per_file)
                .map(|_| {
                    [
                        center[0] + rng.gen_range(-radius..radius),
                        center[1] + rng.gen_range(-radius..radius),
                        center[2] + rng.gen_range(-radius..radius),
                    ]
                })
                .collect()
        })
        .collect()
}

/// Whether any of `positions` lies inside `region`.
pub fn contains_any(region: &Bounds3, positions: &[[f64; 3]]) -> bool {
    positions.iter().any(|&p| region.contains(p))
}
