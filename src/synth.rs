//! Reproducible synthetic datasets for tests and benchmarks.

use ndarray::Array2;
use ndarray_rand::rand_distr::{Distribution, Normal, Uniform};
use ndarray_rand::RandomExt;
use rand_chacha::ChaCha8Rng;

use crate::error::{KMeansError, Result};

/// Generate `n` uniformly distributed points in the unit hypercube.
pub fn generate_points(n: usize, dim: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    Array2::random_using((n, dim), Uniform::new(0.0, 1.0), rng)
        .outer_iter()
        .map(|row| row.to_vec())
        .collect()
}

/// Generate `n_per_cluster` Gaussian points around each of `centres`.
///
/// Points are grouped by centre, in the order the centres are given.
pub fn generate_clustered_points(
    n_per_cluster: usize,
    centres: &[Vec<f64>],
    spread: f64,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<Vec<f64>>> {
    let normal = Normal::new(0.0, spread).map_err(|err| {
        KMeansError::InvalidConfig(format!("spread {spread} is not a valid deviation: {err}"))
    })?;

    let mut points = Vec::with_capacity(n_per_cluster * centres.len());
    for centre in centres {
        for _ in 0..n_per_cluster {
            points.push(
                centre
                    .iter()
                    .map(|&value| value + normal.sample(rng))
                    .collect(),
            );
        }
    }
    Ok(points)
}
