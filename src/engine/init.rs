//! Centroid seeding.
//!
//! Every strategy picks `k` point indices and the centroids are copied from
//! those points in `f64`. Randomised strategies draw only from the RNG they are
//! handed, so a fixed seed always yields the same centroids.

use ndarray::Array2;
use rand::seq::index::sample;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::metric::squared_distance;
use crate::config::InitStrategy;
use crate::error::{KMeansError, Result};
use crate::numeric::Element;

/// Seed `k` centroids from the row-major `points` buffer.
pub(crate) fn seed_centroids<T: Element>(
    strategy: InitStrategy,
    points: &[T],
    dim: usize,
    k: usize,
    rng: &mut ChaCha8Rng,
) -> Result<Array2<f64>> {
    let n = points.len() / dim;
    if k > n {
        return Err(KMeansError::InvalidConfig(format!(
            "initialisation requires k <= n (k={k}, n={n})"
        )));
    }
    let picked = match strategy {
        InitStrategy::Random => sample(rng, n, k).into_vec(),
        InitStrategy::KMeansPlusPlus => kmeans_pp_indices(points, dim, k, rng),
        InitStrategy::FarthestPoint => farthest_point_indices(points, dim, k),
    };
    tracing::debug!(%strategy, ?picked, "seeded centroids");
    Ok(Array2::from_shape_fn((k, dim), |(c, j)| {
        points[picked[c] * dim + j].to_f64()
    }))
}

fn row<T: Element>(points: &[T], dim: usize, i: usize) -> impl Iterator<Item = f64> + '_ {
    points[i * dim..(i + 1) * dim].iter().map(|v| v.to_f64())
}

fn distance_between<T: Element>(points: &[T], dim: usize, i: usize, j: usize) -> f64 {
    squared_distance(row(points, dim, i), row(points, dim, j))
}

/// Lowest index not yet picked; used when every remaining point coincides with
/// a chosen centroid.
fn first_unpicked(n: usize, picked: &[usize]) -> usize {
    (0..n).find(|i| !picked.contains(i)).unwrap_or(0)
}

fn kmeans_pp_indices<T: Element>(
    points: &[T],
    dim: usize,
    k: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<usize> {
    let n = points.len() / dim;
    let mut picked = Vec::with_capacity(k);
    let first = rng.gen_range(0..n);
    picked.push(first);

    let mut distances: Vec<f64> = (0..n)
        .map(|i| distance_between(points, dim, i, first))
        .collect();

    while picked.len() < k {
        let total: f64 = distances.iter().sum();
        let next = if total > 0.0 {
            let mut pick = rng.gen::<f64>() * total;
            let mut chosen = None;
            for (idx, &d) in distances.iter().enumerate() {
                if d > 0.0 && pick < d {
                    chosen = Some(idx);
                    break;
                }
                pick -= d;
            }
            // Rounding can leave `pick` just past the last weight.
            chosen
                .or_else(|| distances.iter().rposition(|&d| d > 0.0))
                .unwrap_or_else(|| first_unpicked(n, &picked))
        } else {
            first_unpicked(n, &picked)
        };
        picked.push(next);

        for (idx, slot) in distances.iter_mut().enumerate() {
            let d = distance_between(points, dim, idx, next);
            if d < *slot {
                *slot = d;
            }
        }
    }
    picked
}

fn farthest_point_indices<T: Element>(points: &[T], dim: usize, k: usize) -> Vec<usize> {
    let n = points.len() / dim;
    let mut picked = Vec::with_capacity(k);
    picked.push(0);
    let mut nearest: Vec<f64> = (0..n).map(|i| distance_between(points, dim, i, 0)).collect();

    while picked.len() < k {
        let mut best: Option<(usize, f64)> = None;
        for (idx, &d) in nearest.iter().enumerate() {
            if d > 0.0 && best.map_or(true, |(_, best_d)| d > best_d) {
                best = Some((idx, d));
            }
        }
        let next = best.map_or_else(|| first_unpicked(n, &picked), |(idx, _)| idx);
        picked.push(next);
        for (idx, slot) in nearest.iter_mut().enumerate() {
            let d = distance_between(points, dim, idx, next);
            if d < *slot {
                *slot = d;
            }
        }
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const POINTS: [f64; 12] = [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 10.0, 10.0, 10.0, 11.0, 11.0, 10.0];

    #[test]
    fn every_strategy_is_reproducible() {
        for strategy in [
            InitStrategy::Random,
            InitStrategy::KMeansPlusPlus,
            InitStrategy::FarthestPoint,
        ] {
            let a = seed_centroids(strategy, &POINTS, 2, 3, &mut ChaCha8Rng::seed_from_u64(5))
                .unwrap();
            let b = seed_centroids(strategy, &POINTS, 2, 3, &mut ChaCha8Rng::seed_from_u64(5))
                .unwrap();
            assert_eq!(a, b, "{strategy}");
            assert_eq!(a.dim(), (3, 2));
        }
    }

    #[test]
    fn farthest_point_spreads_out() {
        let centroids = seed_centroids(
            InitStrategy::FarthestPoint,
            &POINTS,
            2,
            2,
            &mut ChaCha8Rng::seed_from_u64(0),
        )
        .unwrap();
        assert_eq!(centroids.row(0).to_vec(), vec![0.0, 0.0]);
        // (10, 11) and (11, 10) tie; the lower index wins.
        assert_eq!(centroids.row(1).to_vec(), vec![10.0, 11.0]);
    }

    #[test]
    fn kmeans_pp_never_repeats_a_point_while_distinct_ones_remain() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let picked = kmeans_pp_indices(&POINTS, 2, 6, &mut rng);
        let mut sorted = picked.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 6);
    }

    #[test]
    fn duplicate_points_fall_back_to_unpicked_indices() {
        let points = [1.0f32; 8];
        let picked = kmeans_pp_indices(&points, 2, 3, &mut ChaCha8Rng::seed_from_u64(3));
        assert_eq!(picked.len(), 3);
        let mut sorted = picked.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);
    }

    #[test]
    fn too_many_centroids_is_a_configuration_error() {
        let err = seed_centroids(
            InitStrategy::Random,
            &POINTS,
            2,
            7,
            &mut ChaCha8Rng::seed_from_u64(0),
        )
        .unwrap_err();
        assert!(matches!(err, KMeansError::InvalidConfig(_)));
    }
}
