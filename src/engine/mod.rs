//! Lloyd's algorithm over a borrowed row-major buffer.
//!
//! The engine never owns the points it clusters. It is handed a slice (in
//! practice a typed view into the bridge arena), seeds `k` centroids, then
//! alternates assignment and update steps until the largest centroid
//! displacement drops below the tolerance or the iteration cap is reached.
//! Centroids are always accumulated in `f64`, whatever the input width.
//!
//! Empty clusters are reseeded at the point lying farthest from its own
//! centroid (lowest index on ties, never the same point twice in one step).

mod init;
mod metric;

use ndarray::{Array2, ArrayView1};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

pub use metric::DistanceMetric;
pub(crate) use metric::squared_distance;

use crate::config::{CentroidUpdate, KMeansConfig};
use crate::error::{KMeansError, Result};
use crate::numeric::Element;

/// Rows folded per parallel task in the mean update. Partial sums are combined
/// in chunk order so the result does not depend on thread scheduling.
const ROWS_PER_CHUNK: usize = 4096;

/// Lifecycle of a single clustering run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No centroids seeded yet.
    Uninitialized,
    /// Centroids seeded, no iteration performed yet.
    Ready,
    Iterating,
    Converged,
    MaxIterationsReached,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Converged | RunState::MaxIterationsReached)
    }
}

/// Progress of the convergence test.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConvergenceState {
    pub iteration: usize,
    pub max_displacement: f64,
    pub converged: bool,
}

/// Result of a clustering run.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    /// Final assignments for each point in the buffer.
    pub assignments: Vec<usize>,
    /// Centroids as rows (`k` × `dim`).
    pub centroids: Array2<f64>,
    /// Number of completed iterations.
    pub iterations: usize,
    /// Whether the run satisfied the convergence tolerance.
    pub converged: bool,
    /// Sum of squared Euclidean distances to the assigned centroids.
    pub inertia: f64,
    /// Number of points assigned to each centroid.
    pub cluster_sizes: Vec<usize>,
    /// Terminal state of the run.
    pub state: RunState,
}

/// Stateless k-means engine; everything it needs comes from its config.
#[derive(Debug, Clone)]
pub struct ClusteringEngine {
    config: KMeansConfig,
}

impl ClusteringEngine {
    pub fn new(config: KMeansConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KMeansConfig {
        &self.config
    }

    /// Cluster `points`, a row-major buffer of `dim`-dimensional points.
    ///
    /// With `n_init > 1` the run is repeated from differently seeded centroids
    /// and the lowest-inertia result is kept (earliest on ties).
    pub fn run<T: Element>(&self, points: &[T], dim: usize) -> Result<FitOutcome> {
        if dim == 0 || points.is_empty() || points.len() % dim != 0 {
            return Err(KMeansError::Engine(format!(
                "buffer of {} elements cannot hold {dim}-dimensional points",
                points.len()
            )));
        }
        let n = points.len() / dim;
        self.config.validate_for(n)?;
        let width = T::WIDTH;

        tracing::info!(
            n,
            dim,
            k = self.config.k,
            width = %width,
            metric = %self.config.metric,
            init = %self.config.init,
            "starting kmeans run"
        );

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut best: Option<FitOutcome> = None;
        for restart in 0..self.config.n_init {
            let mut restart_rng = ChaCha8Rng::seed_from_u64(rng.next_u64());
            let centroids = init::seed_centroids(
                self.config.init,
                points,
                dim,
                self.config.k,
                &mut restart_rng,
            )?;
            let outcome = self.lloyd(points, dim, centroids);

            if best
                .as_ref()
                .map_or(true, |current| outcome.inertia < current.inertia)
            {
                tracing::debug!(
                    restart,
                    inertia = outcome.inertia,
                    converged = outcome.converged,
                    iterations = outcome.iterations,
                    "accepting new best kmeans solution"
                );
                best = Some(outcome);
            }
        }

        let outcome =
            best.ok_or_else(|| KMeansError::Engine("no restart produced a clustering".into()))?;
        tracing::info!(
            iterations = outcome.iterations,
            converged = outcome.converged,
            inertia = outcome.inertia,
            "kmeans run finished"
        );
        Ok(outcome)
    }

    fn lloyd<T: Element>(
        &self,
        points: &[T],
        dim: usize,
        mut centroids: Array2<f64>,
    ) -> FitOutcome {
        let n = points.len() / dim;
        let k = centroids.nrows();
        let mut assignments = vec![0usize; n];
        let mut counts = vec![0usize; k];
        let mut convergence = ConvergenceState::default();
        let mut state = RunState::Ready;

        while !state.is_terminal() {
            state = RunState::Iterating;
            convergence.iteration += 1;

            assign_points(points, dim, &centroids, self.config.metric, &mut assignments);
            let (mut next, step_counts) = match self.config.update {
                CentroidUpdate::Mean => mean_centroids(points, dim, &assignments, &centroids),
                CentroidUpdate::Median => median_centroids(points, dim, &assignments, &centroids),
            };
            counts = step_counts;
            reseed_empty_clusters(
                points,
                dim,
                &assignments,
                &counts,
                &mut next,
                self.config.metric,
            );

            convergence.max_displacement = max_displacement(&centroids, &next);
            centroids = next;

            tracing::trace!(
                iteration = convergence.iteration,
                displacement = convergence.max_displacement,
                "kmeans iteration"
            );

            if convergence.max_displacement < self.config.tol {
                convergence.converged = true;
                state = RunState::Converged;
            } else if convergence.iteration >= self.config.max_iter {
                tracing::warn!(
                    max_iter = self.config.max_iter,
                    displacement = convergence.max_displacement,
                    "kmeans stopped at the iteration cap without converging"
                );
                state = RunState::MaxIterationsReached;
            }
        }

        let inertia = inertia(points, dim, &assignments, &centroids);
        FitOutcome {
            assignments,
            centroids,
            iterations: convergence.iteration,
            converged: convergence.converged,
            inertia,
            cluster_sizes: counts,
            state,
        }
    }
}

/// Index of the closest centroid; ties go to the lowest index.
pub(crate) fn nearest_centroid<I>(
    point: I,
    centroids: &Array2<f64>,
    metric: DistanceMetric,
) -> usize
where
    I: Iterator<Item = f64> + Clone,
{
    let mut best = 0usize;
    let mut best_distance = f64::INFINITY;
    for (cid, centroid) in centroids.outer_iter().enumerate() {
        let distance = metric.distance(point.clone(), centroid.iter().copied());
        if distance < best_distance {
            best_distance = distance;
            best = cid;
        }
    }
    best
}

fn assign_points<T: Element>(
    points: &[T],
    dim: usize,
    centroids: &Array2<f64>,
    metric: DistanceMetric,
    assignments: &mut [usize],
) {
    assignments
        .par_iter_mut()
        .zip(points.par_chunks_exact(dim))
        .for_each(|(slot, point)| {
            *slot = nearest_centroid(point.iter().map(|v| v.to_f64()), centroids, metric);
        });
}

fn mean_centroids<T: Element>(
    points: &[T],
    dim: usize,
    assignments: &[usize],
    previous: &Array2<f64>,
) -> (Array2<f64>, Vec<usize>) {
    let k = previous.nrows();
    let mut counts = vec![0usize; k];
    for &cid in assignments {
        counts[cid] += 1;
    }

    // Each term is divided by its cluster size before summing, so a cluster of
    // finite points never overflows on the way to its (finite) mean.
    let partials: Vec<Array2<f64>> = points
        .par_chunks(dim * ROWS_PER_CHUNK)
        .zip(assignments.par_chunks(ROWS_PER_CHUNK))
        .map(|(rows, labels)| {
            let mut sums = Array2::<f64>::zeros((k, dim));
            for (point, &cid) in rows.chunks_exact(dim).zip(labels) {
                let count = counts[cid] as f64;
                for (acc, value) in sums.row_mut(cid).iter_mut().zip(point) {
                    *acc += value.to_f64() / count;
                }
            }
            sums
        })
        .collect();

    let mut means = Array2::<f64>::zeros((k, dim));
    for partial in &partials {
        means += partial;
    }

    let mut next = previous.clone();
    for (cid, &count) in counts.iter().enumerate() {
        if count > 0 {
            next.row_mut(cid).assign(&means.row(cid));
        }
    }
    (next, counts)
}

/// Largest Euclidean move of any centroid. A NaN move (from non-finite
/// centroids) is returned as NaN so it never passes the tolerance test.
fn max_displacement(previous: &Array2<f64>, next: &Array2<f64>) -> f64 {
    previous
        .outer_iter()
        .zip(next.outer_iter())
        .map(|(old, new)| squared_distance(old.iter().copied(), new.iter().copied()).sqrt())
        .fold(0.0, |worst, d| {
            if worst.is_nan() || d.is_nan() {
                f64::NAN
            } else {
                worst.max(d)
            }
        })
}

fn median_centroids<T: Element>(
    points: &[T],
    dim: usize,
    assignments: &[usize],
    previous: &Array2<f64>,
) -> (Array2<f64>, Vec<usize>) {
    let k = previous.nrows();
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (idx, &cid) in assignments.iter().enumerate() {
        members[cid].push(idx);
    }

    let medians: Vec<Option<Vec<f64>>> = members
        .par_iter()
        .map(|rows| {
            if rows.is_empty() {
                return None;
            }
            let mut column = Vec::with_capacity(rows.len());
            let centre: Vec<f64> = (0..dim)
                .map(|j| {
                    column.clear();
                    column.extend(rows.iter().map(|&i| points[i * dim + j].to_f64()));
                    median(&mut column)
                })
                .collect();
            Some(centre)
        })
        .collect();

    let mut next = previous.clone();
    for (cid, centre) in medians.into_iter().enumerate() {
        if let Some(centre) = centre {
            next.row_mut(cid).assign(&ArrayView1::from(centre.as_slice()));
        }
    }
    let counts = members.iter().map(Vec::len).collect();
    (next, counts)
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn reseed_empty_clusters<T: Element>(
    points: &[T],
    dim: usize,
    assignments: &[usize],
    counts: &[usize],
    centroids: &mut Array2<f64>,
    metric: DistanceMetric,
) {
    if counts.iter().all(|&c| c > 0) {
        return;
    }
    let n = assignments.len();
    let mut spread: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| {
            let point = points[i * dim..(i + 1) * dim].iter().map(|v| v.to_f64());
            metric.distance(point, centroids.row(assignments[i]).iter().copied())
        })
        .collect();

    for cid in (0..counts.len()).filter(|&cid| counts[cid] == 0) {
        let mut farthest = 0usize;
        for (idx, &d) in spread.iter().enumerate() {
            if d > spread[farthest] {
                farthest = idx;
            }
        }
        tracing::debug!(cluster = cid, point = farthest, "reseeding empty cluster");
        for (j, slot) in centroids.row_mut(cid).iter_mut().enumerate() {
            *slot = points[farthest * dim + j].to_f64();
        }
        spread[farthest] = f64::NEG_INFINITY;
    }
}

fn inertia<T: Element>(
    points: &[T],
    dim: usize,
    assignments: &[usize],
    centroids: &Array2<f64>,
) -> f64 {
    points
        .par_chunks_exact(dim)
        .zip(assignments.par_iter())
        .map(|(point, &cid)| {
            squared_distance(
                point.iter().map(|v| v.to_f64()),
                centroids.row(cid).iter().copied(),
            )
        })
        .collect::<Vec<f64>>()
        .into_iter()
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitStrategy;

    fn blobs() -> Vec<f64> {
        vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 10.0, 10.0, 10.0, 11.0, 11.0, 10.0]
    }

    #[test]
    fn separates_two_blobs() {
        let engine = ClusteringEngine::new(KMeansConfig::new(2, 100, 1e-6));
        let outcome = engine.run(&blobs(), 2).unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.state, RunState::Converged);
        let a = &outcome.assignments;
        assert!(a[0] == a[1] && a[1] == a[2]);
        assert!(a[3] == a[4] && a[4] == a[5]);
        assert_ne!(a[0], a[3]);

        let low = outcome.centroids.row(a[0]);
        let high = outcome.centroids.row(a[3]);
        for j in 0..2 {
            assert!((low[j] - 1.0 / 3.0).abs() < 1e-9);
            assert!((high[j] - 31.0 / 3.0).abs() < 1e-9);
        }
        assert_eq!(outcome.cluster_sizes.iter().sum::<usize>(), 6);
    }

    #[test]
    fn single_precision_input_accumulates_in_double() {
        let points: Vec<f32> = blobs().into_iter().map(|v| v as f32).collect();
        let engine = ClusteringEngine::new(KMeansConfig::new(2, 100, 1e-6));
        let outcome = engine.run(&points, 2).unwrap();
        let low = outcome.centroids.row(outcome.assignments[0]);
        assert!((low[0] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn iteration_cap_is_respected() {
        let config = KMeansConfig::new(2, 1, 1e-12).with_init(InitStrategy::FarthestPoint);
        let outcome = ClusteringEngine::new(config).run(&blobs(), 2).unwrap();
        assert_eq!(outcome.iterations, 1);
        assert!(!outcome.converged);
        assert_eq!(outcome.state, RunState::MaxIterationsReached);
    }

    #[test]
    fn runs_are_deterministic_for_a_fixed_seed() {
        let mut points = Vec::new();
        for i in 0..500 {
            let x = (i as f64 * 0.37).sin() * 10.0;
            let y = (i as f64 * 0.11).cos() * 10.0;
            points.extend([x, y, x * y * 0.01]);
        }
        let config = KMeansConfig::new(6, 50, 1e-6).with_seed(17).with_n_init(3);
        let first = ClusteringEngine::new(config.clone()).run(&points, 3).unwrap();
        let second = ClusteringEngine::new(config).run(&points, 3).unwrap();
        assert_eq!(first.assignments, second.assignments);
        assert_eq!(first.centroids, second.centroids);
        assert_eq!(first.inertia, second.inertia);
    }

    #[test]
    fn ties_go_to_the_lowest_centroid() {
        let centroids = Array2::from_shape_vec((3, 1), vec![2.0, 0.0, 2.0]).unwrap();
        let cid = nearest_centroid([1.0].into_iter(), &centroids, DistanceMetric::Euclidean);
        assert_eq!(cid, 0);
    }

    #[test]
    fn empty_cluster_is_reseeded_at_farthest_point() {
        let points = [0.0, 1.0, 2.0, 9.0];
        let assignments = [0, 0, 0, 0];
        let counts = [4, 0];
        let mut centroids = Array2::from_shape_vec((2, 1), vec![3.0, 100.0]).unwrap();
        reseed_empty_clusters(
            &points,
            1,
            &assignments,
            &counts,
            &mut centroids,
            DistanceMetric::Euclidean,
        );
        assert_eq!(centroids[(0, 0)], 3.0);
        assert_eq!(centroids[(1, 0)], 9.0);
    }

    #[test]
    fn median_update_resists_outliers() {
        let points = [0.0, 1.0, 2.0, 1000.0];
        let (next, counts) = median_centroids(
            &points,
            1,
            &[0, 0, 0, 0],
            &Array2::zeros((1, 1)),
        );
        assert_eq!(counts, vec![4]);
        assert_eq!(next[(0, 0)], 1.5);
    }

    #[test]
    fn mean_update_keeps_previous_row_for_empty_clusters() {
        let points = [1.0, 3.0];
        let previous = Array2::from_shape_vec((2, 1), vec![0.0, 7.0]).unwrap();
        let (next, counts) = mean_centroids(&points, 1, &[0, 0], &previous);
        assert_eq!(counts, vec![2, 0]);
        assert_eq!(next[(0, 0)], 2.0);
        assert_eq!(next[(1, 0)], 7.0);
    }

    #[test]
    fn means_of_huge_finite_values_stay_finite() {
        let points = [1e308, 1e308, 1.5e308];
        let config = KMeansConfig::new(1, 10, 1e-6).with_init(InitStrategy::FarthestPoint);
        let outcome = ClusteringEngine::new(config).run(&points, 1).unwrap();
        let centre = outcome.centroids[(0, 0)];
        assert!(centre.is_finite());
        assert!((centre / 1e308 - 3.5 / 3.0).abs() < 1e-12);
        assert!(outcome.converged);
    }

    #[test]
    fn non_finite_displacement_never_counts_as_converged() {
        let old = Array2::from_shape_vec((2, 1), vec![f64::INFINITY, 0.0]).unwrap();
        let new = Array2::from_shape_vec((2, 1), vec![f64::INFINITY, 0.0]).unwrap();
        let d = max_displacement(&old, &new);
        assert!(d.is_nan());
        assert!(!(d < 1e-4));

        let old = Array2::from_shape_vec((2, 1), vec![0.0, 1.0]).unwrap();
        let new = Array2::from_shape_vec((2, 1), vec![3.0, 1.0]).unwrap();
        assert_eq!(max_displacement(&old, &new), 3.0);
    }

    #[test]
    fn median_update_runs_end_to_end() {
        let config = KMeansConfig::new(2, 100, 1e-6).with_update(CentroidUpdate::Median);
        let outcome = ClusteringEngine::new(config).run(&blobs(), 2).unwrap();
        assert!(outcome.converged);
        let a = &outcome.assignments;
        assert!(a[0] == a[1] && a[1] == a[2]);
        assert_ne!(a[0], a[3]);
        assert_eq!(outcome.centroids.row(a[0]).to_vec(), vec![0.0, 0.0]);
        assert_eq!(outcome.centroids.row(a[3]).to_vec(), vec![10.0, 10.0]);
    }

    #[test]
    fn manhattan_metric_separates_two_blobs() {
        let config = KMeansConfig::new(2, 100, 1e-6).with_metric(DistanceMetric::Manhattan);
        let outcome = ClusteringEngine::new(config).run(&blobs(), 2).unwrap();
        assert!(outcome.converged);
        let a = &outcome.assignments;
        assert!(a[0] == a[1] && a[1] == a[2]);
        assert!(a[3] == a[4] && a[4] == a[5]);
        assert_ne!(a[0], a[3]);
        let high = outcome.centroids.row(a[3]);
        assert!((high[0] - 31.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_buffers_are_engine_errors() {
        let engine = ClusteringEngine::new(KMeansConfig::new(1, 10, 1e-4));
        assert!(matches!(engine.run::<f64>(&[], 2), Err(KMeansError::Engine(_))));
        assert!(matches!(engine.run(&[1.0, 2.0, 3.0], 2), Err(KMeansError::Engine(_))));
        assert!(matches!(engine.run(&[1.0, 2.0], 0), Err(KMeansError::Engine(_))));
    }
}
