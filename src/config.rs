//! Run configuration for the clustering engine and its bridge.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::DistanceMetric;
use crate::error::{KMeansError, Result};
use crate::numeric::NumericWidth;

/// Strategy used to seed initial centroids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InitStrategy {
    /// Choose `k` distinct points uniformly at random from the dataset.
    Random,
    /// K-Means++ initialisation as described by Arthur/Vassilvitskii.
    #[default]
    #[serde(alias = "kmeans++", alias = "k-means++")]
    KMeansPlusPlus,
    /// Start from point 0, then repeatedly take the point farthest from every
    /// centroid chosen so far. Does not consume randomness.
    FarthestPoint,
}

impl fmt::Display for InitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStrategy::Random => write!(f, "random"),
            InitStrategy::KMeansPlusPlus => write!(f, "kmeans++"),
            InitStrategy::FarthestPoint => write!(f, "farthest-point"),
        }
    }
}

impl FromStr for InitStrategy {
    type Err = KMeansError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "kmeans++" | "k-means++" | "k-means-plus-plus" => Ok(Self::KMeansPlusPlus),
            "farthest" | "farthest-point" => Ok(Self::FarthestPoint),
            other => Err(KMeansError::InvalidConfig(format!(
                "unsupported init strategy '{other}'"
            ))),
        }
    }
}

/// How a centroid is recomputed from its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CentroidUpdate {
    /// Arithmetic mean (Lloyd's k-means).
    #[default]
    Mean,
    /// Per-dimension median (k-medians).
    Median,
}

impl fmt::Display for CentroidUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CentroidUpdate::Mean => write!(f, "mean"),
            CentroidUpdate::Median => write!(f, "median"),
        }
    }
}

impl FromStr for CentroidUpdate {
    type Err = KMeansError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mean" | "kmeans" => Ok(Self::Mean),
            "median" | "kmedian" | "kmedians" => Ok(Self::Median),
            other => Err(KMeansError::InvalidConfig(format!(
                "unsupported centroid update '{other}'"
            ))),
        }
    }
}

/// Configurable knobs for a k-means run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct KMeansConfig {
    /// Number of centroids to optimise.
    pub k: usize,
    /// Maximum iterations before giving up on convergence.
    pub max_iter: usize,
    /// Stop once the largest centroid displacement falls below this tolerance.
    pub tol: f64,
    /// Distance used by the assignment step.
    pub metric: DistanceMetric,
    /// Centroid initialisation strategy.
    pub init: InitStrategy,
    /// Centroid update rule.
    pub update: CentroidUpdate,
    /// Seed for every random choice made during a run.
    pub seed: u64,
    /// Number of restarts (best run selected by inertia).
    pub n_init: usize,
    /// Element width used when the dataset crosses the bridge.
    pub precision: NumericWidth,
    /// Size of a dedicated rayon pool; `None` uses the global pool.
    pub threads: Option<usize>,
    /// Bytes reserved in the arena when the engine is loaded.
    pub initial_arena_bytes: usize,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: 8,
            max_iter: 300,
            tol: 1e-4,
            metric: DistanceMetric::default(),
            init: InitStrategy::default(),
            update: CentroidUpdate::default(),
            seed: 42,
            n_init: 1,
            precision: NumericWidth::default(),
            threads: None,
            initial_arena_bytes: 0,
        }
    }
}

impl KMeansConfig {
    pub fn new(k: usize, max_iter: usize, tol: f64) -> Self {
        Self {
            k,
            max_iter,
            tol,
            ..Self::default()
        }
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_init(mut self, init: InitStrategy) -> Self {
        self.init = init;
        self
    }

    pub fn with_update(mut self, update: CentroidUpdate) -> Self {
        self.update = update;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    pub fn with_precision(mut self, precision: NumericWidth) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the parameters that do not depend on the dataset.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(KMeansError::InvalidConfig(
                "k must be greater than zero".into(),
            ));
        }
        if self.max_iter == 0 {
            return Err(KMeansError::InvalidConfig(
                "max_iter must be greater than zero".into(),
            ));
        }
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(KMeansError::InvalidConfig(format!(
                "tol must be a positive finite number, got {}",
                self.tol
            )));
        }
        if self.n_init == 0 {
            return Err(KMeansError::InvalidConfig(
                "n_init must be at least 1".into(),
            ));
        }
        if self.threads == Some(0) {
            return Err(KMeansError::InvalidConfig(
                "threads must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }

    /// Validate configuration parameters for a dataset of `points` samples.
    pub fn validate_for(&self, points: usize) -> Result<()> {
        self.validate()?;
        if points < self.k {
            return Err(KMeansError::InvalidConfig(format!(
                "dataset has {points} samples but k = {}; add more data or decrease k",
                self.k
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        KMeansConfig::default().validate().unwrap();
    }

    #[test]
    fn non_positive_parameters_are_rejected() {
        for config in [
            KMeansConfig::new(0, 10, 1e-4),
            KMeansConfig::new(2, 0, 1e-4),
            KMeansConfig::new(2, 10, 0.0),
            KMeansConfig::new(2, 10, -1.0),
            KMeansConfig::new(2, 10, f64::NAN),
            KMeansConfig::new(2, 10, 1e-4).with_n_init(0),
            KMeansConfig::new(2, 10, 1e-4).with_threads(0),
        ] {
            let err = config.validate().unwrap_err();
            assert!(matches!(err, KMeansError::InvalidConfig(_)), "{config:?}");
        }
    }

    #[test]
    fn k_larger_than_dataset_is_rejected() {
        let config = KMeansConfig::new(5, 10, 1e-4);
        assert!(config.validate_for(5).is_ok());
        let err = config.validate_for(4).unwrap_err();
        assert!(err.to_string().contains("k = 5"));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = KMeansConfig::from_json_str(
            r#"{"k": 3, "metric": "manhattan", "init": "k-means++", "precision": "float32"}"#,
        )
        .unwrap();
        assert_eq!(config.k, 3);
        assert_eq!(config.metric, DistanceMetric::Manhattan);
        assert_eq!(config.init, InitStrategy::KMeansPlusPlus);
        assert_eq!(config.precision, NumericWidth::F32);
        assert_eq!(config.max_iter, KMeansConfig::default().max_iter);

        assert!(KMeansConfig::from_json_str(r#"{"k": 0}"#).is_err());
        assert!(KMeansConfig::from_json_str(r#"{"precision": "int8"}"#).is_err());
    }

    #[test]
    fn strategies_parse_from_strings() {
        assert_eq!(
            "K-Means++".parse::<InitStrategy>().unwrap(),
            InitStrategy::KMeansPlusPlus
        );
        assert_eq!(
            "farthest".parse::<InitStrategy>().unwrap(),
            InitStrategy::FarthestPoint
        );
        assert_eq!(
            "kmedians".parse::<CentroidUpdate>().unwrap(),
            CentroidUpdate::Median
        );
        assert!("gmm".parse::<InitStrategy>().is_err());
        assert_eq!(InitStrategy::KMeansPlusPlus.to_string(), "kmeans++");
    }
}
