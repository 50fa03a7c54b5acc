//! Caller-facing k-means handle and the trained model it produces.

use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::{Bridge, EngineModule, Prediction};
use crate::config::KMeansConfig;
use crate::engine::{nearest_centroid, squared_distance, DistanceMetric};
use crate::error::{KMeansError, Result, ValidationError};
use crate::marshal::DataMarshaller;

/// K-means clusterer backed by an explicitly loaded engine module.
///
/// The engine is not ready until [`KMeans::init`] has completed, and
/// [`KMeans::destroy`] hands its memory back. Every `predict` runs the full
/// validate, flatten, copy-in, invoke and decode pipeline; a failed call leaves
/// nothing half-done to resume.
///
/// ```no_run
/// # async fn demo() -> kmeans_bridge::Result<()> {
/// use kmeans_bridge::KMeans;
///
/// let mut kmeans = KMeans::new(2, 100, 1e-4, None)?;
/// kmeans.init().await?;
/// let result = kmeans
///     .predict(&[[0.0, 0.0], [0.0, 1.0], [10.0, 10.0], [10.0, 11.0]])
///     .await?;
/// assert_eq!(result.centroids.len(), 2);
/// kmeans.destroy();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct KMeans {
    config: KMeansConfig,
    module: Option<EngineModule>,
    model: Option<KMeansModel>,
}

impl KMeans {
    /// Create a clusterer with `k` clusters, an iteration cap and a tolerance.
    pub fn new(
        k: usize,
        iterations: usize,
        tolerance: f64,
        metric: Option<DistanceMetric>,
    ) -> Result<Self> {
        let config = KMeansConfig::new(k, iterations, tolerance)
            .with_metric(metric.unwrap_or_default());
        Self::with_config(config)
    }

    pub fn with_config(config: KMeansConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            module: None,
            model: None,
        })
    }

    pub fn config(&self) -> &KMeansConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.module.is_some()
    }

    /// Model trained by the most recent successful `predict`.
    pub fn model(&self) -> Option<&KMeansModel> {
        self.model.as_ref()
    }

    /// Arena capacity of the loaded engine, in bytes.
    pub fn arena_capacity(&self) -> Option<usize> {
        self.module.as_ref().map(|module| module.arena().capacity())
    }

    /// Load the engine. Calling it again while loaded does nothing.
    pub async fn init(&mut self) -> Result<()> {
        if self.module.is_none() {
            self.module = Some(EngineModule::load(&self.config)?);
            tracing::info!(k = self.config.k, "kmeans engine ready");
        }
        Ok(())
    }

    /// Cluster `data`, a sequence of equally long points.
    pub async fn predict<R: AsRef<[f64]>>(&mut self, data: &[R]) -> Result<Prediction> {
        self.run_pipeline(data)
    }

    /// Cluster a dynamically typed dataset (a JSON array of numeric arrays).
    pub async fn predict_json(&mut self, data: &Value) -> Result<Prediction> {
        let rows = DataMarshaller::from_json(data)?;
        self.run_pipeline(&rows)
    }

    /// Release the arena and drop the engine. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if let Some(mut module) = self.module.take() {
            module.shutdown();
            tracing::info!("kmeans engine destroyed");
        }
    }

    pub fn k(&self) -> usize {
        self.config.k
    }

    pub fn set_k(&mut self, k: usize) -> Result<()> {
        self.reconfigure(KMeansConfig { k, ..self.config.clone() })
    }

    pub fn max_iterations(&self) -> usize {
        self.config.max_iter
    }

    pub fn set_max_iterations(&mut self, max_iter: usize) -> Result<()> {
        self.reconfigure(KMeansConfig {
            max_iter,
            ..self.config.clone()
        })
    }

    pub fn tolerance(&self) -> f64 {
        self.config.tol
    }

    pub fn set_tolerance(&mut self, tol: f64) -> Result<()> {
        self.reconfigure(KMeansConfig {
            tol,
            ..self.config.clone()
        })
    }

    pub fn metric(&self) -> DistanceMetric {
        self.config.metric
    }

    pub fn set_metric(&mut self, metric: DistanceMetric) -> Result<()> {
        self.reconfigure(KMeansConfig {
            metric,
            ..self.config.clone()
        })
    }

    fn reconfigure(&mut self, config: KMeansConfig) -> Result<()> {
        config.validate()?;
        if let Some(module) = self.module.as_mut() {
            module.configure(config.clone());
        }
        self.config = config;
        Ok(())
    }

    fn run_pipeline<R: AsRef<[f64]>>(&mut self, data: &[R]) -> Result<Prediction> {
        let module = self.module.as_mut().ok_or(KMeansError::NotInitialized)?;

        let validated = DataMarshaller::validate(data)?;
        self.config.validate_for(validated.points())?;
        let buffer = validated.flatten(self.config.precision)?;

        let mut bridge = Bridge::new(module, self.config.precision, validated.dimensions());
        let address = bridge.copy_in(&buffer)?;
        let outcome = bridge.invoke(address, buffer.len())?;
        let prediction = bridge.read_result(&outcome);

        self.model = Some(KMeansModel::new(self.config.clone(), outcome.centroids));
        Ok(prediction)
    }
}

impl Drop for KMeans {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Trained k-means model containing final centroids and config metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KMeansModel {
    /// Configuration used during training.
    pub config: KMeansConfig,
    /// Centroids as rows (`k` × `dim`).
    pub centroids: Array2<f64>,
}

impl KMeansModel {
    pub fn new(config: KMeansConfig, centroids: Array2<f64>) -> Self {
        Self { config, centroids }
    }

    pub fn dimensions(&self) -> usize {
        self.centroids.ncols()
    }

    /// Predict the cluster index for a single point.
    pub fn predict_point(&self, point: &[f64]) -> Result<usize> {
        if point.len() != self.dimensions() {
            return Err(ValidationError::DimensionMismatch {
                index: 0,
                expected: self.dimensions(),
                found: point.len(),
            }
            .into());
        }
        Ok(nearest_centroid(
            point.iter().copied(),
            &self.centroids,
            self.config.metric,
        ))
    }

    /// Predict cluster assignments for a whole dataset.
    pub fn predict<R: AsRef<[f64]>>(&self, points: &[R]) -> Result<Vec<usize>> {
        let validated = DataMarshaller::validate(points)?;
        if validated.dimensions() != self.dimensions() {
            return Err(ValidationError::DimensionMismatch {
                index: 0,
                expected: self.dimensions(),
                found: validated.dimensions(),
            }
            .into());
        }
        Ok(points
            .iter()
            .map(|row| {
                nearest_centroid(
                    row.as_ref().iter().copied(),
                    &self.centroids,
                    self.config.metric,
                )
            })
            .collect())
    }

    /// Inertia metric (sum of squared distances to the nearest centroid).
    pub fn inertia<R: AsRef<[f64]>>(&self, points: &[R]) -> Result<f64> {
        let assignments = self.predict(points)?;
        Ok(points
            .iter()
            .zip(assignments)
            .map(|(row, cid)| {
                squared_distance(
                    row.as_ref().iter().copied(),
                    self.centroids.row(cid).iter().copied(),
                )
            })
            .sum())
    }

    /// Persist the model as JSON.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a model written by [`KMeansModel::save_model`].
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let model: Self = serde_json::from_str(&json)?;
        model.config.validate()?;
        if model.centroids.nrows() != model.config.k {
            return Err(KMeansError::InvalidConfig(format!(
                "model holds {} centroids but its config says k = {}",
                model.centroids.nrows(),
                model.config.k
            )));
        }
        Ok(model)
    }
}
