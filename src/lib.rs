//! Lloyd's k-means behind a growable-arena calling bridge.
//!
//! Callers hand over nested points; the crate validates and flattens them
//! into a contiguous `f32` or `f64` buffer, copies that buffer into an arena
//! owned by the loaded engine, runs a parallel and deterministic k-means over
//! the arena view and decodes the result into caller-owned vectors.
//!
//! The main entry point is [`KMeans`]. [`DataMarshaller`], [`BufferArena`] and
//! [`Bridge`] are public for callers that want to drive the steps themselves.

pub mod arena;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod marshal;
pub mod model;
pub mod numeric;
pub mod synth;

pub use arena::{Address, BufferArena};
pub use bridge::{Bridge, EngineModule, Prediction};
pub use config::{CentroidUpdate, InitStrategy, KMeansConfig};
pub use engine::{ClusteringEngine, ConvergenceState, DistanceMetric, FitOutcome, RunState};
pub use error::{KMeansError, Result, ValidationError};
pub use marshal::{DataMarshaller, FlatBuffer, Shape, ValidatedDataset};
pub use model::{KMeans, KMeansModel};
pub use numeric::{Element, NumericWidth};
pub use synth::{generate_clustered_points, generate_points};
