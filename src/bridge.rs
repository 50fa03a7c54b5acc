//! The calling convention between marshalled data and the engine.
//!
//! ```text
//!   FlatBuffer ──copy_in──▶ BufferArena (inside EngineModule)
//!                              │ Address + length + width
//!                              ▼
//!                     EngineModule::predict ──▶ ClusteringEngine::run(&[T])
//!                              │ FitOutcome
//!                              ▼
//!                        read_result ──▶ Prediction (caller-owned copies)
//! ```
//!
//! The engine side only speaks in addresses: `allocate`, `free` and `predict`.
//! The width is resolved once, when the [`Bridge`] is built, and every typed
//! view downstream uses that same width.

use serde::{Deserialize, Serialize};

use crate::arena::{Address, BufferArena};
use crate::config::KMeansConfig;
use crate::engine::{ClusteringEngine, FitOutcome};
use crate::error::{KMeansError, Result};
use crate::marshal::FlatBuffer;
use crate::numeric::NumericWidth;

/// Loaded compute engine: its arena, its k-means engine and, optionally, a
/// dedicated thread pool.
#[derive(Debug)]
pub struct EngineModule {
    arena: BufferArena,
    engine: ClusteringEngine,
    pool: Option<rayon::ThreadPool>,
}

impl EngineModule {
    /// Prepare the engine for `config`.
    pub fn load(config: &KMeansConfig) -> Result<Self> {
        config.validate()?;
        let pool = config
            .threads
            .map(|threads| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|idx| format!("kmeans-engine-{idx}"))
                    .build()
                    .map_err(|err| {
                        KMeansError::Initialization(format!(
                            "failed to build a {threads}-thread pool: {err}"
                        ))
                    })
            })
            .transpose()?;
        let arena = BufferArena::with_capacity(config.initial_arena_bytes).map_err(|err| {
            KMeansError::Initialization(format!("failed to reserve the arena: {err}"))
        })?;

        tracing::debug!(
            threads = config.threads,
            arena_bytes = arena.capacity(),
            "engine module loaded"
        );
        Ok(Self {
            arena,
            engine: ClusteringEngine::new(config.clone()),
            pool,
        })
    }

    /// Replace the run configuration without touching the arena.
    pub fn configure(&mut self, config: KMeansConfig) {
        self.engine = ClusteringEngine::new(config);
    }

    pub fn arena(&self) -> &BufferArena {
        &self.arena
    }

    /// Reserve at least `bytes` bytes and return their start address.
    pub fn allocate(&mut self, bytes: usize) -> Result<Address> {
        self.arena.acquire(bytes)
    }

    /// Free the region that starts at `address`.
    pub fn free(&mut self, address: Address) -> Result<()> {
        if address != Address::BASE {
            return Err(KMeansError::Engine(format!(
                "{address} was not returned by allocate"
            )));
        }
        self.arena.release();
        Ok(())
    }

    /// Run the clustering over `length` elements of `width` starting at `address`.
    pub fn predict(
        &self,
        address: Address,
        length: usize,
        width: NumericWidth,
        dimensions: usize,
    ) -> Result<FitOutcome> {
        let run = || match width {
            NumericWidth::F32 => self
                .engine
                .run(self.arena.view::<f32>(address, length)?, dimensions),
            NumericWidth::F64 => self
                .engine
                .run(self.arena.view::<f64>(address, length)?, dimensions),
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }

    /// Drop the arena region; the module stays usable.
    pub fn shutdown(&mut self) {
        self.arena.release();
    }
}

/// Caller-owned result of a clustering call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Cluster index of every input point, in input order.
    pub clusters: Vec<usize>,
    /// Final centroids, one vector per cluster.
    pub centroids: Vec<Vec<f64>>,
    pub iterations: usize,
    pub converged: bool,
    pub inertia: f64,
    pub cluster_sizes: Vec<usize>,
}

/// One call's view of the engine: a fixed element width and point dimension.
#[derive(Debug)]
pub struct Bridge<'m> {
    module: &'m mut EngineModule,
    width: NumericWidth,
    dimensions: usize,
}

impl<'m> Bridge<'m> {
    pub fn new(module: &'m mut EngineModule, width: NumericWidth, dimensions: usize) -> Self {
        Self {
            module,
            width,
            dimensions,
        }
    }

    pub fn width(&self) -> NumericWidth {
        self.width
    }

    /// Copy `buffer` into the arena and return where it starts.
    pub fn copy_in(&mut self, buffer: &FlatBuffer) -> Result<Address> {
        if buffer.width() != self.width {
            return Err(KMeansError::UnsupportedType(format!(
                "{} buffer handed to a bridge expecting {}",
                buffer.width(),
                self.width
            )));
        }
        let address = self.module.allocate(buffer.byte_len())?;
        self.module.arena.write_bytes(address, buffer.as_bytes())?;
        tracing::debug!(
            %address,
            elements = buffer.len(),
            width = %self.width,
            "copied buffer into arena"
        );
        Ok(address)
    }

    /// Synchronously run the engine over `length` elements at `address`.
    pub fn invoke(&self, address: Address, length: usize) -> Result<FitOutcome> {
        self.module
            .predict(address, length, self.width, self.dimensions)
            .map_err(|err| match err {
                KMeansError::Engine(msg) => KMeansError::Engine(format!(
                    "predict({address}, {length}) over {} data: {msg}",
                    self.width
                )),
                other => other,
            })
    }

    /// Decode the engine's result into caller-owned vectors.
    pub fn read_result(&self, outcome: &FitOutcome) -> Prediction {
        Prediction {
            clusters: outcome.assignments.clone(),
            centroids: outcome
                .centroids
                .outer_iter()
                .map(|row| row.to_vec())
                .collect(),
            iterations: outcome.iterations,
            converged: outcome.converged,
            inertia: outcome.inertia,
            cluster_sizes: outcome.cluster_sizes.clone(),
        }
    }
}
