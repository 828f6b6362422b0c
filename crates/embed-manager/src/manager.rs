//! Resource manager for a local embedding model.
//!
//! Owns at most one loaded model/context pair. The model is loaded on first
//! use, concurrent callers share a single in-flight load, an optional idle
//! check unloads it after a period without use, and `dispose` shuts the
//! manager down for good.
//!
//! All transitions of the runtime state happen under one `tokio::sync::Mutex`.
//! Native work runs on the blocking pool; inference carries the owned lock
//! guard into the blocking task so eviction and disposal cannot touch the
//! handles while a vector is being computed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use embed_native::{CandleBackend, InferenceBackend};
use embed_types::{GpuLayers, ManagerConfig};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EmbeddingError;
use crate::idle::run_idle_check;
use crate::metadata::{DimensionChange, MetadataOutcome, MetadataStore};
use crate::state::{LoadFuture, LoadedResources, RuntimeState};

/// Embedding vector returned to callers.
pub type Vector = Vec<f32>;

/// Read-only snapshot of the manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    /// Configured model identifier
    pub model: String,
    /// Configured dimensionality
    pub dimensions: usize,
    /// Acceleration layers after applying the platform default
    pub gpu_layers: GpuLayers,
    /// Whether a model is currently loaded
    pub is_loaded: bool,
    /// Completion time of the most recent use, if any
    pub last_used_at: Option<DateTime<Utc>>,
    /// Whether `dispose` has been called
    pub disposed: bool,
    /// Successful loads since construction
    pub load_count: u64,
    /// Idle evictions since construction
    pub eviction_count: u64,
    /// Dimensionality migration detected on first load, if any
    pub dimension_change: Option<DimensionChange>,
}

/// Mutable bookkeeping mirrored out of the runtime state so `stats` never
/// waits on the state lock. Written only while the state lock is held.
#[derive(Debug, Default)]
pub(crate) struct Snapshot {
    pub(crate) is_loaded: bool,
    pub(crate) disposed: bool,
    pub(crate) last_used_at: Option<DateTime<Utc>>,
    pub(crate) load_count: u64,
    pub(crate) eviction_count: u64,
    pub(crate) dimension_change: Option<DimensionChange>,
}

impl Snapshot {
    /// Record a use, keeping `last_used_at` non-decreasing.
    fn mark_used(&mut self) {
        let now = Utc::now();
        self.last_used_at = Some(match self.last_used_at {
            Some(previous) if previous > now => previous,
            _ => now,
        });
    }
}

pub(crate) struct Inner {
    pub(crate) config: ManagerConfig,
    gpu_layers: GpuLayers,
    backend: Arc<dyn InferenceBackend>,
    pub(crate) state: Arc<Mutex<RuntimeState>>,
    metadata: MetadataStore,
    metadata_checked: AtomicBool,
    snapshot: StdMutex<Snapshot>,
    shutdown: CancellationToken,
    /// Serializes `dispose` so every caller returns only after the releases
    dispose_gate: Mutex<()>,
}

impl Inner {
    pub(crate) fn update_snapshot(&self, f: impl FnOnce(&mut Snapshot)) {
        let mut snapshot = self
            .snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut snapshot);
    }

    fn load_failed(&self, reason: impl Into<String>) -> EmbeddingError {
        EmbeddingError::LoadFailed {
            model: self.config.model.clone(),
            gpu_layers: self.gpu_layers,
            reason: reason.into(),
        }
    }

    fn inference_failed(&self, reason: impl Into<String>) -> EmbeddingError {
        EmbeddingError::InferenceFailed {
            model: self.config.model.clone(),
            reason: reason.into(),
        }
    }

    /// Spawn the load and return the future every waiter shares.
    ///
    /// The load runs on its own task so it completes even if every caller
    /// waiting on it goes away. If that task is lost before it settles the
    /// state, the shared future puts `Loading` back to `Unloaded` itself.
    fn start_load(self: &Arc<Self>) -> LoadFuture {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.load().await });

        let state = Arc::downgrade(&self.state);
        let fallback = self.load_failed("load task was cancelled");
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Embedding model load task lost");
                    let Some(state) = state.upgrade() else {
                        return Err(fallback);
                    };
                    let mut state = state.lock().await;
                    match *state {
                        RuntimeState::Disposed => Err(EmbeddingError::Disposed),
                        RuntimeState::Loading(_) => {
                            *state = RuntimeState::Unloaded;
                            Err(fallback)
                        }
                        _ => Err(fallback),
                    }
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn load(self: Arc<Self>) -> Result<(), EmbeddingError> {
        let started = std::time::Instant::now();
        info!(
            model = %self.config.model,
            path = ?self.config.model_path(),
            gpu_layers = %self.gpu_layers,
            "Loading embedding model"
        );

        let loader = Arc::clone(&self);
        let acquired = match tokio::task::spawn_blocking(move || loader.acquire_resources()).await
        {
            Ok(result) => result,
            Err(e) => Err(self.load_failed(format!("load task failed: {}", e))),
        };

        let mut state = self.state.lock().await;
        match acquired {
            Ok(resources) => {
                if matches!(*state, RuntimeState::Disposed) {
                    info!(model = %self.config.model, "Manager disposed during load, releasing model");
                    let released = tokio::task::spawn_blocking(move || resources.release()).await;
                    if let Err(e) = released {
                        warn!(error = %e, "Release after dispose failed");
                    }
                    return Err(EmbeddingError::Disposed);
                }
                *state = RuntimeState::Loaded(resources);
                self.update_snapshot(|s| {
                    s.is_loaded = true;
                    s.load_count += 1;
                    s.mark_used();
                });
                info!(
                    model = %self.config.model,
                    dimensions = self.config.dimensions,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Embedding model loaded"
                );
                Ok(())
            }
            Err(err) => {
                warn!(model = %self.config.model, error = %err, "Embedding model load failed");
                match *state {
                    RuntimeState::Disposed => Err(EmbeddingError::Disposed),
                    _ => {
                        *state = RuntimeState::Unloaded;
                        Err(err)
                    }
                }
            }
        }
    }

    /// Load the model and create its context. Blocking.
    fn acquire_resources(&self) -> Result<LoadedResources, EmbeddingError> {
        let path = self.config.model_path();

        let model = self
            .backend
            .load_model(&path, self.gpu_layers)
            .map_err(|e| self.load_failed(e.to_string()))?;

        let context = match model.create_embedding_context() {
            Ok(context) => context,
            Err(e) => {
                model.release();
                return Err(self.load_failed(format!("creating embedding context: {}", e)));
            }
        };

        if !self.metadata_checked.swap(true, Ordering::SeqCst) {
            self.check_metadata();
        }

        Ok(LoadedResources::new(model, context))
    }

    fn check_metadata(&self) {
        let outcome = self
            .metadata
            .reconcile(&self.config.model, self.config.dimensions);
        if let MetadataOutcome::DimensionsChanged(change) = outcome {
            self.update_snapshot(|s| s.dimension_change = Some(change));
        }
    }

    /// Embed `texts` with the loaded context. Blocking; `guard` keeps the
    /// state locked until the vectors and the use timestamp are recorded.
    fn embed_locked(
        &self,
        mut guard: OwnedMutexGuard<RuntimeState>,
        texts: &[String],
    ) -> Result<Vec<Vector>, EmbeddingError> {
        let resources = match &mut *guard {
            RuntimeState::Loaded(resources) => resources,
            RuntimeState::Disposed => return Err(EmbeddingError::Disposed),
            other => {
                return Err(self.inference_failed(format!("model is {}", other.name())));
            }
        };

        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let vector = resources
                .embed(text)
                .map_err(|e| self.inference_failed(e.to_string()))?;
            if vector.len() != self.config.dimensions {
                return Err(self.inference_failed(format!(
                    "expected {} dimensions, got {}",
                    self.config.dimensions,
                    vector.len()
                )));
            }
            vectors.push(vector);
        }

        resources.touch();
        self.update_snapshot(Snapshot::mark_used);
        debug!(count = vectors.len(), "Generated embeddings");
        Ok(vectors)
    }
}

/// Lazily loads, serves and evicts a single local embedding model.
pub struct ResourceManager {
    inner: Arc<Inner>,
}

impl ResourceManager {
    /// Create a manager. Touches neither native resources nor local storage.
    ///
    /// When idle eviction is enabled the idle check is spawned on the current
    /// tokio runtime, so this must then be called from within one.
    pub fn new(
        config: ManagerConfig,
        backend: impl InferenceBackend,
    ) -> Result<Self, EmbeddingError> {
        Self::with_backend(config, Arc::new(backend))
    }

    /// Create a manager backed by Candle.
    pub fn with_candle(config: ManagerConfig) -> Result<Self, EmbeddingError> {
        Self::new(config, CandleBackend::new())
    }

    pub fn with_backend(
        config: ManagerConfig,
        backend: Arc<dyn InferenceBackend>,
    ) -> Result<Self, EmbeddingError> {
        if config.dimensions == 0 {
            return Err(EmbeddingError::InvalidConfig(
                "dimensions must be > 0".to_string(),
            ));
        }
        if config.model.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfig(
                "model must not be empty".to_string(),
            ));
        }

        let inner = Arc::new(Inner {
            gpu_layers: config.resolved_gpu_layers(),
            metadata: MetadataStore::new(config.metadata_path()),
            config,
            backend,
            state: Arc::new(Mutex::new(RuntimeState::Unloaded)),
            metadata_checked: AtomicBool::new(false),
            snapshot: StdMutex::new(Snapshot::default()),
            shutdown: CancellationToken::new(),
            dispose_gate: Mutex::new(()),
        });

        if let (Some(timeout), Some(interval)) = (
            inner.config.idle_timeout(),
            inner.config.idle_check_interval(),
        ) {
            let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
                EmbeddingError::InvalidConfig(
                    "idle eviction requires a running tokio runtime".to_string(),
                )
            })?;
            runtime.spawn(run_idle_check(
                Arc::downgrade(&inner),
                interval,
                timeout,
                inner.shutdown.clone(),
            ));
            debug!(
                timeout_ms = timeout.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "Idle eviction armed"
            );
        }

        info!(
            model = %inner.config.model,
            dimensions = inner.config.dimensions,
            gpu_layers = %inner.gpu_layers,
            "Embedding manager created"
        );

        Ok(Self { inner })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Lock the state with a loaded model, loading it first if needed.
    async fn acquire_loaded(&self) -> Result<OwnedMutexGuard<RuntimeState>, EmbeddingError> {
        loop {
            let mut guard = Arc::clone(&self.inner.state).lock_owned().await;
            let pending = match &*guard {
                RuntimeState::Loaded(_) => return Ok(guard),
                RuntimeState::Disposed => return Err(EmbeddingError::Disposed),
                RuntimeState::Loading(pending) => {
                    debug!("Joining in-flight model load");
                    pending.clone()
                }
                RuntimeState::Unloaded => {
                    let pending = self.inner.start_load();
                    *guard = RuntimeState::Loading(pending.clone());
                    pending
                }
            };
            drop(guard);
            pending.await?;
        }
    }

    async fn embed_all(&self, texts: Vec<String>) -> Result<Vec<Vector>, EmbeddingError> {
        let guard = self.acquire_loaded().await?;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.embed_locked(guard, &texts))
            .await
            .map_err(|e| {
                self.inner
                    .inference_failed(format!("inference task failed: {}", e))
            })?
    }

    /// Compute the embedding of `text`, loading the model if necessary.
    ///
    /// Empty text is passed to the model unchanged.
    pub async fn generate_embedding(&self, text: &str) -> Result<Vector, EmbeddingError> {
        let mut vectors = self.embed_all(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| self.inner.inference_failed("no vector produced"))
    }

    /// Compute embeddings for several texts under a single lock hold.
    pub async fn generate_embeddings(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vector>, EmbeddingError> {
        if self.is_disposed() {
            return Err(EmbeddingError::Disposed);
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_all(texts.to_vec()).await
    }

    /// Load the model now instead of on first use.
    pub async fn preload(&self) -> Result<(), EmbeddingError> {
        let mut guard = self.acquire_loaded().await?;
        if let RuntimeState::Loaded(resources) = &mut *guard {
            resources.touch();
            self.inner.update_snapshot(Snapshot::mark_used);
        }
        Ok(())
    }

    /// Snapshot of the manager. Never loads and never waits on the state lock.
    pub fn stats(&self) -> Stats {
        let inner = &self.inner;
        let snapshot = inner
            .snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Stats {
            model: inner.config.model.clone(),
            dimensions: inner.config.dimensions,
            gpu_layers: inner.gpu_layers,
            is_loaded: snapshot.is_loaded,
            last_used_at: snapshot.last_used_at,
            disposed: snapshot.disposed,
            load_count: snapshot.load_count,
            eviction_count: snapshot.eviction_count,
            dimension_change: snapshot.dimension_change.clone(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner
            .snapshot
            .lock()
            .map(|s| s.disposed)
            .unwrap_or_else(|poisoned| poisoned.into_inner().disposed)
    }

    /// Shut the manager down. Idempotent.
    ///
    /// Stops the idle check, refuses every later call with
    /// [`EmbeddingError::Disposed`] and releases the model (context first).
    /// A load still in flight is awaited; it releases its own handles when it
    /// sees the disposed state. Native handles are all released by the time
    /// this returns, for every concurrent caller.
    pub async fn dispose(&self) {
        let _gate = self.inner.dispose_gate.lock().await;
        self.inner.shutdown.cancel();

        let mut state = Arc::clone(&self.inner.state).lock_owned().await;
        let previous = std::mem::replace(&mut *state, RuntimeState::Disposed);
        if matches!(previous, RuntimeState::Disposed) {
            return;
        }
        self.inner.update_snapshot(|s| {
            s.is_loaded = false;
            s.disposed = true;
        });

        match previous {
            RuntimeState::Loaded(resources) => {
                let released = tokio::task::spawn_blocking(move || {
                    resources.release();
                    drop(state);
                })
                .await;
                match released {
                    Ok(()) => debug!("Released embedding model on dispose"),
                    Err(e) => warn!(error = %e, "Release on dispose failed"),
                }
            }
            RuntimeState::Loading(pending) => {
                drop(state);
                debug!("Dispose during load; waiting for the load to release its handles");
                // The load reports Disposed once its handles are released
                let _ = pending.await;
            }
            RuntimeState::Unloaded | RuntimeState::Disposed => {}
        }

        info!(model = %self.inner.config.model, "Embedding manager disposed");
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}
