//! Test helpers: a counting in-memory inference backend.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use embed_manager::ResourceManager;
use embed_native::{EmbeddingContext, InferenceBackend, LoadedModel, NativeError};
use embed_types::{GpuLayers, ManagerConfig};
use tempfile::TempDir;

/// Text the mock refuses to embed
pub const BAD_INPUT: &str = "<<bad input>>";

/// Observations shared between the mock backend and the test.
#[derive(Default)]
pub struct Probe {
    pub load_calls: AtomicUsize,
    pub context_calls: AtomicUsize,
    pub embed_calls: AtomicUsize,
    pub context_releases: AtomicUsize,
    pub model_releases: AtomicUsize,
    pub fail_load: AtomicBool,
    pub fail_context: AtomicBool,
    /// Embeds currently running; must be zero whenever a handle is released
    active_embeds: AtomicUsize,
    pub overlap_violations: AtomicUsize,
    pub events: Mutex<Vec<&'static str>>,
    pub last_path: Mutex<Option<PathBuf>>,
    pub last_gpu_layers: Mutex<Option<GpuLayers>>,
    /// Thread each release ran on
    pub release_threads: Mutex<Vec<ThreadId>>,
}

impl Probe {
    pub fn loads(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> usize {
        self.context_calls.load(Ordering::SeqCst)
    }

    pub fn context_releases(&self) -> usize {
        self.context_releases.load(Ordering::SeqCst)
    }

    pub fn model_releases(&self) -> usize {
        self.model_releases.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    pub fn release_threads(&self) -> Vec<ThreadId> {
        self.release_threads.lock().unwrap().clone()
    }

    fn record(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }

    fn record_release(&self, event: &'static str) {
        if self.active_embeds.load(Ordering::SeqCst) > 0 {
            self.overlap_violations.fetch_add(1, Ordering::SeqCst);
        }
        self.release_threads.lock().unwrap().push(thread::current().id());
        self.record(event);
    }
}

/// In-memory backend producing deterministic vectors of a fixed length.
pub struct MockBackend {
    pub probe: Arc<Probe>,
    dimensions: usize,
    load_delay: Duration,
    embed_delay: Duration,
}

impl MockBackend {
    pub fn new(dimensions: usize) -> Self {
        Self {
            probe: Arc::new(Probe::default()),
            dimensions,
            load_delay: Duration::ZERO,
            embed_delay: Duration::ZERO,
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_embed_delay(mut self, delay: Duration) -> Self {
        self.embed_delay = delay;
        self
    }
}

impl InferenceBackend for MockBackend {
    fn load_model(
        &self,
        path: &Path,
        gpu_layers: GpuLayers,
    ) -> Result<Box<dyn LoadedModel>, NativeError> {
        self.probe.load_calls.fetch_add(1, Ordering::SeqCst);
        *self.probe.last_path.lock().unwrap() = Some(path.to_path_buf());
        *self.probe.last_gpu_layers.lock().unwrap() = Some(gpu_layers);
        thread::sleep(self.load_delay);

        if self.probe.fail_load.load(Ordering::SeqCst) {
            return Err(NativeError::ModelNotFound(path.display().to_string()));
        }
        self.probe.record("load_model");
        Ok(Box::new(MockModel {
            probe: Arc::clone(&self.probe),
            dimensions: self.dimensions,
            embed_delay: self.embed_delay,
        }))
    }
}

struct MockModel {
    probe: Arc<Probe>,
    dimensions: usize,
    embed_delay: Duration,
}

impl LoadedModel for MockModel {
    fn create_embedding_context(&self) -> Result<Box<dyn EmbeddingContext>, NativeError> {
        self.probe.context_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe.fail_context.load(Ordering::SeqCst) {
            return Err(NativeError::InvalidConfig("context size too large".to_string()));
        }
        self.probe.record("create_context");
        Ok(Box::new(MockContext {
            probe: Arc::clone(&self.probe),
            dimensions: self.dimensions,
            embed_delay: self.embed_delay,
        }))
    }

    fn release(self: Box<Self>) {
        self.probe.model_releases.fetch_add(1, Ordering::SeqCst);
        self.probe.record_release("release_model");
    }
}

struct MockContext {
    probe: Arc<Probe>,
    dimensions: usize,
    embed_delay: Duration,
}

impl EmbeddingContext for MockContext {
    fn embed(&mut self, text: &str) -> Result<Vec<f32>, NativeError> {
        if self.probe.active_embeds.fetch_add(1, Ordering::SeqCst) > 0 {
            self.probe.overlap_violations.fetch_add(1, Ordering::SeqCst);
        }
        self.probe.embed_calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.embed_delay);
        self.probe.active_embeds.fetch_sub(1, Ordering::SeqCst);

        if text == BAD_INPUT {
            return Err(NativeError::InvalidInput("unsupported characters".to_string()));
        }
        Ok(vec![text.len() as f32; self.dimensions])
    }

    fn release(self: Box<Self>) {
        self.probe.context_releases.fetch_add(1, Ordering::SeqCst);
        self.probe.record_release("release_context");
    }
}

/// Temporary model/metadata locations for one test.
pub struct TestEnv {
    pub temp: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.temp.path().join("state").join("embedding-metadata.json")
    }

    /// Config for `model` with idle eviction disabled.
    pub fn config(&self, model: &str, dimensions: usize) -> ManagerConfig {
        ManagerConfig::new(
            model,
            self.temp.path().join("models"),
            dimensions,
            self.metadata_path(),
        )
        .with_idle_timeout(Duration::ZERO)
    }
}

/// Build a manager over a mock backend, returning the probe alongside.
pub fn manager_with(config: ManagerConfig, backend: MockBackend) -> (ResourceManager, Arc<Probe>) {
    let probe = Arc::clone(&backend.probe);
    let manager = ResourceManager::new(config, backend).expect("Failed to create manager");
    (manager, probe)
}
