//! Candle-based inference binding.
//!
//! Loads BERT-family sentence-embedding models (e.g. all-MiniLM-L6-v2) from a
//! local model bundle and produces mean-pooled, L2-normalized vectors.

use std::path::Path;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use embed_types::GpuLayers;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::backend::{EmbeddingContext, InferenceBackend, LoadedModel};
use crate::bundle::ModelBundle;
use crate::embedding::Embedding;
use crate::error::NativeError;

/// Maximum sequence length
pub const MAX_SEQ_LENGTH: usize = 256;

/// Candle implementation of [`InferenceBackend`].
#[derive(Debug, Clone, Default)]
pub struct CandleBackend;

impl CandleBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Pick a device for the requested acceleration.
///
/// `Auto` falls back to CPU when no accelerator is present; an explicit
/// non-zero layer count does not.
fn select_device(gpu_layers: GpuLayers) -> Result<Device, NativeError> {
    if !gpu_layers.wants_accelerator() {
        return Ok(Device::Cpu);
    }

    let accelerated = if cfg!(target_os = "macos") {
        Device::new_metal(0)
    } else {
        Device::new_cuda(0)
    };

    match (accelerated, gpu_layers) {
        (Ok(device), GpuLayers::Count(n)) => {
            // Candle places the whole model on one device.
            debug!(requested = n, "Offloading all layers to accelerator");
            Ok(device)
        }
        (Ok(device), GpuLayers::Auto) => Ok(device),
        (Err(e), GpuLayers::Auto) => {
            debug!(error = %e, "No accelerator available, using CPU");
            Ok(Device::Cpu)
        }
        (Err(e), GpuLayers::Count(n)) => Err(NativeError::UnsupportedDevice(format!(
            "{} gpu layers requested but no accelerator is available: {}",
            n, e
        ))),
    }
}

/// Read `hidden_size` from a BERT config file
fn hidden_size(config_str: &str) -> Result<usize, NativeError> {
    let value: serde_json::Value = serde_json::from_str(config_str)
        .map_err(|e| NativeError::InvalidConfig(e.to_string()))?;
    value
        .get("hidden_size")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .ok_or_else(|| NativeError::InvalidConfig("missing hidden_size".to_string()))
}

impl InferenceBackend for CandleBackend {
    fn load_model(
        &self,
        path: &Path,
        gpu_layers: GpuLayers,
    ) -> Result<Box<dyn LoadedModel>, NativeError> {
        let bundle = ModelBundle::resolve(path)?;
        info!(path = ?bundle.root, gpu_layers = %gpu_layers, "Loading embedding model...");

        let device = select_device(gpu_layers)?;

        // Load config
        let config_str = std::fs::read_to_string(&bundle.config)?;
        let config: BertConfig = serde_json::from_str(&config_str)
            .map_err(|e| NativeError::InvalidConfig(e.to_string()))?;
        let dimension = hidden_size(&config_str)?;

        // Load tokenizer
        let tokenizer = Tokenizer::from_file(&bundle.tokenizer)
            .map_err(|e| NativeError::Tokenizer(e.to_string()))?;

        // Load model weights
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[bundle.weights.clone()], DType::F32, &device)?
        };

        let model = BertModel::load(vb, &config)?;

        info!(
            dim = dimension,
            max_seq = MAX_SEQ_LENGTH,
            device = ?device,
            "Model loaded successfully"
        );

        Ok(Box::new(CandleModel {
            weights: Arc::new(CandleWeights {
                model,
                tokenizer,
                device,
                dimension,
            }),
        }))
    }
}

/// Weights shared between a model handle and its contexts
struct CandleWeights {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

/// Loaded Candle model handle.
pub struct CandleModel {
    weights: Arc<CandleWeights>,
}

impl LoadedModel for CandleModel {
    fn create_embedding_context(&self) -> Result<Box<dyn EmbeddingContext>, NativeError> {
        debug!(dim = self.weights.dimension, "Creating embedding context");
        Ok(Box::new(CandleContext {
            weights: Arc::clone(&self.weights),
        }))
    }

    fn release(self: Box<Self>) {
        debug!(
            dim = self.weights.dimension,
            "Releasing model weights"
        );
        drop(self);
    }
}

/// Embedding context over a loaded Candle model.
pub struct CandleContext {
    weights: Arc<CandleWeights>,
}

impl CandleContext {
    /// Mean pooling over token embeddings (excluding padding)
    fn mean_pooling(
        embeddings: &Tensor,
        attention_mask: &Tensor,
    ) -> Result<Tensor, NativeError> {
        let mask = attention_mask
            .unsqueeze(2)?
            .broadcast_as(embeddings.shape())?;
        let mask_f32 = mask.to_dtype(DType::F32)?;

        let sum = embeddings.broadcast_mul(&mask_f32)?.sum(1)?;

        // Divide by number of real tokens
        let mask_sum = mask_f32.sum(1)?.clamp(1e-9, f64::MAX)?;

        Ok(sum.broadcast_div(&mask_sum)?)
    }
}

impl EmbeddingContext for CandleContext {
    fn embed(&mut self, text: &str) -> Result<Vec<f32>, NativeError> {
        let weights = &self.weights;

        let encoding = weights
            .tokenizer
            .encode(text, true)
            .map_err(|e| NativeError::Tokenizer(e.to_string()))?;

        let len = encoding.get_ids().len().min(MAX_SEQ_LENGTH);
        if len == 0 {
            return Err(NativeError::InvalidInput(
                "text produced no tokens".to_string(),
            ));
        }
        let ids = encoding.get_ids()[..len].to_vec();
        let mask = encoding.get_attention_mask()[..len].to_vec();

        let input_ids = Tensor::from_vec(ids, (1, len), &weights.device)?;
        let attention_mask = Tensor::from_vec(mask, (1, len), &weights.device)?;
        let token_type_ids = Tensor::zeros_like(&input_ids)?;

        let output = weights
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        let pooled = Self::mean_pooling(&output, &attention_mask)?;
        let row = pooled
            .to_vec2::<f32>()?
            .into_iter()
            .next()
            .ok_or_else(|| NativeError::InvalidInput("empty model output".to_string()))?;

        let embedding = Embedding::new(row);
        if embedding.dimension() != weights.dimension {
            return Err(NativeError::DimensionMismatch {
                expected: weights.dimension,
                actual: embedding.dimension(),
            });
        }

        debug!(tokens = len, dim = embedding.dimension(), "Embedded text");
        Ok(embedding.into_vec())
    }

    fn release(self: Box<Self>) {
        debug!("Releasing embedding context");
        drop(self);
    }
}
