//! # ONNX Embedding Engine
//!
//! Sentence embeddings with ONNX Runtime and a HuggingFace tokenizer.
//!
//! ## Features
//!
//! - Batched tokenization, padded to the longest sequence in the batch
//! - Truncation at the pipeline's `max_seq_length`
//! - Mean, CLS or max pooling over the transformer output
//! - Optional trailing L2 normalization when the pipeline declares it
//!
//! `Session::run` needs exclusive access, so the session sits behind a mutex.
//! All methods here block; async callers go through `spawn_blocking`.

use std::fmt;
use std::sync::Mutex;

use ndarray::{ArrayView3, Axis};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use tokenizers::{PaddingStrategy, Tokenizer};
use tracing::{debug, info, instrument};

use crate::models::{EmbeddingError, EmbeddingResult, ModelFiles, PipelineConfig, PoolingMode};

/// Clamp for the L2 norm, matches `torch.nn.functional.normalize`
const NORM_EPSILON: f32 = 1e-12;
/// Clamp for the attention-mask sum in mean pooling
const MASK_EPSILON: f32 = 1e-9;
/// Fill value for padding positions in max pooling
const MAX_POOL_FILL: f32 = -1e9;

/// Configuration for ONNX Runtime
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OnnxConfig {
    /// Path to the ONNX Runtime library (only used with the `load-dynamic` feature)
    pub library_path: Option<String>,
    /// Intra-op thread pool size for inference
    pub intra_threads: usize,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            intra_threads: 4,
        }
    }
}

/// ONNX-based embedding engine for generating text embeddings
pub struct OnnxEmbeddingEngine {
    /// ONNX Runtime session for model inference
    session: Mutex<Session>,
    /// HuggingFace tokenizer, configured for batch padding and truncation
    tokenizer: Tokenizer,
    pipeline: PipelineConfig,
    /// BERT-style graphs take a third input; most others do not
    use_token_type_ids: bool,
}

impl fmt::Debug for OnnxEmbeddingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnnxEmbeddingEngine")
            .field("pipeline", &self.pipeline)
            .field("use_token_type_ids", &self.use_token_type_ids)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbeddingEngine {
    /// Create a new ONNX embedding engine
    ///
    /// # Arguments
    /// * `files` - Resolved model files (ONNX graph and tokenizer.json)
    /// * `pipeline` - Pooling and normalization settings of the model
    /// * `onnx_config` - ONNX Runtime configuration
    pub fn new(
        files: &ModelFiles,
        pipeline: PipelineConfig,
        onnx_config: &OnnxConfig,
    ) -> EmbeddingResult<Self> {
        info!(
            "Initializing ONNX embedding engine with model: {} ({:?} pooling, max {} tokens)",
            files.model_path.display(),
            pipeline.pooling_mode,
            pipeline.max_seq_length
        );

        configure_runtime_library(onnx_config);

        let session = Session::builder()
            .map_err(|e| load_failed("Failed to create session builder", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_failed("Failed to set optimization level", e))?
            .with_intra_threads(onnx_config.intra_threads)
            .map_err(|e| load_failed("Failed to set intra threads", e))?
            .commit_from_file(&files.model_path)
            .map_err(|e| load_failed("Failed to load ONNX model", e))?;

        let use_token_type_ids = session.inputs.iter().any(|i| i.name == "token_type_ids");

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer_path)
            .map_err(|e| load_failed("Failed to load tokenizer", e))?;

        // Keep the tokenizer's own pad token/id, only force per-batch padding
        let mut padding = tokenizer.get_padding().cloned().unwrap_or_default();
        padding.strategy = PaddingStrategy::BatchLongest;
        tokenizer.with_padding(Some(padding));

        let mut truncation = tokenizer.get_truncation().cloned().unwrap_or_default();
        truncation.max_length = pipeline.max_seq_length;
        tokenizer
            .with_truncation(Some(truncation))
            .map_err(|e| load_failed("Failed to configure truncation", e))?;

        info!(
            "ONNX embedding engine initialized with {} threads (token_type_ids: {})",
            onnx_config.intra_threads, use_token_type_ids
        );
        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            pipeline,
            use_token_type_ids,
        })
    }

    /// Generate embeddings for a batch of texts, one vector per text, in order
    #[instrument(skip(self, texts), fields(text_count = texts.len()))]
    pub fn embed_texts(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let inputs: Vec<String> = if self.pipeline.do_lower_case {
            texts.iter().map(|t| t.to_lowercase()).collect()
        } else {
            texts.to_vec()
        };

        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| embed_failed("Tokenization failed", e))?;

        let batch_size = encodings.len();
        let seq_len = encodings.first().map(|e| e.get_ids().len()).unwrap_or(0);

        let mut input_ids = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask = Vec::with_capacity(batch_size * seq_len);
        let mut token_type_ids = Vec::with_capacity(batch_size * seq_len);
        for encoding in &encodings {
            if encoding.get_ids().len() != seq_len {
                return Err(EmbeddingError::EmbeddingFailed {
                    error: format!(
                        "Unpadded batch: sequence of {} tokens in a batch of {}",
                        encoding.get_ids().len(),
                        seq_len
                    ),
                });
            }
            input_ids.extend(encoding.get_ids().iter().map(|&x| x as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&x| x as i64));
            token_type_ids.extend(encoding.get_type_ids().iter().map(|&x| x as i64));
        }

        let shape = [batch_size as i64, seq_len as i64];
        let input_ids_tensor = Tensor::from_array((shape, input_ids))
            .map_err(|e| embed_failed("Failed to create input_ids tensor", e))?;
        let attention_mask_tensor = Tensor::from_array((shape, attention_mask.clone()))
            .map_err(|e| embed_failed("Failed to create attention_mask tensor", e))?;

        let mut session_inputs = vec![
            ("input_ids", input_ids_tensor),
            ("attention_mask", attention_mask_tensor),
        ];
        if self.use_token_type_ids {
            let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids))
                .map_err(|e| embed_failed("Failed to create token_type_ids tensor", e))?;
            session_inputs.push(("token_type_ids", token_type_ids_tensor));
        }

        let mut session = self.session.lock().map_err(|_| EmbeddingError::EmbeddingFailed {
            error: "ONNX session lock poisoned".to_string(),
        })?;
        let outputs = session
            .run(session_inputs)
            .map_err(|e| embed_failed("ONNX inference failed", e))?;

        // First output is the token-level hidden state [batch, seq_len, hidden]
        let (output_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| embed_failed("Failed to extract output tensor", e))?;
        let dims: Vec<usize> = output_shape.iter().map(|&x| x as usize).collect();
        if dims.len() != 3 || dims[0] != batch_size || dims[1] != seq_len {
            return Err(EmbeddingError::EmbeddingFailed {
                error: format!(
                    "Unexpected output shape {:?} (expected [{}, {}, hidden])",
                    dims, batch_size, seq_len
                ),
            });
        }
        let hidden = ArrayView3::from_shape((dims[0], dims[1], dims[2]), data)
            .map_err(|e| embed_failed("Failed to create output array view", e))?;

        let mut embeddings = pool_embeddings(&hidden, &attention_mask, self.pipeline.pooling_mode);
        if self.pipeline.normalize_output {
            embeddings.iter_mut().for_each(|e| normalize_embedding(e));
        }

        debug!("Generated {} embeddings of dimension {}", embeddings.len(), dims[2]);
        Ok(embeddings)
    }
}

/// Reduce token embeddings `[batch, seq_len, hidden]` to one vector per row.
///
/// `attention_mask` is the flattened `[batch, seq_len]` mask.
pub fn pool_embeddings(
    hidden: &ArrayView3<f32>,
    attention_mask: &[i64],
    mode: PoolingMode,
) -> Vec<Vec<f32>> {
    let (batch_size, seq_len, hidden_size) = hidden.dim();

    (0..batch_size)
        .map(|b| {
            let tokens = hidden.index_axis(Axis(0), b);
            let mask = &attention_mask[b * seq_len..(b + 1) * seq_len];

            match mode {
                PoolingMode::Cls => tokens.row(0).to_vec(),
                PoolingMode::Mean => {
                    let mut pooled = vec![0.0f32; hidden_size];
                    let mut mask_sum = 0.0f32;
                    for (row, &m) in tokens.outer_iter().zip(mask) {
                        let weight = m as f32;
                        mask_sum += weight;
                        for (acc, &v) in pooled.iter_mut().zip(row.iter()) {
                            *acc += v * weight;
                        }
                    }
                    let denom = mask_sum.max(MASK_EPSILON);
                    pooled.iter_mut().for_each(|v| *v /= denom);
                    pooled
                }
                PoolingMode::Max => {
                    let mut pooled = vec![f32::NEG_INFINITY; hidden_size];
                    for (row, &m) in tokens.outer_iter().zip(mask) {
                        for (acc, &v) in pooled.iter_mut().zip(row.iter()) {
                            let v = if m == 0 { MAX_POOL_FILL } else { v };
                            *acc = acc.max(v);
                        }
                    }
                    pooled
                }
            }
        })
        .collect()
}

/// L2-normalize in place. Zero vectors stay zero.
pub fn normalize_embedding(embedding: &mut [f32]) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm.max(NORM_EPSILON);
    embedding.iter_mut().for_each(|x| *x /= denom);
}

#[cfg(feature = "load-dynamic")]
fn configure_runtime_library(onnx_config: &OnnxConfig) {
    if let Some(path) = &onnx_config.library_path {
        std::env::set_var("ORT_DYLIB_PATH", path);
        debug!("Set ORT_DYLIB_PATH to: {}", path);
    }
}

#[cfg(not(feature = "load-dynamic"))]
fn configure_runtime_library(onnx_config: &OnnxConfig) {
    if onnx_config.library_path.is_some() {
        debug!("onnx.library_path ignored: built without the load-dynamic feature");
    }
}

fn load_failed(context: &str, e: impl fmt::Display) -> EmbeddingError {
    EmbeddingError::ModelLoadFailed {
        error: format!("{}: {}", context, e),
    }
}

fn embed_failed(context: &str, e: impl fmt::Display) -> EmbeddingError {
    EmbeddingError::EmbeddingFailed {
        error: format!("{}: {}", context, e),
    }
}
