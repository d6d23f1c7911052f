//! Model definitions and traits
//!
//! [`EmbeddingModel`] is the seam between the model host and a concrete
//! backend. The only production backend is ONNX Runtime.

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{Embedding, EmbeddingResult, PoolingMode};

/// Information about a loaded model
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Model identifier as configured
    pub name: String,
    /// Embedding dimension, measured at load time
    pub dimension: usize,
    pub max_sequence_length: usize,
    pub pooling_mode: PoolingMode,
    /// Whether the pipeline itself ends in a Normalize stage
    pub normalize_output: bool,
}

/// Core embedding model trait
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Get model information
    fn info(&self) -> &ModelInfo;

    /// Embed one batch of texts, one vector per text, in input order
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>>;
}

/// ONNX-based embedding model implementation
pub mod onnx {
    use super::*;
    use tracing::info;

    use crate::models::{EmbeddingError, ModelFiles, PipelineConfig};
    use crate::onnx::{OnnxConfig, OnnxEmbeddingEngine};
    use crate::server::config::EmbeddingConfig;

    /// ONNX embedding model
    pub struct OnnxEmbeddingModel {
        info: ModelInfo,
        engine: Arc<OnnxEmbeddingEngine>,
    }

    impl OnnxEmbeddingModel {
        /// Resolve, load and probe the configured model. Blocking.
        pub fn load(config: &EmbeddingConfig, onnx_config: &OnnxConfig) -> EmbeddingResult<Self> {
            let files = ModelFiles::resolve(&config.model, config.cache_dir.as_deref())?;
            let pipeline = PipelineConfig::from_files(&files)?.with_max_seq_length(config.max_seq_length);
            let engine = OnnxEmbeddingEngine::new(&files, pipeline.clone(), onnx_config)?;

            // Probe once so the dimension is known before serving
            let probe = engine.embed_texts(&["dimension probe".to_string()])?;
            let dimension = probe.first().map(Vec::len).ok_or_else(|| EmbeddingError::ModelLoadFailed {
                error: "Model returned no embedding for the probe text".to_string(),
            })?;

            info!(
                "✅ Loaded {} ({} dims, {:?} pooling, normalized: {})",
                config.model, dimension, pipeline.pooling_mode, pipeline.normalize_output
            );

            Ok(Self {
                info: ModelInfo {
                    name: config.model.clone(),
                    dimension,
                    max_sequence_length: pipeline.max_seq_length,
                    pooling_mode: pipeline.pooling_mode,
                    normalize_output: pipeline.normalize_output,
                },
                engine: Arc::new(engine),
            })
        }
    }

    #[async_trait]
    impl EmbeddingModel for OnnxEmbeddingModel {
        fn info(&self) -> &ModelInfo {
            &self.info
        }

        async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>> {
            let engine = Arc::clone(&self.engine);
            let texts = texts.to_vec();
            let model_name = self.info.name.clone();

            tokio::task::spawn_blocking(move || engine.embed_texts(&texts))
                .await
                .map_err(|e| EmbeddingError::InferenceError {
                    model_name: model_name.clone(),
                    error: format!("Inference task failed: {}", e),
                })?
                .map_err(|e| EmbeddingError::InferenceError {
                    model_name,
                    error: e.to_string(),
                })
        }
    }
}

/// Factory for creating embedding models
pub struct ModelFactory;

impl ModelFactory {
    /// Load the configured model off the async runtime
    pub async fn create_model(
        config: &crate::server::config::EmbeddingConfig,
        onnx_config: &crate::onnx::OnnxConfig,
    ) -> EmbeddingResult<Arc<dyn EmbeddingModel>> {
        let config = config.clone();
        let onnx_config = onnx_config.clone();

        let model = tokio::task::spawn_blocking(move || onnx::OnnxEmbeddingModel::load(&config, &onnx_config))
            .await
            .map_err(|e| crate::models::EmbeddingError::ModelLoadFailed {
                error: format!("Model loading task failed: {}", e),
            })??;

        Ok(Arc::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmbeddingModelHost;
    use crate::onnx::OnnxConfig;
    use crate::server::config::EmbeddingConfig;

    /// Downloads the default model; run with `--ignored` when the hub is reachable
    #[tokio::test]
    #[ignore]
    async fn test_default_model_end_to_end() {
        let config = EmbeddingConfig::default();
        let host = EmbeddingModelHost::load(&config, &OnnxConfig::default()).await.unwrap();
        assert_eq!(host.info().dimension, 384);
        assert_eq!(host.info().pooling_mode, PoolingMode::Mean);

        let texts = vec!["hello".to_string(), "a much longer sentence about embeddings".to_string()];
        let vectors = host.encode(&texts, true).await.unwrap();
        assert_eq!(vectors.len(), 2);
        for v in &vectors {
            assert_eq!(v.len(), 384);
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }

        // Same text alone and inside a padded batch gives the same vector
        let alone = host.encode(&texts[..1], true).await.unwrap();
        let diff: f32 = alone[0].iter().zip(&vectors[0]).map(|(a, b)| (a - b).abs()).sum();
        assert!(diff < 1e-3);
    }
}
