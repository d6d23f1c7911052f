//! Embedding Model Host
//!
//! Owns the single model loaded at startup and exposes
//! `encode(texts, normalize)`. Texts are sorted by length, split into
//! fixed-size batches, embedded, and put back in input order.

use std::cmp::Reverse;
use std::sync::Arc;

use tracing::debug;

use crate::models::model::{EmbeddingModel, ModelFactory, ModelInfo};
use crate::models::{Embedding, EmbeddingError, EmbeddingResult};
use crate::onnx::{normalize_embedding, OnnxConfig};
use crate::server::config::EmbeddingConfig;

/// Process-wide holder of the loaded embedding model
pub struct EmbeddingModelHost {
    model_name: String,
    model: Arc<dyn EmbeddingModel>,
    batch_size: usize,
}

impl EmbeddingModelHost {
    /// Resolve and load the configured model. Fails if the model cannot be loaded.
    pub async fn load(config: &EmbeddingConfig, onnx_config: &OnnxConfig) -> EmbeddingResult<Self> {
        let model = ModelFactory::create_model(config, onnx_config).await?;
        Ok(Self::with_model(config.model.clone(), model, config.batch_size))
    }

    /// Wrap an already loaded model
    pub fn with_model(
        model_name: impl Into<String>,
        model: Arc<dyn EmbeddingModel>,
        batch_size: usize,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            model,
            batch_size: batch_size.max(1),
        }
    }

    /// Configured model identifier
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn info(&self) -> &ModelInfo {
        self.model.info()
    }

    /// Embed `texts`, returning one vector per text in input order.
    ///
    /// With `normalize`, every vector is scaled to unit L2 length.
    pub async fn encode(&self, texts: &[String], normalize: bool) -> EmbeddingResult<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Longest first keeps padding inside each batch small
        let mut order: Vec<usize> = (0..texts.len()).collect();
        order.sort_by_key(|&i| Reverse(texts[i].chars().count()));

        let mut slots: Vec<Option<Embedding>> = vec![None; texts.len()];
        for chunk in order.chunks(self.batch_size) {
            let batch: Vec<String> = chunk.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.model.embed_batch(&batch).await?;
            if vectors.len() != batch.len() {
                return Err(self.inference_error(format!(
                    "model returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            for (&i, vector) in chunk.iter().zip(vectors) {
                slots[i] = Some(vector);
            }
        }

        let mut embeddings: Vec<Embedding> = slots
            .into_iter()
            .collect::<Option<_>>()
            .ok_or_else(|| self.inference_error("missing embedding for an input text".to_string()))?;

        let dim = embeddings[0].len();
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dim) {
            return Err(self.inference_error(format!(
                "inconsistent embedding dimensions: {} and {}",
                dim,
                bad.len()
            )));
        }

        if normalize {
            embeddings.iter_mut().for_each(|e| normalize_embedding(e));
        }

        debug!(
            "Encoded {} texts in batches of {} (dim {})",
            texts.len(),
            self.batch_size,
            dim
        );
        Ok(embeddings)
    }

    fn inference_error(&self, error: String) -> EmbeddingError {
        EmbeddingError::InferenceError {
            model_name: self.model_name.clone(),
            error,
        }
    }
}
