//! Embedding model layer
//!
//! Model resolution, the sentence-transformers pipeline config, the model
//! trait and the process-wide model host.

pub mod config;
pub mod hub;
pub mod manager;
pub mod model;

// Re-exports
pub use config::{PipelineConfig, PoolingMode};
pub use hub::ModelFiles;
pub use manager::EmbeddingModelHost;
pub use model::{EmbeddingModel, ModelInfo};

/// Embedding vector type
pub type Embedding = Vec<f32>;

/// Result type for embedding model operations
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Errors that can occur in embedding model operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model files not found: {model_name} - {error}")]
    ModelNotFound { model_name: String, error: String },

    #[error("Model load failed: {error}")]
    ModelLoadFailed { error: String },

    #[error("Inference failed: {model_name} - {error}")]
    InferenceError { model_name: String, error: String },

    #[error("Embedding failed: {error}")]
    EmbeddingFailed { error: String },

    #[error("IO error: {error}")]
    IoError { error: std::io::Error },

    #[error("JSON parsing error: {error}")]
    JsonError { error: serde_json::Error },
}

impl From<std::io::Error> for EmbeddingError {
    fn from(error: std::io::Error) -> Self {
        EmbeddingError::IoError { error }
    }
}

impl From<serde_json::Error> for EmbeddingError {
    fn from(error: serde_json::Error) -> Self {
        EmbeddingError::JsonError { error }
    }
}
