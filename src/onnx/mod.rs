//! ONNX Runtime backend
//!
//! Tokenization, inference and pooling for sentence-transformers models

pub mod onnx_engine;
pub use onnx_engine::{normalize_embedding, pool_embeddings, OnnxConfig, OnnxEmbeddingEngine};
