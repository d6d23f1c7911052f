//! Sentence Embedding Server Library
//!
//! One sentence-transformers model, loaded once, served over HTTP

pub mod models;
pub mod onnx;
pub mod protocol;
pub mod server;

// Re-exports
pub use models::{Embedding, EmbeddingError, EmbeddingModelHost};
pub use protocol::{HealthResponse, HttpEmbedRequest, HttpEmbedResponse};
pub use server::{start_hyper_http_server, ServerConfig};
