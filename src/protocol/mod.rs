//! Wire protocol of the embedding service
//!
//! JSON over HTTP only; see [`http`].

pub mod http;

pub use http::{HealthResponse, HttpEmbedRequest, HttpEmbedResponse, HttpErrorResponse};
