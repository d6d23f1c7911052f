//! HTTP REST API Protocol
//!
//! JSON bodies of the two endpoints:
//! - `GET /health`  -> `{"ok": true, "model": "..."}`
//! - `POST /embed`  <- `{"texts": ["..."], "normalize": false}`
//!                  -> `{"model": "...", "dim": 384, "embeddings": [[...], ...]}`

use serde::{Deserialize, Serialize};

/// HTTP Embedding Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEmbedRequest {
    /// Texts to embed, at least one
    pub texts: Vec<String>,

    /// L2-normalize the returned vectors
    #[serde(default)]
    pub normalize: bool,
}

impl HttpEmbedRequest {
    /// Validate the request shape
    pub fn validate(&self) -> Result<(), String> {
        if self.texts.is_empty() {
            return Err("texts must contain at least 1 item".to_string());
        }
        Ok(())
    }

    /// Trimmed texts with blank entries dropped, original order kept
    pub fn cleaned_texts(&self) -> Vec<String> {
        self.texts
            .iter()
            .map(|t| t.trim_matches(is_blank))
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Unicode whitespace plus the ASCII information separators U+001C..=U+001F
fn is_blank(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

/// HTTP Embedding Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEmbedResponse {
    pub model: String,
    /// Vector length, 0 when there were no usable texts
    pub dim: usize,
    pub embeddings: Vec<Vec<f32>>,
}

impl HttpEmbedResponse {
    /// Create a response; `dim` comes from the first vector
    pub fn new(model: impl Into<String>, embeddings: Vec<Vec<f32>>) -> Self {
        let dim = embeddings.first().map(Vec::len).unwrap_or(0);
        Self {
            model: model.into(),
            dim,
            embeddings,
        }
    }

    /// Response for a request whose texts were all blank
    pub fn empty(model: impl Into<String>) -> Self {
        Self::new(model, Vec::new())
    }
}

/// HTTP Error Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    /// Error message
    pub error: String,

    /// Error code (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Additional details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl HttpErrorResponse {
    /// Create a new error response
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            details: None,
        }
    }

    /// Create error with code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Create error with details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Body could not be parsed as an embed request
    pub fn invalid_json(details: impl Into<String>) -> Self {
        Self::new("Request body is not a valid embed request")
            .with_code("INVALID_JSON")
            .with_details(details)
    }

    /// Body parsed but failed validation
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message).with_code("VALIDATION_ERROR")
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(format!("Request body exceeds {} bytes", limit)).with_code("PAYLOAD_TOO_LARGE")
    }

    pub fn not_found() -> Self {
        Self::new("Not Found").with_code("NOT_FOUND")
    }

    pub fn method_not_allowed() -> Self {
        Self::new("Method Not Allowed").with_code("METHOD_NOT_ALLOWED")
    }

    /// Create internal error
    pub fn internal_error(details: impl Into<String>) -> Self {
        Self::new("Internal server error occurred during embedding generation")
            .with_code("INTERNAL_ERROR")
            .with_details(details)
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub model: String,
}

impl HealthResponse {
    pub fn healthy(model: impl Into<String>) -> Self {
        Self {
            ok: true,
            model: model.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_request_defaults_normalize() {
        let req: HttpEmbedRequest = serde_json::from_str(r#"{"texts": ["a"]}"#).unwrap();
        assert_eq!(req.texts, vec!["a"]);
        assert!(!req.normalize);
    }

    #[test]
    fn test_embed_request_requires_texts() {
        assert!(serde_json::from_str::<HttpEmbedRequest>(r#"{"normalize": true}"#).is_err());
        assert!(serde_json::from_str::<HttpEmbedRequest>(r#"{"texts": "hello"}"#).is_err());
        assert!(serde_json::from_str::<HttpEmbedRequest>(r#"{"texts": [1, 2]}"#).is_err());
    }

    #[test]
    fn test_embed_request_validation() {
        let req = HttpEmbedRequest {
            texts: vec![],
            normalize: false,
        };
        assert!(req.validate().is_err());

        let req = HttpEmbedRequest {
            texts: vec!["   ".to_string()],
            normalize: false,
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_cleaned_texts() {
        let req = HttpEmbedRequest {
            texts: vec![
                " hello ".to_string(),
                "".to_string(),
                "\t\n".to_string(),
                "world".to_string(),
                "\u{3000}wide\u{3000}".to_string(),
            ],
            normalize: false,
        };
        assert_eq!(req.cleaned_texts(), vec!["hello", "world", "wide"]);
    }

    #[test]
    fn test_cleaned_texts_strips_ascii_separators() {
        let req: HttpEmbedRequest =
            serde_json::from_str(r#"{"texts": ["\u001f", "\u001c\u001d", "\u001eid\u001f"]}"#).unwrap();
        assert_eq!(req.cleaned_texts(), vec!["id"]);
    }

    #[test]
    fn test_embed_response_dim() {
        let response = HttpEmbedResponse::new("m", vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]]);
        assert_eq!(response.dim, 3);

        let response = HttpEmbedResponse::empty("m");
        assert_eq!(response.dim, 0);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({"model": "m", "dim": 0, "embeddings": []})
        );
    }

    #[test]
    fn test_health_shape() {
        let health = HealthResponse::healthy("sentence-transformers/all-MiniLM-L6-v2");
        assert_eq!(
            serde_json::to_value(&health).unwrap(),
            serde_json::json!({"ok": true, "model": "sentence-transformers/all-MiniLM-L6-v2"})
        );
    }

    #[test]
    fn test_error_response() {
        let err = HttpErrorResponse::new("Test error")
            .with_code("TEST_ERROR")
            .with_details("Additional details");

        assert_eq!(err.error, "Test error");
        assert_eq!(err.code, Some("TEST_ERROR".to_string()));
        assert_eq!(err.details, Some("Additional details".to_string()));

        let json = serde_json::to_value(HttpErrorResponse::not_found()).unwrap();
        assert!(json.get("details").is_none());
    }
}
