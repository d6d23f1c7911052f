//! Hyper-based HTTP Server
//!
//! Direct Hyper implementation, no routing framework:
//! - `GET  /health` - readiness and configured model
//! - `POST /embed`  - embed a list of texts

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::body::HttpBody;
use hyper::header::{HeaderValue, ALLOW, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use tokio::net::TcpSocket;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::models::EmbeddingModelHost;
use crate::protocol::http::{HealthResponse, HttpEmbedRequest, HttpEmbedResponse, HttpErrorResponse};
use crate::server::config::ServerConfig;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state for the Hyper server
#[derive(Clone)]
pub struct ServerState {
    host: Arc<EmbeddingModelHost>,
    config: Arc<ServerConfig>,
}

impl ServerState {
    pub fn new(host: Arc<EmbeddingModelHost>, config: Arc<ServerConfig>) -> Self {
        Self { host, config }
    }
}

/// Bind the configured address and serve until Ctrl+C
pub async fn start_hyper_http_server(
    config: Arc<ServerConfig>,
    host: Arc<EmbeddingModelHost>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = bind_listener(&config)?;
    let state = ServerState::new(host, config);
    serve(listener, state, shutdown_signal()).await
}

/// Create the listening socket
pub fn bind_listener(config: &ServerConfig) -> Result<std::net::TcpListener, Box<dyn std::error::Error>> {
    let addr: SocketAddr = config.bind_addr()?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    // Nagle buffers small JSON responses; turn it off
    socket.set_nodelay(true)?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(config.network.listen_backlog)?;

    Ok(listener.into_std()?)
}

/// Serve HTTP on an already bound listener until `shutdown` resolves
pub async fn serve<F>(
    listener: std::net::TcpListener,
    state: ServerState,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()>,
{
    let local_addr = listener.local_addr()?;

    let make_svc = make_service_fn(move |_| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let state = state.clone();
                handle_request(req, state)
            }))
        }
    });

    let server = Server::from_tcp(listener)?
        .http1_keepalive(true)
        .tcp_nodelay(true)
        .tcp_sleep_on_accept_errors(true)
        .serve(make_svc)
        .with_graceful_shutdown(shutdown);

    info!("✅ HTTP server listening on {}", local_addr);
    info!("📍 Endpoints:");
    info!("   POST /embed      - Generate embeddings");
    info!("   GET  /health     - Health check");

    server.await?;
    info!("🛑 HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for Ctrl+C: {}", e);
        // Keep serving rather than exit immediately
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown signal received");
}

/// Route a request and tag the response with a request id
pub async fn handle_request(
    req: Request<Body>,
    state: ServerState,
) -> Result<Response<Body>, Infallible> {
    let request_id = Uuid::new_v4();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let span = info_span!("request", id = %request_id, %method, %path);

    let mut response = async {
        match (&method, path.as_str()) {
            (&Method::POST, "/embed") => handle_embed(req, &state).await,
            (&Method::GET, "/health") => handle_health(&state),
            (_, "/embed") => method_not_allowed("POST"),
            (_, "/health") => method_not_allowed("GET"),
            _ => error_response(StatusCode::NOT_FOUND, HttpErrorResponse::not_found()),
        }
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    Ok(response)
}

/// Health check endpoint
fn handle_health(state: &ServerState) -> Response<Body> {
    debug!("🏥 Health check requested");
    json_response(StatusCode::OK, &HealthResponse::healthy(state.host.model_name()))
}

/// Embedding endpoint
async fn handle_embed(req: Request<Body>, state: &ServerState) -> Response<Body> {
    let start_time = Instant::now();
    let limit = state.config.network.max_body_bytes;

    let declared_len = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.map_or(false, |len| len > limit) {
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, HttpErrorResponse::payload_too_large(limit));
    }

    let body_bytes = match read_body(req.into_body(), limit).await {
        Ok(bytes) => bytes,
        Err(BodyError::TooLarge) => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, HttpErrorResponse::payload_too_large(limit));
        }
        Err(BodyError::Read(e)) => {
            warn!("Failed to read request body: {}", e);
            return error_response(
                StatusCode::BAD_REQUEST,
                HttpErrorResponse::new("Failed to read request body"),
            );
        }
    };

    let request: HttpEmbedRequest = match serde_json::from_slice(&body_bytes) {
        Ok(req) => req,
        Err(e) => {
            debug!("Rejected embed body: {}", e);
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                HttpErrorResponse::invalid_json(e.to_string()),
            );
        }
    };

    if let Err(msg) = request.validate() {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, HttpErrorResponse::validation(msg));
    }

    let model_name = state.host.model_name();
    let cleaned = request.cleaned_texts();
    if cleaned.is_empty() {
        debug!("All {} texts blank, skipping inference", request.texts.len());
        return json_response(StatusCode::OK, &HttpEmbedResponse::empty(model_name));
    }

    let embed_start = Instant::now();
    match state.host.encode(&cleaned, request.normalize).await {
        Ok(embeddings) => {
            let response = HttpEmbedResponse::new(model_name, embeddings);
            info!(
                texts = cleaned.len(),
                dim = response.dim,
                normalize = request.normalize,
                "⏱️  Embedded in {:?} (total {:?})",
                embed_start.elapsed(),
                start_time.elapsed()
            );
            json_response(StatusCode::OK, &response)
        }
        Err(e) => {
            error!("❌ Embedding generation failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                HttpErrorResponse::internal_error(e.to_string()),
            )
        }
    }
}

enum BodyError {
    TooLarge,
    Read(hyper::Error),
}

/// Buffer the body, giving up as soon as it grows past `limit` bytes
async fn read_body(mut body: Body, limit: usize) -> Result<Vec<u8>, BodyError> {
    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(BodyError::Read)?;
        if buf.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

fn method_not_allowed(allow: &'static str) -> Response<Body> {
    let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED, HttpErrorResponse::method_not_allowed());
    response.headers_mut().insert(ALLOW, HeaderValue::from_static(allow));
    response
}

/// Helper to create error responses
fn error_response(status: StatusCode, error: HttpErrorResponse) -> Response<Body> {
    json_response(status, &error)
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, bytes),
        Err(e) => {
            error!("❌ Failed to serialize response: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"error":"Failed to serialize response","code":"INTERNAL_ERROR"}"#.to_vec(),
            )
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::manager::tests::FakeModel;
    use hyper::body::{to_bytes, Bytes};
    use serde_json::Value;
    use std::time::Duration;

    const DIM: usize = 8;
    const MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

    fn state_with(model: FakeModel, batch_size: usize) -> ServerState {
        let mut config = ServerConfig::default();
        config.network.max_body_bytes = 1024;
        let host = EmbeddingModelHost::with_model(MODEL, Arc::new(model), batch_size);
        ServerState::new(Arc::new(host), Arc::new(config))
    }

    fn state() -> ServerState {
        state_with(FakeModel::new(DIM), 64)
    }

    async fn call(state: ServerState, method: Method, path: &str, body: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(path)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = handle_request(req, state).await.unwrap();
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn embed(body: &str) -> (StatusCode, Value) {
        call(state(), Method::POST, "/embed", body).await
    }

    fn norm(vector: &Value) -> f64 {
        vector
            .as_array()
            .unwrap()
            .iter()
            .map(|x| x.as_f64().unwrap().powi(2))
            .sum::<f64>()
            .sqrt()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(state(), Method::GET, "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"ok": true, "model": MODEL}));
    }

    #[tokio::test]
    async fn test_embed_one_vector_per_clean_text() {
        let (status, body) = embed(r#"{"texts": ["alpha", "  ", "beta gamma", ""]}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model"], MODEL);
        assert_eq!(body["dim"], DIM);
        let embeddings = body["embeddings"].as_array().unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0], serde_json::json!(FakeModel::vector_for("alpha", DIM)));
        assert_eq!(embeddings[1], serde_json::json!(FakeModel::vector_for("beta gamma", DIM)));
    }

    #[tokio::test]
    async fn test_embed_keeps_input_order_across_batches() {
        // Mixed lengths with a batch size of 2 forces the length sort to reorder
        let state = state_with(FakeModel::new(DIM), 2);
        let texts = ["hi", "a considerably longer text", " ", "mid length", "x", "longest of them all, by far"];
        let body = serde_json::json!({ "texts": texts }).to_string();

        let (status, body) = call(state, Method::POST, "/embed", &body).await;
        assert_eq!(status, StatusCode::OK);
        let expected: Vec<Value> = texts
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| serde_json::json!(FakeModel::vector_for(t, DIM)))
            .collect();
        assert_eq!(body["embeddings"].as_array().unwrap(), &expected);
    }

    #[tokio::test]
    async fn test_embed_blank_texts_short_circuit() {
        let (status, body) = embed(r#"{"texts": ["  ", ""]}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"model": MODEL, "dim": 0, "embeddings": []}));
    }

    #[tokio::test]
    async fn test_embed_whitespace_insensitive() {
        let (_, padded) = embed(r#"{"texts": [" hello "]}"#).await;
        let (_, bare) = embed(r#"{"texts": ["hello"]}"#).await;
        assert_eq!(padded["embeddings"], bare["embeddings"]);
    }

    #[tokio::test]
    async fn test_embed_normalize() {
        let (status, body) = embed(r#"{"texts": ["hello"], "normalize": true}"#).await;
        assert_eq!(status, StatusCode::OK);
        let embeddings = body["embeddings"].as_array().unwrap();
        assert_eq!(embeddings.len(), 1);
        assert!((norm(&embeddings[0]) - 1.0).abs() < 1e-5);

        let (_, raw) = embed(r#"{"texts": ["hello"]}"#).await;
        assert!(norm(&raw["embeddings"][0]) > 1.0);
    }

    #[tokio::test]
    async fn test_embed_validation_errors() {
        let (status, body) = embed(r#"{"texts": []}"#).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        for bad in [r#"{"normalize": true}"#, r#"{"texts": [1]}"#, "not json", ""] {
            let (status, body) = embed(bad).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "body: {}", bad);
            assert_eq!(body["code"], "INVALID_JSON");
        }
    }

    #[tokio::test]
    async fn test_embed_body_too_large() {
        let big = format!(r#"{{"texts": ["{}"]}}"#, "x".repeat(2048));
        let (status, body) = embed(&big).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
    }

    #[tokio::test]
    async fn test_embed_chunked_body_over_limit_rejected_early() {
        let (mut sender, body) = Body::channel();
        // The sender comes back as the task output, so the stream never ends
        let _feeder = tokio::spawn(async move {
            for _ in 0..64 {
                if sender.send_data(Bytes::from(vec![b'x'; 1024])).await.is_err() {
                    break;
                }
            }
            sender
        });

        let req = Request::builder().method(Method::POST).uri("/embed").body(body).unwrap();
        assert!(!req.headers().contains_key(CONTENT_LENGTH));
        let response = tokio::time::timeout(Duration::from_secs(3), handle_request(req, state()))
            .await
            .expect("oversized chunked body must be rejected before the stream ends")
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let bytes = to_bytes(response.into_body()).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
    }

    #[tokio::test]
    async fn test_inference_failure_is_internal_error() {
        let state = state_with(FakeModel::failing(), 64);
        let (status, body) = call(state, Method::POST, "/embed", r#"{"texts": ["hello"]}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn test_routing_errors() {
        let (status, body) = call(state(), Method::GET, "/nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        let req = Request::builder().method(Method::GET).uri("/embed").body(Body::empty()).unwrap();
        let response = handle_request(req, state()).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "POST");
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let mut config = ServerConfig::default();
        config.network.bind_address = "127.0.0.1:0".to_string();
        let listener = bind_listener(&config).unwrap();
        let addr = listener.local_addr().unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = serve(listener, state(), async {
            stop_rx.await.ok();
        });

        let client_side = async move {
            let client = hyper::Client::new();
            let req = Request::builder()
                .method(Method::POST)
                .uri(format!("http://{}/embed", addr))
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"texts": ["one", "two", "three"]}"#))
                .unwrap();
            let response = client.request(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = to_bytes(response.into_body()).await.unwrap();
            let body: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(body["embeddings"].as_array().unwrap().len(), 3);
            stop_tx.send(()).unwrap();
        };

        let (served, ()) = tokio::join!(server, client_side);
        served.unwrap();
    }
}
