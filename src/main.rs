//! Sentence Embedding Server Main
//!
//! Loads the configured model, then serves `/health` and `/embed`

use std::sync::Arc;

use sentence_embed_server::{start_hyper_http_server, EmbeddingModelHost, ServerConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = ServerConfig::load()?;

    // Initialize tracing
    let log_level = match config.monitoring.log_level.to_lowercase().as_str() {
        level @ ("trace" | "debug" | "info" | "warn" | "error") => {
            format!("sentence_embed_server={level},{level}")
        }
        _ => "sentence_embed_server=info,info".to_string(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .init();

    info!("🚀 Sentence Embedding Server v{}", env!("CARGO_PKG_VERSION"));
    info!("📊 Log Level: {}", config.monitoring.log_level);
    info!("🧠 Model: {}", config.embedding.model);

    // Model must be ready before the listener binds
    let host = match EmbeddingModelHost::load(&config.embedding, &config.onnx).await {
        Ok(host) => host,
        Err(e) => {
            error!("❌ Failed to load embedding model {}: {}", config.embedding.model, e);
            return Err(e.into());
        }
    };
    info!(
        "✅ Model ready ({} dims, batch size {})",
        host.info().dimension,
        config.embedding.batch_size
    );

    start_hyper_http_server(Arc::new(config), Arc::new(host)).await?;

    Ok(())
}
