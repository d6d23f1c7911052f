//! Embedding Server Configuration
//!
//! Defaults, overlaid by an optional TOML file, overlaid by environment
//! variables (`EMBED_MODEL`, `EMBED_BIND_ADDRESS`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::onnx::OnnxConfig;

/// Model used when neither `EMBED_MODEL` nor the config file names one
pub const DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
/// Config file read when present and `EMBED_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

pub const CONFIG_ENV: &str = "EMBED_CONFIG";
pub const MODEL_ENV: &str = "EMBED_MODEL";
pub const BIND_ADDRESS_ENV: &str = "EMBED_BIND_ADDRESS";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub embedding: EmbeddingConfig,
    pub onnx: OnnxConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    /// Largest accepted request body
    pub max_body_bytes: usize,
    pub listen_backlog: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Local model directory or HuggingFace Hub repo id
    pub model: String,
    /// Texts per forward pass
    pub batch_size: usize,
    /// Overrides `max_seq_length` from `sentence_bert_config.json`
    pub max_seq_length: Option<usize>,
    /// HuggingFace cache location, defaults to the hub's own (`HF_HOME`)
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            max_body_bytes: 5242880,
            listen_backlog: 1024,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            batch_size: 64,
            max_seq_length: None,
            cache_dir: None,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: ServerConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load the process configuration: file (if any), then environment overrides
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(&path)
                .map_err(|e| format!("Failed to read config file {}: {}", path, e))?,
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).is_file() => Self::from_file(DEFAULT_CONFIG_FILE)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-style overrides; blank values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(model) = lookup(MODEL_ENV) {
            self.embedding.model = model;
        }
        if let Some(addr) = lookup(BIND_ADDRESS_ENV) {
            self.network.bind_address = addr;
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.embedding.model.trim().is_empty() {
            return Err("embedding.model must not be empty".into());
        }
        if self.embedding.batch_size == 0 {
            return Err("embedding.batch_size must be at least 1".into());
        }
        if self.embedding.max_seq_length == Some(0) {
            return Err("embedding.max_seq_length must be at least 1".into());
        }
        self.bind_addr()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        self.network
            .bind_address
            .parse()
            .map_err(|e| format!("Invalid bind address {}: {}", self.network.bind_address, e).into())
    }
}
