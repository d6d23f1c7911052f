//! Model file resolution
//!
//! The configured model identifier is either a local directory laid out like a
//! sentence-transformers repo, or a HuggingFace Hub repo id such as
//! `sentence-transformers/all-MiniLM-L6-v2`. Hub files are downloaded once into
//! the standard HF cache (or `embedding.cache_dir`) and reused afterwards.

use std::path::{Path, PathBuf};

use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use tracing::{debug, info};

use crate::models::{EmbeddingError, EmbeddingResult};

/// Candidate locations of the ONNX graph, in lookup order
pub const ONNX_MODEL_FILES: [&str; 2] = ["onnx/model.onnx", "model.onnx"];
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const MODULES_FILE: &str = "modules.json";
pub const POOLING_CONFIG_FILE: &str = "1_Pooling/config.json";
pub const SENTENCE_CONFIG_FILE: &str = "sentence_bert_config.json";

/// Local paths of everything needed to build the embedding pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub modules_path: Option<PathBuf>,
    pub pooling_config_path: Option<PathBuf>,
    pub sentence_config_path: Option<PathBuf>,
}

impl ModelFiles {
    /// Resolve a model identifier to local files.
    ///
    /// Blocking: may perform network I/O for hub models.
    pub fn resolve(model_id: &str, cache_dir: Option<&Path>) -> EmbeddingResult<Self> {
        let local = Path::new(model_id);
        if local.is_dir() {
            info!("📂 Loading model from local directory {}", local.display());
            return Self::from_dir(model_id, local);
        }

        info!("🌐 Resolving {} from the HuggingFace Hub", model_id);
        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(dir) = cache_dir {
            builder = builder.with_cache_dir(dir.to_path_buf());
        }
        let api = builder.build().map_err(|e| EmbeddingError::ModelNotFound {
            model_name: model_id.to_string(),
            error: format!("Failed to initialise hub client: {}", e),
        })?;
        Self::from_hub(model_id, &api.model(model_id.to_string()))
    }

    /// Resolve files from a local directory
    pub fn from_dir(model_id: &str, dir: &Path) -> EmbeddingResult<Self> {
        let existing = |rel: &str| {
            let path = dir.join(rel);
            path.is_file().then_some(path)
        };

        let model_path = ONNX_MODEL_FILES
            .iter()
            .find_map(|rel| existing(*rel))
            .ok_or_else(|| EmbeddingError::ModelNotFound {
                model_name: model_id.to_string(),
                error: format!("no ONNX graph in {} (tried {:?})", dir.display(), ONNX_MODEL_FILES),
            })?;
        let tokenizer_path = existing(TOKENIZER_FILE).ok_or_else(|| EmbeddingError::ModelNotFound {
            model_name: model_id.to_string(),
            error: format!("{} missing in {}", TOKENIZER_FILE, dir.display()),
        })?;

        Ok(Self {
            model_path,
            tokenizer_path,
            modules_path: existing(MODULES_FILE),
            pooling_config_path: existing(POOLING_CONFIG_FILE),
            sentence_config_path: existing(SENTENCE_CONFIG_FILE),
        })
    }

    fn from_hub(model_id: &str, repo: &ApiRepo) -> EmbeddingResult<Self> {
        let not_found = |error: String| EmbeddingError::ModelNotFound {
            model_name: model_id.to_string(),
            error,
        };

        let model_path = ONNX_MODEL_FILES
            .iter()
            .find_map(|rel| optional(repo, *rel))
            .ok_or_else(|| not_found(format!("no ONNX graph in repo (tried {:?})", ONNX_MODEL_FILES)))?;
        let tokenizer_path = repo
            .get(TOKENIZER_FILE)
            .map_err(|e| not_found(format!("{}: {}", TOKENIZER_FILE, e)))?;

        Ok(Self {
            model_path,
            tokenizer_path,
            modules_path: optional(repo, MODULES_FILE),
            pooling_config_path: optional(repo, POOLING_CONFIG_FILE),
            sentence_config_path: optional(repo, SENTENCE_CONFIG_FILE),
        })
    }
}

fn optional(repo: &ApiRepo, file: &str) -> Option<PathBuf> {
    match repo.get(file) {
        Ok(path) => Some(path),
        Err(e) => {
            debug!("Optional model file {} unavailable: {}", file, e);
            None
        }
    }
}
