//! Sentence-transformers pipeline configuration
//!
//! A sentence-transformers model ships a few small JSON files next to the
//! transformer weights that describe how token embeddings become a sentence
//! embedding:
//!
//! - `modules.json` lists the pipeline stages (Transformer, Pooling, Normalize)
//! - `1_Pooling/config.json` selects the pooling strategy
//! - `sentence_bert_config.json` carries `max_seq_length` and `do_lower_case`
//!
//! All of them are optional; missing files fall back to mean pooling,
//! no trailing normalization and a 256 token window.

use serde::Deserialize;
use std::path::Path;

use crate::models::hub::ModelFiles;
use crate::models::EmbeddingResult;

/// Default token window when `sentence_bert_config.json` is absent
pub const DEFAULT_MAX_SEQ_LENGTH: usize = 256;

/// How per-token vectors are reduced to a single sentence vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PoolingMode {
    /// Attention-masked mean over all tokens
    #[default]
    Mean,
    /// Hidden state of the first (`[CLS]`) token
    Cls,
    /// Attention-masked element-wise max
    Max,
}

/// Resolved pipeline settings for the loaded model
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub pooling_mode: PoolingMode,
    /// The pipeline ends in a Normalize stage, so every vector is unit length
    pub normalize_output: bool,
    pub max_seq_length: usize,
    pub do_lower_case: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pooling_mode: PoolingMode::Mean,
            normalize_output: false,
            max_seq_length: DEFAULT_MAX_SEQ_LENGTH,
            do_lower_case: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModuleEntry {
    #[serde(rename = "type")]
    module_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct PoolingFile {
    #[serde(default)]
    pooling_mode_cls_token: bool,
    #[serde(default)]
    pooling_mode_max_tokens: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SentenceBertFile {
    max_seq_length: Option<usize>,
    #[serde(default)]
    do_lower_case: bool,
}

impl PipelineConfig {
    /// Build the pipeline config from whichever optional files were resolved
    pub fn from_files(files: &ModelFiles) -> EmbeddingResult<Self> {
        let mut config = Self::default();

        if let Some(path) = &files.modules_path {
            let modules: Vec<ModuleEntry> = read_json(path)?;
            config.normalize_output = Self::has_normalize_stage(&modules);
        }

        if let Some(path) = &files.pooling_config_path {
            let pooling: PoolingFile = read_json(path)?;
            config.pooling_mode = if pooling.pooling_mode_cls_token {
                PoolingMode::Cls
            } else if pooling.pooling_mode_max_tokens {
                PoolingMode::Max
            } else {
                PoolingMode::Mean
            };
        }

        if let Some(path) = &files.sentence_config_path {
            let sbert: SentenceBertFile = read_json(path)?;
            if let Some(max_seq_length) = sbert.max_seq_length {
                config.max_seq_length = max_seq_length;
            }
            config.do_lower_case = sbert.do_lower_case;
        }

        Ok(config)
    }

    /// Apply an explicit token window override from the server config
    pub fn with_max_seq_length(mut self, max_seq_length: Option<usize>) -> Self {
        if let Some(len) = max_seq_length {
            self.max_seq_length = len;
        }
        self
    }

    fn has_normalize_stage(modules: &[ModuleEntry]) -> bool {
        modules
            .iter()
            .any(|m| m.module_type.rsplit('.').next() == Some("Normalize"))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> EmbeddingResult<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
