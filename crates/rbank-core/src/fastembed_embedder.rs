use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

use crate::embedder::Embedder;
use crate::error::{RbankError, RbankResult};

/// Sentence-embedding models selectable by name from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingChoice {
    BgeSmallEnV15,
    AllMiniLmL6V2,
}

impl EmbeddingChoice {
    fn model(self) -> EmbeddingModel {
        match self {
            Self::BgeSmallEnV15 => EmbeddingModel::BGESmallENV15,
            Self::AllMiniLmL6V2 => EmbeddingModel::AllMiniLML6V2,
        }
    }
}

impl std::str::FromStr for EmbeddingChoice {
    type Err = RbankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bge-small-en-v1.5" | "bge-small" => Ok(Self::BgeSmallEnV15),
            "all-minilm-l6-v2" | "minilm" => Ok(Self::AllMiniLmL6V2),
            _ => Err(RbankError::Config(format!("unknown embedding model: {s}"))),
        }
    }
}

pub struct FastEmbedder {
    choice: EmbeddingChoice,
    cache_dir: Option<PathBuf>,
    model: OnceLock<TextEmbedding>,
    init_lock: Mutex<()>,
}

impl FastEmbedder {
    pub fn new(choice: EmbeddingChoice, cache_dir: Option<PathBuf>) -> Self {
        Self {
            choice,
            cache_dir: cache_dir.or_else(default_cache_dir),
            model: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    fn get_model(&self) -> RbankResult<&TextEmbedding> {
        if let Some(m) = self.model.get() {
            return Ok(m);
        }
        let _guard = self
            .init_lock
            .lock()
            .map_err(|_| RbankError::Embedding("embedder init lock poisoned".into()))?;
        if let Some(m) = self.model.get() {
            return Ok(m);
        }
        info!(model = ?self.choice, "loading embedding model");
        let mut opts = InitOptions::new(self.choice.model()).with_show_download_progress(true);
        if let Some(dir) = &self.cache_dir {
            opts = opts.with_cache_dir(dir.clone());
        }
        let model = TextEmbedding::try_new(opts)
            .map_err(|e| RbankError::Embedding(format!("failed to init model: {e}")))?;
        let _ = self.model.set(model);
        self.model
            .get()
            .ok_or_else(|| RbankError::Embedding("model not initialised".into()))
    }
}

impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new(EmbeddingChoice::BgeSmallEnV15, None)
    }
}

fn default_cache_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "rbank", "rbank").map(|d| d.cache_dir().join("models"))
}

impl Embedder for FastEmbedder {
    fn embed(&self, text: &str) -> RbankResult<Vec<f32>> {
        let model = self.get_model()?;
        let results = model
            .embed(vec![text], None)
            .map_err(|e| RbankError::Embedding(e.to_string()))?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| RbankError::Embedding("empty embedding result".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> RbankResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.get_model()?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| RbankError::Embedding(e.to_string()))
    }

    fn dimensions(&self) -> usize {
        384
    }
}
