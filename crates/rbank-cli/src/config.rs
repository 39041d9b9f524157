//! Configuration loading from TOML files.
//!
//! Lookup order:
//! 1. `--config <path>` on the command line
//! 2. `$RBANK_CONFIG` environment variable
//! 3. `~/.config/rbank/config.toml`
//! 4. Built-in defaults (everything is optional)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use rbank_core::{LeakMode, RetrievalConfig};
use rbank_llm::LlmSettings;

/// Top-level configuration.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub bank: BankConfig,
    pub retrieval: RetrievalSection,
    pub extraction: ExtractionConfig,
    pub experiment: ExperimentConfig,
}

/// Inference server settings.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL, up to and including `/v1`.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    /// Sampling temperature when solving problems.
    pub solve_temperature: f32,
    pub timeout_secs: u64,
}

/// Sentence-embedding model settings.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Model download cache. Default: platform cache dir.
    pub cache_dir: Option<PathBuf>,
    pub batch_size: usize,
}

/// Reasoning bank storage.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    pub path: PathBuf,
}

/// Retrieval and answer-leak filtering.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub top_k: usize,
    pub candidate_multiplier: usize,
    /// `strict` or `contextual`.
    pub leak_mode: String,
    pub leak_window: usize,
    pub duplicate_threshold: f32,
}

/// Memory distillation settings.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_items: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Experiment driver settings.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub train_path: PathBuf,
    pub test_path: PathBuf,
    pub results_dir: PathBuf,
    pub train_limit: usize,
    pub test_limit: usize,
    /// Recorded in the summary and sent to the server as the sampling seed.
    pub seed: u64,
    /// Abort on the first failed completion instead of scoring it as wrong.
    pub fail_fast: bool,
}

// --- Defaults ---

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".into(),
            model: "qwen3-1.7b".into(),
            api_key: None,
            max_tokens: 16384,
            solve_temperature: 0.1,
            timeout_secs: 600,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "bge-small-en-v1.5".into(),
            cache_dir: None,
            batch_size: 32,
        }
    }
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("memory_bank/reasoning_bank.json"),
        }
    }
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: 2,
            candidate_multiplier: 3,
            leak_mode: "strict".into(),
            leak_window: 50,
            duplicate_threshold: 0.90,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_items: 3,
            max_tokens: 2048,
            temperature: 0.1,
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            train_path: PathBuf::from("data/train_problems.json"),
            test_path: PathBuf::from("data/test_problems.json"),
            results_dir: PathBuf::from("results"),
            train_limit: 100,
            test_limit: 100,
            seed: 42,
            fail_fast: false,
        }
    }
}

// --- Conversions ---

impl LlmConfig {
    pub fn settings(&self) -> LlmSettings {
        LlmSettings {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl RetrievalSection {
    pub fn to_retrieval_config(&self) -> Result<RetrievalConfig> {
        let leak_mode: LeakMode = self
            .leak_mode
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("parsing [retrieval].leak_mode")?;
        if self.top_k == 0 {
            bail!("[retrieval].top_k must be at least 1");
        }
        Ok(RetrievalConfig {
            top_k: self.top_k,
            candidate_multiplier: self.candidate_multiplier.max(1),
            leak_mode,
            leak_window: self.leak_window,
            duplicate_threshold: self.duplicate_threshold,
        })
    }
}

/// Load config from disk. Returns defaults if no config file exists.
///
/// An explicitly requested file must exist.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(p) = explicit {
        if !p.exists() {
            bail!("config file {} does not exist", p.display());
        }
    }

    if let Some(p) = config_path(explicit) {
        if p.exists() {
            let content =
                std::fs::read_to_string(&p).with_context(|| format!("reading {}", p.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", p.display()))?;
            return Ok(config);
        }
    }

    Ok(Config::default())
}

/// Resolve the config file path.
fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }

    if let Ok(p) = std::env::var("RBANK_CONFIG") {
        return Some(PathBuf::from(p));
    }

    directories::BaseDirs::new().map(|dirs| {
        dirs.home_dir()
            .join(".config")
            .join("rbank")
            .join("config.toml")
    })
}

/// Show the active config path (for `rbank config`).
pub fn show_config_path(explicit: Option<&Path>) -> String {
    match config_path(explicit) {
        Some(p) if p.exists() => format!("{} (loaded)", p.display()),
        Some(p) => format!("{} (not found, using defaults)", p.display()),
        None => "no config path resolved (using defaults)".into(),
    }
}
