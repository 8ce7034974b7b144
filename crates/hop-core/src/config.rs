//! Configuration types for the multi-hop system.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{HopError, Result};

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HopConfig {
    /// Hop loop configuration.
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Evidence ranking configuration.
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Evaluation and experiment tracking configuration.
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Reasoning provider configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Hop loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Hop cap used when the caller does not pass one.
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,

    /// Passages requested from the retrieval port per hop.
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,

    /// Ask the reasoning port to decompose the question up front.
    #[serde(default = "default_true")]
    pub decompose: bool,

    /// Per-call timeout for port calls in milliseconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    /// Delay before the single retry of a failed port call.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Kept evidence passed to each hop conclusion.
    #[serde(default = "default_conclusion_evidence")]
    pub conclusion_evidence: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_hops: 3,
            retrieval_k: 5,
            decompose: true,
            call_timeout_ms: 30000,
            retry_backoff_ms: 250,
            conclusion_evidence: 3,
        }
    }
}

/// Evidence ranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Maximum evidence kept in a ranked set.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Score chunks with the reasoning port (falls back to similarity).
    #[serde(default = "default_true")]
    pub model_scoring: bool,

    /// Minimum relevance for evidence to be judged kept.
    #[serde(default = "default_keep_threshold")]
    pub keep_threshold: f32,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            model_scoring: true,
            keep_threshold: 0.3,
        }
    }
}

/// Evaluation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Directory holding one JSON file per experiment.
    #[serde(default = "default_experiments_dir")]
    pub experiments_dir: PathBuf,

    /// Questions answered concurrently during a run.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// F1 below which a result is flagged for failure analysis.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,

    /// Maximum flagged results stored per experiment.
    #[serde(default = "default_max_failures")]
    pub max_failures_reported: usize,

    /// Default cap on examples per run.
    #[serde(default = "default_max_examples")]
    pub max_examples: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            experiments_dir: default_experiments_dir(),
            concurrency: 4,
            failure_threshold: 0.3,
            max_failures_reported: 10,
            max_examples: 100,
        }
    }
}

/// OpenAI-compatible chat completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_api_path")]
    pub path: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_call_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            path: default_api_path(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: 0.0,
            timeout_ms: 30000,
            max_tokens: 512,
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_max_hops() -> u32 {
    3
}

fn default_retrieval_k() -> usize {
    5
}

fn default_call_timeout() -> u64 {
    30000
}

fn default_retry_backoff() -> u64 {
    250
}

fn default_conclusion_evidence() -> usize {
    3
}

fn default_top_n() -> usize {
    10
}

fn default_keep_threshold() -> f32 {
    0.3
}

fn default_concurrency() -> usize {
    4
}

fn default_failure_threshold() -> f64 {
    0.3
}

fn default_max_failures() -> usize {
    10
}

fn default_max_examples() -> usize {
    100
}

fn default_api_base() -> String {
    "https://api.openai.com".to_string()
}

fn default_api_path() -> String {
    "/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    512
}

fn default_experiments_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hop-rag")
        .join("experiments")
}

impl HopConfig {
    /// Load configuration from file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| HopError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("hop-rag").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("hop-rag.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Reject values the hop loop and evaluator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.controller.retrieval_k == 0 {
            return Err(HopError::config("controller.retrieval_k must be positive"));
        }
        if self.ranking.top_n == 0 {
            return Err(HopError::config("ranking.top_n must be positive"));
        }
        if !(0.0..=1.0).contains(&self.ranking.keep_threshold) {
            return Err(HopError::config("ranking.keep_threshold must be within 0..=1"));
        }
        if self.evaluation.concurrency == 0 {
            return Err(HopError::config("evaluation.concurrency must be positive"));
        }
        if !(0.0..=1.0).contains(&self.evaluation.failure_threshold) {
            return Err(HopError::config(
                "evaluation.failure_threshold must be within 0..=1",
            ));
        }
        Ok(())
    }
}
