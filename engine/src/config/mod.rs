//! Configuration management
//!
//! This module handles loading, validation, and management of the Strand
//! configuration. Configuration is stored in TOML format at
//! ~/.strand/config.toml.
//!
//! # Configuration Sections
//!
//! - **orchestrator**: iteration ceiling, retry counts, completion
//!   thresholds, registry grace periods
//! - **llm**: model endpoint, generation parameters, retry/backoff
//! - **retrieval**: ranking weights, time decay, budget packing
//! - **store**: history bounds and note expiry
//!
//! Missing files fall back to defaults; present files are validated after
//! parsing so bad values fail at startup rather than mid-run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Workflow orchestrator settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Model transport configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Retrieval ranker configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Persistence settings
    #[serde(default)]
    pub store: StoreConfig,
}

/// Workflow orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard cap on loop iterations per workflow
    pub max_iterations: u32,

    /// Retries for an empty model reply (distinct from transport retries)
    pub empty_reply_retries: u32,

    /// Fixed delay between empty-reply retries, in milliseconds
    pub empty_reply_delay_ms: u64,

    /// Completion rate at or above which a todo is marked completed
    pub complete_threshold: f64,

    /// Completion rate at or above which a todo is marked in progress
    pub progress_threshold: f64,

    /// Seconds a terminal workflow stays in the registry before GC
    pub gc_grace_secs: u64,

    /// Seconds the per-user creation lock is held at most
    pub creation_lock_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            empty_reply_retries: 3,
            empty_reply_delay_ms: 1500,
            complete_threshold: 0.8,
            progress_threshold: 0.5,
            gc_grace_secs: 600,
            creation_lock_secs: 30,
        }
    }
}

/// Model transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible endpoint
    pub base_url: String,

    /// API key sent as a bearer token
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f64,

    /// Maximum tokens per completion
    pub max_tokens: u32,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum transport-level retries (backoff + jitter)
    pub max_retries: u32,

    /// Base backoff delay in milliseconds
    pub backoff_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: String::new(),
            model: "llama3.1:8b".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            timeout_secs: 60,
            max_retries: 3,
            backoff_base_ms: 500,
        }
    }
}

/// Retrieval ranker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Half-life for exponential time decay, in days
    pub half_life_days: f64,

    /// Weight of the keyword boost in the composite score
    pub keyword_weight: f64,

    /// Ideal candidate length in characters for the length penalty
    pub ideal_len: usize,

    /// Floor for the adaptive relevance threshold
    pub score_floor: f64,

    /// Pairwise Jaccard similarity above which candidates are duplicates
    pub dedup_cutoff: f64,

    /// Minimum remaining token budget worth compressing a candidate into
    pub min_pack_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            half_life_days: 3.0,
            keyword_weight: 0.2,
            ideal_len: 200,
            score_floor: 0.05,
            dedup_cutoff: 0.85,
            min_pack_tokens: 32,
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum entries retained per history list
    pub history_limit: usize,

    /// TTL applied to workflow snapshots, in seconds
    pub snapshot_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_limit: 200,
            snapshot_ttl_secs: 86_400,
        }
    }
}

impl Config {
    /// Default configuration file path: ~/.strand/config.toml
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".strand")
            .join("config.toml")
    }

    /// Load configuration from the default location, falling back to
    /// defaults when the file does not exist.
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from a specific path, falling back to defaults
    /// when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_iterations == 0 {
            anyhow::bail!("orchestrator.max_iterations must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.orchestrator.complete_threshold)
            || !(0.0..=1.0).contains(&self.orchestrator.progress_threshold)
        {
            anyhow::bail!("orchestrator thresholds must be within [0, 1]");
        }
        if self.orchestrator.progress_threshold > self.orchestrator.complete_threshold {
            anyhow::bail!("orchestrator.progress_threshold must not exceed complete_threshold");
        }
        if self.retrieval.half_life_days <= 0.0 {
            anyhow::bail!("retrieval.half_life_days must be positive");
        }
        if !(0.0..=1.0).contains(&self.retrieval.dedup_cutoff) {
            anyhow::bail!("retrieval.dedup_cutoff must be within [0, 1]");
        }
        if self.llm.base_url.is_empty() {
            anyhow::bail!("llm.base_url must not be empty");
        }
        Ok(())
    }
}
