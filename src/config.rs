use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    /// Overlap shared between consecutive chunks, in characters.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_chunk_chars() -> usize {
    2000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Provider: `hash` (deterministic local) or `openai`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    256
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// HNSW max neighbors per node above layer 0 (layer 0 uses 2×m).
    #[serde(default = "default_m")]
    pub m: usize,
    /// Candidate list width during graph construction.
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    /// Candidate list width during queries.
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
        }
    }
}

fn default_m() -> usize {
    16
}
fn default_ef_construction() -> usize {
    200
}
fn default_ef_search() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Weight of cosine similarity in the combined score.
    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f64,
    /// Weight of the recency signal in the combined score.
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
    /// Default number of results returned by search.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// ANN candidates fetched per result slot before reranking.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// Minimum combined score for a chunk to enter an answer prompt.
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,
    /// Minimum top combined score for a requirement to count as covered.
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,
    /// Character budget for assembled prompt context.
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_weight: default_similarity_weight(),
            recency_weight: default_recency_weight(),
            top_k: default_top_k(),
            candidate_multiplier: default_candidate_multiplier(),
            relevance_threshold: default_relevance_threshold(),
            coverage_threshold: default_coverage_threshold(),
            context_budget_chars: default_context_budget_chars(),
        }
    }
}

fn default_similarity_weight() -> f64 {
    0.7
}
fn default_recency_weight() -> f64 {
    0.3
}
fn default_top_k() -> usize {
    10
}
fn default_candidate_multiplier() -> usize {
    3
}
fn default_relevance_threshold() -> f64 {
    0.6
}
fn default_coverage_threshold() -> f64 {
    0.65
}
fn default_context_budget_chars() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    /// Provider: `disabled` or `openai`.
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_completion_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            model: None,
            timeout_secs: default_completion_timeout_secs(),
            max_retries: default_completion_max_retries(),
            temperature: default_temperature(),
        }
    }
}

fn default_completion_provider() -> String {
    "disabled".to_string()
}
fn default_completion_timeout_secs() -> u64 {
    60
}
fn default_completion_max_retries() -> u32 {
    3
}
fn default_temperature() -> f64 {
    0.3
}

impl Config {
    /// Minimal config for tests and ad-hoc use: defaults everywhere,
    /// deterministic hash embeddings, completion disabled.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            retrieval: RetrievalConfig::default(),
            completion: CompletionConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_chars == 0 {
        anyhow::bail!("chunking.chunk_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.chunk_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.chunk_chars");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "hash" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be set when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash or openai.",
            other
        ),
    }

    if config.index.m < 2 {
        anyhow::bail!("index.m must be >= 2");
    }
    if config.index.ef_construction < config.index.m {
        anyhow::bail!("index.ef_construction must be >= index.m");
    }

    let r = &config.retrieval;
    if !(0.0..=1.0).contains(&r.similarity_weight) || !(0.0..=1.0).contains(&r.recency_weight) {
        anyhow::bail!("retrieval weights must be in [0.0, 1.0]");
    }
    if r.similarity_weight + r.recency_weight <= 0.0 {
        anyhow::bail!("retrieval weights must not both be zero");
    }
    if r.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if r.candidate_multiplier == 0 {
        anyhow::bail!("retrieval.candidate_multiplier must be >= 1");
    }

    match config.completion.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.completion.model.is_none() {
                anyhow::bail!("completion.model must be set when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_validates() {
        let cfg = Config::minimal("/tmp/recall.sqlite");
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let mut cfg = Config::minimal("/tmp/recall.sqlite");
        cfg.chunking.chunk_chars = 100;
        cfg.chunking.overlap_chars = 100;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn openai_embedding_requires_model() {
        let mut cfg = Config::minimal("/tmp/recall.sqlite");
        cfg.embedding.provider = "openai".to_string();
        assert!(validate(&cfg).is_err());
        cfg.embedding.model = Some("text-embedding-3-small".to_string());
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn unknown_provider_rejected() {
        let mut cfg = Config::minimal("/tmp/recall.sqlite");
        cfg.embedding.provider = "cohere".to_string();
        assert!(validate(&cfg).is_err());
    }
}
