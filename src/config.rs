//! TOML configuration.
//!
//! Every section has defaults, so an empty file is a valid configuration.
//! [`load_config`] parses and validates; [`Config::default`] is what tests
//! start from.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use worldcup_rag_core::chunk::{default_levels, ChunkLevel};
use worldcup_rag_core::models::Granularity;
use worldcup_rag_core::retrieve::RetrievalParams;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub index: IndexConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub prompt: PromptConfig,
    pub quick_answers: QuickAnswersConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DataConfig {
    pub dir: PathBuf,
    pub world_cup_file: String,
    pub matches_file: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./wcdataset"),
            world_cup_file: "world_cup.csv".to_string(),
            matches_file: "matches_1930_2022.csv".to_string(),
        }
    }
}

impl DataConfig {
    pub fn world_cup_path(&self) -> PathBuf {
        self.dir.join(&self.world_cup_file)
    }

    pub fn matches_path(&self) -> PathBuf {
        self.dir.join(&self.matches_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub dir: PathBuf,
    pub batch_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/wc_index"),
            batch_size: 64,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub levels: Vec<ChunkLevel>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            levels: default_levels(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub k: usize,
    pub fetch_k: usize,
    pub lambda: f32,
    pub score_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let p = RetrievalParams::default();
        Self {
            k: p.k,
            fetch_k: p.fetch_k,
            lambda: p.lambda,
            score_threshold: p.score_threshold,
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            k: self.k,
            fetch_k: self.fetch_k,
            lambda: self.lambda,
            score_threshold: self.score_threshold,
        }
    }
}

/// One embedding model to try.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EmbeddingCandidate {
    /// `local`, `ollama`, `openai`, or `hash`.
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
}

impl EmbeddingCandidate {
    pub fn hash(dims: usize) -> Self {
        Self {
            provider: "hash".to_string(),
            model: None,
            dims: Some(dims),
            url: None,
        }
    }

    fn local(model: &str) -> Self {
        Self {
            provider: "local".to_string(),
            model: Some(model.to_string()),
            dims: None,
            url: None,
        }
    }
}

impl fmt::Display for EmbeddingCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(m) => write!(f, "{}/{}", self.provider, m),
            None => f.write_str(&self.provider),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub candidates: Vec<EmbeddingCandidate>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            candidates: vec![
                EmbeddingCandidate::local("multilingual-e5-small"),
                EmbeddingCandidate::local("bge-small-en-v1.5"),
                EmbeddingCandidate::hash(384),
            ],
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// One language model to try.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LlmCandidate {
    /// `ollama` or `openai` (any OpenAI-compatible chat API, e.g. Groq).
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl fmt::Display for LlmCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub candidates: Vec<LlmCandidate>,
    pub timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            candidates: vec![
                LlmCandidate {
                    provider: "openai".to_string(),
                    model: "llama3-70b-8192".to_string(),
                    url: Some("https://api.groq.com/openai/v1".to_string()),
                    api_key_env: Some("GROQ_API_KEY".to_string()),
                },
                LlmCandidate {
                    provider: "ollama".to_string(),
                    model: "tinyllama".to_string(),
                    url: None,
                    api_key_env: None,
                },
            ],
            timeout_secs: 20,
            probe_timeout_secs: 10,
            temperature: 0.3,
            max_tokens: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PromptConfig {
    /// Overrides the built-in template; must contain `{context}` and
    /// `{question}`.
    pub template: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct QuickAnswersConfig {
    /// TOML file with extra `[[answers]]` entries.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

const EMBEDDING_PROVIDERS: &[&str] = &["local", "ollama", "openai", "hash"];
const LLM_PROVIDERS: &[&str] = &["ollama", "openai"];

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.index.batch_size == 0 {
        bail!("index.batch_size must be > 0");
    }

    let mut seen = Vec::with_capacity(3);
    for level in &config.chunking.levels {
        if seen.contains(&level.granularity) {
            bail!("chunking level '{}' is listed twice", level.granularity);
        }
        seen.push(level.granularity);
        if level.size == 0 {
            bail!("chunking level '{}' must have size > 0", level.granularity);
        }
        if level.overlap >= level.size {
            bail!(
                "chunking level '{}' must have overlap < size ({} >= {})",
                level.granularity,
                level.overlap,
                level.size
            );
        }
    }
    for g in [Granularity::Small, Granularity::Medium, Granularity::Large] {
        if !seen.contains(&g) {
            bail!("chunking.levels must define small, medium and large (missing '{}')", g);
        }
    }

    let r = &config.retrieval;
    if r.k < 1 {
        bail!("retrieval.k must be >= 1");
    }
    if r.fetch_k < r.k {
        bail!("retrieval.fetch_k must be >= retrieval.k");
    }
    if !(0.0..=1.0).contains(&r.lambda) {
        bail!("retrieval.lambda must be in [0.0, 1.0]");
    }
    if !(-1.0..=1.0).contains(&r.score_threshold) {
        bail!("retrieval.score_threshold must be in [-1.0, 1.0]");
    }

    if config.embedding.candidates.is_empty() {
        bail!("embedding.candidates must not be empty");
    }
    for c in &config.embedding.candidates {
        if !EMBEDDING_PROVIDERS.contains(&c.provider.as_str()) {
            bail!(
                "Unknown embedding provider: '{}'. Must be one of: {}.",
                c.provider,
                EMBEDDING_PROVIDERS.join(", ")
            );
        }
        if c.dims == Some(0) {
            bail!("embedding candidate '{}' has dims = 0", c);
        }
    }

    if config.llm.candidates.is_empty() {
        bail!("llm.candidates must not be empty");
    }
    for c in &config.llm.candidates {
        if !LLM_PROVIDERS.contains(&c.provider.as_str()) {
            bail!(
                "Unknown llm provider: '{}'. Must be one of: {}.",
                c.provider,
                LLM_PROVIDERS.join(", ")
            );
        }
    }
    if config.llm.timeout_secs == 0 {
        bail!("llm.timeout_secs must be > 0");
    }

    if let Some(t) = &config.prompt.template {
        if !t.contains("{context}") || !t.contains("{question}") {
            bail!("prompt.template must contain {{context}} and {{question}}");
        }
    }

    Ok(())
}
