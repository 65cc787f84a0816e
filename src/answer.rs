//! Answer composition.
//!
//! A [`Pipeline`] owns everything a request needs: the quick-answer table,
//! the loaded index, the query embedder, the active language model, and the
//! response cache. It is built once at startup and shared behind an `Arc`;
//! nothing here is global.
//!
//! # Answer Flow
//!
//! 1. Empty message → failure.
//! 2. Quick answer hit → returned as-is.
//! 3. Response cache hit → returned as-is.
//! 4. Embed the query, retrieve chunks, fill the prompt template.
//! 5. Run the model on its own task under `llm.timeout_secs`. On timeout
//!    the caller gets a "busy, try again" answer and the task is left to
//!    finish in the background; its output is discarded.
//! 6. Clean template artifacts from the raw output.
//! 7. Cache the answer while the cache has room.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use worldcup_rag_core::cache::ResponseCache;
use worldcup_rag_core::chunk::ChunkLevel;
use worldcup_rag_core::embedding::{embed_query, EmbeddingProvider, HashProvider};
use worldcup_rag_core::generate::TextGenerator;
use worldcup_rag_core::index::VectorIndex;
use worldcup_rag_core::prompt::{build_prompt, clean_answer, DEFAULT_TEMPLATE};
use worldcup_rag_core::quick::{QuickAnswerEntry, QuickAnswers};
use worldcup_rag_core::retrieve::{retrieve, RetrievalParams, ScoredChunk};

use crate::config::{Config, EmbeddingConfig, QuickAnswersConfig};
use crate::embedding::create_provider;
use crate::index_store::{load_index, Manifest};
use crate::llm::select_generator;

pub const BUSY_ANSWER: &str =
    "O modelo está demorando mais que o esperado para responder. Tente novamente em instantes.";
pub const INTERNAL_ERROR_ANSWER: &str =
    "Desculpe, houve um erro ao processar sua pergunta. Tente novamente.";
pub const EMPTY_MESSAGE: &str = "Pergunta não pode estar vazia";

/// Body of a `/chat` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub success: bool,
    pub message: String,
}

impl ChatResponse {
    fn ok(answer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            success: true,
            message: message.into(),
        }
    }

    fn failed(answer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            success: false,
            message: message.into(),
        }
    }
}

/// Why model-backed composition did not produce an answer.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("query embedding failed: {0:#}")]
    Retrieval(anyhow::Error),
    #[error("model did not answer within {0:?}")]
    Timeout(Duration),
    #[error("model error: {0:#}")]
    Model(anyhow::Error),
    #[error("model output was empty after cleaning")]
    Malformed,
    #[error("generation task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// The selected language model.
#[derive(Clone)]
pub struct ActiveModel {
    pub name: String,
    pub generator: Arc<dyn TextGenerator>,
}

impl ActiveModel {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            name: generator.model_name().to_string(),
            generator,
        }
    }
}

/// Snapshot reported by `/status` and `wcr status`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub active_model: String,
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub cache_size: usize,
    pub cache_capacity: usize,
    pub quick_answers: usize,
    pub timeout_secs: u64,
    pub retrieval: RetrievalParams,
    pub index: IndexStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub chunks: usize,
    pub build_id: Option<String>,
    pub built_at: Option<String>,
    pub levels: Vec<ChunkLevel>,
}

/// Request-independent state for answering questions.
pub struct Pipeline {
    quick: QuickAnswers,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    model: ActiveModel,
    cache: Arc<ResponseCache>,
    template: String,
    params: RetrievalParams,
    timeout: Duration,
    manifest: Option<Manifest>,
}

impl Pipeline {
    /// Assemble a pipeline from already-initialized parts.
    pub fn new(
        config: &Config,
        index: VectorIndex,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self> {
        if let Some(dims) = index.dims() {
            if dims != embedder.dims() {
                bail!(
                    "Index has {} dims but the embedding model '{}' produces {}",
                    dims,
                    embedder.model_name(),
                    embedder.dims()
                );
            }
        }

        Ok(Self {
            quick: load_quick_answers(&config.quick_answers)?,
            index: Arc::new(index),
            embedder,
            model: ActiveModel::new(generator),
            cache: Arc::new(ResponseCache::new(config.cache.capacity)),
            template: config
                .prompt
                .template
                .clone()
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            params: config.retrieval.params(),
            timeout: Duration::from_secs(config.llm.timeout_secs),
            manifest: None,
        })
    }

    /// Record the manifest of the loaded index for status reporting.
    pub fn with_manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Load the persisted index and select the embedder and language model.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let (index, manifest) = load_index(&config.index.dir).await?;
        let embedder = embedder_for_manifest(&manifest, &config.embedding).await?;
        let generator = select_generator(&config.llm).await?;
        info!(
            model = generator.model_name(),
            embedding = embedder.model_name(),
            chunks = index.len(),
            "pipeline ready"
        );
        Ok(Self::new(config, index, embedder, generator)?.with_manifest(manifest))
    }

    pub fn active_model(&self) -> &ActiveModel {
        &self.model
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Retrieval only, no model call.
    pub async fn search(&self, query: &str, k: Option<usize>) -> Result<Vec<ScoredChunk>> {
        let mut params = self.params;
        if let Some(k) = k {
            params.k = k;
            params.fetch_k = params.fetch_k.max(k);
        }
        let vector = embed_query(self.embedder.as_ref(), query).await?;
        Ok(retrieve(&self.index, &vector, &params))
    }

    /// Answer one message. Never fails; every outcome maps to a response.
    pub async fn answer(&self, message: &str) -> ChatResponse {
        let query = message.trim();
        if query.is_empty() {
            return ChatResponse::failed("", EMPTY_MESSAGE);
        }

        if let Some(answer) = self.quick.resolve(query) {
            debug!("quick answer hit");
            return ChatResponse::ok(answer, "Resposta rápida");
        }

        if let Some(answer) = self.cache.get(query) {
            debug!("cache hit");
            return ChatResponse::ok(answer, "Resposta do cache");
        }

        match self.compose(query).await {
            Ok(answer) => {
                self.cache.insert(query, &answer);
                ChatResponse::ok(answer, format!("Resposta gerada por {}", self.model.name))
            }
            Err(ComposeError::Timeout(limit)) => {
                warn!(
                    limit_secs = limit.as_secs(),
                    model = %self.model.name,
                    "generation timed out"
                );
                ChatResponse::ok(BUSY_ANSWER, "Tempo limite de geração excedido")
            }
            Err(e @ (ComposeError::Model(_) | ComposeError::Malformed)) => {
                warn!(error = %e, "generation failed");
                ChatResponse::failed("", e.to_string())
            }
            Err(e) => {
                warn!(error = %e, "internal error while answering");
                ChatResponse::failed(INTERNAL_ERROR_ANSWER, "Erro interno")
            }
        }
    }

    async fn compose(&self, query: &str) -> Result<String, ComposeError> {
        let vector = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(ComposeError::Retrieval)?;
        let chunks = retrieve(&self.index, &vector, &self.params);
        debug!(chunks = chunks.len(), "retrieved context");
        let prompt = build_prompt(&self.template, &chunks, query);

        let generator = Arc::clone(&self.model.generator);
        let task = tokio::spawn(async move { generator.generate(&prompt).await });

        // Dropping the handle on timeout detaches the task.
        let raw = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => return Err(ComposeError::Timeout(self.timeout)),
            Ok(joined) => joined?.map_err(ComposeError::Model)?,
        };

        let cleaned = clean_answer(&raw);
        if cleaned.is_empty() {
            return Err(ComposeError::Malformed);
        }
        Ok(cleaned)
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            active_model: self.model.name.clone(),
            embedding_model: self.embedder.model_name().to_string(),
            embedding_dims: self.embedder.dims(),
            cache_size: self.cache.len(),
            cache_capacity: self.cache.capacity(),
            quick_answers: self.quick.len(),
            timeout_secs: self.timeout.as_secs(),
            retrieval: self.params,
            index: IndexStatus {
                chunks: self.index.len(),
                build_id: self.manifest.as_ref().map(|m| m.build_id.clone()),
                built_at: self.manifest.as_ref().map(|m| m.built_at.clone()),
                levels: self
                    .manifest
                    .as_ref()
                    .map(|m| m.levels.clone())
                    .unwrap_or_default(),
            },
        }
    }
}

/// Find the configured embedder that built `manifest`'s index.
///
/// Queries must be embedded by the same model as the chunks, so no fallback
/// to a different model is attempted here. A hash index can always be
/// served, even if `hash` is no longer a configured candidate.
pub async fn embedder_for_manifest(
    manifest: &Manifest,
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    for candidate in config
        .candidates
        .iter()
        .filter(|c| c.provider == manifest.embedding_provider)
    {
        match create_provider(candidate, config).await {
            Ok(p) if p.model_name() == manifest.embedding_model && p.dims() == manifest.dims => {
                return Ok(p)
            }
            Ok(_) => continue,
            Err(e) => warn!(
                candidate = %candidate,
                error = %format!("{:#}", e),
                "embedding candidate failed"
            ),
        }
    }

    if manifest.embedding_provider == "hash" {
        return Ok(Arc::new(HashProvider::new(manifest.dims)));
    }

    bail!(
        "Index was built with {}/{} ({} dims), which no configured embedding candidate provides. Rebuild with `wcr build --force`.",
        manifest.embedding_provider,
        manifest.embedding_model,
        manifest.dims
    )
}

#[derive(Debug, Deserialize)]
struct QuickAnswersFile {
    #[serde(default)]
    answers: Vec<QuickAnswerEntry>,
}

/// Built-in quick answers, extended from `quick_answers.path` if set.
pub fn load_quick_answers(config: &QuickAnswersConfig) -> Result<QuickAnswers> {
    let mut table = QuickAnswers::with_defaults();
    if let Some(path) = &config.path {
        let extra = read_quick_answers_file(path)?;
        info!(path = %path.display(), entries = extra.len(), "loaded extra quick answers");
        table.extend(extra);
    }
    Ok(table)
}

fn read_quick_answers_file(path: &Path) -> Result<Vec<QuickAnswerEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read quick answers file: {}", path.display()))?;
    let file: QuickAnswersFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse quick answers file: {}", path.display()))?;
    Ok(file.answers)
}
