//! Concrete embedding backends and model selection.
//!
//! Implements [`EmbeddingProvider`] for:
//! - **[`LocalProvider`]**: fastembed ONNX models, no network after the
//!   first download (feature `local-embeddings`).
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed`.
//! - **[`OpenAIProvider`]**: the OpenAI `/v1/embeddings` API.
//! - **`hash`**: [`HashProvider`] from the core crate.
//!
//! [`select_provider`] walks `embedding.candidates` in order, probing each
//! with one real embedding call, and keeps the first that answers.
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use worldcup_rag_core::embedding::{EmbeddingProvider, HashProvider};
use worldcup_rag_core::select::select_first;

use crate::config::{EmbeddingCandidate, EmbeddingConfig};

const PROBE_TEXT: &str = "Copa do Mundo FIFA";

/// Instantiate one candidate without probing it.
pub async fn create_provider(
    candidate: &EmbeddingCandidate,
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match candidate.provider.as_str() {
        "hash" => Ok(Arc::new(HashProvider::new(candidate.dims.unwrap_or(384)))),
        "openai" => Ok(Arc::new(OpenAIProvider::new(candidate, config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(candidate, config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => {
            let candidate = candidate.clone();
            let provider =
                tokio::task::spawn_blocking(move || LocalProvider::load(&candidate)).await??;
            Ok(Arc::new(provider))
        }
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Pick the first candidate that initializes and embeds a probe text with
/// the expected dimensionality. Returns its position and the provider.
pub async fn select_provider(
    config: &EmbeddingConfig,
) -> Result<(usize, Arc<dyn EmbeddingProvider>)> {
    let selected = select_first(&config.candidates, |candidate| {
        let candidate = candidate.clone();
        let config = config.clone();
        async move {
            let provider = create_provider(&candidate, &config).await?;
            let probe = provider.embed(&[PROBE_TEXT.to_string()]).await?;
            let got = probe.first().map(Vec::len).unwrap_or(0);
            if got != provider.dims() {
                bail!(
                    "probe returned {} dims, expected {}",
                    got,
                    provider.dims()
                );
            }
            Ok::<_, anyhow::Error>(provider)
        }
    })
    .await
    .context("No embedding model could be initialized")?;
    Ok(selected)
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn required_model(candidate: &EmbeddingCandidate) -> Result<String> {
    candidate
        .model
        .clone()
        .ok_or_else(|| {
            anyhow::anyhow!("embedding model required for {} provider", candidate.provider)
        })
}

fn required_dims(candidate: &EmbeddingCandidate) -> Result<usize> {
    candidate
        .dims
        .ok_or_else(|| {
            anyhow::anyhow!("embedding dims required for {} provider", candidate.provider)
        })
}

/// POST `body` to `url` with retry/backoff and return the JSON response.
async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(attempt, delay_secs = delay.as_secs(), "{} retrying", label);
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        label,
                        status,
                        body_text
                    ));
                    continue;
                }
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} connection error ({}): {}", label, url, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} embedding failed after retries", label)))
}

fn parse_float_array(value: &serde_json::Value, what: &str) -> Result<Vec<f32>> {
    Ok(value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Invalid {} response: embedding is not an array", what))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API (`POST /v1/embeddings`).
///
/// Reads the API key from `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(candidate: &EmbeddingCandidate, config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = candidate
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            client: http_client(config)?,
            model: required_model(candidate)?,
            dims: required_dims(candidate)?,
            url: format!("{}/embeddings", base.trim_end_matches('/')),
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = post_json_with_retry(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, parse_float_array(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance (`POST /api/embed`).
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(candidate: &EmbeddingCandidate, config: &EmbeddingConfig) -> Result<Self> {
        let base = candidate
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            client: http_client(config)?,
            model: required_model(candidate)?,
            dims: required_dims(candidate)?,
            url: format!("{}/api/embed", base.trim_end_matches('/')),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json =
            post_json_with_retry(&self.client, &self.url, None, &body, self.max_retries, "Ollama")
                .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|e| parse_float_array(e, "Ollama"))
        .collect()
}

// ============ Local Provider (fastembed) ============

/// Dimensionality of the supported local models.
pub fn local_model_dims(name: &str) -> usize {
    match name {
        "bge-base-en-v1.5" | "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    }
}

/// Local ONNX inference through fastembed. Models are downloaded from
/// Hugging Face on first use and cached.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    /// Load the ONNX model. Blocking; may download on first use.
    fn load(candidate: &EmbeddingCandidate) -> Result<Self> {
        let model_name = candidate
            .model
            .clone()
            .unwrap_or_else(|| "multilingual-e5-small".to_string());
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(config_to_fastembed_model(&model_name)?)
                .with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
        let dims = candidate.dims.unwrap_or_else(|| local_model_dims(&model_name));
        Ok(Self {
            model_name,
            dims,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            model
                .embed(texts, None)
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(candidates: Vec<EmbeddingCandidate>) -> EmbeddingConfig {
        EmbeddingConfig {
            candidates,
            timeout_secs: 1,
            max_retries: 0,
        }
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embeddings": [[0.5, 0.5], [1.0, 0.0]] });
        let vecs = parse_ollama_response(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0], vec![0.5, 0.5]);
        assert!(parse_ollama_response(&serde_json::json!({ "embeddings": [1] })).is_err());
    }

    #[test]
    fn test_local_model_dims() {
        assert_eq!(local_model_dims("multilingual-e5-small"), 384);
        assert_eq!(local_model_dims("bge-base-en-v1.5"), 768);
        assert_eq!(local_model_dims("multilingual-e5-large"), 1024);
    }

    #[tokio::test]
    async fn test_ollama_requires_dims() {
        let c = EmbeddingCandidate {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: None,
            url: None,
        };
        assert!(create_provider(&c, &config(vec![])).await.is_err());
    }

    #[tokio::test]
    async fn test_select_falls_back_to_hash() {
        let unreachable = EmbeddingCandidate {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(768),
            url: Some("http://127.0.0.1:9".to_string()),
        };
        let cfg = config(vec![unreachable, EmbeddingCandidate::hash(32)]);
        let (pos, provider) = select_provider(&cfg).await.unwrap();
        assert_eq!(pos, 1);
        assert_eq!(provider.model_name(), "hash");
        assert_eq!(provider.dims(), 32);
    }

    #[tokio::test]
    async fn test_select_all_fail() {
        let bad = EmbeddingCandidate {
            provider: "ollama".to_string(),
            model: None,
            dims: None,
            url: None,
        };
        assert!(select_provider(&config(vec![bad])).await.is_err());
    }
}
