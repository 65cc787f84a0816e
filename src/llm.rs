//! Language-model backends and selection.
//!
//! Two HTTP backends implement [`TextGenerator`]:
//!
//! | Provider | Endpoint |
//! |----------|----------|
//! | `ollama` | `POST {url}/api/generate` (non-streaming) |
//! | `openai` | `POST {url}/chat/completions`, any OpenAI-compatible API (OpenAI, Groq, ...) |
//!
//! [`select_generator`] tries `llm.candidates` in order. Each candidate is
//! constructed and then probed with a trivial prompt under
//! `llm.probe_timeout_secs`; the first that answers becomes the active model.
//! Generation itself is not retried here: the answer composer bounds it with
//! a hard timeout instead.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use worldcup_rag_core::generate::TextGenerator;
use worldcup_rag_core::select::select_first;

use crate::config::{LlmCandidate, LlmConfig};

const PROBE_PROMPT: &str = "Responda apenas: ok";

/// Build the generator for one candidate without probing it.
pub fn create_generator(
    candidate: &LlmCandidate,
    config: &LlmConfig,
) -> Result<Arc<dyn TextGenerator>> {
    match candidate.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerator::new(candidate, config)?)),
        "openai" => Ok(Arc::new(OpenAIChatGenerator::new(candidate, config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// Check that a generator answers a trivial prompt within `timeout`.
pub async fn probe(generator: &dyn TextGenerator, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, generator.generate(PROBE_PROMPT)).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => bail!("liveness probe timed out after {:?}", timeout),
    }
}

/// Select the first configured candidate that constructs and passes the probe.
pub async fn select_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>> {
    select_generator_with(config, create_generator).await
}

/// Walk `config.candidates` in order, building each with `build` and
/// probing it under `config.probe_timeout_secs`.
pub async fn select_generator_with<F>(
    config: &LlmConfig,
    build: F,
) -> Result<Arc<dyn TextGenerator>>
where
    F: Fn(&LlmCandidate, &LlmConfig) -> Result<Arc<dyn TextGenerator>>,
{
    let timeout = Duration::from_secs(config.probe_timeout_secs);
    let (_, generator) = select_first(&config.candidates, |candidate| {
        let built = build(candidate, config);
        async move {
            let generator = built?;
            probe(generator.as_ref(), timeout).await?;
            Ok::<_, anyhow::Error>(generator)
        }
    })
    .await
    .context("No language model could be initialized")?;
    Ok(generator)
}

fn http_client(config: &LlmConfig) -> Result<reqwest::Client> {
    // The composer enforces the user-facing timeout; this only stops
    // abandoned requests from living forever.
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.saturating_mul(3).max(30)))
        .build()?)
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    label: &str,
) -> Result<serde_json::Value> {
    let mut request = client.post(url).json(body);
    if let Some(key) = bearer {
        request = request.bearer_auth(key);
    }
    let response = request
        .send()
        .await
        .with_context(|| format!("{} connection error ({})", label, url))?;
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!("{} API error {}: {}", label, status, body_text);
    }
    Ok(response.json().await?)
}

// ============ Ollama ============

/// Text generation through a local Ollama instance.
pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    temperature: f32,
    max_tokens: u32,
}

impl OllamaGenerator {
    pub fn new(candidate: &LlmCandidate, config: &LlmConfig) -> Result<Self> {
        let base = candidate
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            client: http_client(config)?,
            model: candidate.model.clone(),
            url: format!("{}/api/generate", base.trim_end_matches('/')),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });
        let json = post_json(&self.client, &self.url, None, &body, "Ollama").await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
}

// ============ OpenAI-compatible chat ============

/// Text generation through an OpenAI-compatible chat completions API.
pub struct OpenAIChatGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAIChatGenerator {
    pub fn new(candidate: &LlmCandidate, config: &LlmConfig) -> Result<Self> {
        let key_env = candidate.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
        let api_key = std::env::var(key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", key_env))?;
        let base = candidate
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            client: http_client(config)?,
            model: candidate.model.clone(),
            url: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAIChatGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let json = post_json(&self.client, &self.url, Some(&self.api_key), &body, "Chat").await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
}
