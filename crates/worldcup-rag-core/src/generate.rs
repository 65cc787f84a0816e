//! Text generation trait.
//!
//! Concrete backends (Ollama, OpenAI-compatible chat completions) live in
//! the `worldcup-rag` app crate; tests use scripted implementations.

use anyhow::Result;
use async_trait::async_trait;

/// A language model that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier reported by `/status`.
    fn model_name(&self) -> &str;
    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Generator that always returns the same text. Handy for wiring tests and
/// dry runs.
#[derive(Debug, Clone)]
pub struct StaticGenerator {
    name: String,
    reply: String,
}

impl StaticGenerator {
    pub fn new(name: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for StaticGenerator {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok(self.reply.clone())
    }
}
