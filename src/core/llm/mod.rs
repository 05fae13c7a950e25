//! Chat-completions client shared by the LLM agent executor and the
//! diagnosis oracle.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::config::LlmConfig;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub content: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, model_id: &str, messages: &[ChatMessage]) -> Result<Completion>;

    /// `generate` authenticated with `api_key` instead of the provider's own
    /// credential. Providers without per-call credentials ignore it.
    async fn generate_with_key(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        api_key: &str,
    ) -> Result<Completion> {
        let _ = api_key;
        self.generate(model_id, messages).await
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOwned,
}

#[derive(Deserialize)]
struct ChatMessageOwned {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Any endpoint speaking the OpenAI `/chat/completions` dialect.
pub struct OpenAiCompatProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
        }
    }

    /// Reads the key from the environment variable named in the config. A
    /// missing key is not fatal here; the first request will fail instead.
    pub fn from_config(config: &LlmConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!(
                "{} is not set; LLM calls will be sent without credentials",
                config.api_key_env
            );
        }
        Self::new(config.base_url.clone(), api_key)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn generate(&self, model_id: &str, messages: &[ChatMessage]) -> Result<Completion> {
        self.send(model_id, messages, self.api_key.as_deref()).await
    }

    async fn generate_with_key(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        api_key: &str,
    ) -> Result<Completion> {
        self.send(model_id, messages, Some(api_key)).await
    }
}

impl OpenAiCompatProvider {
    async fn send(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        api_key: Option<&str>,
    ) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!("POST {} ({} messages, model {})", url, messages.len(), model_id);
        let mut req = self.client.post(&url).json(&ChatRequest {
            model: model_id,
            messages,
        });
        if let Some(key) = api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(anyhow!(
                "LLM API error {}: {}",
                status,
                res.text().await.unwrap_or_default()
            ));
        }
        let parsed: ChatResponse = res.json().await?;
        let usage = parsed.usage.unwrap_or(ChatUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });
        Ok(Completion {
            content: parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default(),
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
        })
    }
}

/// Rough USD price per million tokens (input, output). Unknown models cost 0.
fn price_per_million(model: &str) -> (f64, f64) {
    let m = model.to_ascii_lowercase();
    if m.starts_with("gpt-4o-mini") {
        (0.15, 0.60)
    } else if m.starts_with("gpt-4o") {
        (2.50, 10.00)
    } else if m.starts_with("gpt-4.1-mini") {
        (0.40, 1.60)
    } else if m.starts_with("gpt-4.1") {
        (2.00, 8.00)
    } else {
        (0.0, 0.0)
    }
}

pub fn estimate_cost(model: &str, tokens_in: u64, tokens_out: u64) -> f64 {
    let (inp, out) = price_per_million(model);
    (tokens_in as f64 * inp + tokens_out as f64 * out) / 1_000_000.0
}

/// Extract a JSON block from LLM output. Tries fenced ```json ... ``` first,
/// then raw JSON starting with `{` or `[`.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let content_start = start + 7;
        if let Some(end) = trimmed[content_start..].find("```") {
            let block = trimmed[content_start..content_start + end].trim();
            if !block.is_empty() {
                return Some(block);
            }
        }
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(trimmed);
    }
    None
}
