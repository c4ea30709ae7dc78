//! Generative model providers.
//!
//! Concrete backends for [`GenerationProvider`]:
//! - **[`GeminiProvider`]**: Google `generateContent` API (`GOOGLE_API_KEY`).
//! - **[`OllamaProvider`]**: local Ollama `/api/generate`.
//! - **[`OpenAIProvider`]**: `/v1/chat/completions` on OpenAI or a compatible server.
//! - **[`DisabledProvider`]**: always fails; lets `index` and `retrieve` run
//!   without a model.
//!
//! As with embeddings, each `generate` call is one attempt; the retry and
//! timeout policy lives in [`crate::upstream`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use tutor_rag_core::error::ProviderError;
use tutor_rag_core::generation::GenerationProvider;

use crate::config::GenerationConfig;
use crate::upstream::{read_json, send_error};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const OPENAI_BASE_URL: &str = "https://api.openai.com";

pub struct DisabledProvider;

#[async_trait]
impl GenerationProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Fatal(
            "Generation provider is disabled. Set [generation] provider in config.".to_string(),
        ))
    }
}

/// Google Gemini via the `generateContent` REST endpoint.
pub struct GeminiProvider {
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// # Errors
    ///
    /// Returns an error if `GOOGLE_API_KEY` is not set.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .map_err(|_| anyhow::anyhow!("GOOGLE_API_KEY environment variable not set"))?;
        Ok(Self {
            model: config.model.clone(),
            base_url: base_url(config, GEMINI_BASE_URL),
            api_key,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens,
            },
        });

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error("Gemini", e))?;

        let json = read_json("Gemini", response).await?;
        parse_gemini_response(&json)
    }
}

/// Concatenates the text parts of the first candidate.
fn parse_gemini_response(json: &serde_json::Value) -> Result<String, ProviderError> {
    let candidate = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(|r| r.as_str())
                .unwrap_or("no candidates");
            ProviderError::Fatal(format!("Gemini returned no answer: {}", reason))
        })?;

    let parts = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .concat())
}

/// Ollama's non-streaming completion endpoint.
pub struct OllamaProvider {
    model: String,
    base_url: String,
    temperature: f32,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            base_url: base_url(config, OLLAMA_BASE_URL),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl GenerationProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_output_tokens,
            },
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error("Ollama", e))?;

        let json = read_json("Ollama", response).await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Fatal("Invalid Ollama response: missing response".into()))
    }
}

/// OpenAI chat completions, or any server speaking the same protocol.
pub struct OpenAIProvider {
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: config.model.clone(),
            base_url: base_url(config, OPENAI_BASE_URL),
            api_key,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "max_tokens": self.max_output_tokens,
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error("OpenAI", e))?;

        let json = read_json("OpenAI", response).await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Fatal("Invalid OpenAI response: missing content".into()))
    }
}

fn base_url(config: &GenerationConfig, default: &str) -> String {
    config
        .url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

fn http_client(config: &GenerationConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Create the configured [`GenerationProvider`].
pub fn create_generation_provider(
    config: &GenerationConfig,
) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "gemini" => Ok(Arc::new(GeminiProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
