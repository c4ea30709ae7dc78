//! Generative text model trait.
//!
//! Concrete backends (Gemini, Ollama, OpenAI) live in the `tutor-rag` app
//! crate.

use async_trait::async_trait;

use crate::error::ProviderError;

/// An external generative text model: `generate(prompt) -> text`.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gemini-2.5-flash"`).
    fn model_name(&self) -> &str;

    /// Run one completion for `prompt` and return the raw model output.
    ///
    /// This is a single attempt; retry and timeout policy is applied by the
    /// caller.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}
