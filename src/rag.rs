//! Answer orchestration: the single-query and conversational protocols.
//!
//! # Single query
//!
//! ```text
//! question → retrieve(question, k) → query_prompt → generate → Answer
//! ```
//!
//! # Conversation
//!
//! ```text
//! history = sessions[session_id]
//! standalone = condense(history, question)        (skipped when history is empty)
//! chunks = retrieve(standalone, k)
//! answer = generate(chat_prompt(chunks, history, question))
//! sessions[session_id].append(question, answer)   (only on success)
//! ```
//!
//! Condensation is its own upstream call with its own retries and is never
//! folded into the final generation. A failure anywhere before the append
//! leaves the session history exactly as it was.
//!
//! No lock is held while waiting on the embedding or generative model; the
//! session store is only touched to snapshot history and to append the
//! finished turn.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, Span};

use tutor_rag_core::error::RagError;
use tutor_rag_core::generation::GenerationProvider;
use tutor_rag_core::models::{RetrievedChunk, Turn};
use tutor_rag_core::prompt;
use tutor_rag_core::session::{SessionStore, DEFAULT_SESSION_ID};

use crate::config::{CondenseMode, Config};
use crate::retriever::Retriever;
use crate::upstream::{self, Upstream, UpstreamPolicy};

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub k: usize,
    pub condense: CondenseMode,
    pub generation_policy: UpstreamPolicy,
    /// Cached condensed queries; 0 disables the cache.
    pub condense_cache_capacity: usize,
}

impl RagSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            k: config.retrieval.k,
            condense: config.generation.condense,
            generation_policy: UpstreamPolicy::for_generation(&config.generation),
            condense_cache_capacity: config.generation.condense_cache_capacity,
        }
    }
}

/// A generated answer and the chunks it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub chunks: Vec<RetrievedChunk>,
}

pub struct RagService {
    retriever: Retriever,
    generator: Arc<dyn GenerationProvider>,
    sessions: Arc<SessionStore>,
    settings: RagSettings,
    condense_cache: Option<Mutex<LruCache<String, String>>>,
}

impl RagService {
    pub fn new(
        retriever: Retriever,
        generator: Arc<dyn GenerationProvider>,
        sessions: Arc<SessionStore>,
        settings: RagSettings,
    ) -> Self {
        let condense_cache = NonZeroUsize::new(settings.condense_cache_capacity)
            .filter(|_| settings.condense == CondenseMode::Model)
            .map(|cap| Mutex::new(LruCache::new(cap)));
        Self {
            retriever,
            generator,
            sessions,
            settings,
            condense_cache,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn generator(&self) -> &Arc<dyn GenerationProvider> {
        &self.generator
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    /// Answer one question with no conversational context.
    #[instrument(name = "rag.answer", skip_all, fields(k = self.settings.k, chunks = tracing::field::Empty))]
    pub async fn answer(&self, question: &str) -> Result<Answer, RagError> {
        let question = validate_question(question)?;
        debug!(question, "answering");

        let chunks = self.retriever.retrieve(question, self.settings.k).await?;
        Span::current().record("chunks", chunks.len());

        let prompt = prompt::query_prompt(&chunks, question);
        let text = self.generate("generate answer", &prompt).await?;

        info!(chunks = chunks.len(), answer_chars = text.len(), "answered question");
        Ok(Answer { text, chunks })
    }

    /// Answer a question in the context of `session_id`'s history and record
    /// the exchange. `None` uses the `"default"` session.
    #[instrument(
        name = "rag.chat",
        skip_all,
        fields(session_id = tracing::field::Empty, k = self.settings.k, chunks = tracing::field::Empty)
    )]
    pub async fn chat(&self, question: &str, session_id: Option<&str>) -> Result<Answer, RagError> {
        let question = validate_question(question)?;
        let session_id = session_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_SESSION_ID);
        Span::current().record("session_id", session_id);
        debug!(question, "chatting");

        let history = self.sessions.history_of(session_id);
        let standalone = self.condense(&history, question).await?;

        let chunks = self.retriever.retrieve(&standalone, self.settings.k).await?;
        Span::current().record("chunks", chunks.len());

        let prompt = prompt::chat_prompt(&chunks, &history, question);
        let text = self.generate("generate answer", &prompt).await?;

        let chunk_ids = chunks.iter().map(|c| c.chunk.id.clone()).collect();
        self.sessions.append_turn(session_id, question, &text, chunk_ids);

        info!(
            turns = history.len() + 1,
            chunks = chunks.len(),
            "answered follow-up"
        );
        Ok(Answer { text, chunks })
    }

    /// The retrieval query for `question` given prior turns.
    async fn condense(&self, history: &[Turn], question: &str) -> Result<String, RagError> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        match self.settings.condense {
            CondenseMode::Template => Ok(prompt::template_condense(history, question)),
            CondenseMode::Model => {
                let key = condense_key(history, question);
                if let Some(hit) = self.cached_condensation(&key) {
                    debug!("condensed question served from cache");
                    return Ok(hit);
                }

                let condense_prompt = prompt::condense_prompt(history, question);
                let standalone = self
                    .generate("condense question", &condense_prompt)
                    .await?
                    .trim()
                    .to_string();
                debug!(standalone = %standalone, "condensed question");

                if let Some(cache) = &self.condense_cache {
                    cache
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .put(key, standalone.clone());
                }
                Ok(standalone)
            }
        }
    }

    fn cached_condensation(&self, key: &str) -> Option<String> {
        let cache = self.condense_cache.as_ref()?;
        let mut cache = cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.get(key).cloned()
    }

    /// One generation call under the retry policy. The output is returned
    /// verbatim; blank output is a [`RagError::GenerationFailure`].
    async fn generate(&self, operation: &str, prompt: &str) -> Result<String, RagError> {
        let output = upstream::call(
            operation,
            Upstream::Generation,
            &self.settings.generation_policy,
            || self.generator.generate(prompt),
        )
        .await?;

        if output.trim().is_empty() {
            return Err(RagError::GenerationFailure(format!(
                "{}: model returned an empty response",
                operation
            )));
        }
        Ok(output)
    }
}

fn validate_question(question: &str) -> Result<&str, RagError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(RagError::InvalidRequest(
            "question must not be empty".to_string(),
        ));
    }
    Ok(question)
}

fn condense_key(history: &[Turn], question: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt::render_history(history).as_bytes());
    hasher.update([0u8]);
    hasher.update(question.as_bytes());
    format!("{:x}", hasher.finalize())
}
