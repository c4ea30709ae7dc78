//! Deterministic fake providers and fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tutor_rag::config::{CondenseMode, CorpusConfig};
use tutor_rag::index::{ensure_index, IndexSettings};
use tutor_rag::rag::{RagService, RagSettings};
use tutor_rag::retriever::Retriever;
use tutor_rag::upstream::UpstreamPolicy;
use tutor_rag_core::chunk::ChunkParams;
use tutor_rag_core::embedding::EmbeddingProvider;
use tutor_rag_core::error::ProviderError;
use tutor_rag_core::generation::GenerationProvider;
use tutor_rag_core::session::{SessionPolicy, SessionStore};

const VOCABULARY: &[&str] = &[
    "python",
    "machine",
    "learning",
    "data",
    "structure",
    "array",
    "stack",
    "queue",
    "tree",
    "graph",
    "supervised",
    "algorithm",
    "language",
];

/// Bag-of-words over a fixed vocabulary, with a small floor so no vector
/// is all zeros. Remembers every text it embedded, and can be switched to
/// failing every call.
pub struct KeywordEmbedder {
    pub model: String,
    seen: Mutex<Vec<String>>,
    down: AtomicBool,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::named("keyword-v1")
    }

    pub fn named(model: &str) -> Self {
        Self {
            model: model.to_string(),
            seen: Mutex::new(Vec::new()),
            down: AtomicBool::new(false),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        VOCABULARY.len()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ProviderError::Fatal("embedding backend unavailable".into()));
        }
        self.seen.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                VOCABULARY
                    .iter()
                    .map(|w| lower.matches(w).count() as f32 + 0.01)
                    .collect()
            })
            .collect())
    }
}

/// Answers every prompt with a fixed reply and records the prompts it saw.
/// Condense prompts get `standalone` back instead.
pub struct RecordingGenerator {
    pub reply: String,
    pub standalone: String,
    prompts: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    pub fn new(reply: &str, standalone: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            standalone: standalone.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationProvider for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.ends_with("Standalone question:") {
            Ok(self.standalone.clone())
        } else {
            Ok(self.reply.clone())
        }
    }
}

/// Fails every call with the given error.
pub struct FailingGenerator(pub ProviderError);

#[async_trait]
impl GenerationProvider for FailingGenerator {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(self.0.clone())
    }
}

pub fn fast_policy() -> UpstreamPolicy {
    UpstreamPolicy {
        timeout: Duration::from_secs(5),
        max_retries: 0,
        backoff: Duration::from_millis(1),
    }
}

/// A corpus config for `root/data`, seeded with the sample documents on
/// first load.
pub fn seeded_corpus(root: &Path) -> CorpusConfig {
    CorpusConfig {
        dir: root.join("data"),
        include_globs: vec!["**/*.txt".to_string()],
        exclude_globs: vec![],
        seed_samples: true,
    }
}

pub fn index_settings(root: &Path) -> IndexSettings {
    IndexSettings {
        path: root.join("index"),
        chunk_params: ChunkParams::new(1000, 200).unwrap(),
        batch_size: 16,
        embedding_policy: fast_policy(),
        rebuild: false,
        stale_after: Duration::from_secs(3600),
    }
}

/// Build (or load) the index under `root` and wire a service around it.
pub async fn build_service(
    root: &Path,
    generator: Arc<dyn GenerationProvider>,
    condense: CondenseMode,
) -> RagService {
    build_service_with(
        root,
        Arc::new(KeywordEmbedder::new()),
        generator,
        condense,
        Arc::new(SessionStore::new(SessionPolicy::default())),
    )
    .await
}

/// Like [`build_service`], with the embedder and session store supplied.
pub async fn build_service_with(
    root: &Path,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    condense: CondenseMode,
    sessions: Arc<SessionStore>,
) -> RagService {
    let index = ensure_index(&index_settings(root), &seeded_corpus(root), embedder.as_ref())
        .await
        .unwrap();

    RagService::new(
        Retriever::new(index, embedder, fast_policy()),
        generator,
        sessions,
        RagSettings {
            k: 1,
            condense,
            generation_policy: fast_policy(),
            condense_cache_capacity: 32,
        },
    )
}
