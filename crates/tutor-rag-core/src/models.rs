//! Core data models shared by the indexing and answering pipelines.
//!
//! These types represent the documents, chunks, index entries, and
//! conversation turns that flow between the chunker, the vector store,
//! the session store, and the orchestrator.

use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Bumped whenever the persisted index layout changes.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// A source document: identifier plus raw text. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Path relative to the corpus root, `/`-separated.
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// An ordered, possibly overlapping segment of a [`Document`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic UUID v5 of `"{document_id}#{sequence_index}"`.
    pub id: String,
    pub document_id: String,
    /// Position of this chunk within its document, starting at 0.
    pub sequence_index: usize,
    pub text: String,
    /// Span of `text` within the document, in chars.
    pub char_span: Range<usize>,
    /// SHA-256 hex digest of `text`.
    pub hash: String,
}

impl Chunk {
    pub fn new(document_id: &str, sequence_index: usize, text: &str, char_span: Range<usize>) -> Self {
        Self {
            id: chunk_id(document_id, sequence_index),
            document_id: document_id.to_string(),
            sequence_index,
            text: text.to_string(),
            char_span,
            hash: content_hash(text),
        }
    }
}

/// Deterministic chunk identifier.
pub fn chunk_id(document_id: &str, sequence_index: usize) -> String {
    let name = format!("{}#{}", document_id, sequence_index);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A chunk together with its embedding, owned by the vector store.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A chunk returned by a similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Cosine similarity to the query, in `[-1.0, 1.0]`.
    pub similarity: f32,
}

/// One question/answer exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    pub retrieved_chunk_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Describes how a persisted index was built.
///
/// Checked on load so vectors produced by one embedding model are never
/// compared against query vectors from another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub embedding_model: String,
    pub dims: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub document_count: usize,
    pub chunk_count: usize,
    pub built_at: DateTime<Utc>,
}

impl IndexManifest {
    /// Lists every build parameter in which `self` (persisted) differs
    /// from `expected`. Empty means compatible.
    pub fn incompatibilities(&self, expected: &IndexManifest) -> Vec<String> {
        let mut diffs = Vec::new();
        if self.format_version != expected.format_version {
            diffs.push(format!(
                "format_version {} != {}",
                self.format_version, expected.format_version
            ));
        }
        if self.embedding_model != expected.embedding_model {
            diffs.push(format!(
                "embedding_model '{}' != '{}'",
                self.embedding_model, expected.embedding_model
            ));
        }
        if self.dims != expected.dims {
            diffs.push(format!("dims {} != {}", self.dims, expected.dims));
        }
        if self.chunk_size != expected.chunk_size {
            diffs.push(format!(
                "chunk_size {} != {}",
                self.chunk_size, expected.chunk_size
            ));
        }
        if self.chunk_overlap != expected.chunk_overlap {
            diffs.push(format!(
                "chunk_overlap {} != {}",
                self.chunk_overlap, expected.chunk_overlap
            ));
        }
        diffs
    }
}
