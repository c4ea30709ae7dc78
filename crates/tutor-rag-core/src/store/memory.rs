//! In-memory [`VectorStore`] implementation.
//!
//! Entries live in a `Vec` in insertion order with a `HashMap` from chunk id
//! to position. Search is brute-force cosine similarity over all entries,
//! which is fine for tutor-sized corpora (thousands of chunks).

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::RagError;
use crate::models::{IndexEntry, RetrievedChunk};

use super::VectorStore;

#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Dimension of the stored vectors, if any entry exists.
    pub fn dims(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.len())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&mut self, entry: IndexEntry) -> Result<(), RagError> {
        if let Some(dims) = self.dims() {
            if entry.embedding.len() != dims {
                return Err(RagError::IndexIncompatible(format!(
                    "chunk {} has {} dims, index has {}",
                    entry.chunk.id,
                    entry.embedding.len(),
                    dims
                )));
            }
        }

        match self.positions.get(&entry.chunk.id) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.positions
                    .insert(entry.chunk.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, RagError> {
        if k == 0 {
            return Err(RagError::InvalidRequest("k must be >= 1".to_string()));
        }

        let mut scored: Vec<(&IndexEntry, f32)> = self
            .entries
            .iter()
            .map(|e| (e, cosine_similarity(query, &e.embedding)))
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| rank_order(a, *sa, b, *sb));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(e, similarity)| RetrievedChunk {
                chunk: e.chunk.clone(),
                similarity,
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Similarity descending, then `(document_id, sequence_index)` ascending.
fn rank_order(a: &IndexEntry, sa: f32, b: &IndexEntry, sb: f32) -> Ordering {
    sb.total_cmp(&sa)
        .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
        .then_with(|| a.chunk.sequence_index.cmp(&b.chunk.sequence_index))
}
