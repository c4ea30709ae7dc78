//! Query-time retrieval over a loaded index.

use std::sync::Arc;

use tracing::debug;

use tutor_rag_core::embedding::EmbeddingProvider;
use tutor_rag_core::error::RagError;
use tutor_rag_core::models::RetrievedChunk;
use tutor_rag_core::store::VectorStore;

use crate::index::LoadedIndex;
use crate::upstream::{self, Upstream, UpstreamPolicy};

/// Embeds a query and returns the nearest chunks from the index.
pub struct Retriever {
    index: Arc<LoadedIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    policy: UpstreamPolicy,
}

impl Retriever {
    pub fn new(
        index: Arc<LoadedIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        policy: UpstreamPolicy,
    ) -> Self {
        Self {
            index,
            embedder,
            policy,
        }
    }

    pub fn index(&self) -> &Arc<LoadedIndex> {
        &self.index
    }

    /// Up to `k` chunks, most similar first; ties ordered by
    /// `(document_id, sequence_index)`. An empty index yields an empty list.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidRequest`] for `k == 0` or a blank query.
    /// - [`RagError::IndexIncompatible`] when the query vector's dimension
    ///   differs from the index's.
    /// - Upstream errors from embedding the query.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, RagError> {
        if k == 0 {
            return Err(RagError::InvalidRequest("k must be >= 1".to_string()));
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidRequest("query must not be empty".to_string()));
        }
        if self.index.is_empty() {
            return Ok(Vec::new());
        }

        let vector = upstream::call("embed query", Upstream::Embedding, &self.policy, || {
            self.embedder.embed_one(query)
        })
        .await?;

        let dims = self.index.manifest().dims;
        if vector.len() != dims {
            return Err(RagError::IndexIncompatible(format!(
                "query vector has {} dims, index has {}",
                vector.len(),
                dims
            )));
        }

        let results = self.index.store().search(&vector, k).await?;
        debug!(k, returned = results.len(), "retrieved chunks");
        Ok(results)
    }
}
