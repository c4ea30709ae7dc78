//! Vector index abstraction.
//!
//! The [`VectorStore`] trait is the seam between the RAG pipeline and the
//! nearest-neighbour backend: `upsert(entry)` while building, and
//! `search(vector, k)` afterwards.
//!
//! `upsert` takes `&mut self`. A store is exclusively owned while it is
//! being filled and is only shared (behind an `Arc`) once the build is
//! finished, so post-build reads need no locking.

pub mod memory;

use async_trait::async_trait;

use crate::error::RagError;
use crate::models::{IndexEntry, RetrievedChunk};

pub use memory::InMemoryVectorStore;

/// Abstract nearest-neighbour index over chunk embeddings.
///
/// # Ordering contract
///
/// [`search`](VectorStore::search) returns at most `k` matches ordered by
/// descending similarity. Equal similarities are ordered by ascending
/// `(document_id, sequence_index)`. An empty store yields an empty result,
/// not an error.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert an entry, replacing any existing entry with the same chunk id.
    async fn upsert(&mut self, entry: IndexEntry) -> Result<(), RagError>;

    /// Return the `k` entries most similar to `query`. `k` must be `>= 1`.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, RagError>;

    /// Number of stored entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
