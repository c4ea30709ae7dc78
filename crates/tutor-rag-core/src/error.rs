//! Error taxonomy for the RAG core.
//!
//! [`RagError`] is the error every request-level operation returns. It
//! separates logical failures (bad input, empty corpus, a model that
//! refused or answered with nothing) from upstream availability problems
//! (timeouts, exhausted retries) so callers can map them to distinct
//! responses.
//!
//! [`ProviderError`] is what the external collaborators (embedding and
//! generation providers) return for a single attempt. The upstream wrapper
//! in the app crate retries [`ProviderError::Transient`] and gives up
//! immediately on [`ProviderError::Fatal`].

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// No documents were found when a fresh index build was required.
    #[error("no documents found in corpus directory {}", dir.display())]
    EmptyCorpus { dir: PathBuf },

    /// The embedding call or the similarity search failed.
    #[error("retrieval failed: {0}")]
    RetrievalFailure(String),

    /// The generative model errored or returned an empty answer.
    #[error("generation failed: {0}")]
    GenerationFailure(String),

    /// The request was rejected before any retrieval or generation work.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid chunking parameters: chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size}) and chunk_size must be > 0")]
    InvalidChunking {
        chunk_size: usize,
        chunk_overlap: usize,
    },

    /// The persisted index was built with a different embedding model,
    /// dimension, or chunking configuration.
    #[error("index incompatible: {0}")]
    IndexIncompatible(String),

    /// Another builder holds the build marker for this location.
    #[error(
        "index build already in progress at {}; if no build is running, remove {}.building or run `tutor index --rebuild`",
        path.display(),
        path.display()
    )]
    IndexBusy { path: PathBuf },

    #[error("{operation} timed out after {timeout_ms} ms")]
    UpstreamTimeout {
        operation: String,
        timeout_ms: u64,
    },

    #[error("{operation} unavailable after {attempts} attempts: {message}")]
    UpstreamUnavailable {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// Reading or writing persisted index state failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl RagError {
    /// Stable machine-readable code, used in HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::EmptyCorpus { .. } => "empty_corpus",
            RagError::RetrievalFailure(_) => "retrieval_failure",
            RagError::GenerationFailure(_) => "generation_failure",
            RagError::InvalidRequest(_) => "invalid_request",
            RagError::InvalidChunking { .. } => "invalid_chunking",
            RagError::IndexIncompatible(_) => "index_incompatible",
            RagError::IndexBusy { .. } => "index_busy",
            RagError::UpstreamTimeout { .. } => "upstream_timeout",
            RagError::UpstreamUnavailable { .. } => "upstream_unavailable",
            RagError::Storage(_) => "storage",
        }
    }

    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        RagError::Storage(err.to_string())
    }
}

/// Outcome of a single call to an external provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Network error, rate limiting (HTTP 429), or a server-side failure.
    #[error("{0}")]
    Transient(String),
    /// Client error, malformed response, or missing credentials.
    #[error("{0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            RagError::EmptyCorpus {
                dir: PathBuf::from("data"),
            },
            RagError::RetrievalFailure("x".into()),
            RagError::GenerationFailure("x".into()),
            RagError::InvalidRequest("x".into()),
            RagError::InvalidChunking {
                chunk_size: 1,
                chunk_overlap: 1,
            },
            RagError::IndexIncompatible("x".into()),
            RagError::IndexBusy {
                path: PathBuf::from("index"),
            },
            RagError::UpstreamTimeout {
                operation: "embed".into(),
                timeout_ms: 10,
            },
            RagError::UpstreamUnavailable {
                operation: "generate".into(),
                attempts: 3,
                message: "503".into(),
            },
            RagError::Storage("x".into()),
        ];
        let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_display_mentions_operation() {
        let err = RagError::UpstreamTimeout {
            operation: "generate".into(),
            timeout_ms: 1500,
        };
        assert_eq!(err.to_string(), "generate timed out after 1500 ms");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Transient("429".into()).is_transient());
        assert!(!ProviderError::Fatal("401".into()).is_transient());
    }
}
