//! Recursive-boundary text chunker with character overlap.
//!
//! Splits a [`Document`] into [`Chunk`]s of at most `chunk_size` characters.
//! The document is first partitioned into consecutive "fresh" spans; every
//! chunk after the first is then prefixed with the last `chunk_overlap`
//! characters preceding its fresh span, so context carries across chunk
//! boundaries.
//!
//! Fresh spans end at the coarsest boundary that fits the remaining budget:
//!
//! 1. paragraph (`"\n\n"`)
//! 2. line (`"\n"`)
//! 3. sentence (`". "`, `"! "`, `"? "`)
//! 4. word (`" "`)
//! 5. hard character offset when none of the above fits
//!
//! Separators stay attached to the preceding piece, and nothing is trimmed,
//! so [`reassemble`] restores the original text exactly. All lengths and
//! spans are counted in `char`s, never bytes.

use crate::error::RagError;
use crate::models::{Chunk, Document};

/// Boundary levels, coarsest first.
const SEPARATORS: &[&[&str]] = &[&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkParams {
    /// Fails with [`RagError::InvalidChunking`] unless
    /// `0 <= chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, RagError> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(RagError::InvalidChunking {
                chunk_size,
                chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

/// Split a document into ordered chunks with contiguous sequence indices
/// starting at 0. An empty document produces no chunks.
pub fn split(document: &Document, params: &ChunkParams) -> Vec<Chunk> {
    let chars: Vec<char> = document.text.chars().collect();
    let mut chunks = Vec::new();
    let mut fresh_start = 0;

    while fresh_start < chars.len() {
        let overlap = params.chunk_overlap.min(fresh_start);
        let budget = params.chunk_size - overlap;
        let fresh_end = next_boundary(&chars, fresh_start, budget);

        let span = (fresh_start - overlap)..fresh_end;
        let text: String = chars[span.clone()].iter().collect();
        chunks.push(Chunk::new(&document.id, chunks.len(), &text, span));

        fresh_start = fresh_end;
    }

    chunks
}

/// Split every document, preserving document order.
pub fn split_all(documents: &[Document], params: &ChunkParams) -> Vec<Chunk> {
    documents.iter().flat_map(|d| split(d, params)).collect()
}

/// Rebuild the original text from one document's chunks by dropping each
/// chunk's overlap prefix.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.char_span.start);
        out.extend(chunk.text.chars().skip(skip));
        covered = covered.max(chunk.char_span.end);
    }
    out
}

/// End (exclusive) of the fresh span starting at `start` with room for
/// `budget` characters.
fn next_boundary(chars: &[char], start: usize, budget: usize) -> usize {
    let limit = start + budget;
    if limit >= chars.len() {
        return chars.len();
    }

    let window = &chars[start..limit];
    for level in SEPARATORS {
        let best = level
            .iter()
            .filter_map(|sep| last_separator_end(window, sep))
            .max();
        if let Some(end) = best {
            return start + end;
        }
    }

    limit
}

/// Offset just past the last complete occurrence of `sep` in `window`.
fn last_separator_end(window: &[char], sep: &str) -> Option<usize> {
    let sep: Vec<char> = sep.chars().collect();
    if sep.len() > window.len() {
        return None;
    }
    (0..=window.len() - sep.len())
        .rev()
        .find(|&i| window[i..i + sep.len()] == sep[..])
        .map(|i| i + sep.len())
}
