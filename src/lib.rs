//! # Tutor RAG
//!
//! A retrieval-augmented AI tutor. Documents in a local corpus directory are
//! chunked, embedded, and persisted as a vector index; questions are
//! answered by a generative model grounded in the most similar chunks,
//! either one-shot or as a multi-turn conversation per session.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────┐
//! │  Corpus  │──▶│ Chunk+Embed │──▶│  SQLite  │
//! │  (.txt)  │   │   (index)   │   │ manifest │
//! └──────────┘   └─────────────┘   └────┬─────┘
//!                                       │ load
//!                                       ▼
//!              ┌──────────┐      ┌─────────────┐      ┌───────────┐
//!   question ─▶│ Sessions │◀────▶│ RagService  │─────▶│ Generator │
//!              └──────────┘      │ (retriever) │      └───────────┘
//!                                └──────┬──────┘
//!                              ┌────────┴────────┐
//!                              ▼                 ▼
//!                         ┌─────────┐       ┌─────────┐
//!                         │   CLI   │       │  HTTP   │
//!                         │ (tutor) │       │ (axum)  │
//!                         └─────────┘       └─────────┘
//! ```
//!
//! The runtime-free pieces (models, chunker, vector store, session store,
//! prompts, provider traits) live in the `tutor-rag-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`corpus`] | Corpus directory scanning and sample documents |
//! | [`db`] | SQLite persistence of a built index |
//! | [`index`] | Index build, load, and compatibility checks |
//! | [`embedding`] | Embedding providers (OpenAI, Ollama, local) |
//! | [`generation`] | Generative model providers (Gemini, Ollama, OpenAI) |
//! | [`upstream`] | Retry, backoff, and timeout for provider calls |
//! | [`retriever`] | Query embedding and similarity search |
//! | [`rag`] | Single-query and conversational answering |
//! | [`mood`] | Keyword mood classifier for answers |
//! | [`server`] | HTTP API |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod index;
pub mod logging;
pub mod mood;
pub mod rag;
pub mod retriever;
pub mod server;
pub mod upstream;
