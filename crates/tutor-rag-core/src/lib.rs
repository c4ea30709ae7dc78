//! # Tutor RAG Core
//!
//! Runtime-agnostic building blocks for the tutor RAG service: data models,
//! the recursive-boundary chunker, the error taxonomy, provider traits for
//! embedding and generation, the vector store abstraction, the session
//! store, and prompt templates.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The
//! `tutor-rag` app crate supplies concrete providers, persistence, and the
//! request orchestration on top of it.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod models;
pub mod prompt;
pub mod session;
pub mod store;
