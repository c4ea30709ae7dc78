//! Prompt templates for the two answering protocols.
//!
//! Prompts are transient strings built fresh for each request from the
//! retrieved chunks, the question, and (for chat) the prior turns.

use crate::models::{RetrievedChunk, Turn};

pub const SYSTEM_INSTRUCTION: &str =
    "You are a friendly AI tutor. Answer clearly and concisely.";

/// Separates chunk texts inside the context block.
pub const CONTEXT_DELIMITER: &str = "\n\n";

const CONDENSE_INSTRUCTION: &str = "Given the following conversation and a follow up question, \
rephrase the follow up question to be a standalone question, in its original language.";

/// Chunk texts in retrieval order, joined by [`CONTEXT_DELIMITER`].
pub fn render_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}

/// Prior turns as `Human:`/`Assistant:` lines, oldest first.
pub fn render_history(history: &[Turn]) -> String {
    history
        .iter()
        .map(|t| format!("Human: {}\nAssistant: {}", t.question, t.answer))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt for the single-query protocol.
pub fn query_prompt(chunks: &[RetrievedChunk], question: &str) -> String {
    format!(
        "{}\n\nContext: {}\n\nQuestion: {}\n\nAnswer:",
        SYSTEM_INSTRUCTION,
        render_context(chunks),
        question
    )
}

/// Prompt for the final generation of the conversational protocol.
///
/// Carries the full prior history and the original, uncondensed question.
pub fn chat_prompt(chunks: &[RetrievedChunk], history: &[Turn], question: &str) -> String {
    let mut prompt = format!(
        "{}\n\nContext: {}\n\n",
        SYSTEM_INSTRUCTION,
        render_context(chunks)
    );
    if !history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        prompt.push_str(&render_history(history));
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!("Question: {}\n\nAnswer:", question));
    prompt
}

/// Prompt asking the model to rewrite a follow-up into a standalone question.
pub fn condense_prompt(history: &[Turn], question: &str) -> String {
    format!(
        "{}\n\nChat History:\n{}\nFollow Up Input: {}\nStandalone question:",
        CONDENSE_INSTRUCTION,
        render_history(history),
        question
    )
}

/// Deterministic condensation: the rendered history followed by the
/// follow-up, used as the retrieval query without a model call.
pub fn template_condense(history: &[Turn], question: &str) -> String {
    if history.is_empty() {
        return question.to_string();
    }
    format!("{}\nFollow Up Input: {}", render_history(history), question)
}
