//! HTTP server for the tutor.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service info and endpoint list |
//! | `GET`  | `/health` | Status, version, models, and index size |
//! | `POST` | `/query` | Single-query answer |
//! | `POST` | `/chat` | Conversational answer within a session |
//! | `POST` | `/retrieve` | Nearest chunks for a query, no generation |
//! | `GET`  | `/sessions/{id}/history` | Turns recorded for a session |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_request", "message": "question must not be empty" } }
//! ```
//!
//! | Error | Status |
//! |-------|--------|
//! | malformed body, `invalid_request` | 400 |
//! | `retrieval_failure`, `generation_failure` | 502 |
//! | `upstream_unavailable` | 503 |
//! | `upstream_timeout` | 504 |
//! | anything else | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! can call the API directly.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use tutor_rag_core::error::RagError;
use tutor_rag_core::models::{RetrievedChunk, Turn};
use tutor_rag_core::session::DEFAULT_SESSION_ID;

use crate::config::Config;
use crate::mood::{detect_mood, Mood};
use crate::rag::RagService;

/// Shared state passed to route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    rag: Arc<RagService>,
    /// Name of the configured generation provider (e.g. `"gemini"`).
    llm: String,
}

impl AppState {
    pub fn new(rag: Arc<RagService>, llm: impl Into<String>) -> Self {
        Self {
            rag,
            llm: llm.into(),
        }
    }
}

/// The full router with CORS and request tracing. Exposed for tests.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route("/chat", post(handle_chat))
        .route("/retrieve", post(handle_retrieve))
        .route("/sessions/{id}/history", get(handle_history))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `[server].bind` and serve until Ctrl-C.
pub async fn run_server(config: &Config, rag: Arc<RagService>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    if let Some(ttl) = rag.sessions().policy().idle_ttl {
        let sessions = Arc::clone(rag.sessions());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ttl);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = sessions.purge_expired();
                if removed > 0 {
                    debug!(removed, "purged idle sessions");
                }
            }
        });
    }

    let app = router(AppState::new(rag, config.generation.provider.clone()));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "tutor server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RagError::RetrievalFailure(_) | RagError::GenerationFailure(_) => {
                StatusCode::BAD_GATEWAY
            }
            RagError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RagError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(code = err.code(), error = %err, "request failed");
        } else {
            warn!(code = err.code(), error = %err, "request rejected");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_request".to_string(),
            message: rejection.body_text(),
        }
    }
}

// ============ GET / and /health ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "AI Tutor RAG API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "GET /health",
            "query": "POST /query",
            "chat": "POST /chat",
            "retrieve": "POST /retrieve",
            "history": "GET /sessions/{id}/history",
        },
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    llm: String,
    model: String,
    embedding_model: String,
    chunks: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let index = state.rag.retriever().index();
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        llm: state.llm.clone(),
        model: state.rag.generator().model_name().to_string(),
        embedding_model: index.manifest().embedding_model.clone(),
        chunks: index.len(),
    })
}

// ============ POST /query and /chat ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    session_id: Option<String>,
}

/// A chunk an answer drew on.
#[derive(Serialize)]
struct SourceRef {
    chunk_id: String,
    document_id: String,
    sequence_index: usize,
    similarity: f32,
}

impl From<&RetrievedChunk> for SourceRef {
    fn from(r: &RetrievedChunk) -> Self {
        SourceRef {
            chunk_id: r.chunk.id.clone(),
            document_id: r.chunk.document_id.clone(),
            sequence_index: r.chunk.sequence_index,
            similarity: r.similarity,
        }
    }
}

#[derive(Serialize)]
struct AnswerResponse {
    answer: String,
    mood: Mood,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    sources: Vec<SourceRef>,
}

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, AppError> {
    let Json(request) = payload?;
    let answer = state.rag.answer(&request.question).await?;
    Ok(Json(AnswerResponse {
        mood: detect_mood(&answer.text),
        sources: answer.chunks.iter().map(SourceRef::from).collect(),
        answer: answer.text,
        session_id: None,
    }))
}

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, AppError> {
    let Json(request) = payload?;
    let session_id = request
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(DEFAULT_SESSION_ID)
        .to_string();

    let answer = state.rag.chat(&request.question, Some(&session_id)).await?;
    Ok(Json(AnswerResponse {
        mood: detect_mood(&answer.text),
        sources: answer.chunks.iter().map(SourceRef::from).collect(),
        answer: answer.text,
        session_id: Some(session_id),
    }))
}

// ============ POST /retrieve ============

#[derive(Deserialize)]
struct RetrieveRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct RetrieveResult {
    chunk_id: String,
    document_id: String,
    sequence_index: usize,
    text: String,
    similarity: f32,
}

#[derive(Serialize)]
struct RetrieveResponse {
    results: Vec<RetrieveResult>,
}

async fn handle_retrieve(
    State(state): State<AppState>,
    payload: Result<Json<RetrieveRequest>, JsonRejection>,
) -> Result<Json<RetrieveResponse>, AppError> {
    let Json(request) = payload?;
    let k = request.k.unwrap_or(state.rag.settings().k);
    let chunks = state.rag.retriever().retrieve(&request.query, k).await?;
    Ok(Json(RetrieveResponse {
        results: chunks
            .into_iter()
            .map(|r| RetrieveResult {
                chunk_id: r.chunk.id,
                document_id: r.chunk.document_id,
                sequence_index: r.chunk.sequence_index,
                text: r.chunk.text,
                similarity: r.similarity,
            })
            .collect(),
    }))
}

// ============ GET /sessions/{id}/history ============

#[derive(Serialize)]
struct HistoryResponse {
    session_id: String,
    turns: Vec<Turn>,
}

/// Unknown or expired sessions report no turns and are not created.
async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<HistoryResponse> {
    let sessions = state.rag.sessions();
    let turns = if sessions.contains(&id) {
        sessions.history_of(&id)
    } else {
        Vec::new()
    };
    Json(HistoryResponse {
        session_id: id,
        turns,
    })
}
