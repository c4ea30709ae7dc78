mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use common::{build_service, FailingGenerator, RecordingGenerator};
use tutor_rag::config::CondenseMode;
use tutor_rag::server::{router, AppState};
use tutor_rag_core::error::ProviderError;
use tutor_rag_core::generation::GenerationProvider;

async fn app(tmp: &TempDir, generator: Arc<dyn GenerationProvider>) -> Router {
    let rag = build_service(tmp.path(), generator, CondenseMode::Model).await;
    router(AppState::new(Arc::new(rag), "fake"))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_reports_index() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp, RecordingGenerator::new("ok", "ok")).await;

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["llm"], "fake");
    assert_eq!(body["model"], "recording");
    assert_eq!(body["embedding_model"], "keyword-v1");
    assert_eq!(body["chunks"], 3);
}

#[tokio::test]
async fn test_query_returns_answer_mood_and_sources() {
    let tmp = TempDir::new().unwrap();
    let app = app(
        &tmp,
        RecordingGenerator::new("Great question! Python is a language.", "unused"),
    )
    .await;

    let (status, body) = send(
        &app,
        post("/query", serde_json::json!({ "question": "What is Python?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"], "Great question! Python is a language.");
    assert_eq!(body["mood"], "happy");
    assert_eq!(body["sources"][0]["document_id"], "python_basics.txt");
    assert!(body.get("session_id").is_none());
}

#[tokio::test]
async fn test_invalid_requests_are_400() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp, RecordingGenerator::new("ok", "ok")).await;

    let (status, body) = send(&app, post("/query", serde_json::json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");

    let (status, body) = send(
        &app,
        post("/chat", serde_json::json!({ "question": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");

    let (status, _) = send(
        &app,
        post("/retrieve", serde_json::json!({ "query": "python", "k": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_records_history_per_session() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp, RecordingGenerator::new("A field of AI.", "unused")).await;

    let (status, body) = send(
        &app,
        post(
            "/chat",
            serde_json::json!({ "question": "What is machine learning?", "session_id": "A" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "A");
    assert_eq!(body["sources"][0]["document_id"], "machine_learning.txt");

    let (status, body) = send(&app, get("/sessions/A/history")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["turns"].as_array().unwrap().len(), 1);
    assert_eq!(body["turns"][0]["question"], "What is machine learning?");

    let (_, body) = send(&app, get("/sessions/B/history")).await;
    assert_eq!(body["turns"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_chat_without_session_uses_default() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp, RecordingGenerator::new("ok", "ok")).await;

    let (status, body) = send(
        &app,
        post("/chat", serde_json::json!({ "question": "What is a stack?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "default");
}

#[tokio::test]
async fn test_upstream_errors_map_to_gateway_statuses() {
    let tmp = TempDir::new().unwrap();

    let fatal = app(
        &tmp,
        Arc::new(FailingGenerator(ProviderError::Fatal("bad key".into()))),
    )
    .await;
    let (status, body) = send(
        &fatal,
        post("/query", serde_json::json!({ "question": "What is Python?" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "generation_failure");

    let transient = app(
        &tmp,
        Arc::new(FailingGenerator(ProviderError::Transient("503".into()))),
    )
    .await;
    let (status, body) = send(
        &transient,
        post("/query", serde_json::json!({ "question": "What is Python?" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "upstream_unavailable");
}

#[tokio::test]
async fn test_retrieve_returns_ranked_chunks() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp, RecordingGenerator::new("ok", "ok")).await;

    let (status, body) = send(
        &app,
        post("/retrieve", serde_json::json!({ "query": "stacks and queues", "k": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["document_id"], "data_structures.txt");
    assert!(results[0]["text"].as_str().unwrap().contains("LIFO"));
}
