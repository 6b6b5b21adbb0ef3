use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use cimba::server::{build_router, handlers::AppState};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

mod common;
use common::{MockLlmClient, create_orchestrator, create_temp_dir, text_reply, tool_call, tool_reply};

fn create_test_app(llm: Arc<MockLlmClient>) -> (Router, TempDir) {
    let temp_dir = create_temp_dir();
    let orchestrator = create_orchestrator(&temp_dir, llm);
    let app = build_router(AppState::new("cimba-test", orchestrator));
    (app, temp_dir)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn send_text(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_health() {
    let (app, _temp_dir) = create_test_app(MockLlmClient::new().shared());

    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["app"], "cimba-test");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_unknown_route_returns_uniform_404() {
    let (app, _temp_dir) = create_test_app(MockLlmClient::new().shared());

    let (status, body) = send(&app, get("/nonexistent")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body,
        json!({"error": "404", "message": "Not Found", "details": null})
    );
}

#[tokio::test]
async fn test_wrong_method_returns_uniform_405() {
    let (app, _temp_dir) = create_test_app(MockLlmClient::new().shared());

    let (status, body) = send(&app, get("/chat")).await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["error"], "405");
    assert_eq!(body["message"], "Method Not Allowed");
}

#[tokio::test]
async fn test_chat_success() {
    let llm = MockLlmClient::with_replies(vec![text_reply("Hello from the agent")]).shared();
    let (app, _temp_dir) = create_test_app(llm.clone());

    let (status, body) = send(
        &app,
        post_json("/chat", json!({"message": "Hello", "session_id": "web-1"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"session_id": "web-1", "output": "Hello from the agent"})
    );
    assert_eq!(llm.request_count(), 1);
}

#[tokio::test]
async fn test_chat_without_session_uses_default() {
    let llm = MockLlmClient::with_replies(vec![text_reply("Hi")]).shared();
    let (app, _temp_dir) = create_test_app(llm);

    let (status, body) = send(&app, post_json("/chat", json!({"message": "hello"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "default");

    let (status, body) = send(&app, get("/sessions/default")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "default");
}

#[tokio::test]
async fn test_chat_missing_message_is_validation_error() {
    let llm = MockLlmClient::new().shared();
    let (app, _temp_dir) = create_test_app(llm.clone());

    let (status, body) = send(&app, post_json("/chat", json!({"session_id": "x"}))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["message"], "Validation failed");
    assert_eq!(
        body["details"],
        json!([{"field": "body.message", "message": "Field required"}])
    );
    assert_eq!(llm.request_count(), 0);
}

#[tokio::test]
async fn test_chat_invalid_session_id_is_validation_error() {
    let (app, _temp_dir) = create_test_app(MockLlmClient::new().shared());

    let (status, body) = send(
        &app,
        post_json("/chat", json!({"message": "hi", "session_id": "../etc"})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"][0]["field"], "body.session_id");
}

#[tokio::test]
async fn test_chat_malformed_json() {
    let (app, _temp_dir) = create_test_app(MockLlmClient::new().shared());

    let request = Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("invalid json"))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["details"][0]["message"], "JSON decode error");
    assert!(
        body["details"][0]["field"]
            .as_str()
            .unwrap()
            .starts_with("body.")
    );
}

#[tokio::test]
async fn test_chat_empty_body_reports_every_missing_field() {
    let (app, _temp_dir) = create_test_app(MockLlmClient::new().shared());

    let (status, body) = send(&app, post_json("/chat", json!({}))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body["details"],
        json!([{"field": "body.message", "message": "Field required"}])
    );
}

#[tokio::test]
async fn test_chat_without_content_type() {
    let llm = MockLlmClient::with_replies(vec![text_reply("plain")]).shared();
    let (app, _temp_dir) = create_test_app(llm);

    let request = Request::builder()
        .method("POST")
        .uri("/chat")
        .body(Body::from(r#"{"message": "hi"}"#))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "plain");
}

#[tokio::test]
async fn test_chat_agent_failure_hides_details() {
    let llm = MockLlmClient::with_error("api key sk-secret rejected").shared();
    let (app, _temp_dir) = create_test_app(llm);

    let (status, body) = send(&app, post_json("/chat", json!({"message": "hi"}))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({"error": "internal_error", "message": "Internal server error", "details": null})
    );
}

#[tokio::test]
async fn test_chat_stream() {
    let llm = MockLlmClient::with_replies(vec![
        tool_reply(vec![tool_call(
            "call_1",
            "set_session_metadata",
            json!({"key": "city", "value": "Lisbon"}),
        )]),
        text_reply("Lisbon it is."),
    ])
    .shared();
    let (app, _temp_dir) = create_test_app(llm);

    let (status, content_type, body) = send_text(
        &app,
        post_json(
            "/chat",
            json!({"message": "I live in Lisbon", "session_id": "sse", "stream": true}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/event-stream"));

    let tool_at = body.find("event: tool_call").unwrap();
    let delta_at = body.find("event: delta").unwrap();
    let done_at = body.find("event: done").unwrap();
    assert!(tool_at < delta_at && delta_at < done_at);
    assert!(body.contains(r#"{"name":"set_session_metadata"}"#));
    assert!(body.contains(r#"{"session_id":"sse","output":"Lisbon it is."}"#));
    assert!(!body.contains("event: error"));

    let (status, session) = send(&app, get("/sessions/sse")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["metadata"], json!({"city": "Lisbon"}));
}

#[tokio::test]
async fn test_chat_stream_failure_sends_error_event() {
    let llm = MockLlmClient::with_error("stream exploded").shared();
    let (app, _temp_dir) = create_test_app(llm);

    let (status, _, body) = send_text(
        &app,
        post_json("/chat", json!({"message": "hi", "stream": true})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("event: error"));
    assert!(body.contains(r#""error":"internal_error""#));
    assert!(!body.contains("stream exploded"));
    assert!(!body.contains("event: done"));
}

#[tokio::test]
async fn test_create_and_get_session() {
    let (app, _temp_dir) = create_test_app(MockLlmClient::new().shared());

    let (status, created) = send(
        &app,
        post_json(
            "/sessions",
            json!({
                "session_id": "project-x",
                "instruction": "Be brief",
                "metadata": {"owner": "sam"}
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        created,
        json!({
            "session_id": "project-x",
            "system_prompt": "Be brief",
            "metadata": {"owner": "sam"}
        })
    );

    let (status, fetched) = send(&app, get("/sessions/project-x")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn test_create_session_generates_id() {
    let (app, _temp_dir) = create_test_app(MockLlmClient::new().shared());

    let (status, created) = send(&app, post_json("/sessions", json!({}))).await;

    assert_eq!(status, StatusCode::CREATED);
    let session_id = created["session_id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(session_id).is_ok());
}

#[tokio::test]
async fn test_create_existing_session_conflicts() {
    let (app, _temp_dir) = create_test_app(MockLlmClient::new().shared());
    let request = || post_json("/sessions", json!({"session_id": "dup"}));

    let (status, _) = send(&app, request()).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, request()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
    assert_eq!(body["details"], Value::Null);
}

#[tokio::test]
async fn test_get_missing_session() {
    let (app, _temp_dir) = create_test_app(MockLlmClient::new().shared());

    let (status, body) = send(&app, get("/sessions/missing")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    assert!(body["message"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_get_session_invalid_id() {
    let (app, _temp_dir) = create_test_app(MockLlmClient::new().shared());

    let (status, body) = send(&app, get("/sessions/bad%20id")).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"][0]["field"], "path.session_id");
}
