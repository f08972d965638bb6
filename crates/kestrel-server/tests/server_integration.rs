//! End-to-end route tests over an in-memory store and a scripted provider.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use kestrel_llm::{MockProvider, MockScript};
use kestrel_server::{AppState, Server, ServerConfig};
use kestrel_store::LocalStore;
use kestrel_tools::ToolRegistry;
use kestrel_types::StreamChunk;

fn text_script(parts: &[&str]) -> MockScript {
    let mut chunks: Vec<StreamChunk> = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        chunks.push(StreamChunk {
            role: (i == 0).then(|| "assistant".to_string()),
            content: Some(part.to_string()),
            ..Default::default()
        });
    }
    chunks.push(StreamChunk::finish("stop"));
    MockScript::Chunks(chunks)
}

fn app(scripts: Vec<MockScript>) -> axum::Router {
    let provider = Arc::new(MockProvider::new(scripts));
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let state = AppState::new(
        provider,
        store,
        ToolRegistry::new(),
        None,
        ServerConfig::default(),
    )
    .unwrap();
    Server::new(state).router()
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = app(vec![]);
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("\"status\":\"ok\""));
    assert!(body.contains("kafka_initialized"));
}

#[tokio::test]
async fn test_models_listing() {
    let app = app(vec![]);
    let response = app
        .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["object"], "list");
    assert!(body["data"].as_array().unwrap().len() > 1);
    assert_eq!(body["data"][0]["object"], "model");
}

#[tokio::test]
async fn test_chat_stream_frames() {
    let app = app(vec![text_script(&["Hel", "lo"])]);
    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/chat/completions",
            r#"{"messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = body_string(response).await;
    assert!(body.contains("chat.completion.chunk"));
    assert!(body.contains("agent_done"));
    assert!(body.contains("text_response"));
    // The stream terminates cleanly.
    assert!(body.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn test_chat_non_streaming_collects() {
    let app = app(vec![text_script(&["Hel", "lo"])]);
    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/chat/completions",
            r#"{"messages":[{"role":"user","content":"hi"}],"stream":false}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn test_chat_rejects_empty_messages() {
    let app = app(vec![]);
    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/chat/completions",
            r#"{"messages":[]}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_agent_run_stream() {
    let app = app(vec![text_script(&["done"])]);
    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/agent/run",
            r#"{"messages":[{"role":"user","content":"go"}],"model":"gpt-4o"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("agent_done"));
    assert!(!body.contains("tool_messages"));
    assert!(body.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn test_thread_lifecycle() {
    let app = app(vec![]);

    // Create.
    let response = app
        .clone()
        .oneshot(json_request("POST", "/v1/threads", r#"{"user_id":"u1"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();
    let thread_id = created["thread_id"].as_str().unwrap().to_string();

    // Append a message.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/threads/{thread_id}/messages"),
            r#"{"role":"user","content":"remember this"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let added: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(added["success"], true);

    // List.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v1/threads/{thread_id}/messages"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let listed: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(listed["thread_id"], thread_id.as_str());
    assert_eq!(listed["messages"].as_array().unwrap().len(), 1);

    // Clear.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/v1/threads/{thread_id}/messages"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let deleted: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(deleted["deleted_count"], 1);
}

#[tokio::test]
async fn test_unknown_thread_messages_404() {
    let app = app(vec![]);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/threads/no-such-thread/messages")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_thread_chat_persists_history() {
    let app = app(vec![text_script(&["Hello there"])]);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/threads/t-chat/chat/completions",
            r#"{"messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("agent_done"));

    // The thread now holds both sides of the exchange.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/threads/t-chat/messages")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let listed: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();
    let messages = listed["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "Hello there");
}
