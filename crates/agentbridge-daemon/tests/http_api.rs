#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! HTTP surface driven through the router without a listener.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use agentbridge_daemon::server::{AppState, build_router};
use agentbridge_daemon::session::SessionManager;

use common::manager;

/// Send a request to the app and return (status, JSON body or Null).
async fn send(
    manager: &Arc<SessionManager>,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let app = build_router(AppState::new(Arc::clone(manager)));
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create(manager: &Arc<SessionManager>, body: Value) -> (StatusCode, Value) {
    send(manager, Method::POST, "/sessions", Some(body)).await
}

#[tokio::test]
async fn health_reports_session_count() {
    let (_launcher, manager) = manager();
    manager.create("demo", "/tmp/demo", None).await;

    let (status, body) = send(&manager, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "sessions": 1}));
}

#[tokio::test]
async fn create_starts_session_and_returns_info() {
    let (launcher, manager) = manager();

    let (status, body) = create(
        &manager,
        json!({"project": "demo", "project_path": "/tmp/demo", "model": "opus", "message": "hi"}),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["project"], "demo");
    assert_eq!(body["model"], "opus");
    assert_eq!(body["status"], "Busy");
    assert_eq!(body["turn_count"], 1);
    assert_eq!(body["event_count"], 1);
    assert!(body["created_at"].as_u64().unwrap() > 0);

    let mut agent = launcher.next_agent().await;
    assert_eq!(agent.next_json().await["message"]["content"], "hi");
}

#[tokio::test]
async fn create_with_resume_passes_external_id() {
    let (launcher, manager) = manager();

    let (status, body) = create(
        &manager,
        json!({"project": "demo", "project_path": "/tmp/demo", "resume": "ext-42"}),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "Ready");
    assert_eq!(body["external_session_id"], "ext-42");
    assert_eq!(
        launcher.next_agent().await.request.resume_session.as_deref(),
        Some("ext-42")
    );
}

#[tokio::test]
async fn create_launch_failure_is_bad_gateway_and_not_kept() {
    let (launcher, manager) = manager();
    launcher.fail_next_launch("claude missing");

    let (status, body) = create(
        &manager,
        json!({"project": "demo", "project_path": "/tmp/demo"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "launch_failed");
    assert!(manager.is_empty().await);
}

#[tokio::test]
async fn malformed_body_is_decode_error() {
    let (_launcher, manager) = manager();

    let (status, body) = create(&manager, json!({"project": 7})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "decode_error");
    assert!(manager.is_empty().await);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (_launcher, manager) = manager();

    for (method, uri) in [
        (Method::GET, "/sessions/nope"),
        (Method::DELETE, "/sessions/nope"),
        (Method::POST, "/sessions/nope/interrupt"),
    ] {
        let (status, body) = send(&manager, method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["error"], "not_found");
    }
}

#[tokio::test]
async fn list_returns_sessions_oldest_first() {
    let (_launcher, manager) = manager();
    let first = manager.create("a", "/tmp/a", None).await;
    let second = manager.create("b", "/tmp/b", None).await;

    let (status, body) = send(&manager, Method::GET, "/sessions", None).await;

    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, [first.id(), second.id()]);
}

#[tokio::test]
async fn message_interrupt_and_permission_reach_agent() {
    let (launcher, manager) = manager();
    let (_, created) = create(
        &manager,
        json!({"project": "demo", "project_path": "/tmp/demo"}),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();
    let mut agent = launcher.next_agent().await;

    let (status, body) = send(
        &manager,
        Method::POST,
        &format!("/sessions/{id}/messages"),
        Some(json!({"content": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "Busy");
    assert_eq!(agent.next_json().await["message"]["content"], "hello");

    let (status, body) = send(
        &manager,
        Method::POST,
        &format!("/sessions/{id}/interrupt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let line = agent.next_json().await;
    assert_eq!(line["request_id"], body["request_id"]);

    let (status, _) = send(
        &manager,
        Method::POST,
        &format!("/sessions/{id}/permissions"),
        Some(json!({"request_id": "req_3", "allow": true, "updated_input": {"path": "a.rs"}})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(
        agent.next_json().await["response"]["response"]["updated_input"],
        json!({"path": "a.rs"})
    );
}

#[tokio::test]
async fn delete_closes_and_removes() {
    let (launcher, manager) = manager();
    let (_, created) = create(
        &manager,
        json!({"project": "demo", "project_path": "/tmp/demo"}),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();
    let agent = launcher.next_agent().await;

    let (status, _) = send(&manager, Method::DELETE, &format!("/sessions/{id}"), None).await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(agent.was_killed());
    let (status, _) = send(&manager, Method::GET, &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn message_to_closed_session_conflicts() {
    let (launcher, manager) = manager();
    let session = manager.create("demo", "/tmp/demo", None).await;
    session.start("").await.unwrap();
    session.close().await;

    let (status, body) = send(
        &manager,
        Method::POST,
        &format!("/sessions/{}/messages", session.id()),
        Some(json!({"content": "hi"})),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_closed");
    assert_eq!(launcher.launch_count(), 1);
}
