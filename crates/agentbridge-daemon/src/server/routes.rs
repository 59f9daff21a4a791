//! HTTP handlers.

use std::path::PathBuf;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use super::AppState;
use super::error::ApiError;
use crate::session::SessionInfo;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub project: String,
    pub project_path: PathBuf,
    #[serde(default)]
    pub model: Option<String>,
    /// First user turn; empty starts the session idle.
    #[serde(default)]
    pub message: String,
    /// Agent-side conversation to continue instead of starting fresh.
    #[serde(default)]
    pub resume: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct PermissionRequest {
    pub request_id: String,
    pub allow: bool,
    #[serde(default)]
    pub updated_input: Option<Value>,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.manager.len().await,
    }))
}

/// `GET /sessions`
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.manager.list().await)
}

/// `POST /sessions`
pub async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionInfo>), ApiError> {
    let Json(req) = payload?;

    let session = match req.resume.as_deref().filter(|ext| !ext.is_empty()) {
        Some(ext) => {
            state
                .manager
                .resume(ext, &req.project, req.project_path, req.model)
                .await?
        }
        None => {
            let session = state
                .manager
                .create(&req.project, req.project_path, req.model)
                .await;
            if let Err(e) = session.start(&req.message).await {
                let _ = state.manager.delete(session.id()).await;
                return Err(e.into());
            }
            session
        }
    };

    Ok((StatusCode::CREATED, Json(session.info().await)))
}

/// `GET /sessions/{id}`
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    let session = state.manager.require(&id).await?;
    Ok(Json(session.info().await))
}

/// `DELETE /sessions/{id}`
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.manager.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /sessions/{id}/messages`
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionInfo>), ApiError> {
    let Json(req) = payload?;
    let session = state.manager.require(&id).await?;
    session.send_message(&req.content).await?;
    Ok((StatusCode::ACCEPTED, Json(session.info().await)))
}

/// `POST /sessions/{id}/interrupt`
pub async fn interrupt(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let session = state.manager.require(&id).await?;
    let request_id = session.interrupt().await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "request_id": request_id }))))
}

/// `POST /sessions/{id}/permissions`
pub async fn respond_permission(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<PermissionRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = payload?;
    let session = state.manager.require(&id).await?;
    session
        .respond_permission(&req.request_id, req.allow, req.updated_input)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
