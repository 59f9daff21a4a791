//! HTTP error mapping.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::warn;

use crate::session::SessionError;

/// A [`SessionError`] rendered as `{error: <kind>, message: <text>}`.
#[derive(Debug)]
pub struct ApiError(pub SessionError);

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        match self.0 {
            SessionError::NotFound { .. } => StatusCode::NOT_FOUND,
            SessionError::Closed { .. }
            | SessionError::NoActiveProcess { .. }
            | SessionError::NotStarted { .. }
            | SessionError::AlreadyStarted { .. } => StatusCode::CONFLICT,
            SessionError::Decode(_) => StatusCode::BAD_REQUEST,
            SessionError::Launch(_) | SessionError::Write { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(SessionError::Decode(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(kind = self.0.kind(), error = %self.0, "Request failed");
        }
        let body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::LaunchError;

    #[test]
    fn statuses_follow_error_kind() {
        let id = || "s1".to_string();
        assert_eq!(
            ApiError(SessionError::NotFound { id: id() }).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(SessionError::Closed { id: id() }).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(SessionError::Decode("bad".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(SessionError::Launch(LaunchError::SpawnFailed {
                reason: "enoent".into()
            }))
            .status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
