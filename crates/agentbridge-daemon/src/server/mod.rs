//! HTTP + WebSocket surface over a [`SessionManager`].

pub mod error;
pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::session::SessionManager;

pub use error::ApiError;
pub use ws::handle_observer_text;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

impl AppState {
    pub const fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/sessions",
            get(routes::list_sessions).post(routes::create_session),
        )
        .route(
            "/sessions/{id}",
            get(routes::get_session).delete(routes::delete_session),
        )
        .route("/sessions/{id}/messages", post(routes::send_message))
        .route("/sessions/{id}/interrupt", post(routes::interrupt))
        .route("/sessions/{id}/permissions", post(routes::respond_permission))
        .route("/sessions/{id}/ws", get(ws::observer_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
