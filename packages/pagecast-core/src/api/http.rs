//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the orchestrator and serialize
//! its results. Generated playlists and segments are served as static files
//! under `/cast/{id}/...` straight from the sessions directory.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::api::AppState;
use crate::error::PagecastError;
use crate::protocol_constants::SERVICE_ID;
use crate::session::{SessionStatus, StartRequest};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cast_dir = ServeDir::new(&state.sessions_dir);
    Router::new()
        .route("/healthz", get(health_check))
        .route("/sessions", get(list_sessions).post(start_session))
        .route("/sessions/{id}/status", get(session_status))
        .route("/sessions/{id}", axum::routing::delete(stop_session))
        .route("/receivers", get(list_receivers))
        .nest_service("/cast", cast_dir)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe: "Is the process running?"
async fn health_check() -> impl IntoResponse {
    Json(json!({ "ok": true, "service": SERVICE_ID }))
}

/// Creates a session and dispatches its orchestration task.
///
/// Returns immediately with the session in `starting`; the playlist may take
/// a few seconds to populate.
async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<SessionStatus>, PagecastError> {
    let session = state.orchestrator.start_session(request)?;
    Ok(Json(session.status()))
}

/// Lists all live sessions.
async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "sessions": state.orchestrator.list() }))
}

/// Status for one session.
async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatus>, PagecastError> {
    Ok(Json(state.orchestrator.status(&id)?))
}

/// Stops a session and deletes its record and artifacts.
async fn stop_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, PagecastError> {
    state.orchestrator.stop_session(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

/// Lists receivers currently visible to discovery.
async fn list_receivers(State(state): State<AppState>) -> impl IntoResponse {
    let receivers = state.sender.discover().await;
    Json(json!({ "receivers": receivers }))
}
