//! Session diagnostics and teardown endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use vantage_workspace::FileSet;

use crate::error::ServerError;
use crate::session::{RemoteRef, SessionSummary};
use crate::state::AppState;

/// Response for list sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    /// All registered sessions, oldest first.
    pub sessions: Vec<SessionSummary>,
    /// Total count.
    pub total: usize,
}

/// GET /api/sessions - List all sessions.
pub async fn list_sessions_handler(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    let sessions = state.registry.list();
    Json(ListSessionsResponse {
        total: sessions.len(),
        sessions,
    })
}

/// GET /api/sessions/{id} - One session.
pub async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>, ServerError> {
    let session = state.registry.get(&id)?;
    Ok(Json(session.summary()))
}

/// DELETE /api/sessions/{id} - Kill jobs and remove the workspace now.
pub async fn delete_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    state.registry.remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/sessions/{id}/files - Current snapshot of the workspace.
pub async fn session_files_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileSet>, ServerError> {
    Ok(Json(state.registry.snapshot(&id).await?))
}

/// POST /api/sessions/{id}/remote - Record the repository connector's result.
pub async fn set_remote_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(remote): Json<RemoteRef>,
) -> Result<Json<SessionSummary>, ServerError> {
    let session = state.registry.get(&id)?;
    session.touch();
    session.set_remote(remote);
    Ok(Json(session.summary()))
}
