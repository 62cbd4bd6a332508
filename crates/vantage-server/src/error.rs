//! Error types for the server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use vantage_supervisor::SupervisorError;
use vantage_workspace::{ApplyReport, FailedPath, WorkspaceError};

/// Server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The session id is not registered (never was, or was reclaimed).
    #[error("Unknown session: {id}")]
    UnknownSession { id: String, known: Vec<String> },

    /// The per-session lock could not be acquired in time.
    #[error("Session {0} is busy")]
    SessionBusy(String),

    /// A file set was only partially applied.
    #[error("Failed to apply {} path(s)", .0.failed.len())]
    Workspace(ApplyReport),

    /// Filesystem failure outside of a file-set apply.
    #[error(transparent)]
    WorkspaceIo(#[from] WorkspaceError),

    /// Starting or supervising a job failed.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// No preview has been started for the session.
    #[error("No preview server has been started for session {0}")]
    ProxyNotReady(String),

    /// The session's preview server is no longer running.
    #[error("Preview server for session {0} is not running")]
    ProxyNotRunning(String),

    /// The preview server could not be reached or answered with garbage.
    #[error("Preview upstream error: {0}")]
    Upstream(String),

    /// Bad request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Currently registered sessions, for `unknown_session`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_sessions: Option<Vec<String>>,
    /// Paths that were applied, for `workspace_error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<Vec<String>>,
    /// Paths that failed, for `workspace_error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<Vec<FailedPath>>,
}

impl ServerError {
    /// HTTP status and machine-readable code.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::UnknownSession { .. } => (StatusCode::NOT_FOUND, "unknown_session"),
            ServerError::SessionBusy(_) => (StatusCode::CONFLICT, "session_busy"),
            ServerError::Workspace(_) => (StatusCode::INTERNAL_SERVER_ERROR, "workspace_error"),
            ServerError::WorkspaceIo(e) => match e {
                WorkspaceError::NotFound(_) => (StatusCode::NOT_FOUND, "workspace_not_found"),
                WorkspaceError::InvalidPath(_) | WorkspaceError::Decode { .. } => {
                    (StatusCode::BAD_REQUEST, "invalid_file")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "workspace_error"),
            },
            ServerError::Supervisor(e) => match e {
                SupervisorError::SpawnFailed { .. } => (StatusCode::BAD_GATEWAY, "spawn_failed"),
                SupervisorError::StartupFailed { .. } => {
                    (StatusCode::BAD_GATEWAY, "startup_failed")
                }
                SupervisorError::ReadinessTimeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "readiness_timeout")
                }
                SupervisorError::FetchTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "fetch_timeout"),
                SupervisorError::PortExhausted { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "port_exhausted")
                }
                SupervisorError::JobBusy(_) => (StatusCode::CONFLICT, "job_busy"),
            },
            ServerError::ProxyNotReady(_) => (StatusCode::SERVICE_UNAVAILABLE, "proxy_not_ready"),
            ServerError::ProxyNotRunning(_) => (StatusCode::BAD_GATEWAY, "proxy_not_running"),
            ServerError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.to_string();

        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(status = %status, code, error = %message, "Server error");
        } else {
            tracing::warn!(status = %status, code, error = %message, "Client error");
        }

        let mut body = ErrorResponse {
            code: code.to_string(),
            message,
            known_sessions: None,
            applied: None,
            failed: None,
        };
        match self {
            ServerError::UnknownSession { known, .. } => body.known_sessions = Some(known),
            ServerError::Workspace(report) => {
                let mut applied = report.written;
                applied.extend(report.unchanged);
                applied.extend(report.deleted);
                body.applied = Some(applied);
                body.failed = Some(report.failed);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_supervisor::JobKind;

    async fn body_json(err: ServerError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_unknown_session_lists_known() {
        let (status, json) = body_json(ServerError::UnknownSession {
            id: "nope".to_string(),
            known: vec!["a".to_string(), "b".to_string()],
        })
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "unknown_session");
        assert_eq!(json["known_sessions"], serde_json::json!(["a", "b"]));
        assert!(json.get("failed").is_none());
    }

    #[tokio::test]
    async fn test_partial_apply_reports_paths() {
        let report = ApplyReport {
            written: vec!["settings.yml".to_string()],
            unchanged: vec!["landscape.yml".to_string()],
            failed: vec![FailedPath {
                path: "cached_logos/a.svg".to_string(),
                error: "disk full".to_string(),
            }],
            ..Default::default()
        };
        let (status, json) = body_json(ServerError::Workspace(report)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["applied"], serde_json::json!(["settings.yml", "landscape.yml"]));
        assert_eq!(json["failed"][0]["path"], "cached_logos/a.svg");
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServerError::ProxyNotReady("s".into()), StatusCode::SERVICE_UNAVAILABLE),
            (ServerError::ProxyNotRunning("s".into()), StatusCode::BAD_GATEWAY),
            (
                ServerError::Supervisor(SupervisorError::StartupFailed { code: 1 }),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ServerError::Supervisor(SupervisorError::PortExhausted { start: 1, end: 2 }),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ServerError::Supervisor(SupervisorError::JobBusy(JobKind::Fetch)),
                StatusCode::CONFLICT,
            ),
            (ServerError::SessionBusy("s".into()), StatusCode::CONFLICT),
            (ServerError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status_and_code().0, expected, "{err}");
        }
    }
}
