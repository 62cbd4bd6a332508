//! Upload and job endpoints.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vantage_supervisor::{JobKind, JobState};
use vantage_workspace::{ApplyReport, FileSet};

use crate::error::ServerError;
use crate::registry::PreviewInfo;
use crate::state::AppState;

/// Body of an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub files: FileSet,
}

/// Optional body of a fetch or preview request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub files: Option<FileSet>,
}

/// Acknowledgement of a started job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStarted {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub state: JobState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillJobResponse {
    pub killed: bool,
}

/// Parse an optional JSON body; an empty body means "no files".
fn parse_job_request(body: &Bytes) -> Result<JobRequest, ServerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(JobRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ServerError::BadRequest(format!("Invalid body: {e}")))
}

/// POST /api/sessions/{id}/upload - Apply a file set.
pub async fn upload_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<ApplyReport>, ServerError> {
    Ok(Json(state.registry.upload(&id, request.files).await?))
}

/// POST /api/sessions/{id}/fetch - Start a fetch job.
///
/// Answers once the process is running; progress arrives on the channel.
pub async fn fetch_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<JobStarted>), ServerError> {
    let request = parse_job_request(&body)?;
    let handle = state.registry.fetch(&id, request.files).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobStarted {
            job_id: handle.id(),
            kind: handle.kind(),
            state: handle.state(),
        }),
    ))
}

/// POST /api/sessions/{id}/preview - Start (or reuse) the preview server.
///
/// Answers once the server printed its readiness marker.
pub async fn preview_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<PreviewInfo>, ServerError> {
    let request = parse_job_request(&body)?;
    Ok(Json(state.registry.preview(&id, request.files).await?))
}

/// DELETE /api/sessions/{id}/jobs/{kind} - Kill one job.
pub async fn kill_job_handler(
    State(state): State<AppState>,
    Path((id, kind)): Path<(String, String)>,
) -> Result<Json<KillJobResponse>, ServerError> {
    let kind: JobKind = kind.parse().map_err(ServerError::BadRequest)?;
    let killed = state.registry.kill_job(&id, kind).await?;
    Ok(Json(KillJobResponse { killed }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_job_request() {
        assert!(parse_job_request(&Bytes::new()).unwrap().files.is_none());
        assert!(parse_job_request(&Bytes::from_static(b" \n")).unwrap().files.is_none());
        assert!(parse_job_request(&Bytes::from_static(b"{}")).unwrap().files.is_none());
    }

    #[test]
    fn test_parse_job_request_with_files() {
        let body = Bytes::from_static(br#"{"files":{"settings.yml":"S1"}}"#);
        let files = parse_job_request(&body).unwrap().files.unwrap();
        assert_eq!(files.len(), 1);

        assert!(matches!(
            parse_job_request(&Bytes::from_static(b"{nope")),
            Err(ServerError::BadRequest(_))
        ));
    }
}
