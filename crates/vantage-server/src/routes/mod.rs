//! HTTP routes.

pub mod health;
pub mod jobs;
pub mod proxy;
pub mod sessions;
pub mod ws;

pub use health::{HealthResponse, health_routes};
pub use jobs::{
    JobRequest, JobStarted, KillJobResponse, UploadRequest, fetch_handler, kill_job_handler,
    preview_handler, upload_handler,
};
pub use proxy::proxy_handler;
pub use sessions::{
    ListSessionsResponse, delete_session_handler, get_session_handler, list_sessions_handler,
    session_files_handler, set_remote_handler,
};
pub use ws::{ClientMessage, ServerMessage, ws_handler};
