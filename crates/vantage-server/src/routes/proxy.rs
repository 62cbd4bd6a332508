//! Preview proxy endpoint.

use axum::{
    extract::{Request, State},
    response::Response,
};

use crate::error::{Result, ServerError};
use crate::proxy::{SESSION_COOKIE, SESSION_HEADER, session_from_headers};
use crate::state::AppState;

/// ANY <proxy_prefix>/* - Forward to the caller's preview server.
///
/// The session is identified by the `vantage_session` cookie set on the
/// channel upgrade, or by the `x-vantage-session` header.
pub async fn proxy_handler(State(state): State<AppState>, request: Request) -> Result<Response> {
    let raw = session_from_headers(request.headers()).ok_or_else(|| {
        ServerError::BadRequest(format!(
            "Missing '{SESSION_COOKIE}' cookie or '{SESSION_HEADER}' header"
        ))
    })?;
    let session = state.registry.get(&raw)?;
    state.proxy.route(&session, request).await
}
