//! Realtime channel between a client and its session.
//!
//! - `protocol` - Frame types (ClientMessage, ServerMessage)
//! - `connection` - Per-socket loop forwarding session events

mod connection;
mod protocol;

use axum::{
    extract::{Query, State, ws::WebSocketUpgrade},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::error::ServerError;
use crate::proxy::session_cookie;
use crate::state::AppState;

pub use protocol::{ClientMessage, ServerMessage};

/// Query parameters of the channel upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    /// Session to re-attach to.
    pub session: Option<String>,
}

/// GET /ws - Channel upgrade handler.
///
/// Re-attaches to `?session=<id>` when it is still registered, otherwise
/// creates a new session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
) -> Response {
    let resumed = query
        .session
        .as_deref()
        .and_then(|id| state.registry.get(id).ok());

    let session = match resumed {
        Some(session) => {
            tracing::info!(session_id = %session.id(), "Session resumed");
            session
        }
        None => {
            if let Some(stale) = query.session.as_deref() {
                tracing::debug!(requested = stale, "Requested session is gone, creating a new one");
            }
            match state.registry.create_session() {
                Ok(session) => session,
                Err(e) => return e.into_response(),
            }
        }
    };

    let cookie = session_cookie(&session.id().to_string());
    let shutdown = state.shutdown.clone();
    let mut response =
        ws.on_upgrade(move |socket| connection::handle_socket(socket, session, shutdown));
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
            response
        }
        Err(e) => ServerError::Internal(format!("Invalid session cookie: {e}")).into_response(),
    }
}
