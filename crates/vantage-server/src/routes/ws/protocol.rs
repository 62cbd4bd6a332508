//! Channel protocol types for client-server communication.

use serde::{Deserialize, Serialize};
use vantage_supervisor::{JobKind, JobStatus, SessionEvent};
use vantage_workspace::Change;

/// Messages from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keep the session alive.
    Ping,
}

/// Messages from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The session this channel is bound to. Always the first frame.
    Id { session_id: String },
    /// One line of job output.
    Message { target: JobKind, text: String },
    /// Coarse job progress.
    Status { target: JobKind, status: JobStatus },
    /// A job process exited.
    Finish { target: JobKind, code: i32 },
    /// Workspace delta produced by a fetch.
    Files { changes: Vec<Change> },
    /// Protocol-level error.
    Error { code: String, message: String },
    /// Reply to [`ClientMessage::Ping`].
    Pong,
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Message { target, text } => Self::Message { target, text },
            SessionEvent::Status { target, status } => Self::Status { target, status },
            SessionEvent::Finish { target, code } => Self::Finish { target, code },
            SessionEvent::Files { changes } => Self::Files { changes },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_message_wire_format() {
        let id = ServerMessage::Id {
            session_id: "abc".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&id).unwrap(),
            json!({"type": "id", "session_id": "abc"})
        );

        let status: ServerMessage =
            SessionEvent::status(JobKind::Preview, JobStatus::Success).into();
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"type": "status", "target": "preview", "status": "success"})
        );

        let files: ServerMessage = SessionEvent::Files {
            changes: vec![Change::deleted("landscape.yml")],
        }
        .into();
        assert_eq!(
            serde_json::to_value(&files).unwrap(),
            json!({"type": "files", "changes": [{"kind": "deleted", "path": "landscape.yml"}]})
        );

        assert_eq!(
            serde_json::to_value(ServerMessage::Pong).unwrap(),
            json!({"type": "pong"})
        );
    }

    #[test]
    fn test_client_message_parse() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"chat"}"#).is_err());
    }
}
