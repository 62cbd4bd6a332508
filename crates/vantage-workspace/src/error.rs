//! Error types for workspace operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while materializing or reading a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Filesystem failure on a specific path.
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The workspace (or one of its required root files) does not exist.
    #[error("Not found: {0}")]
    NotFound(PathBuf),

    /// A path is not a safe, relative, slash-separated path.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A session identifier cannot be used as a directory name.
    #[error("Invalid session ID: {0}")]
    InvalidSessionId(String),

    /// Base64 payload could not be decoded.
    #[error("Invalid base64 content for {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: base64::DecodeError,
    },
}

impl WorkspaceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for workspace operations.
pub type Result<T> = std::result::Result<T, WorkspaceError>;
